//! Per-node rendering strategies.
//!
//! A painter draws one node into a render pass its caller opened; it never
//! binds or clears render targets itself. Painters are created once per node
//! through the [`PainterRegistry`] and then reused across frames.

mod instanced;
mod pattern;
mod shader_pass;

use std::collections::HashMap;

use anyhow::{Result, anyhow};

use crate::{
    material::Node,
    renderer::{gpu::GpuTexture, program::ProgramCache},
    schema::{NodeSpec, PainterKind},
};

pub use instanced::InstancedPainter;
pub use pattern::{
    InstanceElement, ScatterParams, TileParams, scatter_elements, tile_elements,
};
pub use shader_pass::ShaderPassPainter;

/// Input socket id to the upstream output texture. Unbound sockets are absent.
pub type InputTextures<'a> = HashMap<String, &'a GpuTexture>;

pub struct PaintContext<'a, 'p> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub pass: &'a mut wgpu::RenderPass<'p>,
    pub target_size: [u32; 2],
    /// 1x1 transparent texture bound in place of unbound inputs.
    pub fallback: &'a GpuTexture,
}

pub trait Painter {
    fn kind(&self) -> PainterKind;

    fn render(
        &mut self,
        ctx: &mut PaintContext<'_, '_>,
        node: &Node,
        spec: &NodeSpec,
        inputs: &InputTextures<'_>,
    ) -> Result<()>;
}

pub struct PainterBuildContext<'a> {
    pub device: &'a wgpu::Device,
    pub programs: &'a mut ProgramCache,
}

pub type PainterCtor = fn(&mut PainterBuildContext<'_>, &NodeSpec) -> Result<Box<dyn Painter>>;

/// Constructors per painter kind.
pub struct PainterRegistry {
    ctors: HashMap<PainterKind, PainterCtor>,
}

impl PainterRegistry {
    pub fn empty() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(PainterKind::ShaderPass, |ctx, spec| {
            Ok(Box::new(ShaderPassPainter::new(ctx, spec)?))
        });
        registry.register(PainterKind::Scatter, |ctx, _| {
            Ok(Box::new(InstancedPainter::scatter(ctx)?))
        });
        registry.register(PainterKind::Tile, |ctx, _| {
            Ok(Box::new(InstancedPainter::tile(ctx)?))
        });
        registry
    }

    pub fn register(&mut self, kind: PainterKind, ctor: PainterCtor) {
        self.ctors.insert(kind, ctor);
    }

    pub fn supports(&self, kind: PainterKind) -> bool {
        self.ctors.contains_key(&kind)
    }

    pub fn build(&self, ctx: &mut PainterBuildContext<'_>, spec: &NodeSpec) -> Result<Box<dyn Painter>> {
        let ctor = self.ctors.get(&spec.painter).ok_or_else(|| {
            anyhow!(
                "no painter registered for kind {:?} (node type '{}')",
                spec.painter,
                spec.type_path
            )
        })?;
        ctor(ctx, spec)
    }
}

impl Default for PainterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
