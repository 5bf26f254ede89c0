use std::sync::Arc;

use anyhow::{Result, bail};
use bytemuck::{Pod, Zeroable};

use crate::{
    material::Node,
    renderer::{
        blend::BlendMode,
        painter::{
            InputTextures, PaintContext, Painter, PainterBuildContext, ScatterParams, TileParams,
            scatter_elements, tile_elements,
        },
        program::{Program, ProgramDesc, ProgramKey, texture_bind_group_entries, texture_entries},
        wgsl::INSTANCED_SHADER,
    },
    schema::{NodeSpec, PainterKind},
};

/// Input socket sampled by every instance.
pub const IMAGE_SOCKET: &str = "image";

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex { position: [-0.5, -0.5], uv: [0.0, 1.0] },
    QuadVertex { position: [0.5, -0.5], uv: [1.0, 1.0] },
    QuadVertex { position: [0.5, 0.5], uv: [1.0, 0.0] },
    QuadVertex { position: [-0.5, 0.5], uv: [0.0, 0.0] },
];

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

const INSTANCE_STRIDE: u64 = 64;

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];
const INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 4] =
    wgpu::vertex_attr_array![2 => Float32x4, 3 => Float32x4, 4 => Float32x4, 5 => Float32x4];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    Scatter,
    Tile,
}

/// Scatter and tile share this painter: one program for both, a unit quad,
/// and a per-node instance buffer of column-major matrices.
pub struct InstancedPainter {
    pattern: Pattern,
    program: Arc<Program>,
    quad_vertices: wgpu::Buffer,
    quad_indices: wgpu::Buffer,
    instances: Option<wgpu::Buffer>,
    instance_capacity: u64,
}

impl InstancedPainter {
    pub fn scatter(ctx: &mut PainterBuildContext<'_>) -> Result<Self> {
        Self::new(ctx, Pattern::Scatter)
    }

    pub fn tile(ctx: &mut PainterBuildContext<'_>) -> Result<Self> {
        Self::new(ctx, Pattern::Tile)
    }

    fn new(ctx: &mut PainterBuildContext<'_>, pattern: Pattern) -> Result<Self> {
        let device = ctx.device;
        let input_entries = texture_entries(1);
        let program = ctx
            .programs
            .get_or_build(ProgramKey::for_source(INSTANCED_SHADER), || {
                Program::compile(
                    device,
                    &ProgramDesc {
                        label: "painter.instanced",
                        source: INSTANCED_SHADER,
                        bind_groups: &[&input_entries],
                        vertex_buffers: &[
                            wgpu::VertexBufferLayout {
                                array_stride: std::mem::size_of::<QuadVertex>() as u64,
                                step_mode: wgpu::VertexStepMode::Vertex,
                                attributes: &QUAD_ATTRIBUTES,
                            },
                            wgpu::VertexBufferLayout {
                                array_stride: INSTANCE_STRIDE,
                                step_mode: wgpu::VertexStepMode::Instance,
                                attributes: &INSTANCE_ATTRIBUTES,
                            },
                        ],
                        color_targets: 1,
                        blend_modes: &BlendMode::ALL,
                    },
                )
            })?;

        let quad_vertices = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("painter.instanced.quad.vertices"),
            size: std::mem::size_of_val(&QUAD_VERTICES) as u64,
            usage: wgpu::BufferUsages::VERTEX,
            mapped_at_creation: true,
        });
        quad_vertices
            .slice(..)
            .get_mapped_range_mut()
            .copy_from_slice(bytemuck::cast_slice(&QUAD_VERTICES));
        quad_vertices.unmap();

        // 6 u16 indices are 12 bytes, already a multiple of COPY_BUFFER_ALIGNMENT.
        let quad_indices = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("painter.instanced.quad.indices"),
            size: std::mem::size_of_val(&QUAD_INDICES) as u64,
            usage: wgpu::BufferUsages::INDEX,
            mapped_at_creation: true,
        });
        quad_indices
            .slice(..)
            .get_mapped_range_mut()
            .copy_from_slice(bytemuck::cast_slice(&QUAD_INDICES));
        quad_indices.unmap();

        Ok(Self {
            pattern,
            program,
            quad_vertices,
            quad_indices,
            instances: None,
            instance_capacity: 0,
        })
    }

    fn ensure_instance_capacity(&mut self, device: &wgpu::Device, count: u64) {
        if self.instances.is_some() && self.instance_capacity >= count {
            return;
        }
        let capacity = count.next_power_of_two().max(16);
        self.instances = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("painter.instanced.instances"),
            size: capacity * INSTANCE_STRIDE,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        self.instance_capacity = capacity;
    }
}

impl Painter for InstancedPainter {
    fn kind(&self) -> PainterKind {
        match self.pattern {
            Pattern::Scatter => PainterKind::Scatter,
            Pattern::Tile => PainterKind::Tile,
        }
    }

    fn render(
        &mut self,
        ctx: &mut PaintContext<'_, '_>,
        node: &Node,
        spec: &NodeSpec,
        inputs: &InputTextures<'_>,
    ) -> Result<()> {
        let (elements, blend) = match self.pattern {
            Pattern::Scatter => {
                let params = ScatterParams::from_node(spec, node);
                (scatter_elements(&params), params.blend)
            }
            Pattern::Tile => {
                let params = TileParams::from_node(spec, node);
                (tile_elements(&params), params.blend)
            }
        };
        if elements.is_empty() {
            log::debug!("node {}: no instances to draw", node.id);
            return Ok(());
        }

        let matrices: Vec<[f32; 16]> = elements.iter().map(|e| e.matrix()).collect();
        let count = matrices.len() as u64;
        let device = ctx.device;
        self.ensure_instance_capacity(device, count);
        let Some(instances) = self.instances.as_ref() else {
            bail!("node {}: instance buffer missing", node.id);
        };
        ctx.queue
            .write_buffer(instances, 0, bytemuck::cast_slice(&matrices));

        let image = inputs.get(IMAGE_SOCKET).copied().unwrap_or(ctx.fallback);
        let image_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("painter.instanced.image"),
            layout: self.program.bind_group_layout(0)?,
            entries: &texture_bind_group_entries(&[(&image.view, &image.sampler)]),
        });

        ctx.pass.set_pipeline(self.program.pipeline(blend)?);
        ctx.pass.set_bind_group(0, &image_group, &[]);
        ctx.pass.set_vertex_buffer(0, self.quad_vertices.slice(..));
        ctx.pass
            .set_vertex_buffer(1, instances.slice(..count * INSTANCE_STRIDE));
        ctx.pass
            .set_index_buffer(self.quad_indices.slice(..), wgpu::IndexFormat::Uint16);
        ctx.pass
            .draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..count as u32);
        Ok(())
    }
}
