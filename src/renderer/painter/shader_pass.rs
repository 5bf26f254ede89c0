use std::sync::Arc;

use anyhow::Result;

use crate::{
    material::Node,
    renderer::{
        blend::BlendMode,
        painter::{InputTextures, PaintContext, Painter, PainterBuildContext},
        program::{
            Program, ProgramDesc, ProgramKey, texture_bind_group_entries, texture_entries,
            uniform_entry,
        },
        uniforms::ParamLayout,
        wgsl::build_shader_pass_module,
    },
    schema::{NodeSpec, PainterKind},
};

/// Fullscreen fragment pass. All nodes of one type share the program; each
/// node owns its parameter buffer.
pub struct ShaderPassPainter {
    program: Arc<Program>,
    layout: ParamLayout,
    uniforms: wgpu::Buffer,
    input_sockets: Vec<String>,
}

impl ShaderPassPainter {
    pub fn new(ctx: &mut PainterBuildContext<'_>, spec: &NodeSpec) -> Result<Self> {
        let source = build_shader_pass_module(spec)?;
        let device = ctx.device;
        let label = format!("node.{}", spec.type_path);

        let params_entries = [uniform_entry(
            0,
            wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        )];
        let input_entries = texture_entries(spec.inputs.len());
        let program = ctx
            .programs
            .get_or_build(ProgramKey::for_source(&source), || {
                Program::compile(
                    device,
                    &ProgramDesc {
                        label: &label,
                        source: &source,
                        bind_groups: &[&params_entries, &input_entries],
                        vertex_buffers: &[],
                        color_targets: spec.outputs.len(),
                        blend_modes: &[BlendMode::None],
                    },
                )
            })?;

        let layout = ParamLayout::for_spec(spec);
        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{label}.params")),
            size: layout.size_bytes(),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            program,
            layout,
            uniforms,
            input_sockets: spec.inputs.iter().map(|s| s.id.clone()).collect(),
        })
    }
}

impl Painter for ShaderPassPainter {
    fn kind(&self) -> PainterKind {
        PainterKind::ShaderPass
    }

    fn render(
        &mut self,
        ctx: &mut PaintContext<'_, '_>,
        node: &Node,
        spec: &NodeSpec,
        inputs: &InputTextures<'_>,
    ) -> Result<()> {
        let bytes = self.layout.pack(spec, node);
        ctx.queue.write_buffer(&self.uniforms, 0, &bytes);

        let params_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shader_pass.params"),
            layout: self.program.bind_group_layout(0)?,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: self.uniforms.as_entire_binding(),
            }],
        });

        let fallback = ctx.fallback;
        let views: Vec<(&wgpu::TextureView, &wgpu::Sampler)> = self
            .input_sockets
            .iter()
            .map(|socket| {
                let texture = inputs.get(socket).copied().unwrap_or(fallback);
                (&texture.view, &texture.sampler)
            })
            .collect();
        let input_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shader_pass.inputs"),
            layout: self.program.bind_group_layout(1)?,
            entries: &texture_bind_group_entries(&views),
        });

        ctx.pass.set_pipeline(self.program.pipeline(BlendMode::None)?);
        ctx.pass.set_bind_group(0, &params_group, &[]);
        ctx.pass.set_bind_group(1, &input_group, &[]);
        ctx.pass.draw(0..3, 0..1);
        Ok(())
    }
}
