//! Lit ground-plane preview of a material.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bytemuck::{Pod, Zeroable};
use image::RgbaImage;

use crate::{
    material::FilterMode,
    renderer::{
        blend::BlendMode,
        cache::ResourceCache,
        gpu::{GpuContext, GpuTexture, read_texture_rgba8},
        program::{Program, ProgramDesc, ProgramKey, texture_bind_group_entries, texture_entries, uniform_entry},
        wgsl::PREVIEW_SHADER,
    },
    scheduler::PreviewJob,
};

/// Channels the preview shader reads, in binding order.
pub const PREVIEW_CHANNELS: [&str; 2] = ["albedo", "height"];

const HEIGHT_SCALE: f32 = 4.0;
const LIGHT_DIR: [f32; 3] = [0.4, 0.8, 0.35];
const BACKGROUND: wgpu::Color = wgpu::Color {
    r: 0.12,
    g: 0.12,
    b: 0.13,
    a: 1.0,
};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PreviewUniforms {
    view_proj: [f32; 16],
    light_dir: [f32; 4],
    texel: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PlaneVertex {
    position: [f32; 3],
    uv: [f32; 2],
}

const PLANE_VERTICES: [PlaneVertex; 4] = [
    PlaneVertex { position: [-1.0, 0.0, -1.0], uv: [0.0, 0.0] },
    PlaneVertex { position: [1.0, 0.0, -1.0], uv: [1.0, 0.0] },
    PlaneVertex { position: [1.0, 0.0, 1.0], uv: [1.0, 1.0] },
    PlaneVertex { position: [-1.0, 0.0, 1.0], uv: [0.0, 1.0] },
];

const PLANE_INDICES: [u16; 6] = [0, 2, 1, 0, 3, 2];

const PLANE_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];

pub struct PreviewRenderer {
    program: Arc<Program>,
    uniforms: wgpu::Buffer,
    plane_vertices: wgpu::Buffer,
    plane_indices: wgpu::Buffer,
    target: Option<GpuTexture>,
}

impl PreviewRenderer {
    pub fn new(device: &wgpu::Device, cache: &mut ResourceCache) -> Result<Self> {
        let uniform_entries = [uniform_entry(
            0,
            wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        )];
        let channel_entries = texture_entries(PREVIEW_CHANNELS.len());
        let program = cache.get_program(ProgramKey::for_source(PREVIEW_SHADER), || {
            Program::compile(
                device,
                &ProgramDesc {
                    label: "preview",
                    source: PREVIEW_SHADER,
                    bind_groups: &[&uniform_entries, &channel_entries],
                    vertex_buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<PlaneVertex>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &PLANE_ATTRIBUTES,
                    }],
                    color_targets: 1,
                    blend_modes: &[BlendMode::None],
                },
            )
        })?;

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("preview.uniforms"),
            size: std::mem::size_of::<PreviewUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let plane_vertices = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("preview.plane.vertices"),
            size: std::mem::size_of_val(&PLANE_VERTICES) as u64,
            usage: wgpu::BufferUsages::VERTEX,
            mapped_at_creation: true,
        });
        plane_vertices
            .slice(..)
            .get_mapped_range_mut()
            .copy_from_slice(bytemuck::cast_slice(&PLANE_VERTICES));
        plane_vertices.unmap();

        let plane_indices = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("preview.plane.indices"),
            size: std::mem::size_of_val(&PLANE_INDICES) as u64,
            usage: wgpu::BufferUsages::INDEX,
            mapped_at_creation: true,
        });
        plane_indices
            .slice(..)
            .get_mapped_range_mut()
            .copy_from_slice(bytemuck::cast_slice(&PLANE_INDICES));
        plane_indices.unmap();

        Ok(Self {
            program,
            uniforms,
            plane_vertices,
            plane_indices,
            target: None,
        })
    }

    pub fn render(
        &mut self,
        gpu: &GpuContext,
        cache: &ResourceCache,
        fallback: &GpuTexture,
        job: &PreviewJob,
    ) -> Result<RgbaImage> {
        let device = &gpu.device;
        let [width, height] = job.output_size;
        if width == 0 || height == 0 {
            bail!("preview of '{}' has an empty size", job.material_id);
        }
        gpu.check_texture_size(job.output_size)
            .with_context(|| format!("preview of '{}' cannot render", job.material_id))?;

        let mut channels: [&GpuTexture; PREVIEW_CHANNELS.len()] = [fallback; PREVIEW_CHANNELS.len()];
        for (name, source) in &job.channels {
            let Some(slot) = PREVIEW_CHANNELS.iter().position(|c| c == name) else {
                log::warn!("preview: unknown channel '{name}' ignored");
                continue;
            };
            let Some(addr) = source else {
                log::debug!("preview: no output node targets '{name}'");
                continue;
            };
            match cache.output_texture(addr) {
                Some(texture) => channels[slot] = texture,
                None => log::warn!("preview: channel '{name}' reads {addr}, which has not been rendered"),
            }
        }

        let height_size = channels[1].size;
        let uniforms = PreviewUniforms {
            view_proj: job.camera.view_proj,
            light_dir: [LIGHT_DIR[0], LIGHT_DIR[1], LIGHT_DIR[2], 0.0],
            texel: [
                1.0 / height_size[0].max(1) as f32,
                1.0 / height_size[1].max(1) as f32,
                HEIGHT_SCALE,
                0.0,
            ],
        };
        gpu.queue
            .write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("preview.uniforms"),
            layout: self.program.bind_group_layout(0)?,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: self.uniforms.as_entire_binding(),
            }],
        });
        let views: Vec<(&wgpu::TextureView, &wgpu::Sampler)> =
            channels.iter().map(|t| (&t.view, &t.sampler)).collect();
        let channel_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("preview.channels"),
            layout: self.program.bind_group_layout(1)?,
            entries: &texture_bind_group_entries(&views),
        });
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let encoded = self.encode(gpu, job, &uniform_group, &channel_group);
        let gpu_error = pollster::block_on(device.pop_error_scope());
        encoded?;
        if let Some(err) = gpu_error {
            self.target = None;
            bail!("preview of '{}': GPU validation failed: {err}", job.material_id);
        }

        let Some(target) = self.target.as_ref() else {
            bail!("preview of '{}' has no render target", job.material_id);
        };
        read_texture_rgba8(device, &gpu.queue, &target.texture, target.size)
            .with_context(|| format!("failed to read back preview of '{}'", job.material_id))
    }

    fn encode(
        &mut self,
        gpu: &GpuContext,
        job: &PreviewJob,
        uniform_group: &wgpu::BindGroup,
        channel_group: &wgpu::BindGroup,
    ) -> Result<()> {
        let device = &gpu.device;
        let pipeline = self.program.pipeline(BlendMode::None)?;
        if self.target.as_ref().is_some_and(|t| t.size != job.output_size) {
            self.target = None;
        }
        let target = self.target.get_or_insert_with(|| {
            GpuTexture::new(
                device,
                "preview.target",
                job.output_size,
                FilterMode::Linear,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            )
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("preview.encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("preview.pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(BACKGROUND),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, uniform_group, &[]);
            pass.set_bind_group(1, channel_group, &[]);
            pass.set_vertex_buffer(0, self.plane_vertices.slice(..));
            pass.set_index_buffer(self.plane_indices.slice(..), wgpu::IndexFormat::Uint16);
            pass.draw_indexed(0..PLANE_INDICES.len() as u32, 0, 0..1);
        }
        gpu.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}
