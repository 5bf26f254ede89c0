//! Executes one node job: paint into scratch attachments, copy them into the
//! node's cached output textures and read the results back.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};

use crate::{
    material::FilterMode,
    renderer::{
        cache::{ResourceCache, TextureId},
        gpu::{GpuContext, GpuTexture, read_texture_rgba8},
        painter::{InputTextures, PaintContext, PainterBuildContext, PainterRegistry},
    },
    scheduler::{NodeJob, NodeOutputs},
};

/// Scratch color attachments painters draw into. Output textures are only
/// sampled and copied, so a node can never render into a texture it reads.
#[derive(Default)]
pub(crate) struct Framebuffer {
    attachments: Vec<GpuTexture>,
    size: [u32; 2],
}

impl Framebuffer {
    /// Returns `count` attachments of `size`, recreating all of them when
    /// the size differs or more are needed.
    pub(crate) fn attachments(
        &mut self,
        device: &wgpu::Device,
        size: [u32; 2],
        count: usize,
    ) -> &[GpuTexture] {
        if self.size != size || self.attachments.len() < count {
            log::debug!(
                "framebuffer: {}x{} x{count} (was {}x{} x{})",
                size[0],
                size[1],
                self.size[0],
                self.size[1],
                self.attachments.len()
            );
            self.attachments = (0..count.max(self.attachments.len()))
                .map(|i| {
                    GpuTexture::new(
                        device,
                        &format!("framebuffer.{i}"),
                        size,
                        FilterMode::Nearest,
                        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                    )
                })
                .collect();
            self.size = size;
        }
        &self.attachments[..count]
    }
}

pub(crate) struct NodeJobContext<'a> {
    pub gpu: &'a GpuContext,
    pub cache: &'a mut ResourceCache,
    pub painters: &'a PainterRegistry,
    pub framebuffer: &'a mut Framebuffer,
    pub fallback: &'a GpuTexture,
}

pub(crate) fn execute_node_job(ctx: NodeJobContext<'_>, job: &NodeJob) -> Result<NodeOutputs> {
    let NodeJobContext {
        gpu,
        cache,
        painters,
        framebuffer,
        fallback,
    } = ctx;
    let device = &gpu.device;
    let node_id = job.node.id;
    let spec = job.spec.as_ref();

    // Painter first: a node that cannot be painted leaves its outputs alone.
    cache.get_or_create_painter(node_id, spec, |programs| {
        painters.build(&mut PainterBuildContext { device, programs }, spec)
    })?;

    if job.output_size.contains(&0) {
        bail!("node {node_id}: output size {:?} is empty", job.output_size);
    }
    gpu.check_texture_size(job.output_size)
        .with_context(|| format!("node {node_id} cannot render"))?;
    if spec.outputs.is_empty() {
        bail!("node {node_id} ('{}') declares no outputs", spec.type_path);
    }

    let mut input_ids: Vec<(String, TextureId)> = Vec::new();
    for (socket, source) in &job.inputs {
        let Some(addr) = source else {
            log::debug!("node {node_id}: input '{socket}' is unconnected");
            continue;
        };
        match cache.output_texture_id(addr) {
            Some(id) => input_ids.push((socket.clone(), id)),
            None => log::warn!("node {node_id}: input '{socket}' reads {addr}, which has not been rendered"),
        }
    }

    // Texture creation happens inside the scope too, so device errors reject
    // this job instead of reaching the uncaptured-error handler.
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let encoded = encode_node_job(gpu, cache, framebuffer, fallback, job, &input_ids);
    let gpu_error = pollster::block_on(device.pop_error_scope());
    let outputs = encoded?;
    if let Some(err) = gpu_error {
        bail!("node {node_id}: GPU validation failed: {err}");
    }

    let mut bitmaps = NodeOutputs::new();
    for (socket, id) in &outputs {
        let output = cache
            .texture(*id)
            .ok_or_else(|| anyhow!("output {node_id}.{socket} vanished from the cache"))?;
        let image = read_texture_rgba8(device, &gpu.queue, &output.texture, output.size)
            .with_context(|| format!("failed to read back {node_id}.{socket}"))?;
        bitmaps.insert(socket.clone(), Arc::new(image));
    }
    Ok(bitmaps)
}

/// Paints the node and copies the attachments into its output textures.
/// Returns the output socket ids with their cache texture ids.
fn encode_node_job(
    gpu: &GpuContext,
    cache: &mut ResourceCache,
    framebuffer: &mut Framebuffer,
    fallback: &GpuTexture,
    job: &NodeJob,
    input_ids: &[(String, TextureId)],
) -> Result<Vec<(String, TextureId)>> {
    let device = &gpu.device;
    let node_id = job.node.id;
    let spec = job.spec.as_ref();

    let mut outputs: Vec<(String, TextureId)> = Vec::with_capacity(spec.outputs.len());
    for socket in &spec.outputs {
        let id = cache.get_or_create_output_texture(
            device,
            node_id,
            &socket.id,
            job.output_size,
            job.filter,
        );
        let size = cache
            .texture(id)
            .map(|t| t.size)
            .ok_or_else(|| anyhow!("output {node_id}.{} vanished from the cache", socket.id))?;
        if size != job.output_size {
            bail!(
                "output {node_id}.{} is cached at {}x{} but the job renders {}x{}; invalidate textures after resizing",
                socket.id,
                size[0],
                size[1],
                job.output_size[0],
                job.output_size[1]
            );
        }
        outputs.push((socket.id.clone(), id));
    }

    let attachments = framebuffer.attachments(device, job.output_size, outputs.len());
    let (painter, textures) = cache.painter_and_textures(node_id);
    let painter = painter.ok_or_else(|| anyhow!("node {node_id} has no painter"))?;
    let inputs: InputTextures<'_> = input_ids
        .iter()
        .filter_map(|(socket, id)| textures.get(*id).map(|t| (socket.clone(), t)))
        .collect();
    let targets: Vec<&GpuTexture> = outputs
        .iter()
        .map(|(socket, id)| {
            textures
                .get(*id)
                .ok_or_else(|| anyhow!("output {node_id}.{socket} vanished from the cache"))
        })
        .collect::<Result<_>>()?;

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some(&format!("node.{node_id}.encoder")),
    });
    {
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = attachments
            .iter()
            .map(|a| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &a.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&format!("node.{node_id}.pass")),
            color_attachments: &color_attachments,
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        let mut paint = PaintContext {
            device,
            queue: &gpu.queue,
            pass: &mut pass,
            target_size: job.output_size,
            fallback,
        };
        painter
            .render(&mut paint, &job.node, spec, &inputs)
            .with_context(|| format!("node {node_id} failed to paint"))?;
    }

    let extent = wgpu::Extent3d {
        width: job.output_size[0],
        height: job.output_size[1],
        depth_or_array_layers: 1,
    };
    for (attachment, output) in attachments.iter().zip(&targets) {
        encoder.copy_texture_to_texture(
            attachment.texture.as_image_copy(),
            output.texture.as_image_copy(),
            extent,
        );
    }
    gpu.queue.submit(Some(encoder.finish()));
    Ok(outputs)
}
