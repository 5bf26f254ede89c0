use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use image::RgbaImage;

use crate::material::FilterMode;

/// Format of every node output texture and scratch attachment.
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const READBACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct GpuConfig {
    pub power_preference: wgpu::PowerPreference,
    /// Ask for a software adapter (useful on CI machines without a GPU).
    pub force_fallback_adapter: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
        }
    }
}

/// Device and queue shared by the frame runner and the export path.
pub struct GpuContext {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    pub fn headless(config: GpuConfig) -> Result<GpuContext> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: config.power_preference,
            compatible_surface: None,
            force_fallback_adapter: config.force_fallback_adapter,
        }))
        .context("no wgpu adapter available")?;

        let info = adapter.get_info();
        log::info!("using adapter '{}' ({:?})", info.name, info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("node-forge-compositor.device"),
            ..Default::default()
        }))
        .context("failed to create wgpu device")?;

        Ok(GpuContext {
            adapter,
            device,
            queue,
        })
    }

    /// Fails when a `size` texture cannot be created on this device.
    pub fn check_texture_size(&self, size: [u32; 2]) -> Result<()> {
        if size.contains(&0) {
            bail!("texture size {}x{} is empty", size[0], size[1]);
        }
        let max = self.device.limits().max_texture_dimension_2d;
        if size[0] > max || size[1] > max {
            bail!(
                "texture size {}x{} exceeds the device limit of {max}",
                size[0],
                size[1]
            );
        }
        Ok(())
    }
}

/// Texture plus the view and sampler painters bind it with.
#[derive(Debug)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub size: [u32; 2],
    pub filter: FilterMode,
}

impl GpuTexture {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        size: [u32; 2],
        filter: FilterMode,
        usage: wgpu::TextureUsages,
    ) -> GpuTexture {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size[0].max(1),
                height: size[1].max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OUTPUT_FORMAT,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = create_sampler(device, label, filter);
        GpuTexture {
            texture,
            view,
            sampler,
            size,
            filter,
        }
    }

    /// Output texture usage: sampled by consumers, copied into and read back.
    pub fn output_usage() -> wgpu::TextureUsages {
        wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC
    }
}

pub fn create_sampler(device: &wgpu::Device, label: &str, filter: FilterMode) -> wgpu::Sampler {
    let mode = match filter {
        FilterMode::Linear => wgpu::FilterMode::Linear,
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: mode,
        min_filter: mode,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

fn map_readback_buffer(device: &wgpu::Device, buffer: &wgpu::Buffer) -> Result<Vec<u8>> {
    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    let started = Instant::now();
    let mapped = loop {
        device
            .poll(wgpu::PollType::Poll)
            .map_err(|e| anyhow!("device poll failed during readback: {e}"))?;
        if let Ok(result) = rx.try_recv() {
            break result;
        }
        if started.elapsed() > READBACK_TIMEOUT {
            bail!("timed out after {READBACK_TIMEOUT:?} waiting for readback");
        }
        std::thread::sleep(Duration::from_millis(1));
    };
    mapped.map_err(|e| anyhow!("failed to map readback buffer: {e}"))?;

    let bytes = slice.get_mapped_range().to_vec();
    buffer.unmap();
    Ok(bytes)
}

/// Copies an RGBA8 texture into a tightly packed bitmap.
pub fn read_texture_rgba8(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    size: [u32; 2],
) -> Result<RgbaImage> {
    let [width, height] = size;
    let padded = padded_bytes_per_row(width);
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("node-forge-compositor.readback"),
        size: padded as u64 * height as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("node-forge-compositor.readback"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let bytes = map_readback_buffer(device, &buffer)?;
    let row = (width * 4) as usize;
    let mut pixels = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * padded as usize;
        pixels.extend_from_slice(&bytes[start..start + row]);
    }
    RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("readback produced a short buffer for {width}x{height}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_pad_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
    }
}
