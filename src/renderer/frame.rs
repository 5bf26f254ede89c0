//! Drains the scheduler once per tick and settles every job it drained.

use std::{sync::Arc, time::Duration};

use anyhow::{Result, bail};

use crate::{
    material::FilterMode,
    renderer::{
        cache::ResourceCache,
        gpu::{GpuContext, GpuTexture},
        node_job::{Framebuffer, NodeJobContext, execute_node_job},
        painter::PainterRegistry,
        preview::PreviewRenderer,
    },
    scheduler::{JobError, PreviewJob, RenderJob, Scheduler},
};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Sleep between frames of the continuous loop.
    pub tick: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(16),
        }
    }
}

/// Outcome counts of one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub resolved: usize,
    pub rejected: usize,
}

impl FrameStats {
    pub fn total(&self) -> usize {
        self.resolved + self.rejected
    }
}

pub struct FrameRunner {
    gpu: Arc<GpuContext>,
    config: RunnerConfig,
    cache: ResourceCache,
    painters: PainterRegistry,
    framebuffer: Framebuffer,
    fallback: GpuTexture,
    preview: Option<PreviewRenderer>,
}

impl FrameRunner {
    pub fn new(gpu: Arc<GpuContext>, config: RunnerConfig) -> Self {
        let fallback = GpuTexture::new(
            &gpu.device,
            "fallback",
            [1, 1],
            FilterMode::Nearest,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        gpu.queue.write_texture(
            fallback.texture.as_image_copy(),
            &[0u8; 4],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        Self {
            gpu,
            config,
            cache: ResourceCache::new(),
            painters: PainterRegistry::builtin(),
            framebuffer: Framebuffer::default(),
            fallback,
            preview: None,
        }
    }

    pub fn gpu(&self) -> &Arc<GpuContext> {
        &self.gpu
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ResourceCache {
        &mut self.cache
    }

    pub fn painters_mut(&mut self) -> &mut PainterRegistry {
        &mut self.painters
    }

    /// Runs everything the scheduler has queued. Jobs scheduled while the
    /// frame runs wait for the next one.
    pub fn run_once(&mut self, scheduler: &mut Scheduler) -> FrameStats {
        let jobs = scheduler.drain();
        self.run_jobs(jobs)
    }

    /// Executes `jobs` in order. Every job is settled exactly once, and a
    /// failed job never stops the jobs after it.
    pub fn run_jobs(&mut self, jobs: Vec<RenderJob>) -> FrameStats {
        let mut stats = FrameStats::default();
        for job in jobs {
            let key = job.key();
            match self.execute(&job) {
                Ok(()) => {
                    log::debug!("{key:?} resolved");
                    stats.resolved += 1;
                }
                Err(err) => {
                    log::error!("{key:?} failed: {err:#}");
                    job.reject(JobError::new(err));
                    stats.rejected += 1;
                }
            }
        }
        if stats.total() > 0 {
            log::debug!(
                "frame done: {} resolved, {} rejected",
                stats.resolved,
                stats.rejected
            );
        }
        stats
    }

    fn execute(&mut self, job: &RenderJob) -> Result<()> {
        match job {
            RenderJob::Node(job) => {
                let outputs = execute_node_job(
                    NodeJobContext {
                        gpu: &self.gpu,
                        cache: &mut self.cache,
                        painters: &self.painters,
                        framebuffer: &mut self.framebuffer,
                        fallback: &self.fallback,
                    },
                    job,
                )?;
                job.result.resolve(outputs);
            }
            RenderJob::Preview(job) => {
                let bitmap = self.render_preview(job)?;
                job.result.resolve(Arc::new(bitmap));
            }
        }
        Ok(())
    }

    fn render_preview(&mut self, job: &PreviewJob) -> Result<image::RgbaImage> {
        if self.preview.is_none() {
            self.preview = Some(PreviewRenderer::new(&self.gpu.device, &mut self.cache)?);
        }
        let Some(preview) = self.preview.as_mut() else {
            bail!("preview renderer unavailable");
        };
        preview.render(&self.gpu, &self.cache, &self.fallback, job)
    }
}
