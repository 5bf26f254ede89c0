//! Facade the editor talks to: turns graph events into scheduled work, runs
//! frames and renders exports.

use std::{
    collections::BTreeMap,
    ops::ControlFlow,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use anyhow::{Context, Result, anyhow, bail};

use crate::{
    events::GraphEvent,
    material::{Material, NodeId},
    renderer::{
        camera::Camera,
        frame::{FrameRunner, FrameStats, RunnerConfig},
        gpu::GpuContext,
    },
    scheduler::{Bitmap, JobResult, NodeOutputs, ScheduledJob, Scheduler},
    schema::NodeSpecResolver,
};

/// Stops a running [`Compositor::run`] loop from another thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Bitmaps rendered by [`Compositor::export_outputs`].
#[derive(Debug, Clone, Default)]
pub struct MaterialExport {
    /// Output-role node id to its bitmaps per output socket.
    pub outputs: BTreeMap<NodeId, NodeOutputs>,
    pub preview: Option<Bitmap>,
}

pub struct Compositor {
    scheduler: Scheduler,
    runner: FrameRunner,
    stop: StopHandle,
}

impl Compositor {
    pub fn new(gpu: Arc<GpuContext>, specs: Arc<dyn NodeSpecResolver>) -> Self {
        Self::with_config(gpu, specs, RunnerConfig::default())
    }

    pub fn with_config(
        gpu: Arc<GpuContext>,
        specs: Arc<dyn NodeSpecResolver>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(specs),
            runner: FrameRunner::new(gpu, config),
            stop: StopHandle::default(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn runner(&self) -> &FrameRunner {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut FrameRunner {
        &mut self.runner
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Queues a single node. `None` when the material has no such node.
    pub fn schedule_node(
        &mut self,
        material: &Material,
        node_id: NodeId,
    ) -> Option<JobResult<NodeOutputs>> {
        let Some(node) = material.node(node_id) else {
            log::warn!("schedule_node: material '{}' has no node {node_id}", material.id);
            return None;
        };
        let spec = self.scheduler.spec_for(node);
        Some(self.scheduler.schedule_node(material, node, spec))
    }

    pub fn schedule_chain(&mut self, material: &Material, start: NodeId) -> Vec<ScheduledJob> {
        self.scheduler.schedule_chain(material, start)
    }

    pub fn schedule_preview(&mut self, material: &Material, camera: Camera) -> JobResult<Bitmap> {
        self.scheduler.schedule_preview(material, camera)
    }

    /// Releases everything cached for a deleted node.
    pub fn on_node_removed(&mut self, node_id: NodeId) {
        log::debug!("node {node_id} removed; dropping its resources");
        self.runner.cache_mut().invalidate_node(node_id);
    }

    /// Schedules the work an edit requires. `material` is the snapshot after
    /// the edit.
    pub fn handle_event(&mut self, material: &Material, event: &GraphEvent) -> Vec<ScheduledJob> {
        match event {
            GraphEvent::NodeChanged(node_id) => self.schedule_chain(material, *node_id),
            GraphEvent::NodeRemoved {
                node_id,
                connections,
            } => {
                self.on_node_removed(*node_id);
                let mut scheduled = Vec::new();
                for consumer in connections
                    .iter()
                    .filter(|c| c.from.node_id == *node_id)
                    .map(|c| c.to.node_id)
                {
                    if material.node(consumer).is_some() {
                        scheduled.extend(self.schedule_chain(material, consumer));
                    }
                }
                let camera = self.scheduler.preview_camera();
                scheduled.push(ScheduledJob::Preview(
                    self.scheduler.schedule_preview(material, camera),
                ));
                scheduled
            }
            GraphEvent::ConnectionAdded(connection) | GraphEvent::ConnectionRemoved(connection) => {
                self.schedule_chain(material, connection.to.node_id)
            }
            GraphEvent::OutputSettingsChanged => {
                self.runner.cache_mut().invalidate_textures();
                self.scheduler.schedule_all(material)
            }
        }
    }

    pub fn run_once(&mut self) -> FrameStats {
        self.runner.run_once(&mut self.scheduler)
    }

    /// Runs frames until `on_tick` breaks or the stop handle fires.
    /// `on_tick` is where the host schedules work for the coming frame.
    pub fn run<F>(&mut self, mut on_tick: F)
    where
        F: FnMut(&mut Compositor) -> ControlFlow<()>,
    {
        let tick = self.runner.config().tick;
        log::info!("frame loop started ({}ms tick)", tick.as_millis());
        while !self.stop.is_stopped() {
            let started = Instant::now();
            if on_tick(self).is_break() {
                break;
            }
            self.run_once();
            if let Some(rest) = tick.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
        self.stop.reset();
        log::info!("frame loop stopped");
    }

    /// Renders every output-role node of `material` at `size` and returns
    /// their bitmaps plus the preview. Live textures are rebuilt at the
    /// material's own size afterwards.
    pub fn export_outputs(&mut self, material: &Material, size: [u32; 2]) -> Result<MaterialExport> {
        if size.contains(&0) {
            bail!("export size {}x{} is empty", size[0], size[1]);
        }
        self.run_once();
        self.runner.cache_mut().invalidate_textures();

        let sized = material.with_output_size(size);
        let output_nodes: Vec<NodeId> = sized
            .nodes
            .iter()
            .filter(|n| self.scheduler.spec_for(n).is_output())
            .map(|n| n.id)
            .collect();
        if output_nodes.is_empty() {
            log::warn!("export: material '{}' has no output nodes", material.id);
        }

        let mut scheduled = Vec::new();
        for id in &output_nodes {
            scheduled.extend(self.scheduler.schedule_chain(&sized, *id));
        }
        let stats = self.run_once();
        log::info!(
            "export of '{}' at {}x{}: {} jobs, {} failed",
            material.id,
            size[0],
            size[1],
            stats.total(),
            stats.rejected
        );

        let collected = collect_export(&output_nodes, &scheduled);

        self.runner.cache_mut().invalidate_textures();
        self.scheduler.schedule_all(material);
        collected
    }
}

fn collect_export(output_nodes: &[NodeId], scheduled: &[ScheduledJob]) -> Result<MaterialExport> {
    let mut export = MaterialExport::default();
    for job in scheduled {
        match job {
            ScheduledJob::Node { node_id, result } => {
                if !output_nodes.contains(node_id) || export.outputs.contains_key(node_id) {
                    continue;
                }
                let outputs = result
                    .outcome()
                    .ok_or_else(|| anyhow!("export: node {node_id} did not run"))?
                    .map_err(|e| anyhow!("{e}"))
                    .with_context(|| format!("export: node {node_id} failed"))?;
                export.outputs.insert(*node_id, outputs);
            }
            ScheduledJob::Preview(result) => {
                if export.preview.is_some() {
                    continue;
                }
                match result.outcome() {
                    Some(Ok(bitmap)) => export.preview = Some(bitmap),
                    Some(Err(e)) => log::warn!("export: preview failed: {e}"),
                    None => log::warn!("export: preview did not run"),
                }
            }
        }
    }
    Ok(export)
}
