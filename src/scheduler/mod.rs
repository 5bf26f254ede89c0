//! Frame job queue.
//!
//! Scheduling only records work: each call snapshots what a job needs and
//! returns a [`JobResult`] handle. Nothing touches the GPU until the frame
//! runner drains the queue.

mod chain;
mod job;
mod result;

use std::{collections::HashMap, sync::Arc};

use crate::{
    graph,
    material::{Material, Node, NodeId, SocketAddr},
    renderer::{camera::Camera, preview::PREVIEW_CHANNELS},
    schema::{NodeSpec, NodeSpecResolver},
};

pub use chain::chain_order;
pub use job::{Bitmap, JobKey, NodeJob, NodeOutputs, PreviewJob, RenderJob, ScheduledJob};
pub use result::{JobError, JobResult};

pub struct Scheduler {
    specs: Arc<dyn NodeSpecResolver>,
    preview_camera: Camera,
    queue: Vec<RenderJob>,
    index: HashMap<JobKey, usize>,
}

impl Scheduler {
    pub fn new(specs: Arc<dyn NodeSpecResolver>) -> Self {
        Self {
            specs,
            preview_camera: Camera::default(),
            queue: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn specs(&self) -> &Arc<dyn NodeSpecResolver> {
        &self.specs
    }

    /// Camera used by previews that chain scheduling adds.
    pub fn set_preview_camera(&mut self, camera: Camera) {
        self.preview_camera = camera;
    }

    pub fn preview_camera(&self) -> Camera {
        self.preview_camera
    }

    /// # Panics
    /// When the node's type has no spec. The editor must never hand the
    /// renderer a node it cannot describe.
    pub fn spec_for(&self, node: &Node) -> Arc<NodeSpec> {
        self.specs.resolve(&node.type_path).unwrap_or_else(|| {
            panic!(
                "no NodeSpec for node {} of type '{}'",
                node.id, node.type_path
            )
        })
    }

    /// Queues a render of `node`, or refreshes the snapshot of the job already
    /// waiting for it and returns that job's handle.
    pub fn schedule_node(
        &mut self,
        material: &Material,
        node: &Node,
        spec: Arc<NodeSpec>,
    ) -> JobResult<NodeOutputs> {
        let key = JobKey::Node(node.id);
        if let Some(&i) = self.index.get(&key)
            && let Some(RenderJob::Node(pending)) = self.queue.get_mut(i)
        {
            let result = pending.result.clone();
            *pending = NodeJob::new(material, node, spec, result.clone());
            return result;
        }

        let result = JobResult::pending();
        log::debug!("queued node {} ({})", node.id, node.type_path);
        self.push(key, RenderJob::Node(NodeJob::new(material, node, spec, result.clone())));
        result
    }

    pub fn schedule_preview(&mut self, material: &Material, camera: Camera) -> JobResult<Bitmap> {
        let key = JobKey::Preview(material.id.clone());
        let channels = self.resolve_preview_channels(material);
        if let Some(&i) = self.index.get(&key)
            && let Some(RenderJob::Preview(pending)) = self.queue.get_mut(i)
        {
            pending.camera = camera;
            pending.channels = channels;
            pending.output_size = material.output_size();
            return pending.result.clone();
        }

        let result = JobResult::pending();
        log::debug!("queued preview of material '{}'", material.id);
        self.push(
            key,
            RenderJob::Preview(PreviewJob {
                material_id: material.id.clone(),
                camera,
                channels,
                output_size: material.output_size(),
                result: result.clone(),
            }),
        );
        result
    }

    /// Queues `start` with everything it reads from and everything that reads
    /// from it, plus a preview when an output node is among them.
    pub fn schedule_chain(&mut self, material: &Material, start: NodeId) -> Vec<ScheduledJob> {
        if material.node(start).is_none() {
            log::warn!(
                "schedule_chain: material '{}' has no node {start}",
                material.id
            );
            return Vec::new();
        }

        let order = chain_order(material, start);
        let mut scheduled = Vec::with_capacity(order.len() + 1);
        let mut renders_output = false;
        for id in order {
            let Some(node) = material.node(id) else {
                continue;
            };
            let spec = self.spec_for(node);
            renders_output |= spec.is_output();
            let result = self.schedule_node(material, node, spec);
            scheduled.push(ScheduledJob::Node { node_id: id, result });
        }
        if renders_output {
            let camera = self.preview_camera;
            scheduled.push(ScheduledJob::Preview(self.schedule_preview(material, camera)));
        }
        scheduled
    }

    /// Every node in dependency order, then the preview.
    pub fn schedule_all(&mut self, material: &Material) -> Vec<ScheduledJob> {
        let order = graph::topo_sort(material).unwrap_or_else(|e| {
            log::error!("{e:#}; scheduling in declaration order");
            material.nodes.iter().map(|n| n.id).collect()
        });
        let mut scheduled = Vec::with_capacity(order.len() + 1);
        for id in order {
            let Some(node) = material.node(id) else {
                continue;
            };
            let spec = self.spec_for(node);
            let result = self.schedule_node(material, node, spec);
            scheduled.push(ScheduledJob::Node { node_id: id, result });
        }
        let camera = self.preview_camera;
        scheduled.push(ScheduledJob::Preview(self.schedule_preview(material, camera)));
        scheduled
    }

    /// Keys of queued jobs in execution order.
    pub fn pending(&self) -> Vec<JobKey> {
        self.queue.iter().map(RenderJob::key).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Hands the queue to the runner; later scheduling starts a new frame.
    pub fn drain(&mut self) -> Vec<RenderJob> {
        self.index.clear();
        std::mem::take(&mut self.queue)
    }

    fn push(&mut self, key: JobKey, job: RenderJob) {
        self.index.insert(key, self.queue.len());
        self.queue.push(job);
    }

    /// The first output-role node (in declaration order) whose `target`
    /// names a channel feeds that channel.
    fn resolve_preview_channels(&self, material: &Material) -> Vec<(String, Option<SocketAddr>)> {
        PREVIEW_CHANNELS
            .iter()
            .map(|&channel| {
                let source = material.nodes.iter().find_map(|node| {
                    let spec = self.specs.resolve(&node.type_path)?;
                    if !spec.is_output() || spec.param_str(node, "target")? != channel {
                        return None;
                    }
                    let socket = spec.outputs.first()?;
                    Some(SocketAddr::new(node.id, socket.id.clone()))
                });
                (channel.to_string(), source)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{NodeRole, PainterKind, ParamSpec};

    fn specs() -> Arc<dyn NodeSpecResolver> {
        let mut map: HashMap<String, Arc<NodeSpec>> = HashMap::new();
        map.insert(
            "gen".into(),
            Arc::new(NodeSpec::new("gen", PainterKind::ShaderPass).with_output("out")),
        );
        map.insert(
            "out".into(),
            Arc::new(
                NodeSpec::new("out", PainterKind::ShaderPass)
                    .with_role(NodeRole::Output)
                    .with_param(ParamSpec::choice("target", &["albedo", "height"], "albedo"))
                    .with_input("in")
                    .with_output("out"),
            ),
        );
        Arc::new(map)
    }

    #[test]
    fn rescheduling_refreshes_the_pending_snapshot() {
        let mut m = Material::new("m", [8, 8]);
        m.add_node(Node::new(1, "gen")).unwrap();
        let mut scheduler = Scheduler::new(specs());
        let spec = scheduler.spec_for(m.node(1).unwrap());
        let first = scheduler.schedule_node(&m, m.node(1).unwrap(), spec.clone());

        m.node_mut(1).unwrap().parameters.insert("k".into(), serde_json::json!(2));
        let second = scheduler.schedule_node(&m, m.node(1).unwrap(), spec);

        assert!(first.same_job(&second));
        let jobs = scheduler.drain();
        assert_eq!(jobs.len(), 1);
        let RenderJob::Node(job) = &jobs[0] else {
            panic!("expected node job")
        };
        assert_eq!(job.node.parameters["k"], serde_json::json!(2));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn preview_channels_follow_output_targets() {
        let mut m = Material::new("m", [8, 8]);
        m.add_node(Node::new(1, "gen")).unwrap();
        m.add_node(Node::new(2, "out").with_param("target", serde_json::json!("height")))
            .unwrap();
        let scheduler = Scheduler::new(specs());
        let channels = scheduler.resolve_preview_channels(&m);
        assert_eq!(
            channels,
            vec![
                ("albedo".to_string(), None),
                ("height".to_string(), Some(SocketAddr::new(2, "out"))),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "no NodeSpec")]
    fn unknown_node_type_is_a_contract_violation() {
        let mut m = Material::new("m", [8, 8]);
        m.add_node(Node::new(1, "mystery")).unwrap();
        Scheduler::new(specs()).schedule_chain(&m, 1);
    }
}
