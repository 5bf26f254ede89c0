use std::{collections::BTreeMap, sync::Arc};

use image::RgbaImage;

use crate::{
    material::{FilterMode, Material, Node, NodeId, SocketAddr},
    renderer::camera::Camera,
    scheduler::result::{JobError, JobResult},
    schema::NodeSpec,
};

pub type Bitmap = Arc<RgbaImage>;

/// One bitmap per output socket id.
pub type NodeOutputs = BTreeMap<String, Bitmap>;

/// At most one job per key waits in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKey {
    Node(NodeId),
    /// Keyed by material id.
    Preview(String),
}

/// Everything needed to render one node, captured when it was scheduled.
#[derive(Debug, Clone)]
pub struct NodeJob {
    pub node: Node,
    pub spec: Arc<NodeSpec>,
    /// Input socket id and the upstream output feeding it, in socket order.
    pub inputs: Vec<(String, Option<SocketAddr>)>,
    pub output_size: [u32; 2],
    pub filter: FilterMode,
    pub result: JobResult<NodeOutputs>,
}

impl NodeJob {
    pub(crate) fn new(
        material: &Material,
        node: &Node,
        spec: Arc<NodeSpec>,
        result: JobResult<NodeOutputs>,
    ) -> NodeJob {
        let inputs = spec
            .inputs
            .iter()
            .map(|socket| {
                let source = material
                    .incoming_connection(node.id, &socket.id)
                    .map(|c| c.from.clone());
                (socket.id.clone(), source)
            })
            .collect();
        NodeJob {
            node: node.clone(),
            spec,
            inputs,
            output_size: material.output_size(),
            filter: material.filter_mode,
            result,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreviewJob {
    pub material_id: String,
    pub camera: Camera,
    /// Preview channel name and the output-node socket feeding it.
    pub channels: Vec<(String, Option<SocketAddr>)>,
    pub output_size: [u32; 2],
    pub result: JobResult<Bitmap>,
}

#[derive(Debug, Clone)]
pub enum RenderJob {
    Node(NodeJob),
    Preview(PreviewJob),
}

impl RenderJob {
    pub fn key(&self) -> JobKey {
        match self {
            RenderJob::Node(job) => JobKey::Node(job.node.id),
            RenderJob::Preview(job) => JobKey::Preview(job.material_id.clone()),
        }
    }

    pub(crate) fn reject(&self, err: JobError) {
        match self {
            RenderJob::Node(job) => job.result.reject(err),
            RenderJob::Preview(job) => job.result.reject(err),
        }
    }
}

/// Result handle of a job queued by chain scheduling.
#[derive(Debug, Clone)]
pub enum ScheduledJob {
    Node {
        node_id: NodeId,
        result: JobResult<NodeOutputs>,
    },
    Preview(JobResult<Bitmap>),
}

impl ScheduledJob {
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            ScheduledJob::Node { node_id, .. } => Some(*node_id),
            ScheduledJob::Preview(_) => None,
        }
    }

    pub fn is_preview(&self) -> bool {
        matches!(self, ScheduledJob::Preview(_))
    }
}
