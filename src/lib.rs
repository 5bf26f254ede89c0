//! GPU node-graph texture compositor.
//!
//! The editor hands the crate read-only [`material::Material`] snapshots and
//! [`events::GraphEvent`]s; the [`compositor::Compositor`] schedules the
//! affected nodes, renders them with wgpu once per frame and delivers the
//! resulting bitmaps through [`scheduler::JobResult`] handles.

pub mod compositor;
pub mod events;
pub mod graph;
pub mod material;
pub mod renderer;
pub mod scheduler;
pub mod schema;

pub use compositor::{Compositor, MaterialExport, StopHandle};
pub use events::GraphEvent;
pub use material::{Connection, Material, Node, NodeId, SocketAddr};
pub use scheduler::{JobError, JobResult, Scheduler};
