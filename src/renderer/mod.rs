//! GPU side of the compositor.
//!
//! - `gpu`: headless device, texture helpers and readback
//! - `cache`: output textures, programs and painters retained across frames
//! - `program`: WGSL module plus bind group layouts and pipelines per blend mode
//! - `painter`: per-node rendering strategies
//! - `node_job` / `preview`: execution of the two job kinds
//! - `frame`: drains the scheduler and settles job results

pub mod blend;
pub mod cache;
pub mod camera;
pub mod frame;
pub mod gpu;
mod node_job;
pub mod painter;
pub mod preview;
pub mod program;
pub mod uniforms;
pub mod validation;
pub mod wgsl;

pub use cache::{OutputKey, ResourceCache, TextureId};
pub use camera::Camera;
pub use frame::{FrameRunner, FrameStats, RunnerConfig};
pub use gpu::{GpuConfig, GpuContext, GpuTexture};
