//! Per-camera processing and the multi-camera tick loop.
//!
//! - `camera`: one camera's detect/track/evaluate/record chain
//! - `worker`: the thread that owns a camera pipeline
//! - `orchestrator`: fan-out per tick, deadline-bounded join, composition

pub mod camera;
pub mod orchestrator;
mod worker;

pub use camera::{CameraOutput, CameraPipeline, CameraReport, CameraStats, TrackState};
pub use orchestrator::{build_pipelines, ControlCommand, ControlHandle, Orchestrator, TickResult};
