//! Tripwire: boundary-crossing clip recorder.
//!
//! This crate watches one or more live video sources, follows objects of
//! interest from frame to frame, and records a clip that spans a fixed window
//! before and after an object's bottom edge crosses a configured boundary row.
//!
//! # Architecture
//!
//! Per camera, each tick runs the same chain:
//!
//! 1. **Detect**: the detection model runs once per frame; candidates are
//!    filtered by confidence and label allow-list (`detect`).
//! 2. **Track**: a single-object visual tracker bridges detector gaps and has an
//!    explicit `Inactive | Tracking` state (`track`).
//! 3. **Evaluate**: the bottom edge of the authoritative box is compared with the
//!    previous one against the boundary row (`crossing`).
//! 4. **Record**: every frame enters a bounded pre-event buffer; a crossing opens
//!    a session that drains the buffer and then appends live frames (`record`).
//!
//! The `pipeline` module runs one worker per camera and joins them at a per-tick
//! synchronization point, composing a single display frame.
//!
//! # Module Structure
//!
//! - `frame`: Frame, BoundingBox, Annotation, FrameBuffer (pre-event ring buffer)
//! - `ingest`: Frame sources (synthetic `stub://`, Y4M files and pipes, V4L2
//!   devices and FFmpeg-decoded files or streams behind cargo features)
//! - `detect`: Detection model backends and the filtering ObjectDetector
//! - `track`: ObjectTracker state machine over a template-matching tracker
//! - `crossing`: CrossingEvaluator and the crossing rule
//! - `motion`: MotionGate, the optional static-scene skip
//! - `record`: EventRecorder state machine, clip sinks, storage, compression
//! - `pipeline`: CameraPipeline, worker threads and the Orchestrator
//! - `annotate`, `compose`: drawing and multi-camera composition
//! - `config`: TripwireConfig (file + environment) and RuntimeSettings

pub mod annotate;
pub mod compose;
pub mod config;
pub mod crossing;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod pipeline;
pub mod record;
pub mod track;
pub mod ui;
pub mod y4m;

pub use annotate::Renderer;
pub use compose::{NoStitcher, Stitcher};
pub use config::{CrossingPrecedence, RuntimeSettings, TripwireConfig, DEFAULT_LABELS};
pub use crossing::{CrossingEvaluator, TrackerSignal, RECENT_HISTORY};
pub use detect::{DetectionModel, Detection, MarkerBackend, ObjectDetector};
pub use error::PipelineError;
pub use frame::{Annotation, BoundingBox, BufferedFrame, Frame, FrameBuffer, TRACKED_LABEL};
pub use ingest::{open_source, FrameSource, SyntheticSource, Y4mSource};
pub use motion::MotionGate;
pub use pipeline::{
    CameraOutput, CameraPipeline, CameraReport, CameraStats, ControlHandle, Orchestrator,
    TickResult, TrackState,
};
pub use record::{
    ClipManifest, ClipSink, ClipSummary, CompressionDispatcher, CompressionService,
    EventRecorder, FfmpegCompressor, MemorySinkFactory, NoCompression, RecorderEvent,
    RecorderState, SinkFactory, Storage, Y4mSinkFactory,
};
pub use track::{ObjectTracker, TemplateTracker, TrackMode, TrackerUpdate, VisualTracker};
