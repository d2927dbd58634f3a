//! Pre/post-event recording.
//!
//! - `recorder`: the per-camera IDLE/RECORDING state machine
//! - `sink`: clip destinations (Y4M files, in-memory)
//! - `storage`: clip directories and collision-free naming
//! - `manifest`: JSON sidecar with the clip hash
//! - `compress`: background hand-off to the compression service

pub mod compress;
pub mod manifest;
pub mod recorder;
pub mod sink;
pub mod storage;

pub use compress::{
    CompressionDispatcher, CompressionHandle, CompressionService, FfmpegCompressor, NoCompression,
};
pub use manifest::ClipManifest;
pub use recorder::{ClipSummary, EventRecorder, RecorderEvent, RecorderState};
pub use sink::{ClipSink, MemoryClip, MemorySinkFactory, SinkFactory, Y4mSink, Y4mSinkFactory};
pub use storage::Storage;
