//! Frame ingestion sources.
//!
//! This module provides the sources a camera pipeline reads from:
//! - `stub://` synthetic scenes (testing, demos)
//! - YUV4MPEG2 files, or `-` for a Y4M stream on stdin (live capture piped in
//!   from an external grabber)
//! - USB/V4L2 devices, `/dev/videoN` or the bare index `N` (feature: ingest-v4l2)
//! - Container files and network streams such as `.mp4` or `rtsp://`
//!   (feature: ingest-file-ffmpeg)
//!
//! Every source assigns each frame its acquisition sequence number. Opening a
//! source that cannot be reached yields `SourceUnavailable`; a source with no
//! more frames yields `EndOfStream`; anything else is a transient
//! `FrameReadFailure`.

#[cfg(feature = "ingest-file-ffmpeg")]
pub mod file_ffmpeg;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;
pub mod y4m_file;

#[cfg(feature = "ingest-file-ffmpeg")]
pub use file_ffmpeg::FfmpegSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};
pub use y4m_file::Y4mSource;

use anyhow::Result;

use crate::error::PipelineError;
use crate::frame::Frame;

/// A live or recorded video source. The returned box is the open handle.
pub trait FrameSource: Send {
    /// Source identifier, as configured.
    fn name(&self) -> &str;

    /// Read the next frame.
    fn read(&mut self) -> Result<Frame>;

    /// Release the underlying device or stream. Further reads fail.
    fn close(&mut self) {}

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub read_failures: u64,
}

const STREAM_SCHEMES: [&str; 5] = ["rtsp://", "rtsps://", "rtmp://", "http://", "https://"];
const CONTAINER_EXTENSIONS: [&str; 7] = ["mp4", "mkv", "avi", "mov", "webm", "m4v", "ts"];

/// Open a source by identifier.
pub fn open_source(source_id: &str) -> Result<Box<dyn FrameSource>> {
    let trimmed = source_id.trim();
    if trimmed.starts_with("stub://") {
        let config = SyntheticConfig::from_url(trimmed)?;
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    if trimmed == "-" || trimmed.to_ascii_lowercase().ends_with(".y4m") {
        return Ok(Box::new(Y4mSource::open(trimmed)?));
    }
    if let Some(device) = device_path(trimmed) {
        return open_device(source_id, &device);
    }
    if is_ffmpeg_input(trimmed) {
        return open_ffmpeg(trimmed);
    }
    Err(PipelineError::source_unavailable(
        source_id,
        "unsupported source (expected stub://..., a .y4m path, -, a V4L2 device, or a video file/stream)",
    ))
}

/// Device node for `N` or `/dev/videoN`, ignoring any `?query`.
fn device_path(source_id: &str) -> Option<String> {
    let base = source_id.split_once('?').map_or(source_id, |(base, _)| base);
    if !base.is_empty() && base.bytes().all(|b| b.is_ascii_digit()) {
        return Some(format!("/dev/video{}", base));
    }
    base.starts_with("/dev/video").then(|| base.to_string())
}

fn is_ffmpeg_input(source_id: &str) -> bool {
    let lower = source_id.to_ascii_lowercase();
    if STREAM_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
        return true;
    }
    std::path::Path::new(&lower)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| CONTAINER_EXTENSIONS.contains(&ext))
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(source_id: &str, device: &str) -> Result<Box<dyn FrameSource>> {
    let config = V4l2Config::from_source_id(device, source_id)
        .map_err(|e| PipelineError::source_unavailable(source_id, e))?;
    Ok(Box::new(V4l2Source::open(source_id, config)?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(source_id: &str, device: &str) -> Result<Box<dyn FrameSource>> {
    Err(PipelineError::source_unavailable(
        source_id,
        format!("{} needs a build with the ingest-v4l2 feature", device),
    ))
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_ffmpeg(source_id: &str) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(FfmpegSource::open(source_id)?))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_ffmpeg(source_id: &str) -> Result<Box<dyn FrameSource>> {
    Err(PipelineError::source_unavailable(
        source_id,
        "video files and network streams need a build with the ingest-file-ffmpeg feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_source_unavailable;

    #[test]
    fn unknown_scheme_is_unavailable() {
        let err = open_source("gopher://camera/stream").err().unwrap();
        assert!(is_source_unavailable(&err));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = open_source("/nonexistent/clip.y4m").err().unwrap();
        assert!(is_source_unavailable(&err));
    }

    #[test]
    fn stub_scheme_opens_synthetic() {
        let mut source = open_source("stub://gate?width=64&height=48").unwrap();
        let frame = source.read().unwrap();
        assert_eq!((frame.width(), frame.height()), (64, 48));
        assert_eq!(source.name(), "stub://gate?width=64&height=48");
    }

    #[test]
    fn camera_indices_and_nodes_resolve_to_devices() {
        assert_eq!(device_path("0").as_deref(), Some("/dev/video0"));
        assert_eq!(device_path("2?width=320").as_deref(), Some("/dev/video2"));
        assert_eq!(device_path("/dev/video1").as_deref(), Some("/dev/video1"));
        assert_eq!(device_path("cam0"), None);
        assert_eq!(device_path(""), None);
    }

    #[test]
    fn streams_and_containers_go_to_ffmpeg() {
        assert!(is_ffmpeg_input("rtsp://10.0.0.5/live"));
        assert!(is_ffmpeg_input("/recordings/Lobby.MP4"));
        assert!(!is_ffmpeg_input("/recordings/lobby.y4m.txt"));
        assert!(!is_ffmpeg_input("stub://cam0"));
    }

    #[test]
    fn absent_device_is_unavailable() {
        let err = open_source("/dev/video-absent").err().unwrap();
        assert!(is_source_unavailable(&err));
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn device_without_capture_support_names_the_feature() {
        let err = open_source("0").err().unwrap();
        assert!(is_source_unavailable(&err));
        assert!(err.to_string().contains("ingest-v4l2"), "{err}");
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    #[test]
    fn container_without_decoder_support_names_the_feature() {
        let err = open_source("/recordings/lobby.mp4").err().unwrap();
        assert!(is_source_unavailable(&err));
        assert!(err.to_string().contains("ingest-file-ffmpeg"), "{err}");
    }
}
