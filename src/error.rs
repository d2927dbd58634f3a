//! Domain error kinds.
//!
//! Everything in the crate returns `anyhow::Result`. The kinds below are the ones
//! a caller has to tell apart (a closed stream retires a camera, a transient read
//! failure only skips a tick), so they travel inside `anyhow::Error` and are
//! recovered with `downcast_ref`.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The camera could not be opened. Fatal for that camera only.
    SourceUnavailable { source_id: String, reason: String },
    /// The source has no more frames.
    EndOfStream { source_id: String },
    /// A single read failed; the camera skips this tick.
    FrameReadFailure { source_id: String, reason: String },
    /// The detection model failed; the tick proceeds with zero detections.
    ModelInferenceFailure { model: String, reason: String },
    /// The clip sink could not be created or written.
    SinkWriteFailure { path: PathBuf, reason: String },
    /// The compression collaborator failed; the raw clip is kept.
    CompressionFailed { input: PathBuf, reason: String },
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceUnavailable { source_id, reason } => {
                write!(f, "source {} unavailable: {}", source_id, reason)
            }
            Self::EndOfStream { source_id } => write!(f, "source {} reached end of stream", source_id),
            Self::FrameReadFailure { source_id, reason } => {
                write!(f, "frame read from {} failed: {}", source_id, reason)
            }
            Self::ModelInferenceFailure { model, reason } => {
                write!(f, "model {} inference failed: {}", model, reason)
            }
            Self::SinkWriteFailure { path, reason } => {
                write!(f, "clip sink {} failed: {}", path.display(), reason)
            }
            Self::CompressionFailed { input, reason } => {
                write!(f, "compression of {} failed: {}", input.display(), reason)
            }
        }
    }
}

impl std::error::Error for PipelineError {}

impl PipelineError {
    pub fn source_unavailable(source_id: &str, reason: impl ToString) -> anyhow::Error {
        Self::SourceUnavailable {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        }
        .into()
    }

    pub fn end_of_stream(source_id: &str) -> anyhow::Error {
        Self::EndOfStream {
            source_id: source_id.to_string(),
        }
        .into()
    }

    pub fn read_failure(source_id: &str, reason: impl ToString) -> anyhow::Error {
        Self::FrameReadFailure {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        }
        .into()
    }
}

/// True when the error (or anything it wraps) is `EndOfStream`.
pub fn is_end_of_stream(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::EndOfStream { .. })
    )
}

/// True when the error is `SourceUnavailable`.
pub fn is_source_unavailable(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::SourceUnavailable { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_stream_survives_context() {
        let err = PipelineError::end_of_stream("stub://cam0").context("camera 0 tick");
        assert!(is_end_of_stream(&err));
        assert!(!is_source_unavailable(&err));
    }

    #[test]
    fn read_failure_is_not_end_of_stream() {
        let err = PipelineError::read_failure("cam", "timeout");
        assert!(!is_end_of_stream(&err));
        assert_eq!(err.to_string(), "frame read from cam failed: timeout");
    }
}
