use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detection model backend.
///
/// One call per frame, synchronous and possibly slow (hundreds of
/// milliseconds). Backends keep no per-frame state: the same frame always
/// yields the same candidates. The `&mut self` receiver only lets a backend
/// reuse scratch buffers.
pub trait DetectionModel: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Candidate boxes with label and confidence, unfiltered.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
