mod backend;
mod backends;
mod detector;
mod result;

pub use backend::DetectionModel;
pub use backends::MarkerBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractYoloBackend;
pub use detector::{DetectionOutcome, ObjectDetector};
pub use result::Detection;

use anyhow::Result;

use crate::config::DetectionSettings;

/// Build one model instance for a camera.
///
/// Each camera owns its own instance, so a slow call on one camera never
/// serialises the others.
pub fn build_model(settings: &DetectionSettings) -> Result<Box<dyn DetectionModel>> {
    match &settings.model_path {
        #[cfg(feature = "backend-tract")]
        Some(path) => Ok(Box::new(TractYoloBackend::new(path, settings.input_size)?)),
        #[cfg(not(feature = "backend-tract"))]
        Some(path) => Err(anyhow::anyhow!(
            "model {} requires the backend-tract feature",
            path.display()
        )),
        None => Ok(Box::new(MarkerBackend::new(settings.marker_color))),
    }
}
