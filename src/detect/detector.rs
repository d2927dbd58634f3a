use crate::detect::backend::DetectionModel;
use crate::frame::{Annotation, Frame};

/// Accepted detections for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionOutcome {
    /// Accepted boxes in the model's iteration order.
    pub annotations: Vec<Annotation>,
    /// True iff at least one candidate was accepted.
    pub motion_detected: bool,
    /// The model call failed and was treated as zero detections.
    pub inference_failed: bool,
}

impl DetectionOutcome {
    /// Bottom edges of the accepted boxes, in order.
    pub fn bottoms(&self) -> Vec<i32> {
        self.annotations.iter().map(|a| a.bbox.bottom_y()).collect()
    }
}

/// Runs the detection model once per frame and filters its candidates.
pub struct ObjectDetector {
    model: Box<dyn DetectionModel>,
    allowed_labels: Vec<String>,
}

impl ObjectDetector {
    pub fn new(model: Box<dyn DetectionModel>, allowed_labels: Vec<String>) -> Self {
        Self {
            model,
            allowed_labels,
        }
    }

    pub fn allowed_labels(&self) -> &[String] {
        &self.allowed_labels
    }

    pub fn set_allowed_labels(&mut self, labels: Vec<String>) {
        self.allowed_labels = labels;
    }

    /// Detect objects of interest in `frame`.
    ///
    /// Candidates need a confidence strictly above `confidence_threshold` and
    /// a label in the allow-list. Rejected candidates are dropped silently. A
    /// failing model yields an empty outcome with `inference_failed` set.
    pub fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> DetectionOutcome {
        let candidates = match self.model.infer(frame) {
            Ok(candidates) => candidates,
            Err(err) => {
                log::warn!(
                    "detector {}: inference failed on frame {}: {:#}",
                    self.model.name(),
                    frame.sequence(),
                    err
                );
                return DetectionOutcome {
                    inference_failed: true,
                    ..DetectionOutcome::default()
                };
            }
        };

        let annotations: Vec<Annotation> = candidates
            .into_iter()
            .filter(|d| d.confidence > confidence_threshold)
            .filter(|d| self.allowed_labels.iter().any(|l| l == &d.label))
            .map(|d| Annotation::new(d.bbox, d.label))
            .collect();
        DetectionOutcome {
            motion_detected: !annotations.is_empty(),
            annotations,
            inference_failed: false,
        }
    }
}
