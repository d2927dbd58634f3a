use crate::frame::BoundingBox;

/// One raw model candidate. Consumed into an `Annotation` once accepted.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Capitalised class name, e.g. "Person".
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence,
        }
    }
}
