//! Single-object tracking between detector hits.
//!
//! `ObjectTracker` owns the explicit `Inactive | Tracking` state. It is
//! seeded only while inactive, and drops back to inactive the first time the
//! underlying `VisualTracker` loses the object.

pub mod template;

pub use template::TemplateTracker;

use crate::frame::{Annotation, BoundingBox, Frame};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackMode {
    Inactive,
    Tracking(BoundingBox),
}

/// Visual tracker backend.
pub trait VisualTracker: Send {
    /// Start following the object inside `bbox` on `frame`.
    fn init(&mut self, frame: &Frame, bbox: BoundingBox);

    /// Locate the object on `frame`. `None` means the object was lost.
    fn update(&mut self, frame: &Frame) -> Option<BoundingBox>;
}

/// Result of one tracker step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackerUpdate {
    /// Not tracking; nothing attempted.
    Idle,
    /// Object found; annotation labelled "Tracked Object".
    Tracked(Annotation),
    /// Object lost this tick; the tracker is now inactive.
    Lost,
}

pub struct ObjectTracker {
    backend: Box<dyn VisualTracker>,
    mode: TrackMode,
}

impl ObjectTracker {
    pub fn new(backend: Box<dyn VisualTracker>) -> Self {
        Self {
            backend,
            mode: TrackMode::Inactive,
        }
    }

    pub fn mode(&self) -> TrackMode {
        self.mode
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.mode, TrackMode::Tracking(_))
    }

    /// Start tracking the first accepted detection, if inactive.
    ///
    /// Returns true when the tracker was (re)initialized. While tracking,
    /// new detections are ignored.
    pub fn seed(&mut self, frame: &Frame, accepted: &[Annotation]) -> bool {
        if self.is_tracking() {
            return false;
        }
        let Some(first) = accepted.first() else {
            return false;
        };
        self.backend.init(frame, first.bbox);
        self.mode = TrackMode::Tracking(first.bbox);
        log::debug!(
            "tracker: initialized on {} at bottom_y={}",
            first.label,
            first.bbox.bottom_y()
        );
        true
    }

    /// Follow the object onto `frame`.
    pub fn update(&mut self, frame: &Frame) -> TrackerUpdate {
        if !self.is_tracking() {
            return TrackerUpdate::Idle;
        }
        match self.backend.update(frame) {
            Some(bbox) => {
                self.mode = TrackMode::Tracking(bbox);
                TrackerUpdate::Tracked(Annotation::tracked(bbox))
            }
            None => {
                self.mode = TrackMode::Inactive;
                log::debug!(
                    "tracker: lost object on frame {}, awaiting new detection",
                    frame.sequence()
                );
                TrackerUpdate::Lost
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::collections::VecDeque;

    /// Replays a fixed list of update results.
    struct Scripted {
        inits: usize,
        results: VecDeque<Option<BoundingBox>>,
    }

    impl VisualTracker for Scripted {
        fn init(&mut self, _frame: &Frame, _bbox: BoundingBox) {
            self.inits += 1;
        }

        fn update(&mut self, _frame: &Frame) -> Option<BoundingBox> {
            self.results.pop_front().flatten()
        }
    }

    fn frame() -> Frame {
        Frame::new(RgbImage::new(4, 4), 0)
    }

    fn tracker(results: Vec<Option<BoundingBox>>) -> ObjectTracker {
        ObjectTracker::new(Box::new(Scripted {
            inits: 0,
            results: results.into(),
        }))
    }

    #[test]
    fn seeds_from_first_detection_only_when_inactive() {
        let a = Annotation::new(BoundingBox::new(0, 0, 2, 2), "Person");
        let b = Annotation::new(BoundingBox::new(5, 5, 2, 2), "Car");
        let mut t = tracker(vec![]);

        assert!(t.seed(&frame(), &[a.clone(), b.clone()]));
        assert_eq!(t.mode(), TrackMode::Tracking(a.bbox));
        assert!(!t.seed(&frame(), &[b]));
        assert_eq!(t.mode(), TrackMode::Tracking(a.bbox));
    }

    #[test]
    fn empty_detections_leave_tracker_inactive() {
        let mut t = tracker(vec![]);
        assert!(!t.seed(&frame(), &[]));
        assert_eq!(t.update(&frame()), TrackerUpdate::Idle);
    }

    #[test]
    fn loss_returns_to_inactive() {
        let moved = BoundingBox::new(1, 1, 2, 2);
        let mut t = tracker(vec![Some(moved), None]);
        t.seed(
            &frame(),
            &[Annotation::new(BoundingBox::new(0, 0, 2, 2), "Person")],
        );

        assert_eq!(
            t.update(&frame()),
            TrackerUpdate::Tracked(Annotation::tracked(moved))
        );
        assert_eq!(t.update(&frame()), TrackerUpdate::Lost);
        assert_eq!(t.mode(), TrackMode::Inactive);
        assert_eq!(t.update(&frame()), TrackerUpdate::Idle);
    }
}
