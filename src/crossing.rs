//! Boundary-crossing evaluation.
//!
//! A crossing is a strict sign change of `bottom_y - boundary` between two
//! consecutive evaluated positions. Touching the boundary from above counts,
//! leaving it does not: `last < B <= cur` or `last > B >= cur`.

use std::collections::VecDeque;

use crate::config::CrossingPrecedence;

/// Bottom-edge positions remembered per camera.
pub const RECENT_HISTORY: usize = 5;

/// The crossing rule for one pair of consecutive positions.
pub fn crosses(last: i32, current: i32, boundary: i32) -> bool {
    (last < boundary && current >= boundary) || (last > boundary && current <= boundary)
}

/// What the tracker contributed this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerSignal {
    /// Tracker was inactive.
    Absent,
    /// Tracker followed the object; bottom edge of its box.
    Position(i32),
    /// Tracker lost the object this tick.
    Lost,
}

#[derive(Clone, Debug, Default)]
pub struct CrossingEvaluator {
    last_bottom_y: Option<i32>,
    recent_y: VecDeque<i32>,
}

impl CrossingEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one position. Returns true if it crossed from the previous one.
    pub fn observe(&mut self, bottom_y: i32, boundary: i32) -> bool {
        if self.recent_y.len() == RECENT_HISTORY {
            self.recent_y.pop_front();
        }
        self.recent_y.push_back(bottom_y);

        let crossed = self
            .last_bottom_y
            .is_some_and(|last| crosses(last, bottom_y, boundary));
        if crossed {
            log::info!(
                "boundary {} crossed: last_bottom_y={:?} bottom_y={}",
                boundary,
                self.last_bottom_y,
                bottom_y
            );
        }
        self.last_bottom_y = Some(bottom_y);
        crossed
    }

    /// Evaluate one tick's positions. True if any evaluated position crossed.
    ///
    /// `detections` are the bottom edges of accepted detections in order.
    /// With `Authoritative` precedence a tracked position replaces the
    /// detections for this tick, and a lost tracker discards them. With
    /// `Sequential` every detection is evaluated first, then the tracker.
    pub fn evaluate(
        &mut self,
        detections: &[i32],
        tracker: TrackerSignal,
        boundary: i32,
        precedence: CrossingPrecedence,
    ) -> bool {
        let mut crossed = false;
        match precedence {
            CrossingPrecedence::Authoritative => match tracker {
                TrackerSignal::Position(y) => crossed = self.observe(y, boundary),
                TrackerSignal::Lost => self.reset_last_position(),
                TrackerSignal::Absent => {
                    for &y in detections {
                        crossed |= self.observe(y, boundary);
                    }
                }
            },
            CrossingPrecedence::Sequential => {
                for &y in detections {
                    crossed |= self.observe(y, boundary);
                }
                match tracker {
                    TrackerSignal::Position(y) => crossed |= self.observe(y, boundary),
                    TrackerSignal::Lost => self.reset_last_position(),
                    TrackerSignal::Absent => {}
                }
            }
        }
        crossed
    }

    /// Forget the last position; the next crossing needs two fresh positions.
    pub fn reset_last_position(&mut self) {
        self.last_bottom_y = None;
    }

    pub fn last_bottom_y(&self) -> Option<i32> {
        self.last_bottom_y
    }

    /// Oldest-first.
    pub fn recent_y(&self) -> Vec<i32> {
        self.recent_y.iter().copied().collect()
    }
}
