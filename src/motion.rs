//! Optional pre-filter that skips inference on static frames.
//!
//! Frame differencing on a blurred, downsampled grayscale copy. The gate
//! never decides a crossing; it only tells the pipeline that the scene did
//! not change enough to be worth a model call.

use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;

use crate::frame::Frame;

const DOWNSAMPLE: u32 = 4;
const BLUR_SIGMA: f32 = 1.5;

#[derive(Default)]
pub struct MotionGate {
    previous: Option<GrayImage>,
}

impl MotionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when fewer than `min_area` full-resolution pixels changed by
    /// more than `threshold` since the previous frame. The first frame, and
    /// any frame after a size change, is never static.
    pub fn is_static(&mut self, frame: &Frame, threshold: u8, min_area: u32) -> bool {
        let small = Self::prepare(frame);
        let previous = self.previous.replace(small);
        let (Some(previous), Some(current)) = (previous, self.previous.as_ref()) else {
            return false;
        };
        if previous.dimensions() != current.dimensions() {
            return false;
        }
        let changed = previous
            .pixels()
            .zip(current.pixels())
            .filter(|(a, b)| a[0].abs_diff(b[0]) > threshold)
            .count() as u64;
        changed * u64::from(DOWNSAMPLE * DOWNSAMPLE) < u64::from(min_area)
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }

    fn prepare(frame: &Frame) -> GrayImage {
        let gray = imageops::grayscale(frame.image());
        let w = (gray.width() / DOWNSAMPLE).max(1);
        let h = (gray.height() / DOWNSAMPLE).max(1);
        let small = imageops::resize(&gray, w, h, FilterType::Triangle);
        gaussian_blur_f32(&small, BLUR_SIGMA)
    }
}
