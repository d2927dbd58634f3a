use image::{imageops, GrayImage};

use crate::frame::{BoundingBox, Frame};
use crate::track::VisualTracker;

/// Grayscale template tracker.
///
/// Matches the last seen appearance of the object by sum of absolute
/// differences inside a window around the previous box. Every offset in the
/// window is tried; a candidate stops accumulating as soon as it is worse than
/// the best so far, so most positions cost a few rows. The template is
/// refreshed after every successful match so slow appearance changes are
/// followed.
pub struct TemplateTracker {
    search_margin: u32,
    max_mean_diff: f32,
    bbox: Option<BoundingBox>,
    template: Vec<u8>,
}

impl TemplateTracker {
    pub fn new(search_margin: u32, max_mean_diff: f32) -> Self {
        Self {
            search_margin,
            max_mean_diff,
            bbox: None,
            template: Vec::new(),
        }
    }

    fn capture(gray: &GrayImage, bbox: BoundingBox) -> Vec<u8> {
        let mut out = Vec::with_capacity((bbox.w * bbox.h) as usize);
        for y in 0..bbox.h {
            for x in 0..bbox.w {
                out.push(gray.get_pixel(bbox.x as u32 + x, bbox.y as u32 + y)[0]);
            }
        }
        out
    }

    /// Sum of absolute differences of the template placed at (`x`, `y`).
    /// Gives up with `None` once the sum reaches `limit` or the placement
    /// leaves the frame.
    fn sad_below(
        &self,
        gray: &GrayImage,
        x: i32,
        y: i32,
        w: u32,
        h: u32,
        limit: u64,
    ) -> Option<u64> {
        if x < 0 || y < 0 || x as u32 + w > gray.width() || y as u32 + h > gray.height() {
            return None;
        }
        let mut sum = 0u64;
        for ty in 0..h {
            let row = (ty * w) as usize;
            for tx in 0..w {
                let pixel = gray.get_pixel(x as u32 + tx, y as u32 + ty)[0];
                sum += pixel.abs_diff(self.template[row + tx as usize]) as u64;
            }
            if sum >= limit {
                return None;
            }
        }
        Some(sum)
    }
}

impl Default for TemplateTracker {
    fn default() -> Self {
        Self::new(24, 40.0)
    }
}

impl VisualTracker for TemplateTracker {
    fn init(&mut self, frame: &Frame, bbox: BoundingBox) {
        let gray = imageops::grayscale(frame.image());
        match bbox.clamp_to(gray.width(), gray.height()) {
            Some(clamped) => {
                self.template = Self::capture(&gray, clamped);
                self.bbox = Some(clamped);
            }
            None => {
                self.template.clear();
                self.bbox = None;
            }
        }
    }

    fn update(&mut self, frame: &Frame) -> Option<BoundingBox> {
        let prev = self.bbox?;
        let gray = imageops::grayscale(frame.image());
        let margin = self.search_margin as i32;

        // (sum, x, y); ties keep the offset found first
        let mut best: Option<(u64, i32, i32)> = None;
        for dy in -margin..=margin {
            for dx in -margin..=margin {
                let (x, y) = (prev.x + dx, prev.y + dy);
                let limit = best.map_or(u64::MAX, |(sum, _, _)| sum);
                if let Some(sum) = self.sad_below(&gray, x, y, prev.w, prev.h, limit) {
                    best = Some((sum, x, y));
                }
            }
        }

        let (sum, x, y) = best?;
        let diff = sum as f32 / (prev.w * prev.h) as f32;
        if diff > self.max_mean_diff {
            self.bbox = None;
            return None;
        }
        let found = BoundingBox::new(x, y, prev.w, prev.h);
        self.template = Self::capture(&gray, found);
        self.bbox = Some(found);
        Some(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn scene(block_x: u32, block_y: u32) -> Frame {
        let mut image = RgbImage::from_pixel(120, 120, Rgb([30, 30, 30]));
        for y in block_y..block_y + 16 {
            for x in block_x..block_x + 12 {
                let shade = if (x - block_x + y - block_y) % 3 == 0 { 250 } else { 180 };
                image.put_pixel(x, y, Rgb([shade, shade, shade]));
            }
        }
        Frame::new(image, 0)
    }

    #[test]
    fn follows_a_moving_block() {
        let mut tracker = TemplateTracker::default();
        tracker.init(&scene(40, 40), BoundingBox::new(40, 40, 12, 16));

        let found = tracker.update(&scene(45, 49)).unwrap();
        assert_eq!(found, BoundingBox::new(45, 49, 12, 16));
        assert_eq!(found.bottom_y(), 65);

        let found = tracker.update(&scene(47, 60)).unwrap();
        assert_eq!((found.x, found.y), (47, 60));
    }

    #[test]
    fn odd_offsets_on_a_striped_block_are_exact() {
        let mut tracker = TemplateTracker::default();
        tracker.init(&scene(50, 50), BoundingBox::new(50, 50, 12, 16));
        for (x, y) in [(51, 53), (48, 56), (55, 55), (52, 49)] {
            let found = tracker.update(&scene(x, y)).unwrap();
            assert_eq!((found.x, found.y), (x as i32, y as i32));
        }
    }

    #[test]
    fn loses_object_that_vanished() {
        let mut tracker = TemplateTracker::default();
        tracker.init(&scene(40, 40), BoundingBox::new(40, 40, 12, 16));
        let empty = Frame::new(RgbImage::from_pixel(120, 120, Rgb([30, 30, 30])), 1);
        assert!(tracker.update(&empty).is_none());
        assert!(tracker.update(&scene(40, 40)).is_none());
    }

    #[test]
    fn box_outside_frame_is_never_tracked() {
        let mut tracker = TemplateTracker::default();
        tracker.init(&scene(0, 0), BoundingBox::new(500, 500, 10, 10));
        assert!(tracker.update(&scene(0, 0)).is_none());
    }
}
