//! Combining per-camera frames into one display frame.

use image::imageops::{self, FilterType};
use image::RgbImage;

/// Alignment-based compositor. Returns `None` when the frames could not be
/// aligned; the caller then falls back to `side_by_side`.
pub trait Stitcher: Send {
    fn stitch(&mut self, frames: &[RgbImage]) -> Option<RgbImage>;
}

/// Never aligns anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStitcher;

impl Stitcher for NoStitcher {
    fn stitch(&mut self, _frames: &[RgbImage]) -> Option<RgbImage> {
        None
    }
}

/// Frames left to right, each resized to the tallest frame's height.
pub fn side_by_side(frames: &[RgbImage]) -> Option<RgbImage> {
    let height = frames.iter().map(RgbImage::height).max()?;
    if height == 0 {
        return None;
    }
    let resized: Vec<RgbImage> = frames
        .iter()
        .map(|frame| {
            if frame.height() == height {
                frame.clone()
            } else {
                let width = ((frame.width() as u64 * height as u64) / frame.height().max(1) as u64)
                    .max(1) as u32;
                imageops::resize(frame, width, height, FilterType::Triangle)
            }
        })
        .collect();

    let total_width: u32 = resized.iter().map(RgbImage::width).sum();
    let mut canvas = RgbImage::new(total_width, height);
    let mut x = 0i64;
    for frame in &resized {
        imageops::replace(&mut canvas, frame, x, 0);
        x += frame.width() as i64;
    }
    Some(canvas)
}

/// One display frame for the tick: the only frame as-is, otherwise the
/// stitched composite or the side-by-side fallback.
pub fn compose(stitcher: &mut dyn Stitcher, mut frames: Vec<RgbImage>) -> Option<RgbImage> {
    match frames.len() {
        0 => None,
        1 => frames.pop(),
        _ => stitcher.stitch(&frames).or_else(|| {
            log::debug!("stitching declined, using side-by-side layout");
            side_by_side(&frames)
        }),
    }
}
