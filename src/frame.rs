//! Frames, boxes, annotations and the pre-event ring buffer.
//!
//! - `Frame`: an RGB image plus its acquisition order. Cloning copies pixels, so a
//!   frame placed in the buffer never aliases the live path.
//! - `Annotation`: the unit drawn on output frames and passed downstream.
//! - `FrameBuffer`: bounded FIFO of `(frame copy, annotations)` pairs used as the
//!   pre-event window of a recording.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Label carried by annotations produced by the tracker.
pub const TRACKED_LABEL: &str = "Tracked Object";

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    /// Build a frame from packed RGB bytes.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>, sequence: u64) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 3;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("invalid frame buffer {}x{}", width, height))?;
        Ok(Self::new(image, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Acquisition order assigned by the source.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Resize to `width`, preserving aspect ratio. A zero width or a frame that
    /// already has that width is returned unchanged.
    pub fn resized_to_width(self, width: u32) -> Self {
        if width == 0 || self.width() == width || self.width() == 0 {
            return self;
        }
        let height = ((self.height() as u64 * width as u64) / self.width() as u64).max(1) as u32;
        let image = imageops::resize(&self.image, width, height, FilterType::Triangle);
        Self {
            image,
            sequence: self.sequence,
        }
    }
}

// ----------------------------------------------------------------------------
// Geometry
// ----------------------------------------------------------------------------

/// Axis-aligned box in processed-frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Bottom edge; the scalar the crossing evaluator follows.
    pub fn bottom_y(&self) -> i32 {
        self.y + self.h as i32
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    /// Intersect with a `width`x`height` frame. `None` when nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = (self.x + self.w as i32).min(width as i32);
        let y1 = (self.y + self.h as i32).min(height as i32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub bbox: BoundingBox,
    pub label: String,
}

impl Annotation {
    pub fn new(bbox: BoundingBox, label: impl Into<String>) -> Self {
        Self {
            bbox,
            label: label.into(),
        }
    }

    pub fn tracked(bbox: BoundingBox) -> Self {
        Self::new(bbox, TRACKED_LABEL)
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer: bounded pre-event window
// ----------------------------------------------------------------------------

/// A frame copy with the annotations computed for it.
#[derive(Clone, Debug)]
pub struct BufferedFrame {
    pub frame: Frame,
    pub annotations: Vec<Annotation>,
}

/// Bounded ring buffer of recent frames.
///
/// - Holds at most `capacity` entries; the oldest is evicted first
/// - Iteration is oldest-first, which is the order a session writes them
/// - Reading does not consume: the window keeps sliding while a session records
pub struct FrameBuffer {
    buffer: VecDeque<BufferedFrame>,
    max_frames: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            max_frames: capacity,
        }
    }

    /// Push a frame copy. Evicts the oldest entries as needed.
    pub fn push(&mut self, frame: Frame, annotations: Vec<Annotation>) {
        if self.max_frames == 0 {
            return;
        }
        while self.buffer.len() >= self.max_frames {
            self.buffer.pop_front();
        }
        self.buffer.push_back(BufferedFrame { frame, annotations });
    }

    /// Oldest-first view of the window.
    pub fn iter(&self) -> impl Iterator<Item = &BufferedFrame> + '_ {
        self.buffer.iter()
    }

    pub fn latest(&self) -> Option<&BufferedFrame> {
        self.buffer.back()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_frames
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
