use anyhow::Result;
use std::collections::VecDeque;

use crate::detect::backend::DetectionModel;
use crate::detect::result::Detection;
use crate::frame::{BoundingBox, Frame};

/// Colour-marker backend.
///
/// Reports every 4-connected region of the marker colour as one detection.
/// Needs no model file, which makes it the backend for synthetic scenes,
/// calibration targets and tests.
pub struct MarkerBackend {
    color: [u8; 3],
    tolerance: u8,
    min_pixels: usize,
    label: String,
    confidence: f32,
    visited: Vec<bool>,
}

impl MarkerBackend {
    pub fn new(color: [u8; 3]) -> Self {
        Self {
            color,
            tolerance: 40,
            min_pixels: 16,
            label: "Person".to_string(),
            confidence: 0.9,
            visited: Vec::new(),
        }
    }

    /// Report regions under a different class name.
    pub fn with_label(mut self, label: &str, confidence: f32) -> Self {
        self.label = label.to_string();
        self.confidence = confidence;
        self
    }

    pub fn with_min_pixels(mut self, min_pixels: usize) -> Self {
        self.min_pixels = min_pixels.max(1);
        self
    }

    fn matches(&self, pixel: &image::Rgb<u8>) -> bool {
        pixel
            .0
            .iter()
            .zip(self.color.iter())
            .all(|(a, b)| a.abs_diff(*b) <= self.tolerance)
    }
}

impl DetectionModel for MarkerBackend {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let image = frame.image();
        let (width, height) = image.dimensions();
        self.visited.clear();
        self.visited.resize(width as usize * height as usize, false);

        let mut detections = Vec::new();
        let mut queue = VecDeque::new();
        for start_y in 0..height {
            for start_x in 0..width {
                let idx = (start_y * width + start_x) as usize;
                if self.visited[idx] || !self.matches(image.get_pixel(start_x, start_y)) {
                    continue;
                }
                self.visited[idx] = true;
                queue.push_back((start_x, start_y));
                let (mut x0, mut y0, mut x1, mut y1) = (start_x, start_y, start_x, start_y);
                let mut count = 0usize;
                while let Some((x, y)) = queue.pop_front() {
                    count += 1;
                    x0 = x0.min(x);
                    y0 = y0.min(y);
                    x1 = x1.max(x);
                    y1 = y1.max(y);
                    let neighbours = [
                        (x.wrapping_sub(1), y),
                        (x + 1, y),
                        (x, y.wrapping_sub(1)),
                        (x, y + 1),
                    ];
                    for (nx, ny) in neighbours {
                        if nx >= width || ny >= height {
                            continue;
                        }
                        let nidx = (ny * width + nx) as usize;
                        if !self.visited[nidx] && self.matches(image.get_pixel(nx, ny)) {
                            self.visited[nidx] = true;
                            queue.push_back((nx, ny));
                        }
                    }
                }
                if count >= self.min_pixels {
                    detections.push(Detection::new(
                        BoundingBox::new(x0 as i32, y0 as i32, x1 - x0 + 1, y1 - y0 + 1),
                        self.label.clone(),
                        self.confidence,
                    ));
                }
            }
        }
        Ok(detections)
    }
}
