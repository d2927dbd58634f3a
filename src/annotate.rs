//! Drawing boxes, labels, the boundary line and the recording marker.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut,
};
use imageproc::rect::Rect;

use crate::frame::Annotation;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const RECORDING_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const TAB_HEIGHT: u32 = 14;
const TEXT_SCALE: f32 = 12.0;

/// Stateless frame decorator. Text needs a font; without one only the
/// geometric marks are drawn.
#[derive(Clone, Default)]
pub struct Renderer {
    font: Option<FontArc>,
}

impl Renderer {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    /// Load a TTF/OTF font, or build a text-less renderer when `path` is None.
    pub fn from_font_path(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .with_context(|| format!("invalid font file {}", path.display()))?;
        Ok(Self::new(Some(font)))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Green 2 px box and a label tab per annotation.
    pub fn draw_annotations(&self, image: &mut RgbImage, annotations: &[Annotation]) {
        for annotation in annotations {
            let Some(bbox) = annotation.bbox.clamp_to(image.width(), image.height()) else {
                continue;
            };
            draw_hollow_rect_mut(image, Rect::at(bbox.x, bbox.y).of_size(bbox.w, bbox.h), BOX_COLOR);
            if bbox.w > 2 && bbox.h > 2 {
                draw_hollow_rect_mut(
                    image,
                    Rect::at(bbox.x + 1, bbox.y + 1).of_size(bbox.w - 2, bbox.h - 2),
                    BOX_COLOR,
                );
            }

            let tab_y = (bbox.y - TAB_HEIGHT as i32).max(0);
            let tab_w = (annotation.label.chars().count() as u32 * 7 + 4).max(8);
            draw_filled_rect_mut(image, Rect::at(bbox.x, tab_y).of_size(tab_w, TAB_HEIGHT), BOX_COLOR);
            self.text(image, bbox.x + 2, tab_y + 1, TEXT_COLOR, &annotation.label);
        }
    }

    /// Red dot in the top-left corner plus the session id when a font exists.
    pub fn draw_recording_marker(&self, image: &mut RgbImage, session_id: &str) {
        draw_filled_circle_mut(image, (12, 12), 6, RECORDING_COLOR);
        self.text(image, 24, 5, RECORDING_COLOR, &format!("REC {session_id}"));
    }

    /// Horizontal 2 px line at `row` in `color`. Rows outside the frame are
    /// skipped.
    pub fn draw_boundary(&self, image: &mut RgbImage, row: i32, color: [u8; 3]) {
        let (width, height) = image.dimensions();
        for y in [row, row + 1] {
            if y < 0 || y as u32 >= height {
                continue;
            }
            for x in 0..width {
                image.put_pixel(x, y as u32, Rgb(color));
            }
        }
    }

    fn text(&self, image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(image, color, x, y, PxScale::from(TEXT_SCALE), font, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BoundingBox;

    #[test]
    fn boxes_are_outlined_in_green() {
        let mut image = RgbImage::new(100, 100);
        let renderer = Renderer::default();
        renderer.draw_annotations(
            &mut image,
            &[Annotation::new(BoundingBox::new(20, 40, 30, 30), "Person")],
        );
        assert_eq!(*image.get_pixel(20, 69), BOX_COLOR);
        assert_eq!(*image.get_pixel(21, 68), BOX_COLOR);
        assert_eq!(*image.get_pixel(35, 55), Rgb([0, 0, 0]));
        // label tab sits above the box
        assert_eq!(*image.get_pixel(22, 30), BOX_COLOR);
    }

    #[test]
    fn boxes_outside_the_frame_are_skipped() {
        let mut image = RgbImage::new(10, 10);
        Renderer::default().draw_annotations(
            &mut image,
            &[Annotation::new(BoundingBox::new(50, 50, 5, 5), "Car")],
        );
        assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn boundary_line_is_two_rows() {
        let mut image = RgbImage::new(16, 16);
        Renderer::default().draw_boundary(&mut image, 8, [0, 0, 255]);
        assert_eq!(*image.get_pixel(3, 8), Rgb([0, 0, 255]));
        assert_eq!(*image.get_pixel(3, 9), Rgb([0, 0, 255]));
        assert_eq!(*image.get_pixel(3, 10), Rgb([0, 0, 0]));
        Renderer::default().draw_boundary(&mut image, 400, [255, 0, 0]);
    }

    #[test]
    fn recording_marker_is_red() {
        let mut image = RgbImage::new(40, 40);
        Renderer::default().draw_recording_marker(&mut image, "20250101_120000");
        assert_eq!(*image.get_pixel(12, 12), RECORDING_COLOR);
    }

    #[test]
    fn missing_font_file_is_an_error() {
        assert!(Renderer::from_font_path(Some(Path::new("/nonexistent/font.ttf"))).is_err());
        assert!(!Renderer::from_font_path(None).unwrap().has_font());
    }
}
