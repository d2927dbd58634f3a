#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectionModel;
use crate::detect::result::Detection;
use crate::error::PipelineError;
use crate::frame::{BoundingBox, Frame};

type YoloPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

const LETTERBOX_FILL: u8 = 114;
const IOU_THRESHOLD: f32 = 0.45;
/// Candidates below this never reach the detector's own confidence filter.
const SCORE_FLOOR: f32 = 0.25;

const COCO_LABELS: [&str; 80] = [
    "Person", "Bicycle", "Car", "Motorcycle", "Airplane", "Bus", "Train", "Truck", "Boat",
    "Traffic light", "Fire hydrant", "Stop sign", "Parking meter", "Bench", "Bird", "Cat", "Dog",
    "Horse", "Sheep", "Cow", "Elephant", "Bear", "Zebra", "Giraffe", "Backpack", "Umbrella",
    "Handbag", "Tie", "Suitcase", "Frisbee", "Skis", "Snowboard", "Sports ball", "Kite",
    "Baseball bat", "Baseball glove", "Skateboard", "Surfboard", "Tennis racket", "Bottle",
    "Wine glass", "Cup", "Fork", "Knife", "Spoon", "Bowl", "Banana", "Apple", "Sandwich",
    "Orange", "Broccoli", "Carrot", "Hot dog", "Pizza", "Donut", "Cake", "Chair", "Couch",
    "Potted plant", "Bed", "Dining table", "Toilet", "Tv", "Laptop", "Mouse", "Remote",
    "Keyboard", "Cell phone", "Microwave", "Oven", "Toaster", "Sink", "Refrigerator", "Book",
    "Clock", "Vase", "Scissors", "Teddy bear", "Hair drier", "Toothbrush",
];

/// Output row layout of the exported model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum YoloLayout {
    /// `[1, anchors, 5 + classes]` with an objectness column (YOLOv5).
    AnchorsFirst,
    /// `[1, 4 + classes, anchors]` without objectness (YOLOv8).
    ChannelsFirst,
}

/// Tract-based YOLO backend for ONNX exports.
///
/// Loads a local model file and runs COCO object detection on RGB frames.
/// Frames are letterboxed into the square model input and boxes are mapped
/// back to frame coordinates.
pub struct TractYoloBackend {
    model: YoloPlan,
    input_size: u32,
}

struct Candidate {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
    class_id: usize,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x1 - self.x0).max(0.0) * (self.y1 - self.y0).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let w = (self.x1.min(other.x1) - self.x0.max(other.x0)).max(0.0);
        let h = (self.y1.min(other.y1) - self.y0.max(other.y0)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

impl TractYoloBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        log::info!(
            "TractYoloBackend: loaded {} ({}x{} input)",
            model_path.display(),
            input_size,
            input_size
        );
        Ok(Self { model, input_size })
    }

    /// Letterbox the frame into the model input. Returns the tensor, the
    /// scale and the padding applied.
    fn build_input(&self, image: &RgbImage) -> (Tensor, f32, (f32, f32)) {
        let size = self.input_size;
        let scale = (size as f32 / image.width() as f32).min(size as f32 / image.height() as f32);
        let new_w = ((image.width() as f32 * scale).round() as u32).clamp(1, size);
        let new_h = ((image.height() as f32 * scale).round() as u32).clamp(1, size);
        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
        let pad_x = (size - new_w) / 2;
        let pad_y = (size - new_h) / 2;
        imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, channel, y, x)| canvas.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        (input.into_tensor(), scale, (pad_x as f32, pad_y as f32))
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Candidate>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }
        let layout = if shape[1] < shape[2] {
            YoloLayout::ChannelsFirst
        } else {
            YoloLayout::AnchorsFirst
        };
        let (anchors, channels) = match layout {
            YoloLayout::ChannelsFirst => (shape[2], shape[1]),
            YoloLayout::AnchorsFirst => (shape[1], shape[2]),
        };
        let class_offset = match layout {
            YoloLayout::ChannelsFirst => 4,
            YoloLayout::AnchorsFirst => 5,
        };
        if channels <= class_offset {
            return Err(anyhow!("YOLO output has no class scores ({:?})", shape));
        }
        let at = |anchor: usize, channel: usize| match layout {
            YoloLayout::ChannelsFirst => view[[0, channel, anchor]],
            YoloLayout::AnchorsFirst => view[[0, anchor, channel]],
        };

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let objectness = match layout {
                YoloLayout::AnchorsFirst => at(anchor, 4),
                YoloLayout::ChannelsFirst => 1.0,
            };
            let (class_id, class_score) = (class_offset..channels)
                .map(|c| (c - class_offset, at(anchor, c)))
                .fold((0, f32::NEG_INFINITY), |best, x| if x.1 > best.1 { x } else { best });
            let score = objectness * class_score;
            if !score.is_finite() || score < SCORE_FLOOR {
                continue;
            }
            let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
            candidates.push(Candidate {
                x0: cx - w / 2.0,
                y0: cy - h / 2.0,
                x1: cx + w / 2.0,
                y1: cy + h / 2.0,
                class_id,
                score,
            });
        }
        Ok(non_max_suppression(candidates, IOU_THRESHOLD))
    }
}

/// Greedy per-class NMS, highest score first.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

impl DetectionModel for TractYoloBackend {
    fn name(&self) -> &'static str {
        "tract-yolo"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, scale, (pad_x, pad_y)) = self.build_input(frame.image());
        let outputs = self.model.run(tvec!(input.into())).map_err(|e| {
            anyhow::Error::from(PipelineError::ModelInferenceFailure {
                model: self.name().to_string(),
                reason: e.to_string(),
            })
        })?;
        let candidates = self.decode(outputs)?;

        let (width, height) = (frame.width(), frame.height());
        let mut detections = Vec::with_capacity(candidates.len());
        for c in candidates {
            let x0 = ((c.x0 - pad_x) / scale).round() as i32;
            let y0 = ((c.y0 - pad_y) / scale).round() as i32;
            let x1 = ((c.x1 - pad_x) / scale).round() as i32;
            let y1 = ((c.y1 - pad_y) / scale).round() as i32;
            if x1 <= x0 || y1 <= y0 {
                continue;
            }
            let Some(bbox) =
                BoundingBox::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32).clamp_to(width, height)
            else {
                continue;
            };
            let label = COCO_LABELS.get(c.class_id).copied().unwrap_or("Unknown");
            detections.push(Detection::new(bbox, label, c.score));
        }
        Ok(detections)
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.input_size;
        let blank = Frame::new(RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3])), 0);
        self.infer(&blank).map(|_| ())
    }
}
