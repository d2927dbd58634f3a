use anyhow::Result;
use serde::Serialize;

use crate::config::{RuntimeSettings, DEFAULT_LABELS};
use crate::crossing::{CrossingEvaluator, TrackerSignal};
use crate::detect::{DetectionModel, DetectionOutcome, ObjectDetector};
use crate::error::is_end_of_stream;
use crate::frame::{Annotation, Frame};
use crate::ingest::FrameSource;
use crate::motion::MotionGate;
use crate::record::{ClipSummary, EventRecorder, RecorderEvent};
use crate::track::{ObjectTracker, TemplateTracker, TrackMode, TrackerUpdate, VisualTracker};

/// Per-camera counters, reported with every output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CameraStats {
    pub frames: u64,
    pub read_failures: u64,
    pub inference_failures: u64,
    pub crossings: u64,
    pub sessions_completed: u64,
    pub sessions_aborted: u64,
}

/// Snapshot of a camera's tracking state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackState {
    pub mode: TrackMode,
    pub last_bottom_y: Option<i32>,
    /// Oldest-first, at most `RECENT_HISTORY` entries.
    pub recent_y: Vec<i32>,
}

/// Everything about one camera's tick except the frame itself.
#[derive(Clone, Debug)]
pub struct CameraReport {
    pub camera: String,
    pub motion_detected: bool,
    pub boundary_crossed: bool,
    pub event: RecorderEvent,
    pub track: TrackState,
    pub stats: CameraStats,
}

/// Result of one camera processing one frame.
#[derive(Clone, Debug)]
pub struct CameraOutput {
    /// The processed (resized, unannotated) frame.
    pub frame: Frame,
    /// Accepted detections in order, then the tracker box if any.
    pub annotations: Vec<Annotation>,
    pub report: CameraReport,
}

/// Detector, tracker, evaluator and recorder for one source.
///
/// Owns all per-camera state; nothing here is shared with other cameras.
pub struct CameraPipeline {
    name: String,
    source: Box<dyn FrameSource>,
    detector: ObjectDetector,
    tracker: ObjectTracker,
    evaluator: CrossingEvaluator,
    recorder: EventRecorder,
    motion_gate: MotionGate,
    runtime: RuntimeSettings,
    frame_width: Option<u32>,
    stats: CameraStats,
    closed: bool,
}

impl CameraPipeline {
    pub fn new(
        name: impl Into<String>,
        source: Box<dyn FrameSource>,
        model: Box<dyn DetectionModel>,
        recorder: EventRecorder,
        runtime: RuntimeSettings,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            detector: ObjectDetector::new(
                model,
                DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
            ),
            tracker: ObjectTracker::new(Box::new(TemplateTracker::default())),
            evaluator: CrossingEvaluator::new(),
            recorder,
            motion_gate: MotionGate::new(),
            runtime,
            frame_width: None,
            stats: CameraStats::default(),
            closed: false,
        }
    }

    /// Resize every frame to `width` (aspect preserved) before detection.
    pub fn with_frame_width(mut self, width: u32) -> Self {
        self.frame_width = Some(width).filter(|w| *w > 0);
        self
    }

    pub fn with_tracker(mut self, tracker: Box<dyn VisualTracker>) -> Self {
        self.tracker = ObjectTracker::new(tracker);
        self
    }

    pub fn with_allowed_labels(mut self, labels: Vec<String>) -> Self {
        self.detector.set_allowed_labels(labels);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> CameraStats {
        self.stats
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    /// Swap in new runtime settings; takes effect with the next frame.
    pub fn apply(&mut self, settings: RuntimeSettings) {
        if !settings.motion_gate {
            self.motion_gate.reset();
        }
        log::info!(
            "[{}] settings applied: boundary_y={} confidence>{} precedence={:?}",
            self.name,
            settings.boundary_y,
            settings.confidence_threshold,
            settings.precedence
        );
        self.runtime = settings;
    }

    pub fn track_state(&self) -> TrackState {
        TrackState {
            mode: self.tracker.mode(),
            last_bottom_y: self.evaluator.last_bottom_y(),
            recent_y: self.evaluator.recent_y(),
        }
    }

    /// Acquire one frame and process it.
    ///
    /// Errors are acquisition failures: `EndOfStream` when the source is
    /// exhausted, otherwise a transient read failure. Both are logged here.
    pub fn step(&mut self) -> Result<CameraOutput> {
        match self.source.read() {
            Ok(frame) => Ok(self.process(frame)),
            Err(e) => {
                if is_end_of_stream(&e) {
                    log::info!("[{}] source ended: {:#}", self.name, e);
                } else {
                    self.stats.read_failures += 1;
                    log::warn!("[{}] failed to read frame: {:#}", self.name, e);
                }
                Err(e)
            }
        }
    }

    /// Run detect, track, evaluate and record on one frame.
    pub fn process(&mut self, frame: Frame) -> CameraOutput {
        let frame = match self.frame_width {
            Some(width) if width != frame.width() => frame.resized_to_width(width),
            _ => frame,
        };
        self.stats.frames += 1;

        let static_scene = self.runtime.motion_gate
            && self.motion_gate.is_static(
                &frame,
                self.runtime.motion_threshold,
                self.runtime.min_area,
            );
        let detection = if static_scene {
            log::trace!(
                "[{}] static frame {}, inference skipped",
                self.name,
                frame.sequence()
            );
            DetectionOutcome::default()
        } else {
            self.detector.detect(&frame, self.runtime.confidence_threshold)
        };
        if detection.inference_failed {
            self.stats.inference_failures += 1;
        }

        self.tracker.seed(&frame, &detection.annotations);
        let tracked = self.tracker.update(&frame);
        let signal = match &tracked {
            TrackerUpdate::Idle => TrackerSignal::Absent,
            TrackerUpdate::Tracked(annotation) => {
                TrackerSignal::Position(annotation.bbox.bottom_y())
            }
            TrackerUpdate::Lost => {
                log::info!("[{}] tracker lost object, awaiting new detection", self.name);
                TrackerSignal::Lost
            }
        };
        let boundary_crossed = self.evaluator.evaluate(
            &detection.bottoms(),
            signal,
            self.runtime.boundary_y,
            self.runtime.precedence,
        );
        log::debug!("[{}] recent bottom_y: {:?}", self.name, self.evaluator.recent_y());

        let motion_detected = detection.motion_detected;
        let mut annotations = detection.annotations;
        if let TrackerUpdate::Tracked(annotation) = tracked {
            annotations.push(annotation);
        }
        if boundary_crossed {
            self.stats.crossings += 1;
        }

        let event = self.recorder.on_tick(&frame, &annotations, boundary_crossed);
        match &event {
            RecorderEvent::Completed(_) => self.stats.sessions_completed += 1,
            RecorderEvent::Aborted(_) => self.stats.sessions_aborted += 1,
            _ => {}
        }

        CameraOutput {
            frame,
            annotations,
            report: CameraReport {
                camera: self.name.clone(),
                motion_detected,
                boundary_crossed,
                event,
                track: self.track_state(),
                stats: self.stats,
            },
        }
    }

    /// Finalize any open session, then release the source.
    pub fn shutdown(&mut self) -> Option<ClipSummary> {
        if self.closed {
            return None;
        }
        self.closed = true;
        let summary = self.recorder.finalize();
        if let Some(summary) = &summary {
            self.stats.sessions_completed += 1;
            log::info!(
                "[{}] finalized {} on shutdown",
                self.name,
                summary.path.display()
            );
        }
        self.source.close();
        summary
    }
}
