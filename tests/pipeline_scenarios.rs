use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use image::RgbImage;
use tempfile::TempDir;

use tripwire::config::CompressionBackend;
use tripwire::detect::Detection;
use tripwire::ingest::SourceStats;
use tripwire::record::storage::manifest_path_for;
use tripwire::{
    Annotation, BoundingBox, CameraPipeline, ClipManifest, DetectionModel, EventRecorder, Frame, FrameSource,
    MemorySinkFactory, Orchestrator, PipelineError, RecorderEvent, RecorderState,
    RuntimeSettings, TrackMode, TripwireConfig, VisualTracker,
};

/// Blank frames, with scripted read failures, then end of stream.
struct Scripted {
    name: String,
    reads: VecDeque<bool>,
    sequence: u64,
}

impl Scripted {
    /// `true` yields a frame, `false` a transient failure.
    fn new(name: &str, reads: Vec<bool>) -> Self {
        Self {
            name: name.to_string(),
            reads: reads.into(),
            sequence: 0,
        }
    }

    fn frames(name: &str, count: usize) -> Self {
        Self::new(name, vec![true; count])
    }
}

impl FrameSource for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Frame> {
        match self.reads.pop_front() {
            Some(true) => {
                self.sequence += 1;
                Ok(Frame::new(RgbImage::new(120, 480), self.sequence - 1))
            }
            Some(false) => Err(PipelineError::read_failure(&self.name, "dropped")),
            None => Err(PipelineError::end_of_stream(&self.name)),
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats::default()
    }
}

fn person(bottom: i32) -> BoundingBox {
    BoundingBox::new(40, bottom - 60, 30, 60)
}

/// Scripted world shared by the model and the tracker: one bottom edge per
/// frame for the detector and for the tracker.
#[derive(Clone)]
struct World {
    label: &'static str,
    detections: Arc<Mutex<VecDeque<Option<i32>>>>,
    tracked: Arc<Mutex<VecDeque<Option<i32>>>>,
}

impl World {
    fn new(detections: Vec<Option<i32>>, tracked: Vec<Option<i32>>) -> Self {
        Self {
            label: "Person",
            detections: Arc::new(Mutex::new(detections.into())),
            tracked: Arc::new(Mutex::new(tracked.into())),
        }
    }

    /// Detector and tracker agree on every frame.
    fn agreeing(bottoms: Vec<Option<i32>>) -> Self {
        Self::new(bottoms.clone(), bottoms)
    }

    fn labelled(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }
}

struct WorldModel(World);

impl DetectionModel for WorldModel {
    fn name(&self) -> &'static str {
        "world"
    }

    fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        let next = self.0.detections.lock().unwrap().pop_front().flatten();
        Ok(next
            .map(|bottom| vec![Detection::new(person(bottom), self.0.label, 0.8)])
            .unwrap_or_default())
    }
}

struct WorldTracker(World);

impl VisualTracker for WorldTracker {
    fn init(&mut self, _frame: &Frame, _bbox: BoundingBox) {}

    fn update(&mut self, _frame: &Frame) -> Option<BoundingBox> {
        self.0.tracked.lock().unwrap().pop_front().flatten().map(person)
    }
}

fn settings() -> RuntimeSettings {
    RuntimeSettings {
        boundary_y: 360,
        ..RuntimeSettings::default()
    }
}

fn camera(
    name: &str,
    source: Scripted,
    world: World,
    capacity: usize,
    post_limit: usize,
    sinks: &MemorySinkFactory,
) -> CameraPipeline {
    CameraPipeline::new(
        name,
        Box::new(source),
        Box::new(WorldModel(world.clone())),
        EventRecorder::new(name, capacity, post_limit, Box::new(sinks.clone())),
        settings(),
    )
    .with_tracker(Box::new(WorldTracker(world)))
}

#[test]
fn person_walking_over_the_boundary_records_one_clip() {
    let sinks = MemorySinkFactory::new();
    let bottoms = vec![Some(330), Some(350), Some(375), Some(390), Some(400), Some(410)];
    let mut cam = camera(
        "cam0",
        Scripted::frames("walk", 6),
        World::agreeing(bottoms),
        4,
        3,
        &sinks,
    );

    let crossed: Vec<bool> = (0..6)
        .map(|_| cam.step().unwrap().report.boundary_crossed)
        .collect();
    assert_eq!(crossed, vec![false, false, true, false, false, false]);
    assert_eq!(cam.recorder().state(), RecorderState::Idle);

    let clips = sinks.clips();
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0].sequences, vec![0, 1, 2, 3, 4, 5]);
    assert!(clips[0].finished);
    assert_eq!(cam.stats().crossings, 1);
    assert_eq!(cam.stats().sessions_completed, 1);
    assert_eq!(cam.track_state().recent_y, vec![350, 375, 390, 400, 410]);
}

#[test]
fn losing_the_tracker_mid_session_keeps_recording() {
    let sinks = MemorySinkFactory::new();
    let world = World::new(
        vec![Some(350), None, None, None, None],
        vec![Some(350), Some(370), None, None, None],
    );
    let mut cam = camera("cam0", Scripted::frames("loss", 5), world, 4, 3, &sinks);

    let first = cam.step().unwrap();
    assert_eq!(first.report.track.mode, TrackMode::Tracking(person(350)));

    let second = cam.step().unwrap();
    assert!(second.report.boundary_crossed);
    assert!(matches!(second.report.event, RecorderEvent::Started(_)));

    let third = cam.step().unwrap();
    assert_eq!(third.report.track.mode, TrackMode::Inactive);
    assert_eq!(third.report.track.last_bottom_y, None);
    assert_eq!(third.report.event, RecorderEvent::Recorded);

    cam.step().unwrap();
    let last = cam.step().unwrap();
    assert!(matches!(last.report.event, RecorderEvent::Completed(_)));
    assert_eq!(sinks.clips()[0].sequences, vec![0, 1, 2, 3, 4]);
}

#[test]
fn sink_failure_aborts_and_the_next_crossing_starts_fresh() {
    let sinks = MemorySinkFactory::new().failing_after(2);
    let bottoms = vec![Some(350), Some(370), Some(380), Some(350), Some(370), Some(380)];
    let mut cam = camera(
        "cam0",
        Scripted::frames("fail", 6),
        World::agreeing(bottoms),
        2,
        5,
        &sinks,
    );

    cam.step().unwrap();
    let started = cam.step().unwrap();
    assert!(matches!(started.report.event, RecorderEvent::Started(_)));
    let aborted = cam.step().unwrap();
    assert!(matches!(aborted.report.event, RecorderEvent::Aborted(_)));
    assert_eq!(cam.recorder().state(), RecorderState::Idle);
    assert_eq!(cam.stats().sessions_aborted, 1);

    let back_up = cam.step().unwrap();
    assert!(back_up.report.boundary_crossed);
    let again = cam.step().unwrap();
    assert!(again.report.boundary_crossed);
    assert!(sinks.clips()[0].aborted);
}

#[test]
fn one_failing_camera_does_not_stall_the_other() {
    let sinks = MemorySinkFactory::new();
    let steady = camera(
        "cam0",
        Scripted::frames("steady", 4),
        World::agreeing(vec![Some(300); 4]),
        2,
        2,
        &sinks,
    );
    let flaky = camera(
        "cam1",
        Scripted::new("flaky", vec![false, true, false, true]),
        World::agreeing(vec![Some(300); 4]),
        2,
        2,
        &sinks,
    );
    let mut orch =
        Orchestrator::from_pipelines(vec![steady, flaky], settings(), Duration::from_secs(5))
            .unwrap();

    let delivered: Vec<usize> = (0..4).map(|_| orch.tick().cameras.len()).collect();
    assert_eq!(delivered, vec![1, 2, 1, 2]);

    let fifth = orch.tick();
    assert!(fifth.frame.is_none());
    assert!(!orch.is_running());
}

#[test]
fn tick_annotations_come_from_the_first_camera_that_delivered() {
    let sinks = MemorySinkFactory::new();
    let gate = camera(
        "cam0",
        Scripted::new("gate", vec![false, true]),
        World::agreeing(vec![Some(300); 2]),
        2,
        2,
        &sinks,
    );
    let yard = camera(
        "cam1",
        Scripted::frames("yard", 2),
        World::agreeing(vec![Some(420); 2]).labelled("Truck"),
        2,
        2,
        &sinks,
    );
    let mut orch =
        Orchestrator::from_pipelines(vec![gate, yard], settings(), Duration::from_secs(5))
            .unwrap();

    let first = orch.tick();
    assert_eq!(first.cameras.len(), 1);
    assert_eq!(first.cameras[0].camera, "cam1");
    assert_eq!(
        first.annotations,
        vec![
            Annotation::new(person(420), "Truck"),
            Annotation::tracked(person(420)),
        ]
    );

    let second = orch.tick();
    assert_eq!(second.cameras.len(), 2);
    assert!(second.annotations.iter().all(|a| a.bbox == person(300)));
    assert_eq!(second.annotations[0].label, "Person");
}

#[test]
fn synthetic_run_writes_clips_and_manifests() {
    let dir = TempDir::new().unwrap();
    let mut cfg = TripwireConfig::default();
    cfg.sources = vec!["stub://yard?width=120&height=240&period=20&frames=40".to_string()];
    cfg.frame_width = 120;
    cfg.target_fps = 4;
    cfg.buffer_seconds = 1;
    cfg.storage.output_dir = dir.path().join("raw");
    cfg.storage.compressed_dir = dir.path().join("compressed");
    cfg.compression.backend = CompressionBackend::None;
    cfg.runtime.boundary_y = 120;
    cfg.validate().unwrap();

    let mut orch = Orchestrator::from_config(&cfg).unwrap();
    let mut clips = Vec::new();
    let mut crossings = 0;
    while orch.is_running() {
        let result = orch.tick();
        crossings += result.boundary_crossed as usize;
        clips.extend(result.completed_clips);
    }
    clips.extend(orch.shutdown());

    assert!(crossings >= 1, "expected the block to cross the boundary");
    assert!(!clips.is_empty());
    for clip in &clips {
        assert!(clip.path.exists());
        assert!(clip.compressed_path.is_none());
        assert!(clip.pre_event_frames > 0);
        let manifest = ClipManifest::read(&manifest_path_for(&clip.path)).unwrap();
        assert_eq!(manifest.camera, "cam0");
        assert_eq!(manifest.sha256.len(), 64);
    }
}

#[test]
fn unavailable_cameras_are_skipped() {
    let dir = TempDir::new().unwrap();
    let mut cfg = TripwireConfig::default();
    cfg.sources = vec![
        "gopher://nowhere".to_string(),
        "stub://ok?width=64&height=64".to_string(),
    ];
    cfg.storage.output_dir = dir.path().join("raw");
    cfg.storage.compressed_dir = dir.path().join("compressed");
    cfg.compression.backend = CompressionBackend::None;

    let orch = Orchestrator::from_config(&cfg).unwrap();
    assert_eq!(orch.camera_names(), vec!["cam1"]);

    cfg.sources = vec!["gopher://nowhere".to_string()];
    assert!(Orchestrator::from_config(&cfg).is_err());
}
