use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use image::RgbImage;

use crate::annotate::Renderer;
use crate::compose::{compose, NoStitcher, Stitcher};
use crate::config::{CompressionBackend, RuntimeSettings, TripwireConfig};
use crate::detect::build_model;
use crate::frame::Annotation;
use crate::ingest::open_source;
use crate::pipeline::camera::{CameraOutput, CameraPipeline, CameraReport};
use crate::pipeline::worker::{CameraWorker, WorkerReply};
use crate::record::{
    ClipSummary, CompressionDispatcher, CompressionHandle, CompressionService, EventRecorder,
    FfmpegCompressor, NoCompression, RecorderEvent, Storage, Y4mSinkFactory,
};
use crate::track::TemplateTracker;

/// Commands consumed by the orchestrator between ticks.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlCommand {
    Reconfigure(RuntimeSettings),
    Shutdown,
}

/// Clonable remote control for a running orchestrator.
#[derive(Clone)]
pub struct ControlHandle {
    sender: Sender<ControlCommand>,
}

impl ControlHandle {
    /// New settings for every camera, applied at the next tick boundary.
    pub fn reconfigure(&self, settings: RuntimeSettings) -> Result<()> {
        self.sender
            .send(ControlCommand::Reconfigure(settings))
            .map_err(|_| anyhow!("orchestrator is gone"))
    }

    /// Stop at the next tick boundary, finalizing open sessions.
    pub fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ControlCommand::Shutdown)
            .map_err(|_| anyhow!("orchestrator is gone"))
    }
}

/// Aggregate of one tick across all cameras.
#[derive(Clone, Debug, Default)]
pub struct TickResult {
    pub tick: u64,
    /// Single camera frame, or the composite when several cameras delivered.
    pub frame: Option<RgbImage>,
    pub motion_detected: bool,
    pub boundary_crossed: bool,
    /// Annotations of the first camera that delivered a frame.
    pub annotations: Vec<Annotation>,
    /// Sessions that closed during this tick, on any camera.
    pub completed_clips: Vec<ClipSummary>,
    /// Per-camera reports, in camera order, for cameras that delivered.
    pub cameras: Vec<CameraReport>,
}

/// Drives every camera once per tick and joins the results.
///
/// Each camera runs on its own worker thread. A tick sends one request per
/// idle worker and waits for replies until a shared deadline; cameras that
/// miss it count as "no frame this tick" and their late replies are dropped.
pub struct Orchestrator {
    workers: Vec<CameraWorker>,
    replies: Receiver<WorkerReply>,
    control_tx: Sender<ControlCommand>,
    control_rx: Receiver<ControlCommand>,
    settings: RuntimeSettings,
    camera_timeout: Duration,
    tick: u64,
    stitcher: Box<dyn Stitcher>,
    renderer: Arc<Renderer>,
    compression: Option<CompressionDispatcher>,
    shutdown_requested: bool,
    shut_down: bool,
}

impl Orchestrator {
    /// Start one worker per pipeline.
    pub fn from_pipelines(
        pipelines: Vec<CameraPipeline>,
        settings: RuntimeSettings,
        camera_timeout: Duration,
    ) -> Result<Self> {
        if pipelines.is_empty() {
            return Err(anyhow!("no camera pipelines to run"));
        }
        let (reply_tx, replies) = unbounded();
        let mut workers = Vec::with_capacity(pipelines.len());
        for (index, pipeline) in pipelines.into_iter().enumerate() {
            workers.push(CameraWorker::spawn(index, pipeline, reply_tx.clone())?);
        }
        let (control_tx, control_rx) = unbounded();
        Ok(Self {
            workers,
            replies,
            control_tx,
            control_rx,
            settings,
            camera_timeout,
            tick: 0,
            stitcher: Box::new(NoStitcher),
            renderer: Arc::new(Renderer::default()),
            compression: None,
            shutdown_requested: false,
            shut_down: false,
        })
    }

    /// Open every configured camera and start the pipeline.
    ///
    /// Cameras that cannot be opened are logged and skipped; it is an error
    /// only if none can be opened.
    pub fn from_config(config: &TripwireConfig) -> Result<Self> {
        let storage = Storage::from_settings(&config.storage)?;
        let renderer = Arc::new(Renderer::from_font_path(config.font_path.as_deref())?);
        let service: Box<dyn CompressionService> = match config.compression.backend {
            CompressionBackend::Ffmpeg => {
                Box::new(FfmpegCompressor::new(&config.compression.ffmpeg_path))
            }
            CompressionBackend::None => Box::new(NoCompression),
        };
        let dispatcher = CompressionDispatcher::spawn(service, storage.clone())?;

        let pipelines =
            build_pipelines(config, &storage, Some(dispatcher.handle()), Arc::clone(&renderer))?;
        if pipelines.is_empty() {
            return Err(anyhow!(
                "none of the {} configured cameras could be opened",
                config.sources.len()
            ));
        }
        let mut orchestrator =
            Self::from_pipelines(pipelines, config.runtime.clone(), config.camera_timeout)?
                .with_renderer(renderer);
        orchestrator.compression = Some(dispatcher);
        Ok(orchestrator)
    }

    pub fn with_stitcher(mut self, stitcher: Box<dyn Stitcher>) -> Self {
        self.stitcher = stitcher;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Drain queued compression jobs on shutdown.
    pub fn with_compression(mut self, dispatcher: CompressionDispatcher) -> Self {
        self.compression = Some(dispatcher);
        self
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            sender: self.control_tx.clone(),
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn camera_names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.name.clone()).collect()
    }

    /// False after shutdown or once every camera's source has ended.
    pub fn is_running(&self) -> bool {
        !self.shut_down && self.workers.iter().any(|w| !w.retired)
    }

    /// Run one tick across all cameras.
    pub fn tick(&mut self) -> TickResult {
        self.drain_control();
        if self.shutdown_requested && !self.shut_down {
            return TickResult {
                tick: self.tick,
                completed_clips: self.shutdown(),
                ..TickResult::default()
            };
        }
        if self.shut_down {
            return TickResult {
                tick: self.tick,
                ..TickResult::default()
            };
        }

        self.tick += 1;
        let tick = self.tick;
        let mut awaiting = 0usize;
        for worker in &mut self.workers {
            if worker.request_tick(tick) {
                awaiting += 1;
            } else if let Some(busy) = worker.busy {
                log::warn!(
                    "[{}] still busy with tick {}, skipping tick {}",
                    worker.name,
                    busy,
                    tick
                );
            }
        }

        let mut outputs = Vec::new();
        let mut completed_clips = Vec::new();
        let deadline = Instant::now() + self.camera_timeout;
        while awaiting > 0 {
            let reply = match self.replies.recv_deadline(deadline) {
                Ok(reply) => reply,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            };
            if reply.tick() == Some(tick) {
                awaiting -= 1;
            }
            self.handle_reply(reply, tick, &mut outputs, &mut completed_clips);
        }
        for worker in self.workers.iter().filter(|w| w.busy == Some(tick)) {
            log::warn!("[{}] missed the tick {} deadline", worker.name, tick);
        }

        outputs.sort_by_key(|(index, _)| *index);
        let mut frames = Vec::with_capacity(outputs.len());
        let mut cameras = Vec::with_capacity(outputs.len());
        let mut annotations = None;
        for (_, output) in outputs {
            if annotations.is_none() {
                annotations = Some(output.annotations);
            }
            frames.push(output.frame.into_image());
            cameras.push(output.report);
        }
        let motion_detected = cameras.iter().any(|c| c.motion_detected);
        let boundary_crossed = cameras.iter().any(|c| c.boundary_crossed);
        if motion_detected {
            log::debug!("tick {}: motion detected", tick);
        }
        if boundary_crossed {
            log::info!("tick {}: boundary crossed", tick);
        }
        let frame = compose(self.stitcher.as_mut(), frames);
        if frame.is_none() {
            log::warn!("tick {}: no camera delivered a frame", tick);
        }

        TickResult {
            tick,
            frame,
            motion_detected,
            boundary_crossed,
            annotations: annotations.unwrap_or_default(),
            completed_clips,
            cameras,
        }
    }

    fn handle_reply(
        &mut self,
        reply: WorkerReply,
        tick: u64,
        outputs: &mut Vec<(usize, CameraOutput)>,
        completed_clips: &mut Vec<ClipSummary>,
    ) {
        match reply {
            WorkerReply::Output {
                index,
                tick: reply_tick,
                output,
            } => {
                self.mark_idle(index);
                if let RecorderEvent::Completed(summary) = &output.report.event {
                    completed_clips.push(summary.clone());
                }
                if reply_tick == tick {
                    outputs.push((index, *output));
                } else {
                    log::debug!(
                        "[{}] discarded stale output for tick {}",
                        output.report.camera,
                        reply_tick
                    );
                }
            }
            WorkerReply::NoFrame {
                index,
                tick: reply_tick,
                reason,
            } => {
                self.mark_idle(index);
                if let Some(worker) = self.workers.get(index) {
                    log::warn!(
                        "[{}] no frame for tick {}: {}",
                        worker.name,
                        reply_tick,
                        reason
                    );
                }
            }
            WorkerReply::Retired { index, summary, .. } => {
                if let Some(worker) = self.workers.get_mut(index) {
                    worker.busy = None;
                    worker.retired = true;
                    worker.join();
                    log::info!("[{}] retired: source ended", worker.name);
                }
                completed_clips.extend(summary);
            }
            WorkerReply::ShutDown { index, summary } => {
                if let Some(worker) = self.workers.get_mut(index) {
                    worker.busy = None;
                    log::debug!("[{}] worker stopped", worker.name);
                }
                completed_clips.extend(summary);
            }
        }
    }

    fn mark_idle(&mut self, index: usize) {
        if let Some(worker) = self.workers.get_mut(index) {
            worker.busy = None;
        }
    }

    fn drain_control(&mut self) {
        for command in self.control_rx.try_iter() {
            match command {
                ControlCommand::Reconfigure(settings) => {
                    log::info!("reconfigure requested: boundary_y={}", settings.boundary_y);
                    for worker in &mut self.workers {
                        worker.queue_settings(settings.clone());
                    }
                    self.settings = settings;
                }
                ControlCommand::Shutdown => self.shutdown_requested = true,
            }
        }
    }

    /// Draw the boundary and the first camera's annotations on the tick frame.
    pub fn render(&self, result: &TickResult) -> Option<RgbImage> {
        let mut image = result.frame.clone()?;
        self.renderer.draw_annotations(&mut image, &result.annotations);
        self.renderer.draw_boundary(
            &mut image,
            self.settings.boundary_y,
            self.settings.boundary_color,
        );
        Some(image)
    }

    /// Finalize every open session, stop all workers and drain compression.
    /// Returns the clips closed during shutdown.
    pub fn shutdown(&mut self) -> Vec<ClipSummary> {
        if self.shut_down {
            return Vec::new();
        }
        self.shut_down = true;
        log::info!("shutting down {} camera(s)", self.workers.len());

        for worker in &mut self.workers {
            worker.request_shutdown();
        }
        for worker in &mut self.workers {
            worker.join();
        }

        let mut clips = Vec::new();
        let mut discarded = Vec::new();
        let pending: Vec<WorkerReply> = self.replies.try_iter().collect();
        for reply in pending {
            self.handle_reply(reply, 0, &mut discarded, &mut clips);
        }
        for worker in &mut self.workers {
            worker.retired = true;
        }
        if let Some(mut dispatcher) = self.compression.take() {
            let done = dispatcher.shutdown();
            log::info!("compression drained: {} clip(s) compressed", done);
        }
        clips
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One pipeline per openable source, in configuration order.
pub fn build_pipelines(
    config: &TripwireConfig,
    storage: &Storage,
    compression: Option<CompressionHandle>,
    renderer: Arc<Renderer>,
) -> Result<Vec<CameraPipeline>> {
    let mut pipelines = Vec::new();
    for (i, source_id) in config.sources.iter().enumerate() {
        let name = format!("cam{i}");
        let source = match open_source(source_id) {
            Ok(source) => source,
            Err(e) => {
                log::error!("[{}] camera {} unavailable: {:#}", name, source_id, e);
                continue;
            }
        };
        let mut model = build_model(&config.detection)?;
        if let Err(e) = model.warm_up() {
            log::warn!("[{}] model warm-up failed: {:#}", name, e);
        }
        log::info!("[{}] opened {} (model {})", name, source_id, model.name());

        let mut recorder = EventRecorder::new(
            name.clone(),
            config.buffer_capacity(),
            config.post_crossing_limit(),
            Box::new(Y4mSinkFactory::new(storage.clone(), config.target_fps)),
        )
        .with_renderer(Arc::clone(&renderer));
        if let Some(handle) = &compression {
            recorder = recorder.with_compression(handle.clone());
        }

        pipelines.push(
            CameraPipeline::new(name, source, model, recorder, config.runtime.clone())
                .with_frame_width(config.frame_width)
                .with_tracker(Box::new(TemplateTracker::new(
                    config.tracker.search_margin,
                    config.tracker.max_mean_diff,
                )))
                .with_allowed_labels(config.detection.labels.clone()),
        );
    }
    Ok(pipelines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrossingPrecedence;
    use crate::detect::MarkerBackend;
    use crate::ingest::synthetic::{SyntheticConfig, SyntheticSource, SYNTHETIC_MARKER};
    use crate::frame::Frame;
    use crate::ingest::{FrameSource, SourceStats};
    use crate::record::MemorySinkFactory;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Blank frames that each take `delay` to arrive.
    struct Sluggish {
        delay: Duration,
        reads: Arc<AtomicU64>,
    }

    impl FrameSource for Sluggish {
        fn name(&self) -> &str {
            "sluggish"
        }

        fn read(&mut self) -> Result<Frame> {
            std::thread::sleep(self.delay);
            let sequence = self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(Frame::new(RgbImage::new(100, 120), sequence))
        }

        fn stats(&self) -> SourceStats {
            SourceStats::default()
        }
    }

    fn settings() -> RuntimeSettings {
        RuntimeSettings {
            boundary_y: 60,
            precedence: CrossingPrecedence::Sequential,
            ..RuntimeSettings::default()
        }
    }

    fn camera(name: &str, url: &str, sinks: &MemorySinkFactory) -> CameraPipeline {
        let config = SyntheticConfig::from_url(url).unwrap();
        CameraPipeline::new(
            name,
            Box::new(SyntheticSource::new(config)),
            Box::new(MarkerBackend::new(SYNTHETIC_MARKER)),
            EventRecorder::new(name, 4, 2, Box::new(sinks.clone())),
            settings(),
        )
    }

    fn orchestrator(urls: &[&str], sinks: &MemorySinkFactory) -> Orchestrator {
        let pipelines = urls
            .iter()
            .enumerate()
            .map(|(i, url)| camera(&format!("cam{i}"), url, sinks))
            .collect();
        Orchestrator::from_pipelines(pipelines, settings(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn rejects_empty_camera_list() {
        assert!(
            Orchestrator::from_pipelines(Vec::new(), settings(), Duration::from_secs(1)).is_err()
        );
    }

    #[test]
    fn composes_two_cameras_side_by_side() {
        let sinks = MemorySinkFactory::new();
        let mut orch = orchestrator(
            &["stub://a?width=100&height=120", "stub://b?width=100&height=120"],
            &sinks,
        );
        let result = orch.tick();
        assert_eq!(result.tick, 1);
        assert_eq!(result.cameras.len(), 2);
        assert_eq!(result.cameras[0].camera, "cam0");
        let frame = result.frame.unwrap();
        assert_eq!((frame.width(), frame.height()), (200, 120));
        assert!(!result.annotations.is_empty());
    }

    #[test]
    fn failing_camera_does_not_block_the_others() {
        let sinks = MemorySinkFactory::new();
        let mut orch = orchestrator(
            &["stub://ok?width=100&height=120", "stub://bad?fail_every=1&width=100&height=120"],
            &sinks,
        );
        for _ in 0..3 {
            let result = orch.tick();
            assert_eq!(result.cameras.len(), 1);
            assert_eq!(result.cameras[0].camera, "cam0");
            let frame = result.frame.unwrap();
            assert_eq!(frame.width(), 100);
        }
        assert!(orch.is_running());
    }

    #[test]
    fn crossing_produces_a_completed_clip() {
        let sinks = MemorySinkFactory::new();
        let mut orch = orchestrator(&["stub://a?width=100&height=120&period=10"], &sinks);
        let mut crossed = false;
        let mut clips = Vec::new();
        for _ in 0..20 {
            let result = orch.tick();
            crossed |= result.boundary_crossed;
            clips.extend(result.completed_clips);
        }
        clips.extend(orch.shutdown());
        assert!(crossed);
        assert!(!clips.is_empty());
        assert_eq!(clips[0].camera, "cam0");
        assert!(!sinks.clips().is_empty());
        assert!(sinks.clips().iter().all(|c| c.finished));
    }

    #[test]
    fn retires_cameras_at_end_of_stream() {
        let sinks = MemorySinkFactory::new();
        let mut orch = orchestrator(&["stub://a?width=100&height=120&frames=2"], &sinks);
        assert!(orch.tick().frame.is_some());
        assert!(orch.tick().frame.is_some());
        let result = orch.tick();
        assert!(result.frame.is_none());
        assert!(!orch.is_running());
    }

    #[test]
    fn control_handle_reconfigures_and_stops() {
        let sinks = MemorySinkFactory::new();
        let mut orch = orchestrator(&["stub://a?width=100&height=120"], &sinks);
        let control = orch.control_handle();
        control
            .reconfigure(RuntimeSettings {
                boundary_y: 90,
                ..settings()
            })
            .unwrap();
        orch.tick();
        assert_eq!(orch.settings().boundary_y, 90);

        control.shutdown().unwrap();
        let result = orch.tick();
        assert!(result.frame.is_none());
        assert!(!orch.is_running());
        assert!(orch.shutdown().is_empty());
    }

    #[test]
    fn render_draws_boundary_on_display_frame_only() {
        let sinks = MemorySinkFactory::new();
        let mut orch = orchestrator(&["stub://a?width=100&height=120"], &sinks);
        let result = orch.tick();
        let display = orch.render(&result).unwrap();
        let raw = result.frame.as_ref().unwrap();
        let color = settings().boundary_color;
        assert_eq!(display.get_pixel(2, 60).0, color);
        assert_ne!(raw.get_pixel(2, 60).0, color);
    }

    #[test]
    fn slow_camera_misses_the_deadline_and_its_late_output_is_dropped() {
        let sinks = MemorySinkFactory::new();
        let reads = Arc::new(AtomicU64::new(0));
        let slow = CameraPipeline::new(
            "slow",
            Box::new(Sluggish {
                delay: Duration::from_millis(400),
                reads: Arc::clone(&reads),
            }),
            Box::new(MarkerBackend::new(SYNTHETIC_MARKER)),
            EventRecorder::new("slow", 4, 2, Box::new(sinks.clone())),
            settings(),
        );
        let fast = camera("fast", "stub://fast?width=100&height=120", &sinks);
        let mut orch =
            Orchestrator::from_pipelines(vec![fast, slow], settings(), Duration::from_millis(100))
                .unwrap();

        let ticks = 8u64;
        for _ in 0..ticks {
            let started = Instant::now();
            let result = orch.tick();
            let elapsed = started.elapsed();
            assert!(elapsed < Duration::from_millis(350), "tick took {:?}", elapsed);
            let names: Vec<&str> = result.cameras.iter().map(|c| c.camera.as_str()).collect();
            assert_eq!(names, ["fast"]);
            assert_eq!(result.frame.unwrap().width(), 100);
        }

        // a read for an earlier tick is now waiting in the reply queue
        std::thread::sleep(Duration::from_millis(500));
        let result = orch.tick();
        let names: Vec<&str> = result.cameras.iter().map(|c| c.camera.as_str()).collect();
        assert_eq!(names, ["fast"]);
        // busy ticks were skipped, not queued behind the slow read
        assert!(reads.load(Ordering::SeqCst) < ticks);
        assert!(orch.is_running());
    }
}
