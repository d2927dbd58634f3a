use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Local};

use crate::annotate::Renderer;
use crate::frame::{Annotation, Frame, FrameBuffer};
use crate::record::compress::CompressionHandle;
use crate::record::manifest::write_manifest;
use crate::record::sink::{ClipSink, SinkFactory};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

/// What one tick did to the recorder.
#[derive(Clone, Debug, PartialEq)]
pub enum RecorderEvent {
    /// Idle, frame buffered only.
    Idle,
    /// A session opened and the pre-event buffer was written.
    Started(PathBuf),
    /// A live frame was appended to the open session.
    Recorded,
    /// A crossing arrived while recording. The live frame was still appended.
    CrossingIgnored,
    /// The session reached its post-crossing limit and was closed.
    Completed(ClipSummary),
    /// The session could not be opened or written and was discarded.
    Aborted(String),
}

/// A finished clip.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipSummary {
    pub camera: String,
    pub path: PathBuf,
    /// Where the compressed copy will appear, if compression was queued.
    pub compressed_path: Option<PathBuf>,
    pub started_at: DateTime<Local>,
    pub start_id: String,
    pub pre_event_frames: usize,
    pub live_frames: usize,
    pub first_sequence: u64,
    pub last_sequence: u64,
    /// Closed by shutdown before reaching the post-crossing limit.
    pub finalized_early: bool,
}

struct RecordingSession {
    start_id: String,
    started_at: DateTime<Local>,
    sink: Box<dyn ClipSink>,
    pre_event_frames: usize,
    frames_written_since_start: usize,
    first_sequence: u64,
    last_sequence: u64,
}

/// Pre/post-event recorder for one camera.
///
/// Every frame goes into the bounded pre-event buffer. A crossing while idle
/// opens a session: the buffer (which already holds the crossing frame) is
/// written oldest-first, then live frames follow until the post-crossing
/// limit is reached. The buffer is copied, not drained, so it keeps sliding
/// during the session.
pub struct EventRecorder {
    camera: String,
    buffer: FrameBuffer,
    post_limit: usize,
    sinks: Box<dyn SinkFactory>,
    session: Option<RecordingSession>,
    renderer: Arc<Renderer>,
    compression: Option<CompressionHandle>,
}

impl EventRecorder {
    pub fn new(
        camera: impl Into<String>,
        buffer_capacity: usize,
        post_limit: usize,
        sinks: Box<dyn SinkFactory>,
    ) -> Self {
        Self {
            camera: camera.into(),
            buffer: FrameBuffer::new(buffer_capacity),
            post_limit,
            sinks,
            session: None,
            renderer: Arc::new(Renderer::default()),
            compression: None,
        }
    }

    /// Queue finished clips for compression.
    pub fn with_compression(mut self, handle: CompressionHandle) -> Self {
        self.compression = Some(handle);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn state(&self) -> RecorderState {
        if self.session.is_some() {
            RecorderState::Recording
        } else {
            RecorderState::Idle
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Live frames written by the open session, if any.
    pub fn frames_written_since_start(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.frames_written_since_start)
    }

    /// Feed one tick.
    pub fn on_tick(
        &mut self,
        frame: &Frame,
        annotations: &[Annotation],
        crossed: bool,
    ) -> RecorderEvent {
        self.buffer.push(frame.clone(), annotations.to_vec());

        let Some(mut session) = self.session.take() else {
            return if crossed {
                self.start_session(frame)
            } else {
                RecorderEvent::Idle
            };
        };

        if crossed {
            log::info!(
                "[{}] crossing ignored: session {} already recording",
                self.camera,
                session.start_id
            );
        }
        if let Err(e) = write_annotated(
            &self.renderer,
            session.sink.as_mut(),
            &session.start_id,
            frame,
            annotations,
        ) {
            return self.abort(session, e);
        }
        session.frames_written_since_start += 1;
        session.last_sequence = frame.sequence();

        if session.frames_written_since_start >= self.post_limit {
            return self.complete(session, false);
        }
        self.session = Some(session);
        if crossed {
            RecorderEvent::CrossingIgnored
        } else {
            RecorderEvent::Recorded
        }
    }

    /// Close an open session early (shutdown, end of stream).
    pub fn finalize(&mut self) -> Option<ClipSummary> {
        let session = self.session.take()?;
        match self.complete(session, true) {
            RecorderEvent::Completed(summary) => Some(summary),
            _ => None,
        }
    }

    fn start_session(&mut self, frame: &Frame) -> RecorderEvent {
        let started_at = Local::now();
        let start_id = started_at.format("%Y%m%d_%H%M%S").to_string();
        let sink = match self
            .sinks
            .create(&started_at, frame.width(), frame.height())
        {
            Ok(sink) => sink,
            Err(e) => {
                log::error!("[{}] cannot open clip: {:#}", self.camera, e);
                return RecorderEvent::Aborted(format!("{e:#}"));
            }
        };

        let mut session = RecordingSession {
            start_id,
            started_at,
            sink,
            pre_event_frames: 0,
            frames_written_since_start: 0,
            first_sequence: frame.sequence(),
            last_sequence: frame.sequence(),
        };
        log::info!(
            "[{}] started recording {} ({} buffered frames)",
            self.camera,
            session.sink.path().display(),
            self.buffer.len()
        );

        let mut drain_error = None;
        for (i, buffered) in self.buffer.iter().enumerate() {
            if i == 0 {
                session.first_sequence = buffered.frame.sequence();
            }
            if let Err(e) = write_annotated(
                &self.renderer,
                session.sink.as_mut(),
                &session.start_id,
                &buffered.frame,
                &buffered.annotations,
            ) {
                drain_error = Some(e);
                break;
            }
            session.pre_event_frames += 1;
            session.last_sequence = buffered.frame.sequence();
        }
        if let Some(e) = drain_error {
            return self.abort(session, e);
        }

        if self.post_limit == 0 {
            return self.complete(session, false);
        }
        let path = session.sink.path().to_path_buf();
        self.session = Some(session);
        RecorderEvent::Started(path)
    }

    fn abort(&mut self, session: RecordingSession, err: anyhow::Error) -> RecorderEvent {
        log::error!(
            "[{}] recording {} aborted: {:#}",
            self.camera,
            session.sink.path().display(),
            err
        );
        session.sink.abort();
        RecorderEvent::Aborted(format!("{err:#}"))
    }

    fn complete(&mut self, session: RecordingSession, finalized_early: bool) -> RecorderEvent {
        let RecordingSession {
            start_id,
            started_at,
            sink,
            pre_event_frames,
            frames_written_since_start,
            first_sequence,
            last_sequence,
        } = session;
        let partial = sink.path().to_path_buf();
        let path = match sink.finish() {
            Ok(path) => path,
            Err(e) => {
                log::error!(
                    "[{}] failed to close {}: {:#}",
                    self.camera,
                    partial.display(),
                    e
                );
                if self.sinks.persistent() {
                    let _ = fs::remove_file(&partial);
                }
                return RecorderEvent::Aborted(format!("{e:#}"));
            }
        };

        let mut summary = ClipSummary {
            camera: self.camera.clone(),
            path,
            compressed_path: None,
            started_at,
            start_id,
            pre_event_frames,
            live_frames: frames_written_since_start,
            first_sequence,
            last_sequence,
            finalized_early,
        };
        log::info!(
            "[{}] stopped recording {} ({} pre-event + {} live frames)",
            self.camera,
            summary.path.display(),
            summary.pre_event_frames,
            summary.live_frames
        );

        if self.sinks.persistent() {
            // hashing a long clip happens on the compression thread when there is one
            match &self.compression {
                Some(handle) => summary.compressed_path = handle.dispatch(&summary),
                None => {
                    if let Err(e) = write_manifest(&summary) {
                        log::warn!(
                            "[{}] manifest for {} not written: {:#}",
                            self.camera,
                            summary.path.display(),
                            e
                        );
                    }
                }
            }
        }
        RecorderEvent::Completed(summary)
    }
}

/// Draw boxes and the recording marker on a copy, then append it.
fn write_annotated(
    renderer: &Renderer,
    sink: &mut dyn ClipSink,
    start_id: &str,
    frame: &Frame,
    annotations: &[Annotation],
) -> Result<()> {
    let mut annotated = frame.clone();
    renderer.draw_annotations(annotated.image_mut(), annotations);
    renderer.draw_recording_marker(annotated.image_mut(), start_id);
    sink.write_frame(&annotated)
}
