use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::PipelineError;
use crate::frame::Frame;
use crate::record::storage::{clip_stem, Storage, RAW_EXTENSION};
use crate::y4m::Y4mWriter;

/// Destination of one recording session.
pub trait ClipSink: Send {
    fn path(&self) -> &Path;

    /// Append one (already annotated) frame.
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    fn frames_written(&self) -> u64;

    /// Flush and close. Returns the final clip path.
    fn finish(self: Box<Self>) -> Result<PathBuf>;

    /// Discard the partial clip.
    fn abort(self: Box<Self>);
}

/// Opens a sink when a session starts.
pub trait SinkFactory: Send {
    fn create(
        &mut self,
        started: &DateTime<Local>,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn ClipSink>>;

    /// Whether finished clips are real files that can be hashed and compressed.
    fn persistent(&self) -> bool {
        true
    }
}

// ----------------------------------------------------------------------------
// Y4M files
// ----------------------------------------------------------------------------

pub struct Y4mSinkFactory {
    storage: Storage,
    fps: u32,
}

impl Y4mSinkFactory {
    pub fn new(storage: Storage, fps: u32) -> Self {
        Self { storage, fps }
    }
}

impl SinkFactory for Y4mSinkFactory {
    fn create(
        &mut self,
        started: &DateTime<Local>,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn ClipSink>> {
        let (path, file) = self.storage.reserve_clip(started)?;
        let writer = match Y4mWriter::new(BufWriter::new(file), width, height, self.fps) {
            Ok(writer) => writer,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(sink_error(&path, e));
            }
        };
        Ok(Box::new(Y4mSink {
            path,
            writer,
            width,
            height,
        }))
    }
}

/// Raw 4:4:4 clip. Frames of a different size are scaled to the clip size.
pub struct Y4mSink {
    path: PathBuf,
    writer: Y4mWriter<BufWriter<File>>,
    width: u32,
    height: u32,
}

impl ClipSink for Y4mSink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let result = if frame.width() == self.width && frame.height() == self.height {
            self.writer.write_frame(frame.image())
        } else {
            let scaled: RgbImage =
                imageops::resize(frame.image(), self.width, self.height, FilterType::Triangle);
            self.writer.write_frame(&scaled)
        };
        result.map_err(|e| sink_error(&self.path, e))
    }

    fn frames_written(&self) -> u64 {
        self.writer.frames_written()
    }

    fn finish(self: Box<Self>) -> Result<PathBuf> {
        let Y4mSink { path, writer, .. } = *self;
        let file = writer
            .finish()
            .and_then(|buffered| buffered.into_inner().map_err(|e| anyhow!(e.into_error())))
            .map_err(|e| sink_error(&path, e))?;
        file.sync_all().map_err(|e| sink_error(&path, e))?;
        Ok(path)
    }

    fn abort(self: Box<Self>) {
        let Y4mSink { path, writer, .. } = *self;
        drop(writer);
        if let Err(e) = fs::remove_file(&path) {
            log::warn!("failed to remove partial clip {}: {}", path.display(), e);
        }
    }
}

fn sink_error(path: &Path, err: impl std::fmt::Display) -> anyhow::Error {
    PipelineError::SinkWriteFailure {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
    .into()
}

// ----------------------------------------------------------------------------
// In-memory clips
// ----------------------------------------------------------------------------

/// A clip captured by `MemorySinkFactory`.
#[derive(Clone, Debug, Default)]
pub struct MemoryClip {
    pub path: PathBuf,
    pub sequences: Vec<u64>,
    pub frames: Vec<RgbImage>,
    pub finished: bool,
    pub aborted: bool,
}

/// Keeps clips in memory. Used by dry runs and tests; can inject failures.
#[derive(Clone, Default)]
pub struct MemorySinkFactory {
    clips: Arc<Mutex<Vec<MemoryClip>>>,
    fail_create: bool,
    fail_after: Option<u64>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `create` fails.
    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Writes fail once a sink holds `frames` frames.
    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Snapshot of every clip opened so far, oldest first.
    pub fn clips(&self) -> Vec<MemoryClip> {
        self.clips.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl SinkFactory for MemorySinkFactory {
    fn create(
        &mut self,
        started: &DateTime<Local>,
        _width: u32,
        _height: u32,
    ) -> Result<Box<dyn ClipSink>> {
        let mut clips = self
            .clips
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?;
        let path = PathBuf::from(format!(
            "memory/{}_{}.{RAW_EXTENSION}",
            clip_stem(started),
            clips.len()
        ));
        if self.fail_create {
            return Err(sink_error(&path, "injected create failure"));
        }
        clips.push(MemoryClip {
            path: path.clone(),
            ..MemoryClip::default()
        });
        Ok(Box::new(MemorySink {
            index: clips.len() - 1,
            path,
            written: 0,
            fail_after: self.fail_after,
            clips: Arc::clone(&self.clips),
        }))
    }

    fn persistent(&self) -> bool {
        false
    }
}

struct MemorySink {
    index: usize,
    path: PathBuf,
    written: u64,
    fail_after: Option<u64>,
    clips: Arc<Mutex<Vec<MemoryClip>>>,
}

impl MemorySink {
    fn update(&self, apply: impl FnOnce(&mut MemoryClip)) -> Result<()> {
        let mut clips = self
            .clips
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?;
        let clip = clips
            .get_mut(self.index)
            .ok_or_else(|| anyhow!("memory clip {} missing", self.index))?;
        apply(clip);
        Ok(())
    }
}

impl ClipSink for MemorySink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.fail_after.is_some_and(|limit| self.written >= limit) {
            return Err(sink_error(&self.path, "injected write failure"));
        }
        self.update(|clip| {
            clip.sequences.push(frame.sequence());
            clip.frames.push(frame.image().clone());
        })?;
        self.written += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.written
    }

    fn finish(self: Box<Self>) -> Result<PathBuf> {
        self.update(|clip| clip.finished = true)?;
        Ok(self.path)
    }

    fn abort(self: Box<Self>) {
        let _ = self.update(|clip| clip.aborted = true);
    }
}
