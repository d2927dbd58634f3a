use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::PipelineError;
use crate::record::manifest::write_manifest;
use crate::record::recorder::ClipSummary;
use crate::record::storage::Storage;

/// Converts a finished raw clip into its compressed form.
pub trait CompressionService: Send {
    fn name(&self) -> &'static str;

    fn compress(&self, input: &Path, output: &Path) -> Result<()>;

    /// Extension of the produced file; `None` means nothing is produced.
    fn output_extension(&self) -> Option<&'static str> {
        Some("mp4")
    }
}

/// Runs the `ffmpeg` executable: H.264, yuv420p.
#[derive(Clone, Debug)]
pub struct FfmpegCompressor {
    program: PathBuf,
}

impl FfmpegCompressor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl CompressionService for FfmpegCompressor {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn compress(&self, input: &Path, output: &Path) -> Result<()> {
        let failed = |reason: String| -> anyhow::Error {
            PipelineError::CompressionFailed {
                input: input.to_path_buf(),
                reason,
            }
            .into()
        };
        let result = Command::new(&self.program)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(input)
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .arg(output)
            .output()
            .map_err(|e| failed(format!("cannot run {}: {e}", self.program.display())))?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr.lines().last().unwrap_or("").chars().take(200).collect();
            return Err(failed(format!("{} ({})", result.status, tail)));
        }
        Ok(())
    }
}

/// Keeps the raw clip only.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCompression;

impl CompressionService for NoCompression {
    fn name(&self) -> &'static str {
        "none"
    }

    fn compress(&self, _input: &Path, _output: &Path) -> Result<()> {
        Ok(())
    }

    fn output_extension(&self) -> Option<&'static str> {
        None
    }
}

/// One finished clip: its manifest is always written, the compressed copy
/// only when the service produces one.
#[derive(Debug)]
struct CompressionJob {
    clip: ClipSummary,
    output: Option<PathBuf>,
}

enum DispatcherMessage {
    Job(CompressionJob),
    Shutdown,
}

/// Sending side, held by every recorder.
#[derive(Clone)]
pub struct CompressionHandle {
    sender: Sender<DispatcherMessage>,
    storage: Storage,
    extension: Option<&'static str>,
}

impl CompressionHandle {
    /// Queue a finished clip for its manifest and compression. Never blocks
    /// on the work itself.
    ///
    /// Returns the path the compressed clip will have, or `None` when the
    /// service produces nothing or the dispatcher is gone. A stopped
    /// dispatcher still gets the manifest written, on the caller's thread.
    pub fn dispatch(&self, clip: &ClipSummary) -> Option<PathBuf> {
        let output = self
            .extension
            .map(|extension| self.storage.compressed_path_for(&clip.path, extension));
        let job = CompressionJob {
            clip: clip.clone(),
            output: output.clone(),
        };
        match self.sender.send(DispatcherMessage::Job(job)) {
            Ok(()) => output,
            Err(_) => {
                log::warn!(
                    "compression dispatcher stopped; {} stays uncompressed",
                    clip.path.display()
                );
                if let Err(e) = write_manifest(clip) {
                    log::warn!("manifest for {} not written: {:#}", clip.path.display(), e);
                }
                None
            }
        }
    }
}

/// Background manifest and compression worker.
///
/// Jobs are processed one at a time in submission order: the clip is hashed
/// into its manifest, then compressed. Failures are logged and the raw clip
/// is left in place.
pub struct CompressionDispatcher {
    sender: Sender<DispatcherMessage>,
    storage: Storage,
    extension: Option<&'static str>,
    worker: Option<JoinHandle<usize>>,
}

impl CompressionDispatcher {
    pub fn spawn(service: Box<dyn CompressionService>, storage: Storage) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let extension = service.output_extension();
        let worker = thread::Builder::new()
            .name("compression".to_string())
            .spawn(move || run_jobs(service, receiver))
            .map_err(|e| anyhow!("failed to spawn compression thread: {e}"))?;
        Ok(Self {
            sender,
            storage,
            extension,
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> CompressionHandle {
        CompressionHandle {
            sender: self.sender.clone(),
            storage: self.storage.clone(),
            extension: self.extension,
        }
    }

    /// Finish every queued job, then stop the worker. Returns the number of
    /// clips compressed.
    pub fn shutdown(&mut self) -> usize {
        let Some(worker) = self.worker.take() else {
            return 0;
        };
        let _ = self.sender.send(DispatcherMessage::Shutdown);
        match worker.join() {
            Ok(done) => done,
            Err(_) => {
                log::error!("compression thread panicked");
                0
            }
        }
    }
}

impl Drop for CompressionDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_jobs(service: Box<dyn CompressionService>, receiver: Receiver<DispatcherMessage>) -> usize {
    let mut done = 0;
    for message in receiver.iter() {
        let job = match message {
            DispatcherMessage::Job(job) => job,
            DispatcherMessage::Shutdown => break,
        };
        let input = &job.clip.path;
        match write_manifest(&job.clip) {
            Ok(manifest) => log::debug!("wrote {}", manifest.display()),
            Err(e) => log::warn!("manifest for {} not written: {:#}", input.display(), e),
        }
        let Some(output) = job.output else {
            continue;
        };
        match service.compress(input, &output) {
            Ok(()) => {
                done += 1;
                log::info!(
                    "compressed {} -> {} ({})",
                    input.display(),
                    output.display(),
                    service.name()
                );
            }
            Err(e) => log::error!("compression of {} failed: {:#}", input.display(), e),
        }
    }
    done
}
