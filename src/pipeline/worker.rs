use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::config::RuntimeSettings;
use crate::error::is_end_of_stream;
use crate::pipeline::camera::{CameraOutput, CameraPipeline};
use crate::record::ClipSummary;

pub(crate) enum WorkerRequest {
    Tick {
        tick: u64,
        settings: Option<RuntimeSettings>,
    },
    Shutdown,
}

pub(crate) enum WorkerReply {
    Output {
        index: usize,
        tick: u64,
        output: Box<CameraOutput>,
    },
    NoFrame {
        index: usize,
        tick: u64,
        reason: String,
    },
    /// Source exhausted; the worker has finalized and exited.
    Retired {
        index: usize,
        tick: u64,
        summary: Option<ClipSummary>,
    },
    ShutDown {
        index: usize,
        summary: Option<ClipSummary>,
    },
}

impl WorkerReply {
    /// Tick this reply answers; `None` for shutdown acknowledgements.
    pub(crate) fn tick(&self) -> Option<u64> {
        match self {
            WorkerReply::Output { tick, .. }
            | WorkerReply::NoFrame { tick, .. }
            | WorkerReply::Retired { tick, .. } => Some(*tick),
            WorkerReply::ShutDown { .. } => None,
        }
    }
}

/// Orchestrator-side handle to one camera thread.
pub(crate) struct CameraWorker {
    pub(crate) name: String,
    requests: Sender<WorkerRequest>,
    handle: Option<JoinHandle<()>>,
    /// Tick the worker is still processing, if any.
    pub(crate) busy: Option<u64>,
    pub(crate) retired: bool,
    pending_settings: Option<RuntimeSettings>,
}

impl CameraWorker {
    pub(crate) fn spawn(
        index: usize,
        pipeline: CameraPipeline,
        replies: Sender<WorkerReply>,
    ) -> Result<Self> {
        let name = pipeline.name().to_string();
        let (requests, inbox) = unbounded();
        let handle = thread::Builder::new()
            .name(format!("camera-{name}"))
            .spawn(move || run(index, pipeline, inbox, replies))
            .map_err(|e| anyhow!("failed to spawn worker for {name}: {e}"))?;
        Ok(Self {
            name,
            requests,
            handle: Some(handle),
            busy: None,
            retired: false,
            pending_settings: None,
        })
    }

    /// Settings to hand over with the next request this worker accepts.
    pub(crate) fn queue_settings(&mut self, settings: RuntimeSettings) {
        self.pending_settings = Some(settings);
    }

    /// Ask for one frame. Returns false if the worker is busy or gone.
    pub(crate) fn request_tick(&mut self, tick: u64) -> bool {
        if self.retired || self.busy.is_some() {
            return false;
        }
        let settings = self.pending_settings.take();
        match self.requests.send(WorkerRequest::Tick { tick, settings }) {
            Ok(()) => {
                self.busy = Some(tick);
                true
            }
            Err(err) => {
                log::error!("[{}] worker is gone", self.name);
                if let WorkerRequest::Tick { settings, .. } = err.into_inner() {
                    self.pending_settings = settings;
                }
                self.retired = true;
                false
            }
        }
    }

    /// Ask the worker to finalize and stop.
    pub(crate) fn request_shutdown(&mut self) {
        if !self.retired {
            let _ = self.requests.send(WorkerRequest::Shutdown);
        }
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[{}] worker thread panicked", self.name);
            }
        }
    }
}

fn run(
    index: usize,
    mut pipeline: CameraPipeline,
    inbox: Receiver<WorkerRequest>,
    replies: Sender<WorkerReply>,
) {
    for request in inbox.iter() {
        match request {
            WorkerRequest::Tick { tick, settings } => {
                if let Some(settings) = settings {
                    pipeline.apply(settings);
                }
                let reply = match pipeline.step() {
                    Ok(output) => WorkerReply::Output {
                        index,
                        tick,
                        output: Box::new(output),
                    },
                    Err(e) if is_end_of_stream(&e) => {
                        let summary = pipeline.shutdown();
                        let _ = replies.send(WorkerReply::Retired {
                            index,
                            tick,
                            summary,
                        });
                        return;
                    }
                    Err(e) => WorkerReply::NoFrame {
                        index,
                        tick,
                        reason: format!("{e:#}"),
                    },
                };
                let _ = replies.send(reply);
            }
            WorkerRequest::Shutdown => {
                let summary = pipeline.shutdown();
                let _ = replies.send(WorkerReply::ShutDown { index, summary });
                return;
            }
        }
    }
    // Orchestrator dropped without a shutdown request.
    pipeline.shutdown();
}
