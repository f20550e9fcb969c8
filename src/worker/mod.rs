//! Inference worker boundary.
//!
//! The worker owns the engine and runs on its own thread. The render context talks to it through
//! two one-way channels: submissions go in, events come out. Pixel buffers travel by move in both
//! directions, so neither side ever touches a buffer the other holds.
//!
//! The thread holds at most one submission. While it is busy, the render-side handle keeps a
//! single pending submission; a newer one replaces it and the replaced buffer comes straight back
//! to the caller.

pub mod engine;

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::foundation::core::Extent;
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::frame::{LabelMask, PixelBuffer};

/// The opaque model. Only ever called on the worker thread.
pub trait InferenceEngine: Send + 'static {
    /// Load weights and prepare for `extent` inputs.
    fn load(&mut self, extent: Extent) -> anyhow::Result<()>;

    /// Predict a label map for tightly packed RGBA8 pixels, top row first.
    fn predict(&mut self, rgba: &[u8], extent: Extent) -> anyhow::Result<LabelMask>;
}

/// A filled pixel buffer on its way to the worker.
#[derive(Debug)]
pub struct Submission {
    /// Tick that produced the pixels.
    pub seq: u64,
    /// Carries its own extent and declared row order.
    pub buffer: PixelBuffer,
}

/// A submission the worker boundary refused; the buffer comes straight back.
#[derive(Debug)]
pub struct Rejected {
    pub error: PipelineError,
    pub buffer: PixelBuffer,
}

#[derive(Debug)]
pub enum WorkerEvent {
    /// Load and warm-up finished; submissions are accepted from now on.
    Ready,
    LoadFailed(String),
    MaskReady {
        seq: u64,
        mask: LabelMask,
        buffer: PixelBuffer,
    },
    PredictFailed {
        seq: u64,
        message: String,
        buffer: PixelBuffer,
    },
}

/// Render-side handle to the inference thread.
pub struct InferenceWorker {
    tx: Option<Sender<Submission>>,
    events: Receiver<WorkerEvent>,
    join: Option<JoinHandle<()>>,
    extent: Extent,
    ready: bool,
    stopped: bool,
    /// The thread holds a submission whose reply has not been observed yet.
    running: bool,
    pending: Option<Submission>,
}

impl InferenceWorker {
    /// Start the worker thread. Loading happens on that thread; watch for [`WorkerEvent::Ready`].
    pub fn spawn(engine: Box<dyn InferenceEngine>, extent: Extent) -> PipelineResult<Self> {
        let (tx, rx) = mpsc::channel::<Submission>();
        let (ev_tx, events) = mpsc::channel::<WorkerEvent>();
        let join = std::thread::Builder::new()
            .name("maskpipe-inference".into())
            .spawn(move || worker_loop(engine, extent, rx, ev_tx))
            .map_err(|e| {
                PipelineError::session_unavailable(format!("failed to spawn inference worker: {e}"))
            })?;
        Ok(Self {
            tx: Some(tx),
            events,
            join: Some(join),
            extent,
            ready: false,
            stopped: false,
            running: false,
            pending: None,
        })
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn is_ready(&self) -> bool {
        self.ready && !self.stopped
    }

    /// The thread exited or hung up unexpectedly.
    pub fn has_stopped(&self) -> bool {
        self.stopped
    }

    /// Submissions handed over and not yet answered, pending one included.
    pub fn outstanding(&self) -> usize {
        usize::from(self.running) + usize::from(self.pending.is_some())
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take back the submission waiting for the thread, if it has not been started.
    pub fn take_pending(&mut self) -> Option<Submission> {
        self.pending.take()
    }

    /// Fire-and-forget hand-off. Never waits for the worker.
    ///
    /// While the thread is busy the submission becomes the pending one. `Ok(Some(_))` is the
    /// older pending submission it replaced, returned with its buffer.
    pub fn submit(&mut self, sub: Submission) -> Result<Option<Submission>, Rejected> {
        if !self.is_ready() {
            let error = if self.stopped {
                PipelineError::worker_not_ready("inference worker has stopped")
            } else {
                PipelineError::worker_not_ready("model is still loading")
            };
            return Err(Rejected {
                error,
                buffer: sub.buffer,
            });
        }
        if sub.buffer.extent() != self.extent {
            return Err(Rejected {
                error: PipelineError::validation(format!(
                    "submission extent {} does not match worker extent {}",
                    sub.buffer.extent(),
                    self.extent
                )),
                buffer: sub.buffer,
            });
        }
        if self.running {
            return Ok(self.pending.replace(sub));
        }
        self.dispatch(sub)
            .map(|()| None)
            .map_err(|sub| Rejected {
                error: PipelineError::worker_not_ready("inference worker has stopped"),
                buffer: sub.buffer,
            })
    }

    fn dispatch(&mut self, sub: Submission) -> Result<(), Submission> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(sub);
        };
        match tx.send(sub) {
            Ok(()) => {
                self.running = true;
                Ok(())
            }
            Err(mpsc::SendError(sub)) => {
                self.stopped = true;
                Err(sub)
            }
        }
    }

    /// Non-blocking poll for the next event.
    pub fn try_next_event(&mut self) -> Option<WorkerEvent> {
        match self.events.try_recv() {
            Ok(ev) => Some(self.observe(ev)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.stopped = true;
                None
            }
        }
    }

    /// Blocking poll with a deadline. Not for use on the tick path.
    pub fn next_event_timeout(&mut self, timeout: Duration) -> Option<WorkerEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(ev) => Some(self.observe(ev)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.stopped = true;
                None
            }
        }
    }

    fn observe(&mut self, ev: WorkerEvent) -> WorkerEvent {
        match &ev {
            WorkerEvent::Ready => self.ready = true,
            WorkerEvent::LoadFailed(_) => self.stopped = true,
            WorkerEvent::MaskReady { .. } | WorkerEvent::PredictFailed { .. } => {
                self.running = false;
                if let Some(next) = self.pending.take()
                    && let Err(next) = self.dispatch(next)
                {
                    self.pending = Some(next);
                }
            }
        }
        ev
    }

    /// Hang up and wait for the thread to exit. A prediction already running finishes first;
    /// its reply stays queued for draining. A pending submission stays in the handle.
    pub fn shutdown(&mut self) {
        drop(self.tx.take());
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            tracing::error!("inference worker panicked");
        }
        self.ready = false;
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    mut engine: Box<dyn InferenceEngine>,
    extent: Extent,
    rx: Receiver<Submission>,
    events: Sender<WorkerEvent>,
) {
    if let Err(e) = load_and_warm(engine.as_mut(), extent) {
        tracing::error!(error = %e, "inference engine failed to load");
        let _ = events.send(WorkerEvent::LoadFailed(format!("{e:#}")));
        return;
    }
    tracing::info!(%extent, "inference worker ready");
    if events.send(WorkerEvent::Ready).is_err() {
        return;
    }

    let mut processed = 0u64;
    while let Ok(Submission { seq, mut buffer }) = rx.recv() {
        buffer.orient_top_first();
        let event = match engine.predict(buffer.as_bytes(), buffer.extent()) {
            Ok(mask) if mask.extent() == extent => WorkerEvent::MaskReady { seq, mask, buffer },
            Ok(mask) => WorkerEvent::PredictFailed {
                seq,
                message: format!("engine returned {} mask, expected {extent}", mask.extent()),
                buffer,
            },
            Err(e) => WorkerEvent::PredictFailed {
                seq,
                message: format!("{e:#}"),
                buffer,
            },
        };
        processed += 1;
        if events.send(event).is_err() {
            break;
        }
    }
    tracing::info!(processed, "inference worker stopped");
}

fn load_and_warm(engine: &mut dyn InferenceEngine, extent: Extent) -> anyhow::Result<()> {
    engine.load(extent)?;
    let zeros = vec![0u8; extent.rgba8_len()];
    let _ = engine.predict(&zeros, extent)?;
    Ok(())
}
