use crate::foundation::error::{PipelineError, PipelineResult};
use crate::frame::PixelBuffer;
use crate::frame::pool::{BufferPool, PoolStats};
use crate::render::backend::FrameBackend;
use crate::render::downsample::WorkingTexture;
use crate::worker::{InferenceWorker, Rejected, Submission};

/// Copies the working texture into pooled buffers and moves them to the worker.
///
/// After a successful transfer the buffer is gone from this side entirely; the slot stays empty
/// until the worker's reply brings the buffer back through [`ReadbackStage::reclaim`].
pub struct ReadbackStage {
    pool: BufferPool,
    flipped: bool,
    superseded: Vec<u64>,
}

impl ReadbackStage {
    /// `flipped` is true when the downsample pass wrote rows upside down, so the declared row order
    /// must be the opposite of what the backend reads natively.
    pub fn new(pool: BufferPool, flipped: bool) -> Self {
        Self {
            pool,
            flipped,
            superseded: Vec::new(),
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Sequence numbers of pending submissions replaced by newer frames since the last call.
    pub fn take_superseded(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.superseded)
    }

    /// Blocking readback into the next free slot, then a fire-and-forget hand-off.
    ///
    /// Returns the slot that was transferred. On any error the buffer is re-seated before
    /// returning, so a failed tick never leaks a slot. When every slot is out and the worker has
    /// a submission it has not started, that submission is taken back and its slot reused.
    pub fn extract_and_transfer(
        &mut self,
        backend: &mut dyn FrameBackend,
        target: &WorkingTexture,
        worker: &mut InferenceWorker,
        seq: u64,
    ) -> PipelineResult<usize> {
        if !worker.is_ready() {
            return Err(PipelineError::worker_not_ready(if worker.has_stopped() {
                "inference worker has stopped"
            } else {
                "model is still loading"
            }));
        }
        if target.extent() != self.pool.extent() {
            return Err(PipelineError::validation(format!(
                "working texture {} does not match pool extent {}",
                target.extent(),
                self.pool.extent()
            )));
        }

        let mut buffer = match self.pool.checkout() {
            Ok(buffer) => buffer,
            Err(e) => {
                let Some(stale) = worker.take_pending() else {
                    return Err(e);
                };
                self.supersede(stale, seq);
                self.pool.checkout()?
            }
        };
        let native = match backend.read_pixels(target.id(), buffer.as_bytes_mut()) {
            Ok(order) => order,
            Err(e) => {
                self.reseat(buffer);
                return Err(e);
            }
        };
        buffer.set_row_order(native.flipped_if(self.flipped));
        let slot = buffer.slot();

        match worker.submit(Submission { seq, buffer }) {
            Ok(replaced) => {
                tracing::debug!(seq, slot, "buffer transferred");
                if let Some(stale) = replaced {
                    self.supersede(stale, seq);
                }
                Ok(slot)
            }
            Err(Rejected { error, buffer }) => {
                self.reseat(buffer);
                Err(error)
            }
        }
    }

    /// Re-seat a buffer that came back from the worker.
    pub fn reclaim(&mut self, buffer: PixelBuffer) -> PipelineResult<()> {
        self.pool.reclaim(buffer)
    }

    fn supersede(&mut self, stale: Submission, newest: u64) {
        tracing::warn!(seq = stale.seq, superseded_by = newest, "dropping stale pending frame");
        self.superseded.push(stale.seq);
        self.reseat(stale.buffer);
    }

    fn reseat(&mut self, buffer: PixelBuffer) {
        if let Err(e) = self.pool.reclaim(buffer) {
            tracing::error!(error = %e, "failed to re-seat pixel buffer");
        }
    }
}
