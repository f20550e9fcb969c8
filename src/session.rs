//! The per-tick driver and its session lifecycle.
//!
//! A [`Session`] owns every pipeline resource: the working texture, the buffer pool, the mask
//! cache, the camera and view textures, and the inference worker. It runs entirely on the render
//! context. Worker replies are drained once at the top of each tick and never waited on.

use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::diagnostics::StatusLine;
use crate::foundation::core::{Extent, RowOrder, TickIndex};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::frame::{CaptureFrame, flip_rgba8_rows};
use crate::frame::pool::{BufferPool, PoolStats};
use crate::mask_cache::MaskTextureCache;
use crate::render::backend::{BlitParams, FrameBackend, TextureDesc, TextureFormat, TextureId};
use crate::render::downsample::{Downsampler, WorkingTexture};
use crate::render::overlay::OverlayCompositor;
use crate::render::readback::ReadbackStage;
use crate::scheduler::{PipelineCounters, PipelineState, SampleDecision};
use crate::worker::{InferenceEngine, InferenceWorker, WorkerEvent};

/// What happened to sampling on one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleOutcome {
    /// No camera frame; nothing was rendered or sampled.
    NoCamera,
    /// The camera frame could not be uploaded; nothing was rendered or sampled.
    RenderFailed,
    NotScheduled,
    /// A buffer from `slot` was handed to the worker.
    Submitted { slot: usize },
    SkippedBusy,
    WorkerNotReady,
    /// The next pool slot was still in flight.
    TransferFailed,
    SamplingDisabled,
    /// The sample path failed this tick.
    Failed,
}

#[derive(Clone, Debug)]
pub struct TickReport {
    pub tick: TickIndex,
    pub outcome: SampleOutcome,
    pub status: StatusLine,
    /// Set on the one tick where a fatal error first disabled sampling.
    pub fatal: Option<String>,
    /// A transient draw failure on the display path.
    pub render_error: Option<String>,
}

/// A texture that follows the camera resolution.
#[derive(Clone, Copy, Debug)]
struct SizedTexture {
    id: TextureId,
    extent: Extent,
}

struct Resources {
    working: WorkingTexture,
    downsampler: Downsampler,
    readback: ReadbackStage,
    worker: InferenceWorker,
    mask: MaskTextureCache,
    compositor: OverlayCompositor,
    display: BlitParams,
    camera_tex: Option<SizedTexture>,
    view_tex: Option<SizedTexture>,
}

pub struct Session {
    cfg: PipelineConfig,
    backend: Box<dyn FrameBackend>,
    res: Option<Resources>,
    state: PipelineState,
    fatal: Option<String>,
}

impl Session {
    /// Allocate every pipeline resource and start the worker.
    ///
    /// Fails with `SessionUnavailable` when the backend cannot host the working extent.
    #[tracing::instrument(skip(cfg, backend, engine), fields(kind = backend.name()))]
    pub fn start(
        cfg: PipelineConfig,
        mut backend: Box<dyn FrameBackend>,
        engine: Box<dyn InferenceEngine>,
    ) -> PipelineResult<Self> {
        cfg.validate()?;
        let extent = cfg.working_extent()?;
        let max = backend.max_texture_dimension();
        if extent.width() > max || extent.height() > max {
            return Err(PipelineError::session_unavailable(format!(
                "working extent {extent} exceeds {} limit {max}",
                backend.name()
            )));
        }

        let working = WorkingTexture::create(backend.as_mut(), extent)?;
        let mask = MaskTextureCache::create(backend.as_mut(), extent)?;
        let pool = BufferPool::new(extent, cfg.pool_size)?;
        let worker = InferenceWorker::spawn(engine, extent)?;

        let res = Resources {
            working,
            downsampler: Downsampler::new(cfg.filter, cfg.flip_for_inference),
            readback: ReadbackStage::new(pool, cfg.flip_for_inference),
            worker,
            mask,
            compositor: OverlayCompositor::new(cfg.overlay),
            display: BlitParams {
                filter: cfg.filter,
                flip_y: cfg.flip_for_display,
            },
            camera_tex: None,
            view_tex: None,
        };
        tracing::info!(
            %extent,
            pool = cfg.pool_size,
            every = cfg.sample_every,
            policy = ?cfg.backpressure,
            "session started"
        );
        Ok(Self {
            state: PipelineState::new(&cfg, Instant::now()),
            cfg,
            backend,
            res: Some(res),
            fatal: None,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_alive(&self) -> bool {
        self.res.is_some() && self.state.is_alive()
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn counters(&self) -> &PipelineCounters {
        self.state.counters()
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.res.as_ref().map(|r| r.readback.pool_stats())
    }

    /// Tick whose pixels produced the mask currently on screen.
    pub fn mask_source_seq(&self) -> Option<u64> {
        self.res.as_ref().and_then(|r| r.mask.source_seq())
    }

    /// The message of the fatal error that disabled sampling, if any.
    pub fn fatal(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    pub fn set_sample_every(&mut self, n: u64) -> PipelineResult<()> {
        self.state.set_sample_every(n)?;
        tracing::info!(every = n, "sampling interval changed");
        Ok(())
    }

    /// Sample on the next tick that can, whatever its index.
    pub fn trigger_sample(&mut self) {
        self.state.trigger();
    }

    pub fn tick(&mut self, frame: Option<CaptureFrame<'_>>) -> PipelineResult<TickReport> {
        self.tick_at(frame, Instant::now())
    }

    /// Run one tick with an explicit timestamp for the FPS estimate.
    ///
    /// Errors only after the session has ended; every per-tick failure is folded into the report.
    pub fn tick_at(
        &mut self,
        frame: Option<CaptureFrame<'_>>,
        now: Instant,
    ) -> PipelineResult<TickReport> {
        if self.res.is_none() {
            return Err(PipelineError::session_unavailable("session has ended"));
        }
        let mut fatal = self.drain_events();
        self.state.stats_mut().record_tick(now);
        let tick = self.state.tick();

        let camera = frame.as_ref().map(CaptureFrame::extent);
        let mut render_error = None;
        let outcome = match frame {
            None => {
                self.state.counters_mut().camera_misses += 1;
                tracing::debug!(tick = tick.0, "no camera frame");
                SampleOutcome::NoCamera
            }
            Some(frame) => {
                self.state.set_last_camera(frame.extent());
                self.render_frame(frame, &mut fatal, &mut render_error)
            }
        };

        let status = StatusLine::from_state(&self.state, camera);
        self.state.advance();
        Ok(TickReport {
            tick,
            outcome,
            status,
            fatal,
            render_error,
        })
    }

    fn render_frame(
        &mut self,
        frame: CaptureFrame<'_>,
        fatal: &mut Option<String>,
        render_error: &mut Option<String>,
    ) -> SampleOutcome {
        let Self {
            cfg,
            backend,
            res,
            state,
            fatal: session_fatal,
        } = self;
        let Some(res) = res.as_mut() else {
            return SampleOutcome::RenderFailed;
        };
        let backend: &mut dyn FrameBackend = &mut **backend;
        let tick = state.tick();

        let camera_tex = match upload_camera(backend, &mut res.camera_tex, frame) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(tick = tick.0, error = %e, "camera upload failed");
                *render_error = Some(e.to_string());
                return SampleOutcome::RenderFailed;
            }
        };

        let view = match show_camera(backend, &mut res.view_tex, camera_tex, res.display) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(tick = tick.0, error = %e, "camera draw failed");
                *render_error = Some(e.to_string());
                None
            }
        };

        let outcome = match state.decide(cfg.backpressure) {
            SampleDecision::NotScheduled => SampleOutcome::NotScheduled,
            SampleDecision::Disabled => SampleOutcome::SamplingDisabled,
            SampleDecision::SkipBusy => {
                state.counters_mut().busy_skips += 1;
                tracing::debug!(
                    tick = tick.0,
                    outstanding = state.outstanding(),
                    "sample skipped, worker busy"
                );
                SampleOutcome::SkippedBusy
            }
            SampleDecision::WorkerNotReady => {
                state.counters_mut().not_ready_skips += 1;
                tracing::debug!(tick = tick.0, "sample skipped, worker not ready");
                SampleOutcome::WorkerNotReady
            }
            SampleDecision::Sample => {
                state.counters_mut().sampled += 1;
                let started = Instant::now();
                let result = res
                    .downsampler
                    .downsample(backend, camera_tex, &res.working)
                    .and_then(|()| {
                        res.readback
                            .extract_and_transfer(backend, &res.working, &mut res.worker, tick.0)
                    });
                for seq in res.readback.take_superseded() {
                    state.counters_mut().worker_drops += 1;
                    state.mark_returned();
                    tracing::debug!(tick = tick.0, seq, "pending submission replaced");
                }
                match result {
                    Ok(slot) => {
                        state.mark_submitted();
                        state.stats_mut().record_latency(started.elapsed());
                        SampleOutcome::Submitted { slot }
                    }
                    Err(e) => sample_failed(state, session_fatal, fatal, tick, e),
                }
            }
        };

        if let Some(view) = view
            && let Err(e) = res.compositor.composite(backend, view.id, &res.mask)
        {
            tracing::warn!(tick = tick.0, error = %e, "overlay draw failed");
            *render_error = Some(e.to_string());
        }
        outcome
    }

    /// Apply every reply that is already waiting. Returns a newly raised fatal message.
    fn drain_events(&mut self) -> Option<String> {
        let mut fatal = None;
        while let Some(ev) = self.res.as_mut().and_then(|r| r.worker.try_next_event()) {
            if let Some(msg) = self.handle_event(ev) {
                fatal = Some(msg);
            }
        }
        let stopped = self.res.as_ref().is_some_and(|r| r.worker.has_stopped());
        if stopped && let Some(msg) = self.raise_fatal("inference worker stopped unexpectedly") {
            fatal = Some(msg);
        }
        fatal
    }

    fn handle_event(&mut self, ev: WorkerEvent) -> Option<String> {
        let Some(res) = self.res.as_mut() else {
            return None;
        };
        let buffer = match ev {
            WorkerEvent::Ready => {
                self.state.set_worker_ready(true);
                tracing::info!("inference worker ready");
                return None;
            }
            WorkerEvent::LoadFailed(msg) => {
                self.state.set_worker_ready(false);
                return self.raise_fatal(format!("inference engine failed to load: {msg}"));
            }
            WorkerEvent::MaskReady { seq, mask, buffer } => {
                self.state.counters_mut().masks_received += 1;
                match res.mask.update(self.backend.as_mut(), &mask, seq) {
                    Ok(()) => tracing::debug!(seq, "mask updated"),
                    Err(e) => tracing::warn!(seq, error = %e, "mask upload failed"),
                }
                buffer
            }
            WorkerEvent::PredictFailed {
                seq,
                message,
                buffer,
            } => {
                self.state.counters_mut().predict_failures += 1;
                tracing::warn!(seq, error = %message, "prediction failed");
                buffer
            }
        };
        self.state.mark_returned();
        if let Err(e) = res.readback.reclaim(buffer) {
            tracing::error!(error = %e, "failed to reclaim pixel buffer");
        }
        None
    }

    fn raise_fatal(&mut self, msg: impl Into<String>) -> Option<String> {
        let msg = msg.into();
        if !self.state.set_sampling_fault(msg.clone()) {
            return None;
        }
        tracing::error!(error = %msg, "sampling disabled for this session");
        self.fatal = Some(msg.clone());
        Some(msg)
    }

    /// Block until the worker announces readiness. For tools and tests, never the tick path.
    pub fn wait_ready(&mut self, timeout: Duration) -> PipelineResult<()> {
        let deadline = Instant::now() + timeout;
        while !self.state.worker_ready() {
            if let Some(msg) = self.state.sampling_fault() {
                return Err(PipelineError::worker_not_ready(msg.to_owned()));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let ev = self
                .res
                .as_mut()
                .ok_or_else(|| PipelineError::session_unavailable("session has ended"))?
                .worker
                .next_event_timeout(remaining);
            match ev {
                Some(ev) => {
                    self.handle_event(ev);
                }
                None if Instant::now() >= deadline => {
                    return Err(PipelineError::worker_not_ready(format!(
                        "worker not ready after {timeout:?}"
                    )));
                }
                None => {
                    self.raise_fatal("inference worker stopped unexpectedly");
                }
            }
        }
        Ok(())
    }

    /// Block until no submission is outstanding, applying replies as they arrive.
    ///
    /// Returns false on timeout. For tools and tests, never the tick path.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.state.is_busy() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(ev) = self
                .res
                .as_mut()
                .and_then(|r| r.worker.next_event_timeout(remaining))
            else {
                return false;
            };
            self.handle_event(ev);
        }
        true
    }

    /// Pixels of the last composited view, top row first.
    pub fn read_view(&mut self) -> PipelineResult<Option<(Extent, Vec<u8>)>> {
        let Some(view) = self.res.as_ref().and_then(|r| r.view_tex) else {
            return Ok(None);
        };
        let mut out = vec![0u8; view.extent.rgba8_len()];
        let order = self.backend.read_pixels(view.id, &mut out)?;
        if order == RowOrder::BottomFirst {
            flip_rgba8_rows(&mut out, view.extent);
        }
        Ok(Some((view.extent, out)))
    }

    /// Release everything and stop the worker. Replies still in flight are drained and ignored.
    pub fn end(&mut self) {
        let Some(mut res) = self.res.take() else {
            return;
        };
        self.state.reset(Instant::now());
        res.worker.shutdown();
        while let Some(ev) = res.worker.try_next_event() {
            let buffer = match ev {
                WorkerEvent::MaskReady { buffer, .. } => {
                    self.state.counters_mut().masks_ignored += 1;
                    buffer
                }
                WorkerEvent::PredictFailed { buffer, .. } => buffer,
                WorkerEvent::Ready | WorkerEvent::LoadFailed(_) => continue,
            };
            if let Err(e) = res.readback.reclaim(buffer) {
                tracing::error!(error = %e, "failed to reclaim pixel buffer");
            }
        }
        if let Some(pending) = res.worker.take_pending() {
            self.state.counters_mut().worker_drops += 1;
            if let Err(e) = res.readback.reclaim(pending.buffer) {
                tracing::error!(error = %e, "failed to reclaim pixel buffer");
            }
        }

        let backend = self.backend.as_mut();
        for t in [res.camera_tex, res.view_tex].into_iter().flatten() {
            backend.release_texture(t.id);
        }
        res.mask.release(backend);
        res.working.release(backend);
        tracing::info!(counters = ?self.state.counters(), "session ended");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.end();
    }
}

fn sample_failed(
    state: &mut PipelineState,
    session_fatal: &mut Option<String>,
    fatal: &mut Option<String>,
    tick: TickIndex,
    e: PipelineError,
) -> SampleOutcome {
    match e {
        PipelineError::TransferFailure(_) => {
            state.counters_mut().transfer_failures += 1;
            tracing::warn!(tick = tick.0, error = %e, "sample skipped");
            SampleOutcome::TransferFailed
        }
        PipelineError::WorkerNotReady(_) => {
            state.counters_mut().not_ready_skips += 1;
            tracing::debug!(tick = tick.0, error = %e, "sample skipped");
            SampleOutcome::WorkerNotReady
        }
        e if e.is_fatal() => {
            let msg = e.to_string();
            if state.set_sampling_fault(msg.clone()) {
                tracing::error!(tick = tick.0, error = %msg, "sampling disabled for this session");
                *session_fatal = Some(msg.clone());
                *fatal = Some(msg);
            }
            SampleOutcome::Failed
        }
        e => {
            tracing::warn!(tick = tick.0, error = %e, "sample failed");
            SampleOutcome::Failed
        }
    }
}

/// Upload the frame, reallocating the camera texture only when the resolution changes.
fn upload_camera(
    backend: &mut dyn FrameBackend,
    slot: &mut Option<SizedTexture>,
    frame: CaptureFrame<'_>,
) -> PipelineResult<TextureId> {
    let tex = ensure_sized(backend, slot, frame.extent(), "camera", false)?;
    backend.write_texture(tex.id, frame.pixels())?;
    Ok(tex.id)
}

/// Draw the camera image into the on-screen view.
fn show_camera(
    backend: &mut dyn FrameBackend,
    slot: &mut Option<SizedTexture>,
    camera: TextureId,
    params: BlitParams,
) -> PipelineResult<SizedTexture> {
    let extent = backend
        .texture_desc(camera)
        .map(|d| d.extent)
        .ok_or_else(|| PipelineError::validation("camera texture is missing"))?;
    let view = ensure_sized(backend, slot, extent, "view", true)?;
    backend.blit(camera, view.id, params)?;
    Ok(view)
}

fn ensure_sized(
    backend: &mut dyn FrameBackend,
    slot: &mut Option<SizedTexture>,
    extent: Extent,
    label: &'static str,
    render_target: bool,
) -> PipelineResult<SizedTexture> {
    if let Some(t) = *slot
        && t.extent == extent
    {
        return Ok(t);
    }
    if let Some(old) = slot.take() {
        tracing::debug!(label, from = %old.extent, to = %extent, "reallocating texture");
        backend.release_texture(old.id);
    }
    let id = backend.create_texture(TextureDesc {
        label,
        extent,
        format: TextureFormat::Rgba8,
        render_target,
    })?;
    let t = SizedTexture { id, extent };
    *slot = Some(t);
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::cpu::CpuBackend;
    use crate::worker::engine::LumaEngine;

    fn small_cfg() -> PipelineConfig {
        PipelineConfig {
            working_width: 4,
            working_height: 4,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn oversized_working_extent_is_session_unavailable() {
        let cfg = PipelineConfig {
            working_width: 20_000,
            ..PipelineConfig::default()
        };
        let err = Session::start(
            cfg,
            Box::new(CpuBackend::new()),
            Box::new(LumaEngine::default()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, PipelineError::SessionUnavailable(_)));
    }

    #[test]
    fn camera_texture_follows_frame_size() {
        let mut s = Session::start(
            small_cfg(),
            Box::new(CpuBackend::new()),
            Box::new(LumaEngine::default()),
        )
        .unwrap();
        let a = vec![0u8; 8 * 8 * 4];
        let b = vec![0u8; 6 * 2 * 4];
        s.tick(Some(CaptureFrame::new(Extent::new(8, 8).unwrap(), &a).unwrap()))
            .unwrap();
        s.tick(Some(CaptureFrame::new(Extent::new(6, 2).unwrap(), &b).unwrap()))
            .unwrap();
        let (extent, pixels) = s.read_view().unwrap().unwrap();
        assert_eq!(extent, Extent::new(6, 2).unwrap());
        assert_eq!(pixels.len(), 48);
    }

    #[test]
    fn ended_session_refuses_ticks() {
        let mut s = Session::start(
            small_cfg(),
            Box::new(CpuBackend::new()),
            Box::new(LumaEngine::default()),
        )
        .unwrap();
        s.end();
        assert!(!s.is_alive());
        let err = s.tick(None).unwrap_err();
        assert!(matches!(err, PipelineError::SessionUnavailable(_)));
        s.end();
    }
}
