//! Per-tick sampling decisions and timing statistics.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{BackpressurePolicy, PipelineConfig, validate_sample_every};
use crate::foundation::core::{Extent, TickIndex};
use crate::foundation::error::PipelineResult;
use crate::foundation::math::ema;

/// What a tick should do about sampling, decided before any GPU work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleDecision {
    /// Not a sample tick and no manual trigger pending.
    NotScheduled,
    /// Scheduled, but an earlier submission is still outstanding under the skip policy.
    SkipBusy,
    /// Scheduled, but the worker has not announced readiness.
    WorkerNotReady,
    /// Scheduled, but a fatal error disabled sampling for this session.
    Disabled,
    Sample,
}

/// Tick-interval FPS estimate and rolling sampled-tick latency.
#[derive(Clone, Debug)]
pub struct FrameStats {
    alpha: f64,
    fps: f64,
    last_tick: Instant,
    window: usize,
    latencies: VecDeque<Duration>,
}

impl FrameStats {
    pub fn new(alpha: f64, window: usize, started: Instant) -> Self {
        Self {
            alpha,
            fps: 0.0,
            last_tick: started,
            window: window.max(1),
            latencies: VecDeque::with_capacity(window.max(1)),
        }
    }

    /// Fold the interval since the previous tick into the FPS estimate.
    pub fn record_tick(&mut self, now: Instant) {
        let dt_ms = now.saturating_duration_since(self.last_tick).as_secs_f64() * 1000.0;
        let instant = 1000.0 / dt_ms.max(1.0);
        self.fps = ema(self.fps, instant, self.alpha);
        self.last_tick = now;
    }

    pub fn record_latency(&mut self, d: Duration) {
        if self.latencies.len() == self.window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(d);
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Mean over the window in milliseconds; zero before the first sampled tick.
    pub fn avg_latency_ms(&self) -> f64 {
        if self.latencies.is_empty() {
            return 0.0;
        }
        let total: f64 = self.latencies.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
        total / self.latencies.len() as f64
    }

    pub fn latency_samples(&self) -> usize {
        self.latencies.len()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineCounters {
    pub ticks: u64,
    /// Ticks that went on to downsample and read back, whether or not the transfer succeeded.
    pub sampled: u64,
    pub submissions: u64,
    pub busy_skips: u64,
    pub not_ready_skips: u64,
    pub camera_misses: u64,
    pub transfer_failures: u64,
    /// Pending submissions replaced by a newer one before the worker started them.
    pub worker_drops: u64,
    pub masks_received: u64,
    /// Replies that arrived after the session ended.
    pub masks_ignored: u64,
    pub predict_failures: u64,
}

/// Everything the scheduler tracks across ticks of one session.
#[derive(Clone, Debug)]
pub struct PipelineState {
    tick: TickIndex,
    sample_every: u64,
    manual_trigger: bool,
    outstanding: usize,
    alive: bool,
    worker_ready: bool,
    sampling_fault: Option<String>,
    last_camera: Option<Extent>,
    stats: FrameStats,
    counters: PipelineCounters,
}

impl PipelineState {
    pub fn new(cfg: &PipelineConfig, started: Instant) -> Self {
        Self {
            tick: TickIndex::default(),
            sample_every: cfg.sample_every.max(1),
            manual_trigger: false,
            outstanding: 0,
            alive: true,
            worker_ready: false,
            sampling_fault: None,
            last_camera: None,
            stats: FrameStats::new(cfg.fps_smoothing, cfg.latency_window, started),
            counters: PipelineCounters::default(),
        }
    }

    pub fn tick(&self) -> TickIndex {
        self.tick
    }

    pub fn sample_every(&self) -> u64 {
        self.sample_every
    }

    /// Takes effect from the next decision; nothing else is reset.
    pub fn set_sample_every(&mut self, n: u64) -> PipelineResult<()> {
        validate_sample_every(n)?;
        self.sample_every = n;
        Ok(())
    }

    pub fn trigger(&mut self) {
        self.manual_trigger = true;
    }

    pub fn trigger_pending(&self) -> bool {
        self.manual_trigger
    }

    pub fn is_sample_tick(&self) -> bool {
        self.tick.0 % self.sample_every == 0
    }

    pub fn decide(&self, policy: BackpressurePolicy) -> SampleDecision {
        if !(self.is_sample_tick() || self.manual_trigger) {
            SampleDecision::NotScheduled
        } else if self.sampling_fault.is_some() {
            SampleDecision::Disabled
        } else if policy == BackpressurePolicy::Skip && self.outstanding > 0 {
            SampleDecision::SkipBusy
        } else if !self.worker_ready {
            SampleDecision::WorkerNotReady
        } else {
            SampleDecision::Sample
        }
    }

    /// A buffer left for the worker. Consumes a pending manual trigger.
    pub fn mark_submitted(&mut self) {
        self.outstanding += 1;
        self.manual_trigger = false;
        self.counters.submissions += 1;
    }

    /// A buffer came back from the worker, whatever the outcome.
    pub fn mark_returned(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn is_busy(&self) -> bool {
        self.outstanding > 0
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn set_worker_ready(&mut self, ready: bool) {
        self.worker_ready = ready;
    }

    pub fn worker_ready(&self) -> bool {
        self.worker_ready
    }

    /// Disable sampling for the rest of the session. Returns false if it was already disabled.
    pub fn set_sampling_fault(&mut self, msg: impl Into<String>) -> bool {
        if self.sampling_fault.is_some() {
            return false;
        }
        self.sampling_fault = Some(msg.into());
        true
    }

    pub fn sampling_fault(&self) -> Option<&str> {
        self.sampling_fault.as_deref()
    }

    pub fn set_last_camera(&mut self, extent: Extent) {
        self.last_camera = Some(extent);
    }

    pub fn last_camera(&self) -> Option<Extent> {
        self.last_camera
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut FrameStats {
        &mut self.stats
    }

    pub fn counters(&self) -> &PipelineCounters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut PipelineCounters {
        &mut self.counters
    }

    /// Close out the current tick.
    pub fn advance(&mut self) {
        self.counters.ticks += 1;
        self.tick = self.tick.next();
    }

    /// Back to the empty state a session ends in. Counters are kept for reporting.
    pub fn reset(&mut self, now: Instant) {
        let alpha = self.stats.alpha;
        let window = self.stats.window;
        self.tick = TickIndex::default();
        self.manual_trigger = false;
        self.outstanding = 0;
        self.alive = false;
        self.worker_ready = false;
        self.sampling_fault = None;
        self.last_camera = None;
        self.stats = FrameStats::new(alpha, window, now);
    }
}
