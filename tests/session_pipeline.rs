use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use maskpipe::{
    BackpressurePolicy, CaptureFrame, CpuBackend, Extent, InferenceEngine, LabelMask,
    PipelineConfig, PipelineError, SampleOutcome, Session, TickIndex,
};

const WAIT: Duration = Duration::from_secs(5);

/// Thresholds the red channel, but only after the test opens the gate for each prediction.
/// The warm-up prediction passes straight through.
struct GatedEngine {
    gate: Receiver<()>,
    entered: Sender<()>,
    warmed: bool,
}

fn gated() -> (Sender<()>, Box<dyn InferenceEngine>) {
    let (gate, _entered, engine) = gated_with_signal();
    (gate, engine)
}

/// Also reports each time a prediction starts waiting on the gate.
fn gated_with_signal() -> (Sender<()>, Receiver<()>, Box<dyn InferenceEngine>) {
    let (tx, rx) = mpsc::channel();
    let (entered_tx, entered_rx) = mpsc::channel();
    (
        tx,
        entered_rx,
        Box::new(GatedEngine {
            gate: rx,
            entered: entered_tx,
            warmed: false,
        }),
    )
}

impl InferenceEngine for GatedEngine {
    fn load(&mut self, _extent: Extent) -> anyhow::Result<()> {
        Ok(())
    }

    fn predict(&mut self, rgba: &[u8], extent: Extent) -> anyhow::Result<LabelMask> {
        if !self.warmed {
            self.warmed = true;
            return Ok(LabelMask::background(extent));
        }
        let _ = self.entered.send(());
        self.gate.recv()?;
        let data = rgba
            .chunks_exact(4)
            .map(|px| if px[0] > 128 { 255 } else { 0 })
            .collect();
        Ok(LabelMask::new(extent, data)?)
    }
}

struct NoWeights;

impl InferenceEngine for NoWeights {
    fn load(&mut self, _extent: Extent) -> anyhow::Result<()> {
        anyhow::bail!("model file not found")
    }

    fn predict(&mut self, _rgba: &[u8], extent: Extent) -> anyhow::Result<LabelMask> {
        Ok(LabelMask::background(extent))
    }
}

fn camera_extent() -> Extent {
    Extent::new(8, 8).unwrap()
}

/// White top half, black bottom half.
fn top_white() -> Vec<u8> {
    let e = camera_extent();
    (0..e.height())
        .flat_map(|y| {
            let v = if y < e.height() / 2 { 255 } else { 0 };
            (0..e.width()).flat_map(move |_| [v, v, v, 255])
        })
        .collect()
}

fn cfg(every: u64) -> PipelineConfig {
    PipelineConfig {
        working_width: 4,
        working_height: 4,
        sample_every: every,
        ..PipelineConfig::default()
    }
}

fn start(cfg: PipelineConfig, engine: Box<dyn InferenceEngine>) -> Session {
    let mut s = Session::start(cfg, Box::new(CpuBackend::new()), engine).unwrap();
    s.wait_ready(WAIT).unwrap();
    s
}

fn tick(s: &mut Session, pixels: &[u8]) -> SampleOutcome {
    let frame = CaptureFrame::new(camera_extent(), pixels).unwrap();
    s.tick(Some(frame)).unwrap().outcome
}

fn pixel(view: &[u8], x: usize, y: usize) -> [u8; 4] {
    let o = (y * camera_extent().width() as usize + x) * 4;
    [view[o], view[o + 1], view[o + 2], view[o + 3]]
}

fn view(s: &mut Session) -> Vec<u8> {
    s.read_view().unwrap().unwrap().1
}

#[test]
fn mask_from_tick_zero_is_shown_on_tick_two() {
    let (gate, engine) = gated();
    let mut s = start(cfg(2), engine);
    let pixels = top_white();

    assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 0 });
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::NotScheduled);
    // Nothing has landed yet: the overlay is empty and the camera shows through.
    assert_eq!(pixel(&view(&mut s), 0, 0), [255, 255, 255, 255]);

    gate.send(()).unwrap();
    assert!(s.wait_idle(WAIT));
    assert_eq!(s.mask_source_seq(), Some(0));

    assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 1 });
    let at_two = view(&mut s);
    let top = pixel(&at_two, 0, 0);
    assert!(top[0] < 255 && top[1] == 255, "top half should be tinted, got {top:?}");
    assert_eq!(pixel(&at_two, 0, 7), [0, 0, 0, 255]);

    // Tick 2's own prediction is still gated; tick 3 reuses the same mask, pixel for pixel.
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::NotScheduled);
    assert_eq!(view(&mut s), at_two);
    assert_eq!(s.mask_source_seq(), Some(0));

    gate.send(()).unwrap();
    assert!(s.wait_idle(WAIT));
    assert_eq!(s.mask_source_seq(), Some(2));
}

#[test]
fn busy_worker_skips_sample_ticks_under_skip_policy() {
    let (gate, engine) = gated();
    let mut s = start(cfg(2), engine);
    let pixels = top_white();

    assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 0 });
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::NotScheduled);
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::SkippedBusy);
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::NotScheduled);
    let before = view(&mut s);
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::SkippedBusy);
    assert_eq!(view(&mut s), before);

    let c = s.counters();
    assert_eq!(c.submissions, 1);
    assert_eq!(c.busy_skips, 2);
    assert_eq!(s.pool_stats().unwrap().in_flight, 1);

    gate.send(()).unwrap();
    assert!(s.wait_idle(WAIT));
    assert_eq!(s.pool_stats().unwrap().in_flight, 0);
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::NotScheduled);
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 1 });
    gate.send(()).unwrap();
    assert!(s.wait_idle(WAIT));
}

#[test]
fn replace_policy_keeps_replacing_with_the_newest_frame() {
    let (gate, entered, engine) = gated_with_signal();
    let mut s = start(
        PipelineConfig {
            backpressure: BackpressurePolicy::Replace,
            ..cfg(1)
        },
        engine,
    );
    assert_eq!(s.config().pool_size, PipelineConfig::default().pool_size);
    let pixels = top_white();

    assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 0 });
    // Tick 0 is being predicted before anything else is submitted.
    entered.recv_timeout(WAIT).unwrap();
    // Every later tick takes the pending frame's slot back and submits its own pixels instead.
    for _ in 1..6 {
        assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 1 });
    }

    let c = s.counters();
    assert_eq!(c.sampled, 6);
    assert_eq!(c.submissions, 6);
    assert_eq!(c.worker_drops, 4);
    assert_eq!(c.transfer_failures, 0);
    assert_eq!(s.pool_stats().unwrap().in_flight, 2);

    gate.send(()).unwrap();
    gate.send(()).unwrap();
    assert!(s.wait_idle(WAIT));

    let c = s.counters();
    assert_eq!(c.masks_received, 2);
    assert_eq!(c.worker_drops, 4);
    assert_eq!(s.mask_source_seq(), Some(5));
    assert_eq!(s.pool_stats().unwrap().in_flight, 0);
}

#[test]
fn replace_policy_with_a_larger_pool_replaces_at_submit() {
    let (gate, entered, engine) = gated_with_signal();
    let mut s = start(
        PipelineConfig {
            pool_size: 3,
            backpressure: BackpressurePolicy::Replace,
            ..cfg(1)
        },
        engine,
    );
    let pixels = top_white();

    assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 0 });
    entered.recv_timeout(WAIT).unwrap();
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 1 });
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 2 });
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 1 });
    assert_eq!(s.counters().worker_drops, 2);
    assert_eq!(s.pool_stats().unwrap().in_flight, 2);

    gate.send(()).unwrap();
    gate.send(()).unwrap();
    assert!(s.wait_idle(WAIT));
    assert_eq!(s.mask_source_seq(), Some(3));
    assert_eq!(s.counters().masks_received, 2);
}

#[test]
fn missing_camera_keeps_ticking() {
    let (gate, engine) = gated();
    let mut s = start(cfg(2), engine);
    let t0 = Instant::now();

    for i in 0..5u64 {
        let report = s
            .tick_at(None, t0 + Duration::from_millis(16 * (i + 1)))
            .unwrap();
        assert_eq!(report.tick, TickIndex(i));
        assert_eq!(report.outcome, SampleOutcome::NoCamera);
        assert!(report.status.to_string().contains("no camera"));
    }
    let fps = s.state().stats().fps();
    assert!(fps > 0.0 && fps <= 62.5 + 1e-9, "fps = {fps}");
    assert_eq!(s.counters().camera_misses, 5);
    assert_eq!(s.counters().submissions, 0);
    assert!(s.read_view().unwrap().is_none());

    let pixels = top_white();
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::NotScheduled);
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 0 });
    gate.send(()).unwrap();
    assert!(s.wait_idle(WAIT));
}

#[test]
fn manual_trigger_and_runtime_interval() {
    let (gate, engine) = gated();
    let mut s = start(cfg(100), engine);
    let pixels = top_white();

    assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 0 });
    gate.send(()).unwrap();
    assert!(s.wait_idle(WAIT));

    s.trigger_sample();
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 1 });
    gate.send(()).unwrap();
    assert!(s.wait_idle(WAIT));
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::NotScheduled);

    assert!(matches!(
        s.set_sample_every(0),
        Err(PipelineError::Validation(_))
    ));
    s.set_sample_every(4).unwrap();
    // Tick counter is at 3; tick 4 is the next sample tick.
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::NotScheduled);
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 0 });
    gate.send(()).unwrap();
    assert!(s.wait_idle(WAIT));
}

#[test]
fn inference_flip_is_undone_by_declared_row_order() {
    let pixels = top_white();
    let mut views = Vec::new();
    for flip in [false, true] {
        let (gate, engine) = gated();
        let mut s = start(
            PipelineConfig {
                flip_for_inference: flip,
                ..cfg(1)
            },
            engine,
        );
        tick(&mut s, &pixels);
        gate.send(()).unwrap();
        assert!(s.wait_idle(WAIT));
        tick(&mut s, &pixels);
        views.push(view(&mut s));
        gate.send(()).unwrap();
        assert!(s.wait_idle(WAIT));
    }
    assert_eq!(views[0], views[1]);
    assert_ne!(pixel(&views[0], 0, 0), [255, 255, 255, 255]);
}

#[test]
fn load_failure_disables_sampling_but_not_rendering() {
    let mut s = Session::start(cfg(1), Box::new(CpuBackend::new()), Box::new(NoWeights)).unwrap();
    let err = s.wait_ready(WAIT).unwrap_err();
    assert!(err.to_string().contains("model file not found"));
    assert!(s.fatal().is_some());

    let pixels = top_white();
    for _ in 0..3 {
        assert_eq!(tick(&mut s, &pixels), SampleOutcome::SamplingDisabled);
    }
    assert_eq!(pixel(&view(&mut s), 0, 0), [255, 255, 255, 255]);
    assert!(s.is_alive());
}

#[test]
fn fatal_message_is_reported_once() {
    let mut s = Session::start(cfg(1), Box::new(CpuBackend::new()), Box::new(NoWeights)).unwrap();
    let pixels = top_white();
    let deadline = Instant::now() + WAIT;
    let mut reported = 0;
    while Instant::now() < deadline && s.fatal().is_none() {
        let frame = CaptureFrame::new(camera_extent(), &pixels).unwrap();
        if s.tick(Some(frame)).unwrap().fatal.is_some() {
            reported += 1;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    for _ in 0..3 {
        let frame = CaptureFrame::new(camera_extent(), &pixels).unwrap();
        if s.tick(Some(frame)).unwrap().fatal.is_some() {
            reported += 1;
        }
    }
    assert_eq!(reported, 1);
}

#[test]
fn ending_the_session_ignores_late_replies() {
    let (gate, engine) = gated();
    let mut s = start(cfg(1), engine);
    let pixels = top_white();
    assert_eq!(tick(&mut s, &pixels), SampleOutcome::Submitted { slot: 0 });

    gate.send(()).unwrap();
    s.end();
    assert!(!s.is_alive());
    assert_eq!(s.counters().masks_ignored, 1);
    assert_eq!(s.counters().masks_received, 0);
    assert!(s.pool_stats().is_none());
    assert!(matches!(
        s.tick(None),
        Err(PipelineError::SessionUnavailable(_))
    ));
}
