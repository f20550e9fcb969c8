use std::fmt;

use crate::foundation::core::{Extent, TickIndex};
use crate::scheduler::PipelineState;

/// One-line human readable pipeline status, rebuilt every tick.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusLine {
    pub fps: f64,
    pub latency_ms: f64,
    /// Camera resolution this tick, `None` when the camera had no frame.
    pub camera: Option<Extent>,
    /// Most recent resolution seen, kept for the "no camera" line.
    pub last_camera: Option<Extent>,
    pub tick: TickIndex,
    pub sample_every: u64,
}

impl StatusLine {
    pub fn from_state(state: &PipelineState, camera: Option<Extent>) -> Self {
        Self {
            fps: state.stats().fps(),
            latency_ms: state.stats().avg_latency_ms(),
            camera,
            last_camera: state.last_camera(),
            tick: state.tick(),
            sample_every: state.sample_every(),
        }
    }

    pub fn has_camera(&self) -> bool {
        self.camera.is_some()
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FPS≈{:.1} | read+convert={:.2}ms | ", self.fps, self.latency_ms)?;
        match (self.camera, self.last_camera) {
            (Some(e), _) => write!(f, "Camera {e}")?,
            (None, Some(last)) => write!(f, "no camera (last {last})")?,
            (None, None) => f.write_str("no camera")?,
        }
        write!(f, " | Frame {} | Every {}", self.tick.0, self.sample_every)
    }
}
