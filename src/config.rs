use std::path::Path;

use anyhow::Context as _;

use crate::foundation::core::{Extent, Rgba, SampleFilter};
use crate::foundation::error::{PipelineError, PipelineResult};

/// What to do with a sampled tick while the worker still holds an earlier submission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Skip the readback and transfer entirely. At most one buffer is ever in flight.
    #[default]
    Skip,
    /// Submit anyway; the worker keeps only the newest pending buffer and hands the older ones
    /// back as dropped work.
    Replace,
}

/// Mask overlay styling.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    /// Tint drawn over foreground pixels.
    pub tint: Rgba,
    /// Normalized mask intensity; a pixel is foreground when `intensity > threshold`.
    pub threshold: f32,
    /// Tint opacity.
    pub alpha: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            tint: Rgba::GREEN,
            threshold: 1.5 / 255.0,
            alpha: 0.35,
        }
    }
}

/// Full pipeline configuration.
///
/// Every field has a default, so a partial JSON document is a valid config.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// WorkingTexture width. Fixed for the lifetime of a session.
    pub working_width: u32,
    /// WorkingTexture height. Fixed for the lifetime of a session.
    pub working_height: u32,
    /// Number of PixelBuffer slots. At least 2.
    pub pool_size: usize,
    /// Sample every Nth tick. At least 1.
    pub sample_every: u64,
    pub backpressure: BackpressurePolicy,
    /// Filter used when drawing the camera image into the working texture.
    pub filter: SampleFilter,
    /// Flip rows while downsampling for the inference path.
    pub flip_for_inference: bool,
    /// Flip rows while drawing the camera image on screen.
    pub flip_for_display: bool,
    pub overlay: OverlayStyle,
    /// EMA weight of the newest instantaneous FPS sample.
    pub fps_smoothing: f64,
    /// Number of sampled ticks averaged for the latency readout.
    pub latency_window: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            working_width: 256,
            working_height: 448,
            pool_size: 2,
            sample_every: 2,
            backpressure: BackpressurePolicy::default(),
            filter: SampleFilter::default(),
            flip_for_inference: false,
            flip_for_display: false,
            overlay: OverlayStyle::default(),
            fps_smoothing: 0.15,
            latency_window: 30,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config from disk and validate it.
    pub fn from_path(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        Self::from_json(&text)
    }

    /// Parse a JSON config and validate it.
    pub fn from_json(text: &str) -> PipelineResult<Self> {
        let cfg: Self = serde_json::from_str(text)
            .map_err(|e| PipelineError::validation(format!("invalid config json: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn working_extent(&self) -> PipelineResult<Extent> {
        Extent::new(self.working_width, self.working_height)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.working_extent()?;
        if self.pool_size < 2 {
            return Err(PipelineError::validation(format!(
                "pool_size must be >= 2, got {}",
                self.pool_size
            )));
        }
        validate_sample_every(self.sample_every)?;
        if !(0.0..=1.0).contains(&self.overlay.threshold) {
            return Err(PipelineError::validation(
                "overlay.threshold must be within [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.overlay.alpha) {
            return Err(PipelineError::validation(
                "overlay.alpha must be within [0, 1]",
            ));
        }
        if !self.overlay.tint.is_unit_range() {
            return Err(PipelineError::validation(
                "overlay.tint channels must be within [0, 1]",
            ));
        }
        if !(self.fps_smoothing > 0.0 && self.fps_smoothing <= 1.0) {
            return Err(PipelineError::validation(
                "fps_smoothing must be within (0, 1]",
            ));
        }
        if self.latency_window == 0 {
            return Err(PipelineError::validation("latency_window must be >= 1"));
        }
        Ok(())
    }
}

pub(crate) fn validate_sample_every(n: u64) -> PipelineResult<()> {
    if n == 0 {
        return Err(PipelineError::validation("sample_every must be >= 1"));
    }
    Ok(())
}
