use std::time::Duration;

use crate::foundation::core::Extent;
use crate::frame::LabelMask;
use crate::worker::InferenceEngine;

/// Foreground label written by the built-in engines.
pub const FOREGROUND: u8 = 255;

/// Demo engine: pixels brighter than `cutoff` are foreground.
///
/// Stands in for a real segmentation model. `delay` simulates inference cost so the pipeline's
/// backpressure handling can be observed.
#[derive(Clone, Debug)]
pub struct LumaEngine {
    cutoff: u8,
    delay: Option<Duration>,
    loaded: Option<Extent>,
}

impl Default for LumaEngine {
    fn default() -> Self {
        Self::new(128)
    }
}

impl LumaEngine {
    pub fn new(cutoff: u8) -> Self {
        Self {
            cutoff,
            delay: None,
            loaded: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = (!delay.is_zero()).then_some(delay);
        self
    }
}

/// Rec. 601 luma in integer arithmetic.
fn luma(px: &[u8]) -> u8 {
    let y = 299 * u32::from(px[0]) + 587 * u32::from(px[1]) + 114 * u32::from(px[2]);
    (y / 1000) as u8
}

impl InferenceEngine for LumaEngine {
    fn load(&mut self, extent: Extent) -> anyhow::Result<()> {
        self.loaded = Some(extent);
        tracing::debug!(%extent, cutoff = self.cutoff, "luma engine loaded");
        Ok(())
    }

    fn predict(&mut self, rgba: &[u8], extent: Extent) -> anyhow::Result<LabelMask> {
        anyhow::ensure!(
            self.loaded == Some(extent),
            "engine loaded for {:?}, asked to predict {extent}",
            self.loaded
        );
        anyhow::ensure!(
            rgba.len() == extent.rgba8_len(),
            "expected {} bytes, got {}",
            extent.rgba8_len(),
            rgba.len()
        );
        if let Some(d) = self.delay {
            std::thread::sleep(d);
        }
        let data = rgba
            .chunks_exact(4)
            .map(|px| if luma(px) > self.cutoff { FOREGROUND } else { 0 })
            .collect();
        Ok(LabelMask::new(extent, data)?)
    }
}
