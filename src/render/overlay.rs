use crate::config::OverlayStyle;
use crate::foundation::error::PipelineResult;
use crate::foundation::math::lerp_u8;
use crate::mask_cache::MaskTextureCache;
use crate::render::backend::{FrameBackend, TextureId};

/// Normalized intensity of an 8-bit mask sample.
pub fn mask_intensity(v: u8) -> f32 {
    f32::from(v) / 255.0
}

/// Step function used by every backend: strictly above the threshold is foreground.
pub fn is_foreground(intensity: f32, threshold: f32) -> bool {
    intensity > threshold
}

/// Precomputed per-draw blend constants.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TintBlend {
    rgb: [u8; 3],
    weight: u16,
}

impl TintBlend {
    pub(crate) fn new(style: &OverlayStyle) -> Self {
        let [r, g, b, _] = style.tint.to_rgba8();
        let w = (style.alpha * style.tint.a).clamp(0.0, 1.0);
        Self {
            rgb: [r, g, b],
            weight: (w * 255.0).round() as u16,
        }
    }

    /// Source-over of the tint at `alpha * tint.a` onto one RGBA8 pixel.
    pub(crate) fn apply(self, px: &mut [u8]) {
        for (c, t) in px[..3].iter_mut().zip(self.rgb) {
            *c = lerp_u8(*c, t, self.weight);
        }
        px[3] = lerp_u8(px[3], 255, self.weight);
    }
}

/// Draws the cached mask as a translucent tinted layer over the rendered camera image.
///
/// Runs every render tick with whatever the cache currently holds.
pub struct OverlayCompositor {
    style: OverlayStyle,
}

impl OverlayCompositor {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    pub fn composite(
        &self,
        backend: &mut dyn FrameBackend,
        view: TextureId,
        mask: &MaskTextureCache,
    ) -> PipelineResult<()> {
        backend.draw_overlay(mask.read(), view, &self.style)
    }
}
