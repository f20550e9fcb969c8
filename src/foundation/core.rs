use crate::foundation::error::{PipelineError, PipelineResult};

/// Pixel dimensions of an image or texture. Never empty.
///
/// The fields are private so [`Extent::new`] is the only way in, deserialization included.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawExtent")]
pub struct Extent {
    width: u32,
    height: u32,
}

#[derive(serde::Deserialize)]
struct RawExtent {
    width: u32,
    height: u32,
}

impl TryFrom<RawExtent> for Extent {
    type Error = PipelineError;

    fn try_from(raw: RawExtent) -> PipelineResult<Self> {
        Self::new(raw.width, raw.height)
    }
}

impl Extent {
    /// Create a validated, non-empty extent.
    pub fn new(width: u32, height: u32) -> PipelineResult<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::validation(format!(
                "extent must be non-empty, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }

    /// Width in pixels.
    pub fn width(self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(self) -> u32 {
        self.height
    }

    /// Number of pixels.
    pub fn pixel_count(self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }

    /// Bytes needed for tightly packed RGBA8 pixels.
    pub fn rgba8_len(self) -> usize {
        self.pixel_count().saturating_mul(4)
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which image row comes first in a CPU buffer.
///
/// GL-style readback yields bottom-first rows; wgpu and decoded images are top-first. A buffer
/// always travels with its declared order so consumers never have to guess.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOrder {
    TopFirst,
    BottomFirst,
}

impl RowOrder {
    /// Row order after a vertical flip.
    pub fn flipped(self) -> Self {
        match self {
            Self::TopFirst => Self::BottomFirst,
            Self::BottomFirst => Self::TopFirst,
        }
    }

    /// Apply an optional flip.
    pub fn flipped_if(self, flip: bool) -> Self {
        if flip { self.flipped() } else { self }
    }
}

/// Monotonic render tick counter.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct TickIndex(pub u64);

impl TickIndex {
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Straight-alpha color with unit-range float channels.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const GREEN: Self = Self {
        r: 0.0,
        g: 1.0,
        b: 0.0,
        a: 1.0,
    };

    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Quantize to RGBA8.
    pub fn to_rgba8(self) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub(crate) fn is_unit_range(self) -> bool {
        self.to_array().iter().all(|c| (0.0..=1.0).contains(c))
    }
}

/// Texture sampling filter for the downsample blit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFilter {
    Nearest,
    #[default]
    Linear,
}
