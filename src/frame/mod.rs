//! Pixel containers that cross the pipeline's boundaries.
//!
//! - [`CaptureFrame`] borrows the camera's pixels for one tick and cannot outlive it.
//! - [`PixelBuffer`] is a fixed-size RGBA8 slot buffer moved between the render context and the
//!   inference worker. It is never shared.
//! - [`LabelMask`] is the worker's per-pixel class output.

pub mod pool;

use crate::foundation::core::{Extent, RowOrder};
use crate::foundation::error::{PipelineError, PipelineResult};

/// One tick's camera image: tightly packed RGBA8, top row first.
///
/// The lifetime ties the frame to the camera borrow, so it cannot be retained past the tick.
#[derive(Clone, Copy, Debug)]
pub struct CaptureFrame<'a> {
    extent: Extent,
    pixels: &'a [u8],
}

impl<'a> CaptureFrame<'a> {
    pub fn new(extent: Extent, pixels: &'a [u8]) -> PipelineResult<Self> {
        if pixels.len() != extent.rgba8_len() {
            return Err(PipelineError::validation(format!(
                "capture frame {extent} expects {} bytes, got {}",
                extent.rgba8_len(),
                pixels.len()
            )));
        }
        Ok(Self { extent, pixels })
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn pixels(&self) -> &'a [u8] {
        self.pixels
    }
}

/// CPU-readable copy of the working texture, owned by exactly one context at a time.
#[derive(Debug)]
pub struct PixelBuffer {
    slot: usize,
    extent: Extent,
    row_order: RowOrder,
    data: Box<[u8]>,
}

impl PixelBuffer {
    pub(crate) fn alloc(slot: usize, extent: Extent) -> Self {
        Self {
            slot,
            extent,
            row_order: RowOrder::TopFirst,
            data: vec![0u8; extent.rgba8_len()].into_boxed_slice(),
        }
    }

    /// Pool slot this buffer belongs to.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Declared row order of `as_bytes`.
    pub fn row_order(&self) -> RowOrder {
        self.row_order
    }

    pub(crate) fn set_row_order(&mut self, order: RowOrder) {
        self.row_order = order;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Reverse row order in place and update the declared order.
    pub fn flip_rows(&mut self) {
        flip_rgba8_rows(&mut self.data, self.extent);
        self.row_order = self.row_order.flipped();
    }

    /// Normalize to top-first rows.
    pub fn orient_top_first(&mut self) {
        if self.row_order == RowOrder::BottomFirst {
            self.flip_rows();
        }
    }
}

/// Reverse the row order of tightly packed RGBA8 pixels in place.
pub(crate) fn flip_rgba8_rows(data: &mut [u8], extent: Extent) {
    let row = extent.width() as usize * 4;
    let h = extent.height() as usize;
    for y in 0..h / 2 {
        let (top, bottom) = data.split_at_mut((h - 1 - y) * row);
        top[y * row..(y + 1) * row].swap_with_slice(&mut bottom[..row]);
    }
}

/// Per-pixel class prediction, one byte per pixel, top row first.
///
/// Zero is background. The overlay binarizes the normalized value (`class / 255`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelMask {
    extent: Extent,
    data: Vec<u8>,
}

impl LabelMask {
    pub fn new(extent: Extent, data: Vec<u8>) -> PipelineResult<Self> {
        if data.len() != extent.pixel_count() {
            return Err(PipelineError::validation(format!(
                "label mask {extent} expects {} bytes, got {}",
                extent.pixel_count(),
                data.len()
            )));
        }
        Ok(Self { extent, data })
    }

    /// All-background mask.
    pub fn background(extent: Extent) -> Self {
        Self {
            extent,
            data: vec![0u8; extent.pixel_count()],
        }
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.extent.width() || y >= self.extent.height() {
            return None;
        }
        self.data
            .get(y as usize * self.extent.width() as usize + x as usize)
            .copied()
    }

    /// Number of non-background pixels.
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }
}
