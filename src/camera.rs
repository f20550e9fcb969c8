//! Camera sources. Each tick yields at most one frame, borrowed until the next acquire.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rayon::prelude::*;

use crate::foundation::core::Extent;
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::frame::CaptureFrame;

/// Per-tick image provider. `None` means no frame this tick, which is a normal state.
pub trait CameraSource {
    fn acquire(&mut self) -> Option<CaptureFrame<'_>>;
}

/// Procedural feed: a bright disc drifting over a dark gradient.
pub struct SyntheticCamera {
    extent: Extent,
    pixels: Vec<u8>,
    frame: u64,
    drop_every: Option<u64>,
}

impl SyntheticCamera {
    pub fn new(extent: Extent) -> Self {
        Self {
            extent,
            pixels: vec![0u8; extent.rgba8_len()],
            frame: 0,
            drop_every: None,
        }
    }

    /// Yield nothing on every `k`-th acquire (1-based). Zero disables dropping.
    pub fn drop_every(mut self, k: u64) -> Self {
        self.drop_every = (k > 0).then_some(k);
        self
    }

    /// Change the feed resolution, as a device rotation would.
    pub fn set_extent(&mut self, extent: Extent) {
        self.extent = extent;
        self.pixels.resize(extent.rgba8_len(), 0);
    }

    fn paint(&mut self) {
        let (width, height) = (self.extent.width(), self.extent.height());
        let w = width as f32;
        let h = height as f32;
        let t = self.frame as f32 * 0.05;
        let cx = w * (0.5 + 0.35 * t.sin());
        let cy = h * 0.5;
        let r2 = (w.min(h) * 0.2).powi(2);
        self.pixels
            .par_chunks_mut(width as usize * 4)
            .enumerate()
            .for_each(|(y, row)| {
                let shade = (y as f32 / h * 80.0) as u8;
                for (x, px) in row.chunks_exact_mut(4).enumerate() {
                    let dx = x as f32 + 0.5 - cx;
                    let dy = y as f32 + 0.5 - cy;
                    let c = if dx * dx + dy * dy <= r2 {
                        [240, 240, 230, 255]
                    } else {
                        [shade, 20, 40, 255]
                    };
                    px.copy_from_slice(&c);
                }
            });
    }
}

impl CameraSource for SyntheticCamera {
    fn acquire(&mut self) -> Option<CaptureFrame<'_>> {
        self.frame += 1;
        if self.drop_every.is_some_and(|k| self.frame % k == 0) {
            return None;
        }
        self.paint();
        CaptureFrame::new(self.extent, &self.pixels).ok()
    }
}

/// Loops over the images in a directory in file-name order. Sizes may differ between files.
pub struct ImageSequenceCamera {
    frames: Vec<(Extent, Vec<u8>)>,
    next: usize,
}

impl ImageSequenceCamera {
    pub fn from_dir(dir: impl AsRef<Path>) -> PipelineResult<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("read frames dir '{}'", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_image_path(p))
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(PipelineError::camera_unavailable(format!(
                "no images in '{}'",
                dir.display()
            )));
        }

        let frames = paths
            .par_iter()
            .map(|p| decode_frame(p))
            .collect::<PipelineResult<Vec<_>>>()?;
        tracing::info!(dir = %dir.display(), frames = frames.len(), "image sequence loaded");
        Ok(Self { frames, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

fn is_image_path(p: &Path) -> bool {
    p.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
}

fn decode_frame(path: &Path) -> PipelineResult<(Extent, Vec<u8>)> {
    let rgba = image::open(path)
        .with_context(|| format!("decode frame '{}'", path.display()))?
        .to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok((Extent::new(width, height)?, rgba.into_raw()))
}

impl CameraSource for ImageSequenceCamera {
    fn acquire(&mut self) -> Option<CaptureFrame<'_>> {
        let idx = self.next % self.frames.len().max(1);
        self.next = self.next.wrapping_add(1);
        let (extent, pixels) = self.frames.get(idx)?;
        CaptureFrame::new(*extent, pixels).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_drops_every_kth_frame() {
        let mut cam = SyntheticCamera::new(Extent::new(8, 8).unwrap()).drop_every(3);
        let got: Vec<bool> = (0..6).map(|_| cam.acquire().is_some()).collect();
        assert_eq!(got, vec![true, true, false, true, true, false]);
    }

    #[test]
    fn synthetic_follows_extent_changes() {
        let mut cam = SyntheticCamera::new(Extent::new(8, 8).unwrap());
        cam.set_extent(Extent::new(4, 2).unwrap());
        let frame = cam.acquire().unwrap();
        assert_eq!(frame.extent(), Extent::new(4, 2).unwrap());
        assert_eq!(frame.pixels().len(), 32);
    }

    #[test]
    fn image_sequence_loops_in_name_order() {
        let dir = std::env::temp_dir().join(format!("maskpipe-seq-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        image::RgbaImage::from_pixel(2, 1, image::Rgba([1, 2, 3, 255]))
            .save(dir.join("b.png"))
            .unwrap();
        image::RgbaImage::from_pixel(3, 2, image::Rgba([9, 9, 9, 255]))
            .save(dir.join("a.png"))
            .unwrap();
        std::fs::write(dir.join("notes.txt"), "skip me").unwrap();

        let mut cam = ImageSequenceCamera::from_dir(&dir).unwrap();
        assert_eq!(cam.len(), 2);
        let sizes: Vec<Extent> = (0..3).map(|_| cam.acquire().unwrap().extent()).collect();
        assert_eq!(
            sizes,
            vec![
                Extent::new(3, 2).unwrap(),
                Extent::new(2, 1).unwrap(),
                Extent::new(3, 2).unwrap()
            ]
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_dir_is_camera_unavailable() {
        let dir = std::env::temp_dir().join(format!("maskpipe-empty-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let err = ImageSequenceCamera::from_dir(&dir).err().unwrap();
        assert!(matches!(err, PipelineError::CameraUnavailable(_)));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
