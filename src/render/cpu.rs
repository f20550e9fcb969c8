use std::collections::HashMap;

use rayon::prelude::*;

use crate::config::OverlayStyle;
use crate::foundation::core::{Extent, RowOrder, SampleFilter};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::render::backend::{
    BlitParams, FrameBackend, TextureDesc, TextureFormat, TextureId, check_len,
};
use crate::render::overlay::{TintBlend, is_foreground, mask_intensity};

const CPU_MAX_TEXTURE_DIMENSION: u32 = 16_384;

struct CpuTexture {
    desc: TextureDesc,
    data: Vec<u8>,
}

/// Reference rasterizer with the same sampling rules as the GPU shaders.
///
/// Pixel centers sit at `(i + 0.5) / size` in UV space. Rows are processed in parallel.
pub struct CpuBackend {
    textures: HashMap<TextureId, CpuTexture>,
    next_id: u32,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            next_id: 0,
        }
    }

    /// Number of live textures.
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    fn get(&self, id: TextureId) -> PipelineResult<&CpuTexture> {
        self.textures
            .get(&id)
            .ok_or_else(|| PipelineError::validation(format!("texture {id:?} does not exist")))
    }

    /// Temporarily move a texture out so it can be read while another is written.
    fn take(&mut self, id: TextureId) -> PipelineResult<CpuTexture> {
        self.textures
            .remove(&id)
            .ok_or_else(|| PipelineError::validation(format!("texture {id:?} does not exist")))
    }
}

impl FrameBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn max_texture_dimension(&self) -> u32 {
        CPU_MAX_TEXTURE_DIMENSION
    }

    fn create_texture(&mut self, desc: TextureDesc) -> PipelineResult<TextureId> {
        let max = self.max_texture_dimension();
        if desc.extent.width() > max || desc.extent.height() > max {
            return Err(PipelineError::validation(format!(
                "texture '{}' {} exceeds max dimension {max}",
                desc.label, desc.extent
            )));
        }
        let id = TextureId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.textures.insert(
            id,
            CpuTexture {
                desc,
                data: vec![0u8; desc.byte_len()],
            },
        );
        Ok(id)
    }

    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc> {
        self.textures.get(&id).map(|t| t.desc)
    }

    fn release_texture(&mut self, id: TextureId) {
        self.textures.remove(&id);
    }

    fn write_texture(&mut self, id: TextureId, data: &[u8]) -> PipelineResult<()> {
        let tex = self
            .textures
            .get_mut(&id)
            .ok_or_else(|| PipelineError::validation(format!("texture {id:?} does not exist")))?;
        check_len(&tex.desc, data.len(), "write_texture")?;
        tex.data.copy_from_slice(data);
        Ok(())
    }

    fn blit(&mut self, src: TextureId, dst: TextureId, params: BlitParams) -> PipelineResult<()> {
        self.check_render_target(dst)?;
        if src == dst {
            return Err(PipelineError::validation("blit source and target must differ"));
        }
        let mut target = self.take(dst)?;
        let res = match self.get(src) {
            Ok(source) if source.desc.format == TextureFormat::Rgba8 => {
                blit_rgba8(
                    &source.data,
                    source.desc.extent,
                    &mut target.data,
                    target.desc.extent,
                    params,
                );
                Ok(())
            }
            Ok(source) => Err(PipelineError::validation(format!(
                "blit source '{}' must be rgba8",
                source.desc.label
            ))),
            Err(e) => Err(e),
        };
        self.textures.insert(dst, target);
        res
    }

    fn read_pixels(&mut self, src: TextureId, out: &mut [u8]) -> PipelineResult<RowOrder> {
        let tex = self.get(src)?;
        check_len(&tex.desc, out.len(), "read_pixels")?;
        out.copy_from_slice(&tex.data);
        Ok(RowOrder::TopFirst)
    }

    fn draw_overlay(
        &mut self,
        mask: TextureId,
        dst: TextureId,
        style: &OverlayStyle,
    ) -> PipelineResult<()> {
        self.check_render_target(dst)?;
        let mut target = self.take(dst)?;
        let res = match self.get(mask) {
            Ok(mask_tex) if mask_tex.desc.format == TextureFormat::R8 => {
                overlay_rgba8(
                    &mask_tex.data,
                    mask_tex.desc.extent,
                    &mut target.data,
                    target.desc.extent,
                    style,
                );
                Ok(())
            }
            Ok(mask_tex) => Err(PipelineError::validation(format!(
                "overlay mask '{}' must be r8",
                mask_tex.desc.label
            ))),
            Err(e) => Err(e),
        };
        self.textures.insert(dst, target);
        res
    }
}

fn texel_center(i: u32, size: u32) -> f32 {
    (i as f32 + 0.5) / size as f32
}

fn nearest_index(u: f32, size: u32) -> usize {
    ((u * size as f32).floor() as i64).clamp(0, i64::from(size) - 1) as usize
}

fn blit_rgba8(src: &[u8], se: Extent, dst: &mut [u8], de: Extent, params: BlitParams) {
    let src_row = se.width() as usize * 4;
    dst.par_chunks_mut(de.width() as usize * 4)
        .enumerate()
        .for_each(|(y, row)| {
            let mut v = texel_center(y as u32, de.height());
            if params.flip_y {
                v = 1.0 - v;
            }
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let u = texel_center(x as u32, de.width());
                match params.filter {
                    SampleFilter::Nearest => {
                        let sx = nearest_index(u, se.width());
                        let sy = nearest_index(v, se.height());
                        let o = sy * src_row + sx * 4;
                        px.copy_from_slice(&src[o..o + 4]);
                    }
                    SampleFilter::Linear => sample_bilinear(src, se, u, v, px),
                }
            }
        });
}

fn sample_bilinear(src: &[u8], se: Extent, u: f32, v: f32, out: &mut [u8]) {
    let fx = (u * se.width() as f32 - 0.5).clamp(0.0, (se.width() - 1) as f32);
    let fy = (v * se.height() as f32 - 0.5).clamp(0.0, (se.height() - 1) as f32);
    let x0 = fx.floor() as usize;
    let y0 = fy.floor() as usize;
    let x1 = (x0 + 1).min(se.width() as usize - 1);
    let y1 = (y0 + 1).min(se.height() as usize - 1);
    let tx = fx - x0 as f32;
    let ty = fy - y0 as f32;
    let row = se.width() as usize * 4;
    for (c, o) in out.iter_mut().enumerate() {
        let p = |x: usize, y: usize| f32::from(src[y * row + x * 4 + c]);
        let top = p(x0, y0) * (1.0 - tx) + p(x1, y0) * tx;
        let bottom = p(x0, y1) * (1.0 - tx) + p(x1, y1) * tx;
        *o = (top * (1.0 - ty) + bottom * ty).round().clamp(0.0, 255.0) as u8;
    }
}

fn overlay_rgba8(mask: &[u8], me: Extent, dst: &mut [u8], de: Extent, style: &OverlayStyle) {
    let blend = TintBlend::new(style);
    let threshold = style.threshold;
    dst.par_chunks_mut(de.width() as usize * 4)
        .enumerate()
        .for_each(|(y, row)| {
            let my = nearest_index(texel_center(y as u32, de.height()), me.height());
            let mask_row = &mask[my * me.width() as usize..(my + 1) * me.width() as usize];
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let mx = nearest_index(texel_center(x as u32, de.width()), me.width());
                if is_foreground(mask_intensity(mask_row[mx]), threshold) {
                    blend.apply(px);
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::Rgba;

    fn rgba_desc(w: u32, h: u32) -> TextureDesc {
        TextureDesc {
            label: "t",
            extent: Extent::new(w, h).unwrap(),
            format: TextureFormat::Rgba8,
            render_target: true,
        }
    }

    fn rows(h: u32) -> Vec<u8> {
        (0..h).flat_map(|y| [y as u8 * 10, 0, 0, 255]).collect()
    }

    #[test]
    fn nearest_blit_copies_identity_and_flips() {
        let mut b = CpuBackend::new();
        let src = b.create_texture(rgba_desc(1, 4)).unwrap();
        let dst = b.create_texture(rgba_desc(1, 4)).unwrap();
        b.write_texture(src, &rows(4)).unwrap();

        let nearest = BlitParams {
            filter: SampleFilter::Nearest,
            flip_y: false,
        };
        b.blit(src, dst, nearest).unwrap();
        let mut out = vec![0u8; 16];
        assert_eq!(b.read_pixels(dst, &mut out).unwrap(), RowOrder::TopFirst);
        assert_eq!(out, rows(4));

        b.blit(
            src,
            dst,
            BlitParams {
                flip_y: true,
                ..nearest
            },
        )
        .unwrap();
        b.read_pixels(dst, &mut out).unwrap();
        let reds: Vec<u8> = out.chunks_exact(4).map(|p| p[0]).collect();
        assert_eq!(reds, vec![30, 20, 10, 0]);
    }

    #[test]
    fn linear_downsample_averages_pairs() {
        let mut b = CpuBackend::new();
        let src = b.create_texture(rgba_desc(2, 1)).unwrap();
        let dst = b.create_texture(rgba_desc(1, 1)).unwrap();
        b.write_texture(src, &[0, 0, 0, 255, 200, 100, 50, 255])
            .unwrap();
        b.blit(src, dst, BlitParams::default()).unwrap();
        let mut out = vec![0u8; 4];
        b.read_pixels(dst, &mut out).unwrap();
        assert_eq!(out, vec![100, 50, 25, 255]);
    }

    #[test]
    fn blit_rejects_non_render_target() {
        let mut b = CpuBackend::new();
        let src = b.create_texture(rgba_desc(2, 2)).unwrap();
        let dst = b
            .create_texture(TextureDesc {
                render_target: false,
                ..rgba_desc(2, 2)
            })
            .unwrap();
        let err = b.blit(src, dst, BlitParams::default()).unwrap_err();
        assert!(matches!(err, PipelineError::RenderTarget(_)));

        b.release_texture(dst);
        let err = b.blit(src, dst, BlitParams::default()).unwrap_err();
        assert!(matches!(err, PipelineError::RenderTarget(_)));
    }

    #[test]
    fn overlay_tints_only_foreground() {
        let mut b = CpuBackend::new();
        let view = b.create_texture(rgba_desc(2, 1)).unwrap();
        b.write_texture(view, &[0, 0, 0, 255, 0, 0, 0, 255]).unwrap();
        let mask = b
            .create_texture(TextureDesc {
                label: "mask",
                extent: Extent::new(2, 1).unwrap(),
                format: TextureFormat::R8,
                render_target: false,
            })
            .unwrap();
        b.write_texture(mask, &[0, 255]).unwrap();

        let style = OverlayStyle {
            tint: Rgba::new(1.0, 0.0, 0.0, 1.0),
            threshold: 1.5 / 255.0,
            alpha: 1.0,
        };
        b.draw_overlay(mask, view, &style).unwrap();
        let mut out = vec![0u8; 8];
        b.read_pixels(view, &mut out).unwrap();
        assert_eq!(out, vec![0, 0, 0, 255, 255, 0, 0, 255]);
    }

    #[test]
    fn write_checks_length() {
        let mut b = CpuBackend::new();
        let t = b.create_texture(rgba_desc(2, 2)).unwrap();
        assert!(b.write_texture(t, &[0u8; 15]).is_err());
        assert!(b.create_texture(rgba_desc(CPU_MAX_TEXTURE_DIMENSION + 1, 1)).is_err());
    }
}
