use crate::config::OverlayStyle;
use crate::foundation::core::{Extent, RowOrder, SampleFilter};
use crate::foundation::error::{PipelineError, PipelineResult};

/// Opaque handle to a backend-owned texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    /// 4 bytes per pixel. Camera, working and view textures.
    Rgba8,
    /// 1 byte per pixel. Mask textures.
    R8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::R8 => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: &'static str,
    pub extent: Extent,
    pub format: TextureFormat,
    /// Whether the texture can be drawn into.
    pub render_target: bool,
}

impl TextureDesc {
    pub fn byte_len(&self) -> usize {
        self.extent
            .pixel_count()
            .saturating_mul(self.format.bytes_per_pixel())
    }
}

/// Full-screen textured pass parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlitParams {
    pub filter: SampleFilter,
    /// Sample the source with `v = 1 - v`.
    pub flip_y: bool,
}

/// The draw and transfer primitives the frame pipeline needs from a graphics device.
///
/// All methods run on the render context. Textures store rows top-first; `read_pixels` reports the
/// row order of what it wrote so readers never assume it.
pub trait FrameBackend {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Largest supported texture edge.
    fn max_texture_dimension(&self) -> u32;

    fn create_texture(&mut self, desc: TextureDesc) -> PipelineResult<TextureId>;

    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc>;

    fn release_texture(&mut self, id: TextureId);

    /// Overwrite the whole texture in place from tightly packed rows, top row first.
    ///
    /// The texture object keeps its identity; nothing is reallocated.
    fn write_texture(&mut self, id: TextureId, data: &[u8]) -> PipelineResult<()>;

    /// Fail with `RenderTarget` unless `id` can currently be drawn into.
    fn check_render_target(&self, id: TextureId) -> PipelineResult<()> {
        match self.texture_desc(id) {
            Some(desc) if desc.render_target && desc.format == TextureFormat::Rgba8 => Ok(()),
            Some(desc) => Err(PipelineError::render_target(format!(
                "texture '{}' is not a complete rgba8 render target",
                desc.label
            ))),
            None => Err(PipelineError::render_target(format!(
                "texture {id:?} does not exist"
            ))),
        }
    }

    /// Draw `src` stretched over all of `dst`.
    fn blit(&mut self, src: TextureId, dst: TextureId, params: BlitParams) -> PipelineResult<()>;

    /// Blocking copy of the texture contents into `out` (tight rows).
    fn read_pixels(&mut self, src: TextureId, out: &mut [u8]) -> PipelineResult<RowOrder>;

    /// Blend `style.tint` over `dst` wherever the mask intensity exceeds `style.threshold`.
    fn draw_overlay(
        &mut self,
        mask: TextureId,
        dst: TextureId,
        style: &OverlayStyle,
    ) -> PipelineResult<()>;
}

pub(crate) fn check_len(desc: &TextureDesc, len: usize, what: &str) -> PipelineResult<()> {
    if len != desc.byte_len() {
        return Err(PipelineError::validation(format!(
            "{what} for '{}' ({} {:?}) expects {} bytes, got {len}",
            desc.label,
            desc.extent,
            desc.format,
            desc.byte_len()
        )));
    }
    Ok(())
}

/// Which backend to construct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// CPU reference rasterizer. Always available.
    Cpu,
    #[cfg(feature = "gpu")]
    Gpu,
}

/// Create a backend, mapping device bring-up failure to `SessionUnavailable`.
pub fn create_backend(kind: BackendKind) -> PipelineResult<Box<dyn FrameBackend>> {
    match kind {
        BackendKind::Cpu => Ok(Box::new(crate::render::cpu::CpuBackend::new())),
        #[cfg(feature = "gpu")]
        BackendKind::Gpu => Ok(Box::new(crate::render::gpu::WgpuBackend::new()?)),
    }
}
