use crate::foundation::core::{Extent, SampleFilter};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::render::backend::{BlitParams, FrameBackend, TextureDesc, TextureFormat, TextureId};

/// Fixed-size RGBA render target the camera image is downsampled into.
///
/// The extent is set once at creation and never changes.
#[derive(Debug)]
pub struct WorkingTexture {
    id: TextureId,
    extent: Extent,
}

impl WorkingTexture {
    pub fn create(backend: &mut dyn FrameBackend, extent: Extent) -> PipelineResult<Self> {
        let id = backend
            .create_texture(TextureDesc {
                label: "working",
                extent,
                format: TextureFormat::Rgba8,
                render_target: true,
            })
            .map_err(|e| PipelineError::render_target(format!("working texture: {e}")))?;
        Ok(Self { id, extent })
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn release(self, backend: &mut dyn FrameBackend) {
        backend.release_texture(self.id);
    }
}

/// Draws an arbitrarily sized source into the working texture with one full-screen pass.
#[derive(Clone, Copy, Debug)]
pub struct Downsampler {
    params: BlitParams,
}

impl Downsampler {
    /// `flip_y` applies to the inference path only; the on-screen path has its own flag.
    pub fn new(filter: SampleFilter, flip_y: bool) -> Self {
        Self {
            params: BlitParams { filter, flip_y },
        }
    }

    pub fn flips_rows(&self) -> bool {
        self.params.flip_y
    }

    /// Overwrite `target` with `source` resampled to the target extent.
    ///
    /// An incomplete target fails with `RenderTarget` before anything is drawn.
    pub fn downsample(
        &self,
        backend: &mut dyn FrameBackend,
        source: TextureId,
        target: &WorkingTexture,
    ) -> PipelineResult<()> {
        backend.check_render_target(target.id)?;
        backend.blit(source, target.id, self.params)
    }
}
