use crate::foundation::core::Extent;
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::frame::LabelMask;
use crate::render::backend::{FrameBackend, TextureDesc, TextureFormat, TextureId};

/// Single-channel texture holding the most recent mask.
///
/// Created zeroed, which the compositor's threshold treats as all background. Each new mask is
/// written with one whole-texture upload on the render context, so a draw never sees half of one
/// mask and half of another. The texture handle never changes while the cache is alive.
#[derive(Debug)]
pub struct MaskTextureCache {
    texture: TextureId,
    extent: Extent,
    source_seq: Option<u64>,
    uploads: u64,
}

impl MaskTextureCache {
    pub fn create(backend: &mut dyn FrameBackend, extent: Extent) -> PipelineResult<Self> {
        let texture = backend.create_texture(TextureDesc {
            label: "mask",
            extent,
            format: TextureFormat::R8,
            render_target: false,
        })?;
        backend.write_texture(texture, &vec![0u8; extent.pixel_count()])?;
        Ok(Self {
            texture,
            extent,
            source_seq: None,
            uploads: 0,
        })
    }

    /// Overwrite the cached mask in place. `seq` is the tick whose pixels produced it.
    pub fn update(
        &mut self,
        backend: &mut dyn FrameBackend,
        mask: &LabelMask,
        seq: u64,
    ) -> PipelineResult<()> {
        if mask.extent() != self.extent {
            return Err(PipelineError::validation(format!(
                "mask {} does not match cache extent {}",
                mask.extent(),
                self.extent
            )));
        }
        backend.write_texture(self.texture, mask.as_bytes())?;
        self.source_seq = Some(seq);
        self.uploads += 1;
        Ok(())
    }

    pub fn read(&self) -> TextureId {
        self.texture
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Tick that produced the cached mask, or `None` while it is still all background.
    pub fn source_seq(&self) -> Option<u64> {
        self.source_seq
    }

    pub fn has_mask(&self) -> bool {
        self.source_seq.is_some()
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    pub fn release(self, backend: &mut dyn FrameBackend) {
        backend.release_texture(self.texture);
    }
}
