//! Drawing and transfer stages, over a backend trait with CPU and wgpu implementations.

/// Texture handles and the backend trait.
pub mod backend;
/// CPU reference backend.
pub mod cpu;
pub mod downsample;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod overlay;
pub mod readback;
