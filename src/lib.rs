//! maskpipe overlays a live segmentation mask on a camera feed without ever stalling the render
//! loop on inference.
//!
//! Each render tick a [`Session`] uploads the camera frame and draws it, and on sample ticks
//! downsamples it to a fixed working extent and moves a pooled pixel buffer to an inference worker
//! thread. Masks come back on their own schedule and are composited from a cache every tick.
#![forbid(unsafe_code)]

mod foundation;

pub mod camera;
pub mod config;
pub mod diagnostics;
pub mod frame;
pub mod mask_cache;
pub mod render;
pub mod scheduler;
pub mod session;
pub mod worker;

pub use crate::foundation::core::{Extent, Rgba, RowOrder, SampleFilter, TickIndex};
pub use crate::foundation::error::{PipelineError, PipelineResult, Severity};

pub use crate::camera::{CameraSource, ImageSequenceCamera, SyntheticCamera};
pub use crate::config::{BackpressurePolicy, OverlayStyle, PipelineConfig};
pub use crate::diagnostics::StatusLine;
pub use crate::frame::pool::{BufferPool, PoolStats};
pub use crate::frame::{CaptureFrame, LabelMask, PixelBuffer};
pub use crate::mask_cache::MaskTextureCache;
pub use crate::render::backend::{BackendKind, FrameBackend, create_backend};
pub use crate::render::cpu::CpuBackend;
#[cfg(feature = "gpu")]
pub use crate::render::gpu::WgpuBackend;
pub use crate::scheduler::{FrameStats, PipelineCounters, PipelineState, SampleDecision};
pub use crate::session::{SampleOutcome, Session, TickReport};
pub use crate::worker::engine::LumaEngine;
pub use crate::worker::{InferenceEngine, InferenceWorker, WorkerEvent};
