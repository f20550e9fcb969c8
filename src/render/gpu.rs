use std::collections::HashMap;

use crate::config::OverlayStyle;
use crate::foundation::core::{Extent, RowOrder, SampleFilter};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::render::backend::{
    BlitParams, FrameBackend, TextureDesc, TextureFormat, TextureId, check_len,
};

const FULLSCREEN_VS: &str = r#"
struct VsOut {
  @builtin(position) pos: vec4<f32>,
  @location(0) uv: vec2<f32>,
};

@vertex
fn vs(@builtin(vertex_index) vi: u32) -> VsOut {
  var p = array<vec2<f32>, 3>(
    vec2<f32>(-1.0, -1.0),
    vec2<f32>( 3.0, -1.0),
    vec2<f32>(-1.0,  3.0),
  );
  let pos = p[vi];
  var o: VsOut;
  o.pos = vec4<f32>(pos, 0.0, 1.0);
  // Texture rows run top-down; clip space y runs bottom-up.
  o.uv = vec2<f32>(pos.x + 1.0, 1.0 - pos.y) * 0.5;
  return o;
}
"#;

const BLIT_FS: &str = r#"
@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> params: vec4<f32>;

@fragment
fn fs(in: VsOut) -> @location(0) vec4<f32> {
  var uv = in.uv;
  if (params.x > 0.5) {
    uv.y = 1.0 - uv.y;
  }
  return textureSample(t_src, s_src, uv);
}
"#;

const OVERLAY_FS: &str = r#"
struct OverlayParams {
  tint: vec4<f32>,
  threshold: vec4<f32>,
};

@group(0) @binding(0) var t_mask: texture_2d<f32>;
@group(0) @binding(1) var s_mask: sampler;
@group(0) @binding(2) var<uniform> params: OverlayParams;

@fragment
fn fs(in: VsOut) -> @location(0) vec4<f32> {
  let m = textureSample(t_mask, s_mask, in.uv).r;
  if (!(m > params.threshold.x)) {
    discard;
  }
  return params.tint;
}
"#;

struct GpuTexture {
    desc: TextureDesc,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct Pass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
}

struct Readback {
    buffer: wgpu::Buffer,
    size: u64,
}

/// wgpu implementation of [`FrameBackend`].
///
/// Blits and overlays are full-screen triangle passes; readback goes through a reused mappable
/// buffer with padded rows that are compacted into the caller's tight buffer.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    textures: HashMap<TextureId, GpuTexture>,
    next_id: u32,
    blit: Pass,
    overlay: Pass,
    nearest: wgpu::Sampler,
    linear: wgpu::Sampler,
    readback: Option<Readback>,
}

impl WgpuBackend {
    /// Bring up a device. No adapter or no device is `SessionUnavailable`.
    pub fn new() -> PipelineResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                PipelineError::session_unavailable("no gpu adapter available")
            }
            other => PipelineError::session_unavailable(format!(
                "wgpu request_adapter failed: {other:?}"
            )),
        })?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("maskpipe_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| {
            PipelineError::session_unavailable(format!("wgpu request_device failed: {e:?}"))
        })?;
        tracing::info!(adapter = ?adapter.get_info().name, "wgpu device ready");

        let sampler = |label: &'static str, filter: wgpu::FilterMode| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        };
        let nearest = sampler("maskpipe_nearest", wgpu::FilterMode::Nearest);
        let linear = sampler("maskpipe_linear", wgpu::FilterMode::Linear);

        let blit = create_pass(&device, "maskpipe_blit", BLIT_FS, 16, None);
        let overlay = create_pass(
            &device,
            "maskpipe_overlay",
            OVERLAY_FS,
            32,
            Some(wgpu::BlendState::ALPHA_BLENDING),
        );

        Ok(Self {
            device,
            queue,
            textures: HashMap::new(),
            next_id: 0,
            blit,
            overlay,
            nearest,
            linear,
            readback: None,
        })
    }

    fn get(&self, id: TextureId) -> PipelineResult<&GpuTexture> {
        self.textures
            .get(&id)
            .ok_or_else(|| PipelineError::validation(format!("texture {id:?} does not exist")))
    }

    fn draw_fullscreen(
        &self,
        pass: &Pass,
        label: &str,
        src: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
        dst: &wgpu::TextureView,
        load: wgpu::LoadOp<wgpu::Color>,
    ) {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &pass.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(src),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: pass.params.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: dst,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rp.set_pipeline(&pass.pipeline);
            rp.set_bind_group(0, &bind_group, &[]);
            rp.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    /// Grow the shared readback buffer to at least `size` bytes.
    fn ensure_readback(&mut self, size: u64) {
        if self.readback.as_ref().is_some_and(|r| r.size >= size) {
            return;
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("maskpipe_readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.readback = Some(Readback { buffer, size });
    }
}

fn create_pass(
    device: &wgpu::Device,
    label: &str,
    fragment: &str,
    params_size: u64,
    blend: Option<wgpu::BlendState>,
) -> Pass {
    let params = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: params_size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(params_size),
                },
                count: None,
            },
        ],
    });

    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(format!("{FULLSCREEN_VS}{fragment}").into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: wgpu::TextureFormat::Rgba8Unorm,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });

    Pass {
        pipeline,
        bind_group_layout,
        params,
    }
}

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::R8 => wgpu::TextureFormat::R8Unorm,
    }
}

fn extent3d(e: Extent) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: e.width(),
        height: e.height(),
        depth_or_array_layers: 1,
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

impl FrameBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn create_texture(&mut self, desc: TextureDesc) -> PipelineResult<TextureId> {
        let max = self.max_texture_dimension();
        if desc.extent.width() > max || desc.extent.height() > max {
            return Err(PipelineError::validation(format!(
                "texture '{}' {} exceeds max dimension {max}",
                desc.label, desc.extent
            )));
        }
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST;
        if desc.render_target {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: extent3d(desc.extent),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(desc.format),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = TextureId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.textures.insert(
            id,
            GpuTexture {
                desc,
                texture,
                view,
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
        let tex = self.get(id)?;
        check_len(&tex.desc, data.len(), "write_texture")?;
        let bytes_per_row =
            tex.desc.extent.width() * tex.desc.format.bytes_per_pixel() as u32;
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(tex.desc.extent.height()),
            },
            extent3d(tex.desc.extent),
        );
        Ok(())
    }

    fn blit(&mut self, src: TextureId, dst: TextureId, params: BlitParams) -> PipelineResult<()> {
        self.check_render_target(dst)?;
        if src == dst {
            return Err(PipelineError::validation("blit source and target must differ"));
        }
        let source = self.get(src)?;
        if source.desc.format != TextureFormat::Rgba8 {
            return Err(PipelineError::validation(format!(
                "blit source '{}' must be rgba8",
                source.desc.label
            )));
        }
        let target = self.get(dst)?;

        let flip: f32 = if params.flip_y { 1.0 } else { 0.0 };
        let mut uniform = [0u8; 16];
        uniform[0..4].copy_from_slice(&flip.to_le_bytes());
        self.queue.write_buffer(&self.blit.params, 0, &uniform);

        let sampler = match params.filter {
            SampleFilter::Nearest => &self.nearest,
            SampleFilter::Linear => &self.linear,
        };
        self.draw_fullscreen(
            &self.blit,
            "maskpipe_blit",
            &source.view,
            sampler,
            &target.view,
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
        );
        Ok(())
    }

    fn read_pixels(&mut self, src: TextureId, out: &mut [u8]) -> PipelineResult<RowOrder> {
        let desc = self.get(src)?.desc;
        check_len(&desc, out.len(), "read_pixels")?;

        let row_bytes = desc.extent.width() * desc.format.bytes_per_pixel() as u32;
        let padded = align_to(row_bytes, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let size = u64::from(padded) * u64::from(desc.extent.height());
        self.ensure_readback(size);

        let (Some(readback), Some(tex)) = (self.readback.as_ref(), self.textures.get(&src)) else {
            return Err(PipelineError::transfer_failure("readback buffer unavailable"));
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("maskpipe_readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(desc.extent.height()),
                },
            },
            extent3d(desc.extent),
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = readback.buffer.slice(..size);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| PipelineError::transfer_failure(format!("wgpu poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| PipelineError::transfer_failure("readback channel closed"))?
            .map_err(|e| PipelineError::transfer_failure(format!("readback map failed: {e:?}")))?;

        {
            let mapped = slice.get_mapped_range();
            let row_bytes = row_bytes as usize;
            for (row, dst) in out.chunks_exact_mut(row_bytes).enumerate() {
                let start = row * padded as usize;
                dst.copy_from_slice(&mapped[start..start + row_bytes]);
            }
        }
        readback.buffer.unmap();
        Ok(RowOrder::TopFirst)
    }

    fn draw_overlay(
        &mut self,
        mask: TextureId,
        dst: TextureId,
        style: &OverlayStyle,
    ) -> PipelineResult<()> {
        self.check_render_target(dst)?;
        let mask_tex = self.get(mask)?;
        if mask_tex.desc.format != TextureFormat::R8 {
            return Err(PipelineError::validation(format!(
                "overlay mask '{}' must be r8",
                mask_tex.desc.label
            )));
        }
        let target = self.get(dst)?;

        let weight = (style.alpha * style.tint.a).clamp(0.0, 1.0);
        let values = [
            style.tint.r,
            style.tint.g,
            style.tint.b,
            weight,
            style.threshold,
            0.0,
            0.0,
            0.0,
        ];
        let mut uniform = [0u8; 32];
        for (chunk, v) in uniform.chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        self.queue.write_buffer(&self.overlay.params, 0, &uniform);

        self.draw_fullscreen(
            &self.overlay,
            "maskpipe_overlay",
            &mask_tex.view,
            &self.nearest,
            &target.view,
            wgpu::LoadOp::Load,
        );
        Ok(())
    }
}
