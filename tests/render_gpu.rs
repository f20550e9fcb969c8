#[cfg(feature = "gpu")]
mod gpu {
    use maskpipe::render::backend::{BlitParams, TextureDesc, TextureFormat};
    use maskpipe::{
        CpuBackend, Extent, FrameBackend, OverlayStyle, RowOrder, SampleFilter, WgpuBackend,
    };

    fn backend() -> Option<WgpuBackend> {
        match WgpuBackend::new() {
            Ok(b) => Some(b),
            Err(e) => {
                eprintln!("skipping gpu test: {e}");
                None
            }
        }
    }

    fn desc(label: &'static str, w: u32, h: u32, format: TextureFormat, rt: bool) -> TextureDesc {
        TextureDesc {
            label,
            extent: Extent::new(w, h).unwrap(),
            format,
            render_target: rt,
        }
    }

    /// Blit with a flip, then overlay; the wgpu result must match the CPU rasterizer.
    fn run(b: &mut dyn FrameBackend) -> Vec<u8> {
        let src = b
            .create_texture(desc("src", 4, 4, TextureFormat::Rgba8, false))
            .unwrap();
        let dst = b
            .create_texture(desc("dst", 4, 4, TextureFormat::Rgba8, true))
            .unwrap();
        let mask = b
            .create_texture(desc("mask", 4, 4, TextureFormat::R8, false))
            .unwrap();
        let pixels: Vec<u8> = (0..16u8).flat_map(|i| [i * 16, 0, 0, 255]).collect();
        b.write_texture(src, &pixels).unwrap();
        let mut m = vec![0u8; 16];
        m[..4].fill(255);
        b.write_texture(mask, &m).unwrap();

        b.blit(
            src,
            dst,
            BlitParams {
                filter: SampleFilter::Nearest,
                flip_y: true,
            },
        )
        .unwrap();
        b.draw_overlay(mask, dst, &OverlayStyle::default()).unwrap();

        let mut out = vec![0u8; 64];
        assert_eq!(b.read_pixels(dst, &mut out).unwrap(), RowOrder::TopFirst);
        out
    }

    #[test]
    fn gpu_matches_cpu_reference() {
        let Some(mut gpu) = backend() else {
            return;
        };
        let mut cpu = CpuBackend::new();
        let a = run(&mut gpu);
        let b = run(&mut cpu);
        for (i, (x, y)) in a.iter().zip(&b).enumerate() {
            assert!(x.abs_diff(*y) <= 1, "byte {i}: gpu {x} cpu {y}");
        }
    }

    #[test]
    fn gpu_readback_handles_unaligned_rows() {
        let Some(mut gpu) = backend() else {
            return;
        };
        let t = gpu
            .create_texture(desc("odd", 3, 2, TextureFormat::Rgba8, true))
            .unwrap();
        let pixels: Vec<u8> = (0..24).collect();
        gpu.write_texture(t, &pixels).unwrap();
        let mut out = vec![0u8; 24];
        gpu.read_pixels(t, &mut out).unwrap();
        assert_eq!(out, pixels);
    }
}
