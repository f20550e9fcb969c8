use std::path::PathBuf;

fn exe() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_maskpipe")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "maskpipe.exe"
            } else {
                "maskpipe"
            });
            p
        })
}

#[test]
fn cli_run_writes_png_and_counters() {
    let dir = PathBuf::from("target").join("cli_smoke");
    std::fs::create_dir_all(&dir).unwrap();
    let out_path = dir.join("view.png");
    let _ = std::fs::remove_file(&out_path);

    let output = std::process::Command::new(exe())
        .args([
            "run",
            "--ticks",
            "6",
            "--every",
            "2",
            "--width",
            "32",
            "--height",
            "24",
            "--infer-ms",
            "0",
            "--tick-ms",
            "0",
            "--out",
        ])
        .arg(out_path.to_string_lossy().as_ref())
        .output()
        .unwrap();

    assert!(output.status.success());
    let img = image::open(&out_path).unwrap();
    assert_eq!((img.width(), img.height()), (32, 24));

    let counters: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(counters["ticks"], 6);
    assert_eq!(counters["camera_misses"], 0);
}

#[test]
fn cli_defaults_prints_valid_config() {
    let output = std::process::Command::new(exe())
        .arg("defaults")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    let cfg = maskpipe::PipelineConfig::from_json(&text).unwrap();
    assert_eq!(cfg, maskpipe::PipelineConfig::default());
}
