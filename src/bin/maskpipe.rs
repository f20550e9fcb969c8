use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use maskpipe::{
    BackendKind, BackpressurePolicy, CameraSource, Extent, ImageSequenceCamera, LumaEngine,
    PipelineConfig, SampleOutcome, Session, SyntheticCamera,
};

#[derive(Parser, Debug)]
#[command(name = "maskpipe", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive a session over a camera source and write the last composited view.
    Run(RunArgs),
    /// Print the default pipeline config as JSON.
    Defaults,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Pipeline config JSON. Missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of PNG/JPEG frames to loop over instead of the synthetic camera.
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Synthetic camera resolution.
    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Number of render ticks to run.
    #[arg(long, default_value_t = 120)]
    ticks: u64,

    /// Override the sampling interval.
    #[arg(long)]
    every: Option<u64>,

    /// Override the backpressure policy.
    #[arg(long, value_enum)]
    policy: Option<PolicyChoice>,

    /// Simulated inference time per prediction.
    #[arg(long, default_value_t = 30)]
    infer_ms: u64,

    /// Target tick period.
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,

    /// Make the camera miss every K-th tick (0 = never).
    #[arg(long, default_value_t = 0)]
    drop_camera_every: u64,

    /// Force a sample on this tick regardless of the interval. Repeatable.
    #[arg(long = "trigger-at")]
    trigger_at: Vec<u64>,

    /// Output PNG for the last composited view.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Backend to use.
    #[arg(long, value_enum, default_value_t = BackendChoice::Cpu)]
    backend: BackendChoice,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendChoice {
    Cpu,
    #[cfg(feature = "gpu")]
    Gpu,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyChoice {
    Skip,
    Replace,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,naga=warn,wgpu_core=warn,wgpu_hal=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Run(args) => cmd_run(args),
        Command::Defaults => {
            let json = serde_json::to_string_pretty(&PipelineConfig::default())
                .context("serialize default config")?;
            println!("{json}");
            Ok(())
        }
    }
}

fn load_config(args: &RunArgs) -> anyhow::Result<PipelineConfig> {
    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(n) = args.every {
        cfg.sample_every = n;
    }
    if let Some(p) = args.policy {
        cfg.backpressure = match p {
            PolicyChoice::Skip => BackpressurePolicy::Skip,
            PolicyChoice::Replace => BackpressurePolicy::Replace,
        };
    }
    cfg.validate()?;
    Ok(cfg)
}

fn make_camera(args: &RunArgs) -> anyhow::Result<Box<dyn CameraSource>> {
    if let Some(dir) = &args.frames {
        return Ok(Box::new(ImageSequenceCamera::from_dir(dir)?));
    }
    let extent = Extent::new(args.width, args.height)?;
    Ok(Box::new(
        SyntheticCamera::new(extent).drop_every(args.drop_camera_every),
    ))
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let cfg = load_config(&args)?;
    let kind = match args.backend {
        BackendChoice::Cpu => BackendKind::Cpu,
        #[cfg(feature = "gpu")]
        BackendChoice::Gpu => BackendKind::Gpu,
    };
    let backend = maskpipe::create_backend(kind)?;
    let engine = LumaEngine::default().with_delay(Duration::from_millis(args.infer_ms));
    let mut camera = make_camera(&args)?;
    let mut session = Session::start(cfg, backend, Box::new(engine))?;

    let period = Duration::from_millis(args.tick_ms);
    for i in 0..args.ticks {
        let started = Instant::now();
        if args.trigger_at.contains(&i) {
            session.trigger_sample();
        }
        let report = session.tick(camera.acquire())?;
        if let Some(msg) = &report.fatal {
            tracing::error!("{msg}");
        }
        if let Some(err) = &report.render_error {
            tracing::warn!(tick = report.tick.0, "{err}");
        }
        match report.outcome {
            SampleOutcome::Submitted { slot } => {
                tracing::info!(slot, "{}", report.status);
            }
            _ => tracing::info!("{}", report.status),
        }
        std::thread::sleep(period.saturating_sub(started.elapsed()));
    }

    if !session.wait_idle(Duration::from_secs(2)) {
        tracing::warn!("worker still busy at exit");
    }
    let view = session.read_view()?;
    let counters = session.counters().clone();
    session.end();

    if let (Some(out), Some((extent, pixels))) = (&args.out, view) {
        if let Some(parent) = out.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output dir '{}'", parent.display()))?;
        }
        image::save_buffer_with_format(
            out,
            &pixels,
            extent.width(),
            extent.height(),
            image::ColorType::Rgba8,
            image::ImageFormat::Png,
        )
        .with_context(|| format!("write png '{}'", out.display()))?;
        eprintln!("wrote {}", out.display());
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&counters).context("serialize counters")?
    );
    Ok(())
}
