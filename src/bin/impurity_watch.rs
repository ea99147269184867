//! impurity_watch - grain impurity inspection daemon
//!
//! This daemon:
//! 1. Loads config (IMPURITY_CONFIG file + IMPURITY_* env + CLI flags)
//! 2. Connects to the configured frame source (fatal on failure)
//! 3. Calibrates the background on the first frame
//! 4. Streams DATA/FRAME telemetry on stdout for every processed frame
//! 5. Persists alert snapshots and log lines once detections are stable
//! 6. Stops on `terminate` (stdin), Ctrl-C, or end of stream

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use impurity_watch::config::InspectorConfig;
use impurity_watch::control;
use impurity_watch::{FrameSource, Pipeline, SourceOptions, ThreadedCapture, VideoSource};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frame source: stub://name, http(s)://camera/video, or a local image path/directory.
    #[arg(long, env = "IMPURITY_SOURCE_URL")]
    source: Option<String>,
    /// Config file (JSON, or TOML by extension). Overrides IMPURITY_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Capture on a background thread; stale frames are dropped.
    #[arg(long)]
    threaded: bool,
    /// Replay local image sources from the start when they run out.
    #[arg(long)]
    loop_files: bool,
    /// Directory for alert snapshots.
    #[arg(long)]
    detections_dir: Option<PathBuf>,
    /// Alert log file.
    #[arg(long)]
    alert_log: Option<PathBuf>,
    /// Consecutive detecting frames required before an alert.
    #[arg(long)]
    stable_frames: Option<u32>,
    /// Minimum seconds between alerts.
    #[arg(long)]
    cooldown_secs: Option<u64>,
    /// Keep the alert cooldown across clean frames.
    #[arg(long)]
    strict_cooldown: bool,
    /// Ignore stdin commands (Ctrl-C still terminates).
    #[arg(long)]
    no_stdin: bool,
}

fn main() -> Result<()> {
    // stderr only; stdout carries the telemetry protocol
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("IMPURITY_CONFIG", path);
    }
    let mut cfg = InspectorConfig::load()?;
    apply_args(&mut cfg, &args);
    cfg.validate()?;

    log::info!("impurity_watch starting, source {}", cfg.source.url);
    log::info!(
        "alert policy: {} stable frames, {:?} cooldown, reset clears cooldown: {}",
        cfg.alert.stable_frames,
        cfg.alert.cooldown,
        cfg.alert.reset_clears_cooldown
    );

    let options = SourceOptions {
        loop_files: cfg.source.loop_files,
        synthetic_interval: Some(Duration::from_millis(33)),
    };
    let source = VideoSource::open(&cfg.source.url, &options)?;
    let mut source: Box<dyn FrameSource> = if cfg.source.threaded_capture {
        Box::new(ThreadedCapture::new(Box::new(source), cfg.retry.clone()))
    } else {
        Box::new(source)
    };
    source
        .connect()
        .with_context(|| format!("could not open video source {}", cfg.source.url))?;

    let (tx, rx) = control::channel();
    control::install_ctrlc(tx.clone())?;
    if !args.no_stdin {
        control::spawn_stdin_reader(tx)?;
        log::info!("commands on stdin: 'recalibrate' (r), 'terminate' (q)");
    }

    let mut pipeline = Pipeline::new(&cfg, std::io::stdout().lock());
    let summary = pipeline.run(source.as_mut(), &rx)?;
    log::info!(
        "impurity_watch stopped: {} frames, {} alerts",
        summary.frames_processed,
        summary.alerts
    );
    Ok(())
}

fn apply_args(cfg: &mut InspectorConfig, args: &Args) {
    if let Some(source) = &args.source {
        cfg.source.url = source.clone();
    }
    if args.threaded {
        cfg.source.threaded_capture = true;
    }
    if args.loop_files {
        cfg.source.loop_files = true;
    }
    if let Some(dir) = &args.detections_dir {
        cfg.alert.detections_dir = dir.clone();
    }
    if let Some(path) = &args.alert_log {
        cfg.alert.log_path = path.clone();
    }
    if let Some(frames) = args.stable_frames {
        cfg.alert.stable_frames = frames;
    }
    if let Some(secs) = args.cooldown_secs {
        cfg.alert.cooldown = Duration::from_secs(secs);
    }
    if args.strict_cooldown {
        cfg.alert.reset_clears_cooldown = false;
    }
}
