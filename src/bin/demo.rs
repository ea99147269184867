//! demo - end-to-end synthetic run of the impurity pipeline
//!
//! Runs the `stub://` belt scene for a few seconds, writes the telemetry
//! stream, alert snapshots and alert log under `--out`, and prints a summary.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;

use impurity_watch::config::InspectorConfig;
use impurity_watch::control::{self, ControlCommand};
use impurity_watch::{FrameSource, Pipeline, SourceOptions, VideoSource};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Frames per second for the synthetic source.
    #[arg(long, default_value_t = 15)]
    fps: u32,
    /// Output directory for telemetry and alert artifacts.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// Alert cooldown in seconds (short so a demo run shows several alerts).
    #[arg(long, default_value_t = 2)]
    cooldown_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }

    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)?;

    let mut cfg = InspectorConfig::default();
    cfg.source.url = "stub://demo_belt".to_string();
    cfg.alert.detections_dir = out_dir.join("detections");
    cfg.alert.log_path = out_dir.join("impurity_log.txt");
    cfg.alert.cooldown = Duration::from_secs(args.cooldown_secs);
    cfg.validate()?;

    let options = SourceOptions {
        loop_files: false,
        synthetic_interval: Some(Duration::from_millis(1000 / args.fps as u64)),
    };
    let mut source = VideoSource::open(&cfg.source.url, &options)?;
    source.connect()?;

    let (tx, rx) = control::channel();
    control::install_ctrlc(tx.clone())?;
    let run_for = Duration::from_secs(args.seconds);
    std::thread::spawn(move || {
        std::thread::sleep(run_for);
        let _ = tx.send(ControlCommand::Terminate);
    });

    let telemetry_path = out_dir.join("telemetry.log");
    let telemetry = fs::File::create(&telemetry_path)
        .with_context(|| format!("create {}", telemetry_path.display()))?;
    let mut pipeline = Pipeline::new(&cfg, BufWriter::new(telemetry));
    let summary = pipeline.run(&mut source, &rx)?;

    println!("demo summary");
    println!("  frames processed : {}", summary.frames_processed);
    println!("  frames streamed  : {}", summary.frames_streamed);
    println!("  alerts           : {}", summary.alerts);
    println!("  telemetry        : {}", telemetry_path.display());
    println!("  alert log        : {}", cfg.alert.log_path.display());
    println!("  snapshots        : {}", cfg.alert.detections_dir.display());
    Ok(())
}
