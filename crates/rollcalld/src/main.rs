use anyhow::Result;
use clap::{Parser, Subcommand};
use rollcall_core::{ArcFaceEmbedder, PersonBank, YoloFaceDetector};
use rollcall_workers::{WorkerPool, WorkerPoolConfig, WorkerProcess};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

mod annotate;
mod archiver;
mod attendance;
mod config;
mod pipeline;
mod source;

use archiver::UnknownFaceArchiver;
use attendance::AttendanceWriter;
use config::Config;
use pipeline::{gate_from_config, Orchestrator, PipelineSettings};
use source::{CameraSource, FrameSlot};

#[derive(Parser)]
#[command(name = "rollcalld", about = "Rollcall live attendance daemon")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the attendance pipeline
    Run,
    /// Start one analysis worker and verify its handshake
    CheckWorkers,
    /// List available capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::CheckWorkers => check_workers(&config),
        Commands::Devices => {
            list_devices();
            Ok(())
        }
    }
}

/// Bring up every component (fail-fast), then run capture and recognition
/// on their own threads until interrupted.
async fn run(config: Config) -> Result<()> {
    tracing::info!("rollcalld starting");

    let bank = Arc::new(PersonBank::load_json(&config.models.bank_path)?);

    let detector = YoloFaceDetector::load(
        &config.models.detector_path.to_string_lossy(),
        config.models.detector_confidence,
    )?;
    let embedder = ArcFaceEmbedder::load(&config.models.embedder_path.to_string_lossy())?;

    let writer = AttendanceWriter::open(&config.attendance.db_path)?;
    let archiver = UnknownFaceArchiver::new(
        config.unknown.dir.clone(),
        Duration::from_secs_f64(config.unknown.cooldown_secs),
    );

    let pool = WorkerPool::start(WorkerPoolConfig {
        program: config.workers.program.clone(),
        args: config.workers.args.clone(),
        workers: config.workers.count,
        dispatch_threads: config.workers.dispatch_threads,
        resize_max_side: config.workers.resize_max_side,
        startup_timeout: Duration::from_secs_f64(config.workers.startup_timeout_secs),
        request_timeout: Duration::from_secs_f64(config.workers.request_timeout_secs),
    });

    let mut orchestrator = Orchestrator::new(
        Box::new(detector),
        Box::new(embedder),
        Box::new(pool),
        bank,
        writer,
        archiver,
        gate_from_config(&config),
        PipelineSettings::from_config(&config),
    );

    let slot = FrameSlot::new();
    let stop = Arc::new(AtomicBool::new(false));

    let camera = CameraSource::new(
        config.camera.device.clone(),
        config.camera.width,
        config.camera.height,
    );
    let reader = source::spawn_reader(
        Box::new(camera),
        slot.clone(),
        stop.clone(),
        Duration::from_secs_f64(config.camera.reconnect_delay_secs),
    );

    let fps_interval = Duration::from_secs_f64(config.pipeline.fps_log_interval_secs);
    let consumer_stop = stop.clone();
    let consumer = std::thread::Builder::new()
        .name("recognition".to_string())
        .spawn(move || {
            let mut total_frames = 0u64;
            let mut window_frames = 0u64;
            let mut window_start = Instant::now();

            while !consumer_stop.load(Ordering::SeqCst) {
                let Some(mut frame) = slot.take(Duration::from_millis(100)) else {
                    if slot.is_closed() {
                        break;
                    }
                    continue;
                };

                let report = orchestrator.process_frame(&mut frame);
                total_frames += 1;
                window_frames += 1;
                tracing::trace!(
                    frame = report.frame_index,
                    tracks = report.tracks.len(),
                    "frame processed"
                );

                if window_start.elapsed() >= fps_interval {
                    let fps = window_frames as f64 / window_start.elapsed().as_secs_f64();
                    tracing::info!(frames = total_frames, fps, "pipeline rate");
                    window_frames = 0;
                    window_start = Instant::now();
                }
            }

            orchestrator.shutdown();
            tracing::info!("recognition thread exiting");
        })
        .expect("failed to spawn recognition thread");

    tracing::info!("rollcalld ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    stop.store(true, Ordering::SeqCst);
    if reader.join().is_err() {
        tracing::error!("frame reader thread panicked");
    }
    if consumer.join().is_err() {
        tracing::error!("recognition thread panicked");
    }

    tracing::info!("rollcalld stopped");
    Ok(())
}

/// Diagnostic: launch a single worker, confirm the ready handshake, and
/// tear it down again.
fn check_workers(config: &Config) -> Result<()> {
    println!(
        "Starting analysis worker: {} {}",
        config.workers.program,
        config.workers.args.join(" ")
    );

    let worker = WorkerProcess::start(
        &config.workers.program,
        &config.workers.args,
        Duration::from_secs_f64(config.workers.startup_timeout_secs),
    )?;

    println!("Worker ready (pid {})", worker.pid());
    worker.terminate();
    println!("Worker terminated cleanly");
    Ok(())
}

fn list_devices() {
    let devices = rollcall_hw::Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for d in devices {
        println!("{}  {} ({})", d.path, d.name, d.driver);
    }
}
