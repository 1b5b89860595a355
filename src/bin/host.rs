//! Host binary for lipsync.
//!
//! Runs a session against a simulated timeline, with the upload listener,
//! folder monitor and content pipeline feeding it.

use clap::Parser;
use lipsync::diagnostics;
use lipsync::intake::{FolderMonitor, IntakeServer};
use lipsync::producers::{ContentPipeline, Input, build_pipeline};
use lipsync::scene::SimulatedTransport;
use lipsync::worker::AnalysisHandle;
use lipsync::{LipSyncConfig, LipSyncSession};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lipsync host: drive a character's mouth from incoming speech.
#[derive(Parser)]
#[command(name = "lipsync-host", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not start the HTTP upload listener.
    #[arg(long)]
    no_listen: bool,

    /// Do not watch the voice folder for new audio.
    #[arg(long)]
    no_monitor: bool,

    /// Speak the contents of this text file at startup.
    #[arg(long)]
    text_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => LipSyncConfig::from_file(path)?,
        None => {
            let path = LipSyncConfig::default_config_path();
            if path.is_file() {
                LipSyncConfig::from_file(&path)?
            } else {
                LipSyncConfig::default()
            }
        }
    };
    let _log_guard = diagnostics::init_tracing(&config.logging)?;
    config.validate()?;

    println!("Lipsync v{}", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl+c received, shutting down");
            ctrl_c.cancel();
        }
    });

    let mut session = LipSyncSession::from_config(&config, Box::new(SimulatedTransport::new()))?;
    let voice_dir = config.voice_dir();
    let pipeline = Arc::new(build_pipeline(&config.producers, voice_dir.clone())?);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let monitoring = config.intake.monitor && !cli.no_monitor;
    if monitoring {
        std::fs::create_dir_all(&config.intake.monitor_folder)?;
        let monitor = FolderMonitor::new(
            config.intake.monitor_folder.clone(),
            session.worker_handle(),
            cancel.child_token(),
        );
        tasks.push(tokio::spawn(monitor.run()));
    }

    // Synthesized speech reaches the worker through the monitor when it
    // watches the voice folder; otherwise it is submitted directly.
    let direct = (!monitoring || voice_dir != config.intake.monitor_folder)
        .then(|| session.worker_handle());

    let (input_tx, input_rx) = mpsc::channel::<Input>(32);
    let server = if config.intake.listen && !cli.no_listen {
        Some(IntakeServer::start(&config.intake, input_tx, cancel.child_token()).await?)
    } else {
        drop(input_tx);
        None
    };
    tasks.push(tokio::spawn(run_pipeline(
        Arc::clone(&pipeline),
        input_rx,
        direct.clone(),
        cancel.child_token(),
    )));

    if let Some(path) = cli.text_file {
        let pipeline = Arc::clone(&pipeline);
        tasks.push(tokio::spawn(async move {
            match pipeline.process_text_file(&path).await {
                Ok(files) => submit_all(direct.as_ref(), files),
                Err(e) => error!(path = %path.display(), error = %e, "text file synthesis failed"),
            }
        }));
    }

    session.start();
    let period = Duration::from_secs_f64(1.0 / f64::from(config.analysis.frame_rate));
    let mut clock = tokio::time::interval(period);
    clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(fps = config.analysis.frame_rate, "timeline running");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = clock.tick() => session.advance(Instant::now()),
        }
    }

    if let Some(server) = server {
        server.join().await;
    }
    for task in tasks {
        if let Err(e) = task.await {
            warn!("background task failed: {e}");
        }
    }
    session.shutdown();
    Ok(())
}

/// Feed intake inputs through the content pipeline until cancelled.
async fn run_pipeline(
    pipeline: Arc<ContentPipeline>,
    mut inputs: mpsc::Receiver<Input>,
    direct: Option<AnalysisHandle>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            input = inputs.recv() => {
                let Some(input) = input else { break };
                match pipeline.process(input).await {
                    Ok(files) => submit_all(direct.as_ref(), files),
                    Err(e) => error!(error = %e, "content pipeline failed"),
                }
            }
        }
    }
    info!("content pipeline stopped");
}

fn submit_all(direct: Option<&AnalysisHandle>, files: Vec<PathBuf>) {
    info!(count = files.len(), "speech ready for analysis");
    let Some(handle) = direct else {
        return;
    };
    for file in files {
        if let Err(e) = handle.submit(file) {
            warn!(error = %e, "could not submit synthesized audio");
        }
    }
}
