//! Background analysis worker.
//!
//! Decoding and spectral analysis are too slow for the tick loop, so they
//! run on a dedicated OS thread. Jobs are processed one at a time in
//! submission order. Results come back over a channel and are committed by
//! the main loop; the worker never touches the scene.

use crate::clip::{AnimationClip, ClipBuilder, next_clip_id};
use crate::config::AnalysisConfig;
use crate::error::{LipSyncError, Result};
use crate::scene::Frame;
use crate::viseme::VisemeAnalyzer;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, info_span, warn};

/// A finished analysis, ready to be committed onto the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutput {
    /// Unique suffix for the generated track and strip names.
    pub id: String,
    pub audio_path: PathBuf,
    pub clip: AnimationClip,
    /// Audio length in frames at the analysis frame rate.
    pub audio_frames: Frame,
    pub viseme_count: usize,
}

/// Result of one job.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub audio_path: PathBuf,
    pub result: Result<AnalysisOutput>,
}

#[derive(Debug)]
enum WorkerMessage {
    Analyze(PathBuf),
    Shutdown,
}

/// Cloneable job submitter.
#[derive(Debug, Clone)]
pub struct AnalysisHandle {
    tx: Sender<WorkerMessage>,
}

impl AnalysisHandle {
    /// Queue `audio_path` for analysis.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Channel`] once the worker has shut down.
    pub fn submit(&self, audio_path: impl Into<PathBuf>) -> Result<()> {
        self.tx
            .send(WorkerMessage::Analyze(audio_path.into()))
            .map_err(|_| LipSyncError::Channel("analysis worker has stopped".into()))
    }
}

/// Owns the analysis thread and the outcome channel.
#[derive(Debug)]
pub struct AnalysisWorker {
    handle: AnalysisHandle,
    outcomes: Receiver<AnalysisOutcome>,
    thread: Option<JoinHandle<()>>,
}

impl AnalysisWorker {
    /// Start the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Config`] for invalid analysis settings, or an
    /// I/O error if the thread cannot be spawned.
    pub fn spawn(config: &AnalysisConfig) -> Result<Self> {
        let analyzer = VisemeAnalyzer::new(config)?;
        let frame_rate = config.frame_rate;
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<WorkerMessage>();
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded::<AnalysisOutcome>();

        let thread = std::thread::Builder::new()
            .name("lipsync-analysis".to_owned())
            .spawn(move || run(&analyzer, frame_rate, &job_rx, &outcome_tx))?;

        Ok(Self {
            handle: AnalysisHandle { tx: job_tx },
            outcomes: outcome_rx,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> AnalysisHandle {
        self.handle.clone()
    }

    /// Queue `audio_path` for analysis.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Channel`] once the worker has shut down.
    pub fn submit(&self, audio_path: impl Into<PathBuf>) -> Result<()> {
        self.handle.submit(audio_path)
    }

    /// Next finished outcome, without blocking.
    pub fn try_recv(&self) -> Option<AnalysisOutcome> {
        match self.outcomes.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next outcome.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<AnalysisOutcome> {
        self.outcomes.recv_timeout(timeout).ok()
    }

    /// Stop after the jobs already queued and join the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.handle.tx.send(WorkerMessage::Shutdown);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("analysis worker panicked");
        }
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    analyzer: &VisemeAnalyzer,
    frame_rate: f32,
    jobs: &Receiver<WorkerMessage>,
    outcomes: &Sender<AnalysisOutcome>,
) {
    let span = info_span!("analysis_worker");
    let _guard = span.enter();
    let builder = ClipBuilder::new();
    info!("analysis worker started");

    while let Ok(message) = jobs.recv() {
        let WorkerMessage::Analyze(audio_path) = message else {
            break;
        };
        let result = analyze_one(analyzer, &builder, frame_rate, &audio_path);
        if let Err(e) = &result {
            warn!(path = %audio_path.display(), error = %e, "analysis failed");
        }
        if outcomes.send(AnalysisOutcome { audio_path, result }).is_err() {
            break;
        }
    }
    info!("analysis worker stopped");
}

fn analyze_one(
    analyzer: &VisemeAnalyzer,
    builder: &ClipBuilder,
    frame_rate: f32,
    audio_path: &Path,
) -> Result<AnalysisOutput> {
    let audio = crate::audio::decode_file(audio_path)?;
    let visemes = analyzer.analyze_audio(&audio)?;
    let id = next_clip_id();
    let clip = builder.build(&visemes, &format!("LipSync_{id}"));
    info!(
        path = %audio_path.display(),
        visemes = visemes.len(),
        clip = %clip.name,
        "analysis finished"
    );
    Ok(AnalysisOutput {
        id,
        audio_path: audio_path.to_path_buf(),
        clip,
        audio_frames: audio.frame_count(frame_rate),
        viseme_count: visemes.len(),
    })
}
