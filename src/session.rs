//! A running lip-sync session: one scene, its playback controller and the
//! analysis worker feeding it.
//!
//! All scene mutation happens on the thread that owns the session. The
//! worker only hands back finished clips, which [`LipSyncSession::pump`]
//! commits before the controller sees them on the next tick.

use crate::clip::{ClipBuilder, CommitReport};
use crate::config::{LipSyncConfig, PlaybackConfig};
use crate::error::Result;
use crate::idle::{IdleAnimationGenerator, IdleAnimationSpec, IdleReport};
use crate::playback::PlaybackController;
use crate::scene::{Frame, LipSyncTarget, Scene, Transport};
use crate::worker::{AnalysisHandle, AnalysisOutcome, AnalysisWorker};
use rand::Rng;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{Span, error, info, info_span, warn};

pub struct LipSyncSession {
    scene: Scene,
    controller: PlaybackController,
    worker: AnalysisWorker,
    builder: ClipBuilder,
    idle: IdleAnimationGenerator,
    idle_specs: Vec<IdleAnimationSpec>,
    span: Span,
}

impl std::fmt::Debug for LipSyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LipSyncSession")
            .field("scene", &self.scene)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

impl LipSyncSession {
    /// Build the scene described by the playback config (one mesh target)
    /// and start a session on it.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Config`](crate::error::LipSyncError::Config)
    /// for invalid settings, or an I/O error if the worker cannot start.
    pub fn from_config(config: &LipSyncConfig, transport: Box<dyn Transport>) -> Result<Self> {
        let scene = scene_from_config(&config.playback, config.analysis.frame_rate);
        Self::new(config, scene, transport)
    }

    /// Start a session on an existing scene.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Config`](crate::error::LipSyncError::Config)
    /// for invalid settings, or an I/O error if the worker cannot start.
    pub fn new(config: &LipSyncConfig, mut scene: Scene, transport: Box<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let worker = AnalysisWorker::spawn(&config.analysis)?;
        let controller = PlaybackController::new(&config.playback, &scene, transport);
        controller.insert_background(&mut scene);

        let target_name = scene.target.as_ref().map_or("<none>", |t| t.name.as_str());
        let span = info_span!("session", target = target_name);
        span.in_scope(|| {
            info!(
                frame_start = scene.frame_start,
                frame_end = scene.frame_end,
                fps = scene.fps,
                "lip-sync session ready"
            );
        });

        Ok(Self {
            scene,
            controller,
            worker,
            builder: ClipBuilder::new(),
            idle: IdleAnimationGenerator::new(),
            idle_specs: config.idle.clone(),
            span,
        })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    /// Cloneable submitter for intake components running elsewhere.
    pub fn worker_handle(&self) -> AnalysisHandle {
        self.worker.handle()
    }

    /// Queue an audio file for analysis.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Channel`](crate::error::LipSyncError::Channel)
    /// once the worker has stopped.
    pub fn submit_audio(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let _guard = self.span.enter();
        info!(path = %path.display(), "audio submitted for analysis");
        self.worker.submit(path)
    }

    /// Commit every finished analysis. Returns how many were committed.
    pub fn pump(&mut self) -> usize {
        let mut committed = 0;
        while let Some(outcome) = self.worker.try_recv() {
            if self.commit_outcome(outcome).is_some() {
                committed += 1;
            }
        }
        committed
    }

    /// Like [`pump`](Self::pump), but waits up to `timeout` for the first
    /// outcome.
    pub fn pump_wait(&mut self, timeout: Duration) -> usize {
        let Some(first) = self.worker.recv_timeout(timeout) else {
            return 0;
        };
        let first = usize::from(self.commit_outcome(first).is_some());
        first + self.pump()
    }

    fn commit_outcome(&mut self, outcome: AnalysisOutcome) -> Option<CommitReport> {
        let _guard = self.span.enter();
        let output = match outcome.result {
            Ok(output) => output,
            Err(e) => {
                error!(path = %outcome.audio_path.display(), error = %e, "analysis failed");
                return None;
            }
        };
        match self.builder.commit(&mut self.scene, output) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(path = %outcome.audio_path.display(), error = %e, "could not commit clip");
                None
            }
        }
    }

    /// Run the controller for the current frame.
    pub fn tick(&mut self, now: Instant) {
        self.controller.tick(&mut self.scene, now);
    }

    /// Advance the play head one frame when playing, then pump and tick.
    ///
    /// The play head holds at the scene's last frame so the controller can
    /// loop or stop there.
    pub fn advance(&mut self, now: Instant) {
        if self.controller.state().is_playing && self.scene.frame_current < self.scene.frame_end {
            self.scene.frame_current += 1;
        }
        self.pump();
        self.tick(now);
    }

    pub fn start(&mut self) {
        self.controller.start(&mut self.scene);
    }

    pub fn stop(&mut self) {
        self.controller.stop(&mut self.scene);
    }

    pub fn pause(&mut self) {
        self.controller.pause(&mut self.scene);
    }

    pub fn set_active(&mut self, active: bool) {
        self.controller.set_active(active);
    }

    pub fn set_loop(&mut self, loop_playback: bool) {
        self.controller.set_loop(loop_playback);
    }

    pub fn set_bg_volume(&mut self, volume: f32) {
        self.controller.set_bg_volume(volume);
        self.controller
            .sync_background(&mut self.scene, !self.controller.state().is_playing);
    }

    pub fn choose_background(&mut self, path: PathBuf) {
        self.controller.choose_background(&mut self.scene, path);
    }

    /// Remove all lip-sync output and empty the queue.
    pub fn clear_animation(&mut self, now: Instant) {
        self.controller.clear_animation(&mut self.scene, now);
    }

    /// Generate the configured idle animations.
    pub fn generate_idle(&mut self, custom_frames: Frame, rng: &mut impl Rng) -> IdleReport {
        self.idle
            .generate(&mut self.scene, &self.idle_specs, custom_frames, rng)
    }

    pub fn clear_idle(&mut self) {
        self.idle.clear(&mut self.scene);
    }

    /// Stop playback and join the worker after its queued jobs.
    pub fn shutdown(mut self) {
        self.controller.stop(&mut self.scene);
        self.span.in_scope(|| info!("lip-sync session shut down"));
        self.worker.shutdown();
    }
}

fn scene_from_config(playback: &PlaybackConfig, fps: f32) -> Scene {
    Scene::new(playback.frame_start, playback.frame_end, fps)
        .with_target(LipSyncTarget::mesh(playback.target_name.clone()))
}
