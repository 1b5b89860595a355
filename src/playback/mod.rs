//! Playback controller: transport, background audio and the per-frame tick.
//!
//! The host calls [`PlaybackController::tick`] after every frame advance.
//! Each tick may apply the next queued animation, handle the end of the
//! timeline (loop or stop), check for freshly committed lip-sync output and
//! keep the background track aligned with the play head. Nothing here
//! returns an error to the host loop: failures are logged and the cycle is
//! skipped.

use crate::config::PlaybackConfig;
use crate::scene::{AudioStrip, Frame, Scene, Transport};
use crate::scheduler::{
    AnimationScheduler, CompanionAudio, FrameRangeAdjuster, LipSyncCleaner, PendingAnimation,
    SignatureTracker, clamp_frame_end,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{Span, debug, info, info_span, warn};

/// Name of the background audio strip.
pub const BG_MUSIC_NAME: &str = "Background Music";

/// Minimum wall-clock time between two checks for new output.
pub const COOLDOWN: Duration = Duration::from_secs(2);

/// Transport and background flags owned by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub loop_playback: bool,
    pub bg_volume: f32,
    /// Scene end frame at the last reset.
    pub original_end_frame: Frame,
    /// Whether the controller reacts to ticks at all.
    pub active: bool,
    pub custom_background: Option<PathBuf>,
    pub default_background: PathBuf,
}

impl PlaybackState {
    pub fn from_config(config: &PlaybackConfig, frame_end: Frame) -> Self {
        Self {
            is_playing: false,
            loop_playback: config.loop_playback,
            bg_volume: config.bg_volume,
            original_end_frame: frame_end,
            active: true,
            custom_background: config.background_music.clone(),
            default_background: config.default_background.clone(),
        }
    }
}

/// Drives a [`Scene`] through the scheduler on every tick.
pub struct PlaybackController {
    state: PlaybackState,
    scheduler: AnimationScheduler,
    signature: SignatureTracker,
    cleaner: LipSyncCleaner,
    adjuster: FrameRangeAdjuster,
    transport: Box<dyn Transport>,
    is_clearing: bool,
    last_check: Option<Instant>,
    span: Span,
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("state", &self.state)
            .field("scheduler", &self.scheduler)
            .field("is_clearing", &self.is_clearing)
            .finish_non_exhaustive()
    }
}

impl PlaybackController {
    pub fn new(config: &PlaybackConfig, scene: &Scene, transport: Box<dyn Transport>) -> Self {
        Self {
            state: PlaybackState::from_config(config, scene.frame_end),
            scheduler: AnimationScheduler::new(scene.frame_start),
            signature: SignatureTracker::new(),
            cleaner: LipSyncCleaner::default(),
            adjuster: FrameRangeAdjuster::default(),
            transport,
            is_clearing: false,
            last_check: None,
            span: info_span!("playback"),
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn scheduler(&self) -> &AnimationScheduler {
        &self.scheduler
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn set_active(&mut self, active: bool) {
        self.state.active = active;
    }

    pub fn set_loop(&mut self, loop_playback: bool) {
        self.state.loop_playback = loop_playback;
    }

    pub fn set_bg_volume(&mut self, volume: f32) {
        self.state.bg_volume = volume.clamp(0.0, 1.0);
    }

    /// React to a frame advance.
    pub fn tick(&mut self, scene: &mut Scene, now: Instant) {
        if !self.state.active {
            return;
        }
        let span = self.span.clone();
        let _guard = span.enter();
        let current = scene.frame_current;

        if current >= self.scheduler.current_animation_end_frame() && !self.is_clearing {
            if let Some(next_start) = self.scheduler.front().map(|p| p.start_frame) {
                if current >= next_start {
                    self.apply_pending(scene);
                } else {
                    debug!(current, next_start, "waiting for next animation");
                }
            } else if current >= scene.frame_end && self.scheduler.is_finished(scene) {
                info!(current, "all animations finished");
                self.handle_end(scene, now);
            }
        } else if self.state.original_end_frame < current && current < scene.frame_end {
            debug!(current, "playing past the original end frame");
        }

        let due = self
            .last_check
            .is_none_or(|last| now.saturating_duration_since(last) > COOLDOWN);
        if due {
            self.last_check = Some(now);
            if self.signature.detect(scene, now) {
                self.enqueue_new_output(scene, now);
            }
        }

        self.sync_background(scene, !self.state.is_playing);
    }

    /// Queue the lip-sync output currently on the scene.
    ///
    /// Applied right away when it is the only queued animation and nothing
    /// is playing.
    pub fn enqueue_new_output(&mut self, scene: &mut Scene, now: Instant) -> Option<PendingAnimation> {
        let signature = self.signature.record(scene, now).clone();
        let clip_name = if signature.shape_action_name.is_empty() {
            signature.action_name.clone()
        } else {
            signature.shape_action_name.clone()
        };
        let Some(clip) = scene.clips.get(&clip_name) else {
            warn!(clip = %clip_name, "new output has no clip in the library");
            return None;
        };
        let action_name = (!signature.action_name.is_empty()).then(|| signature.action_name.clone());
        let companion: Vec<CompanionAudio> = signature
            .audio_refs
            .iter()
            .filter_map(|name| scene.strip(name))
            .map(|s| CompanionAudio {
                name: s.name.clone(),
                frame_duration: s.frame_duration,
            })
            .collect();

        let pending = self
            .scheduler
            .enqueue(clip, action_name, &companion, scene.frame_current);

        if self.scheduler.len() == 1 && self.scheduler.is_finished(scene) {
            info!("queue was empty and nothing is playing, applying now");
            self.apply_pending(scene);
        } else {
            debug!("animation will play after the current one");
        }
        Some(pending)
    }

    fn apply_pending(&mut self, scene: &mut Scene) {
        match self.scheduler.apply_next(scene) {
            Ok(Some(end_frame)) => {
                scene.frame_end = clamp_frame_end(scene.frame_end.max(end_frame));
                let frame_end = scene.frame_end;
                if let Some(bg) = scene.strip_mut(BG_MUSIC_NAME) {
                    bg.frame_final_end = frame_end;
                }
                self.signature.refresh(scene);
                info!(
                    animation_end = end_frame,
                    scene_end = scene.frame_end,
                    "next animation applied"
                );
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not apply animation, will retry"),
        }
    }

    /// Loop or stop once the timeline has run out.
    pub fn handle_end(&mut self, scene: &mut Scene, now: Instant) {
        if !self.state.active {
            return;
        }
        if self.state.loop_playback {
            info!("looping, resetting timeline");
            self.reset_and_play(scene, now);
        } else {
            info!("not looping, stopping");
            self.stop(scene);
        }
    }

    /// Wipe lip-sync output, reinsert the background track and clear the queue.
    pub fn clear_animation(&mut self, scene: &mut Scene, now: Instant) {
        self.is_clearing = true;
        self.cleaner.clear(scene, now);
        self.insert_background(scene);
        self.scheduler.clear(scene.frame_start);
        self.is_clearing = false;
    }

    /// Clear, refit the range, rewind and resume.
    pub fn reset_and_play(&mut self, scene: &mut Scene, now: Instant) {
        self.clear_animation(scene, now);
        self.adjuster.adjust(scene, now);
        self.state.original_end_frame = scene.frame_end;
        scene.frame_current = scene.frame_start;
        self.sync_background(scene, false);
        self.state.is_playing = true;
        self.transport.play();
        info!(frame_start = scene.frame_start, frame_end = scene.frame_end, "timeline reset");
    }

    pub fn start(&mut self, scene: &mut Scene) {
        self.state.is_playing = true;
        scene.frame_current = scene.frame_start;
        self.sync_background(scene, false);
        self.transport.play();
    }

    pub fn stop(&mut self, scene: &mut Scene) {
        self.state.is_playing = false;
        self.transport.cancel(false);
        scene.frame_current = scene.frame_start;
        self.sync_background(scene, true);
    }

    pub fn pause(&mut self, scene: &mut Scene) {
        self.state.is_playing = false;
        self.transport.cancel(true);
        self.sync_background(scene, true);
    }

    /// Align the background strip with the scene range and play head.
    pub fn sync_background(&self, scene: &mut Scene, mute: bool) {
        let (start, end, current) = (scene.frame_start, scene.frame_end, scene.frame_current);
        if let Some(bg) = scene.strip_mut(BG_MUSIC_NAME) {
            bg.mute = mute;
            bg.frame_start = start;
            bg.frame_final_end = end;
            bg.volume = self.state.bg_volume;
            bg.frame_offset_start = current - start;
        }
    }

    /// Background file to use: the custom one if it exists, else the default.
    pub fn background_path(&self) -> Option<&Path> {
        let custom = self
            .state
            .custom_background
            .as_deref()
            .filter(|p| p.is_file());
        custom
            .or(Some(self.state.default_background.as_path()))
            .filter(|p| p.is_file())
    }

    /// Create or update the background strip over the whole scene range.
    pub fn insert_background(&self, scene: &mut Scene) {
        let Some(path) = self.background_path().map(Path::to_path_buf) else {
            warn!(
                default = %self.state.default_background.display(),
                "no background audio file found"
            );
            return;
        };
        let (start, end) = (scene.frame_start, scene.frame_end);
        match scene.strip_mut(BG_MUSIC_NAME) {
            Some(bg) => {
                bg.path = path;
                bg.volume = self.state.bg_volume;
                bg.frame_start = start;
                bg.frame_final_end = end;
                bg.mute = false;
            }
            None => {
                let mut strip = AudioStrip::new(BG_MUSIC_NAME, path, start, end - start);
                strip.frame_final_end = end;
                strip.volume = self.state.bg_volume;
                scene.add_strip(strip);
            }
        }
        debug!(start, end, "background audio inserted");
    }

    /// Switch to a user-chosen background file.
    pub fn choose_background(&mut self, scene: &mut Scene, path: PathBuf) {
        info!(path = %path.display(), "background audio chosen");
        self.state.custom_background = Some(path);
        self.insert_background(scene);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::clip::{ClipBuilder, next_clip_id};
    use crate::scene::{LipSyncTarget, SimulatedTransport};
    use crate::viseme::{Viseme, VisemeFrame};
    use crate::worker::AnalysisOutput;

    struct Fixture {
        scene: Scene,
        controller: PlaybackController,
        transport: SimulatedTransport,
        _bg_dir: tempfile::TempDir,
    }

    fn fixture(loop_playback: bool) -> Fixture {
        let bg_dir = tempfile::tempdir().unwrap();
        let bg = bg_dir.path().join("default.mp3");
        std::fs::write(&bg, b"bg").unwrap();
        let config = PlaybackConfig {
            loop_playback,
            default_background: bg,
            ..PlaybackConfig::default()
        };
        let scene = Scene::new(1, 250, 24.0).with_target(LipSyncTarget::mesh("Face"));
        let transport = SimulatedTransport::new();
        let controller = PlaybackController::new(&config, &scene, Box::new(transport.clone()));
        Fixture {
            scene,
            controller,
            transport,
            _bg_dir: bg_dir,
        }
    }

    fn commit(scene: &mut Scene, frames: u32) -> String {
        let visemes: Vec<VisemeFrame> = (0..frames)
            .map(|frame| VisemeFrame {
                frame,
                viseme: Viseme::O,
                intensity: 1.0,
            })
            .collect();
        let id = next_clip_id();
        let builder = ClipBuilder::new();
        let clip = builder.build(&visemes, &format!("LipSync_{id}"));
        builder
            .commit(
                scene,
                AnalysisOutput {
                    id,
                    audio_path: PathBuf::from("voice.wav"),
                    clip,
                    audio_frames: Frame::from(frames),
                    viseme_count: frames as usize,
                },
            )
            .unwrap()
            .clip_name
    }

    #[test]
    fn start_sets_flag_before_transport() {
        let mut f = fixture(true);
        f.controller.insert_background(&mut f.scene);
        f.scene.frame_current = 40;
        f.controller.start(&mut f.scene);
        assert!(f.controller.state().is_playing);
        assert!(f.transport.is_running());
        assert_eq!(f.scene.frame_current, 1);
        assert!(!f.scene.strip(BG_MUSIC_NAME).unwrap().mute);
    }

    #[test]
    fn stop_and_pause_mute_background() {
        let mut f = fixture(true);
        f.controller.insert_background(&mut f.scene);
        f.controller.start(&mut f.scene);
        f.scene.frame_current = 30;

        f.controller.pause(&mut f.scene);
        assert!(!f.transport.is_running());
        assert_eq!(f.scene.frame_current, 30);
        let bg = f.scene.strip(BG_MUSIC_NAME).unwrap();
        assert!(bg.mute);
        assert_eq!(bg.frame_offset_start, 29);

        f.controller.stop(&mut f.scene);
        assert_eq!(f.scene.frame_current, 1);
        assert!(f.scene.strip(BG_MUSIC_NAME).unwrap().mute);
    }

    #[test]
    fn committed_clip_is_detected_and_applied() {
        let mut f = fixture(true);
        f.controller.insert_background(&mut f.scene);
        f.controller.start(&mut f.scene);
        let clip_name = commit(&mut f.scene, 72);
        let t0 = Instant::now();

        // The commit's own track still covers frame 1, so it waits in the queue.
        f.controller.tick(&mut f.scene, t0);
        let pending = f.controller.scheduler().front().unwrap();
        assert_eq!(pending.clip_name, clip_name);
        assert_eq!((pending.start_frame, pending.duration), (1, 82));

        f.controller.tick(&mut f.scene, t0 + Duration::from_millis(40));
        assert!(f.controller.scheduler().is_empty());
        assert_eq!(f.controller.scheduler().current_animation_end_frame(), 83);
        assert_eq!(f.scene.strip(BG_MUSIC_NAME).unwrap().frame_final_end, 250);

        // The applied animation must not read as new output.
        f.controller.tick(&mut f.scene, t0 + Duration::from_secs(3));
        assert!(f.controller.scheduler().is_empty());
    }

    #[test]
    fn idle_timeline_applies_new_output_in_the_same_tick() {
        let mut f = fixture(true);
        f.controller.insert_background(&mut f.scene);
        f.controller.start(&mut f.scene);
        let clip_name = commit(&mut f.scene, 72);
        // Past the commit's own track, so nothing is playing.
        f.scene.frame_current = 100;

        f.controller.tick(&mut f.scene, Instant::now());
        let scheduler = f.controller.scheduler();
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.current_animation_end_frame(), 100 + 82);
        assert_eq!(f.scene.clips[&clip_name].frame_range(), Some((100, 171)));
        let target = f.scene.target.as_ref().unwrap();
        assert_eq!(target.shape_animation.action.as_deref(), Some(clip_name.as_str()));
    }

    #[test]
    fn applying_past_frame_end_extends_scene() {
        let mut f = fixture(true);
        f.controller.insert_background(&mut f.scene);
        f.scene.frame_end = 50;
        f.controller.start(&mut f.scene);
        commit(&mut f.scene, 72);
        let t0 = Instant::now();

        f.controller.tick(&mut f.scene, t0);
        f.controller.tick(&mut f.scene, t0);
        assert_eq!(f.scene.frame_end, 83);
        assert_eq!(f.scene.strip(BG_MUSIC_NAME).unwrap().frame_final_end, 83);
    }

    #[test]
    fn new_output_checks_respect_cooldown() {
        let mut f = fixture(true);
        f.controller.start(&mut f.scene);
        let t0 = Instant::now();
        f.controller.tick(&mut f.scene, t0);

        commit(&mut f.scene, 24);
        f.controller.tick(&mut f.scene, t0 + Duration::from_secs(1));
        assert!(f.controller.scheduler().is_empty());
        f.controller.tick(&mut f.scene, t0 + Duration::from_millis(2_100));
        assert_eq!(f.controller.scheduler().len(), 1);
    }

    #[test]
    fn loop_end_resets_timeline() {
        let mut f = fixture(true);
        f.controller.insert_background(&mut f.scene);
        f.controller.start(&mut f.scene);
        commit(&mut f.scene, 72);
        let t0 = Instant::now();
        f.controller.tick(&mut f.scene, t0);
        f.controller.tick(&mut f.scene, t0);

        f.scene.frame_current = f.scene.frame_end;
        f.controller.tick(&mut f.scene, t0 + Duration::from_secs(10));

        assert!(f.controller.scheduler().is_empty());
        assert_eq!(
            f.controller.scheduler().current_animation_end_frame(),
            f.scene.frame_start
        );
        assert_eq!(f.scene.frame_current, f.scene.frame_start);
        assert!(f.controller.state().is_playing);
        assert!(f.transport.is_running());
        let target = f.scene.target.as_ref().unwrap();
        assert!(target.object_animation.tracks.is_empty());
        assert_eq!(f.scene.sequences.len(), 1);
        assert_eq!(f.scene.sequences[0].name, BG_MUSIC_NAME);
    }

    #[test]
    fn non_loop_end_stops() {
        let mut f = fixture(false);
        f.controller.start(&mut f.scene);
        f.scene.frame_current = 250;
        f.controller.tick(&mut f.scene, Instant::now());
        assert!(!f.controller.state().is_playing);
        assert!(!f.transport.is_running());
        assert_eq!(f.scene.frame_current, 1);
    }

    #[test]
    fn inactive_controller_ignores_ticks() {
        let mut f = fixture(false);
        f.controller.set_active(false);
        f.controller.start(&mut f.scene);
        f.scene.frame_current = 250;
        f.controller.tick(&mut f.scene, Instant::now());
        assert!(f.controller.state().is_playing);
    }

    #[test]
    fn background_falls_back_to_default() {
        let mut f = fixture(true);
        f.controller
            .choose_background(&mut f.scene, PathBuf::from("/nonexistent/custom.mp3"));
        let bg = f.scene.strip(BG_MUSIC_NAME).unwrap();
        assert!(bg.path.ends_with("default.mp3"));
        assert_eq!((bg.frame_start, bg.frame_final_end), (1, 250));
    }

    #[test]
    fn custom_background_replaces_default() {
        let mut f = fixture(true);
        f.controller.insert_background(&mut f.scene);
        let custom = f._bg_dir.path().join("custom.mp3");
        std::fs::write(&custom, b"custom").unwrap();
        f.controller.set_bg_volume(0.4);
        f.controller.choose_background(&mut f.scene, custom.clone());

        assert_eq!(f.scene.sequences.len(), 1);
        let bg = f.scene.strip(BG_MUSIC_NAME).unwrap();
        assert_eq!(bg.path, custom);
        assert!((bg.volume - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn missing_background_is_skipped() {
        let mut f = fixture(true);
        f.controller.state.default_background = PathBuf::from("/nonexistent/default.mp3");
        f.controller.insert_background(&mut f.scene);
        assert!(f.scene.strip(BG_MUSIC_NAME).is_none());
    }
}
