//! Lip-sync animation scheduler.
//!
//! Keeps a FIFO of clips waiting to play and places each one on the timeline
//! once the play head reaches its start frame. Start frames are chosen at
//! enqueue time so that placed animations never overlap and never start in
//! the past.
//!
//! The scheduler runs on the single-threaded tick loop; it holds no locks.

pub mod cleaner;
pub mod frame_range;
pub mod signature;

pub use cleaner::LipSyncCleaner;
pub use frame_range::FrameRangeAdjuster;
pub use signature::{OutputSignature, SignatureTracker};

use crate::clip::AnimationClip;
use crate::error::{LipSyncError, Result};
use crate::scene::{BlendMode, Frame, Scene, TrackPlacement};
use std::collections::VecDeque;
use tracing::{Span, info, info_span, warn};

/// Marker carried by every generated track, clip and strip name.
pub const LIPSYNC_PREFIX: &str = "LipSync";
/// Padding added after each animation.
pub const EXTRA_FRAMES: Frame = 10;
/// Upper bound for the scene end frame.
pub const MAX_FRAME: Frame = 100_000;
/// Shortest scene the range adjuster will produce.
pub const MIN_ANIMATION_FRAMES: Frame = 10;

/// Clamp a proposed scene end frame to `[1, MAX_FRAME]`.
pub fn clamp_frame_end(value: Frame) -> Frame {
    value.clamp(1, MAX_FRAME)
}

/// Audio strip played alongside a clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionAudio {
    pub name: String,
    pub frame_duration: Frame,
}

/// A clip waiting for its turn on the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAnimation {
    /// Shape-channel clip to activate.
    pub clip_name: String,
    /// Object-level clip, when one was observed.
    pub action_name: Option<String>,
    /// Audio strips moved to `start_frame` when applied.
    pub companion_audio_refs: Vec<String>,
    pub start_frame: Frame,
    pub duration: Frame,
}

impl PendingAnimation {
    /// First frame after the animation.
    pub fn end_frame(&self) -> Frame {
        self.start_frame + self.duration
    }
}

/// FIFO of pending animations plus the end of the last applied one.
#[derive(Debug)]
pub struct AnimationScheduler {
    queue: VecDeque<PendingAnimation>,
    current_animation_end_frame: Frame,
    span: Span,
}

impl AnimationScheduler {
    /// Empty scheduler whose timeline begins at `frame_start`.
    pub fn new(frame_start: Frame) -> Self {
        Self {
            queue: VecDeque::new(),
            current_animation_end_frame: frame_start,
            span: info_span!("animation_scheduler"),
        }
    }

    /// End frame of the most recently applied animation.
    pub fn current_animation_end_frame(&self) -> Frame {
        self.current_animation_end_frame
    }

    pub fn front(&self) -> Option<&PendingAnimation> {
        self.queue.front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingAnimation> {
        self.queue.iter()
    }

    /// First frame a newly queued animation may use.
    fn next_available_start_frame(&self, now_frame: Frame) -> Frame {
        match self.queue.back() {
            Some(last) => now_frame.max(last.end_frame()),
            None => now_frame,
        }
    }

    /// Queue `clip` behind everything already scheduled.
    ///
    /// Duration is the longer of the clip and its companion audio, plus
    /// [`EXTRA_FRAMES`].
    pub fn enqueue(
        &mut self,
        clip: &AnimationClip,
        action_name: Option<String>,
        companion_audio: &[CompanionAudio],
        now_frame: Frame,
    ) -> PendingAnimation {
        let _guard = self.span.enter();
        let audio_frames = companion_audio
            .iter()
            .map(|a| a.frame_duration)
            .max()
            .unwrap_or(0);
        let duration = clip.duration().max(audio_frames) + EXTRA_FRAMES;
        let start_frame = now_frame
            .max(self.current_animation_end_frame)
            .max(self.next_available_start_frame(now_frame));

        let pending = PendingAnimation {
            clip_name: clip.name.clone(),
            action_name,
            companion_audio_refs: companion_audio.iter().map(|a| a.name.clone()).collect(),
            start_frame,
            duration,
        };
        self.queue.push_back(pending.clone());
        info!(
            clip = %pending.clip_name,
            start_frame,
            duration,
            queued = self.queue.len(),
            "animation queued"
        );
        pending
    }

    /// Place the front animation on the timeline.
    ///
    /// Adds an object track for it, activates and shifts its shape clip to
    /// the start frame and moves its audio strips there. Returns the new
    /// animation end frame, or `None` if nothing was queued.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::InvalidTarget`] when the scene has no target;
    /// the queue is left unchanged.
    pub fn apply_next(&mut self, scene: &mut Scene) -> Result<Option<Frame>> {
        let _guard = self.span.enter();
        if self.queue.is_empty() {
            return Ok(None);
        }
        let Some(target) = scene.target.as_mut() else {
            return Err(LipSyncError::InvalidTarget(
                "no lip-sync target to apply animation to".into(),
            ));
        };
        let Some(animation) = self.queue.pop_front() else {
            return Ok(None);
        };

        let start_frame = animation.start_frame;
        let end_frame = animation.end_frame();
        info!(clip = %animation.clip_name, start_frame, "applying animation");

        if let Some(action) = animation.action_name.as_deref() {
            if scene.clips.contains_key(action) {
                let index = target.object_animation.tracks.len() + 1;
                target.object_animation.tracks.push(TrackPlacement {
                    track_name: format!("{LIPSYNC_PREFIX}_{index}"),
                    strip_name: action.to_owned(),
                    clip_name: action.to_owned(),
                    start_frame,
                    end_frame,
                    blend_mode: BlendMode::Replace,
                    influence: 1.0,
                });
            } else {
                warn!(action, "object clip vanished before it could be applied");
            }
        }

        match scene.clips.get_mut(&animation.clip_name) {
            Some(clip) => {
                clip.place_at(start_frame);
                target.shape_animation.action = Some(animation.clip_name.clone());
            }
            None => warn!(clip = %animation.clip_name, "shape clip vanished before it could be applied"),
        }

        for name in &animation.companion_audio_refs {
            if let Some(strip) = scene.strip_mut(name) {
                strip.frame_start = start_frame;
                strip.frame_final_end = start_frame + strip.frame_duration;
            }
        }

        self.current_animation_end_frame = end_frame;
        info!(end_frame, remaining = self.queue.len(), "animation applied");
        Ok(Some(end_frame))
    }

    /// Whether no lip-sync track plays at the current frame and the last
    /// applied animation has ended.
    pub fn is_finished(&self, scene: &Scene) -> bool {
        let now = scene.frame_current;
        let Some(target) = scene.target.as_ref() else {
            return true;
        };
        let playing = target
            .object_animation
            .tracks_containing(LIPSYNC_PREFIX)
            .any(|t| t.covers(now));
        !playing && now >= self.current_animation_end_frame
    }

    /// Drop every queued animation and rewind the end marker to `frame_start`.
    pub fn clear(&mut self, frame_start: Frame) {
        let _guard = self.span.enter();
        let dropped = self.queue.len();
        self.queue.clear();
        self.current_animation_end_frame = frame_start;
        info!(dropped, frame_start, "scheduler cleared");
    }
}
