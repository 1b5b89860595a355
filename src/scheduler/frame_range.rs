//! Fits the scene end frame to the animation actually present.

use super::{EXTRA_FRAMES, MIN_ANIMATION_FRAMES};
use crate::scene::{AnimationData, Frame, Scene};
use std::time::{Duration, Instant};
use tracing::{Span, debug, info, info_span};

/// Minimum wall-clock time between two adjustments.
pub const ADJUST_COOLDOWN: Duration = Duration::from_secs(5);

/// Rate-limited scene range adjuster.
#[derive(Debug)]
pub struct FrameRangeAdjuster {
    extra_frames: Frame,
    min_animation_frames: Frame,
    last_processed: Option<Instant>,
    span: Span,
}

impl Default for FrameRangeAdjuster {
    fn default() -> Self {
        Self::new(EXTRA_FRAMES, MIN_ANIMATION_FRAMES)
    }
}

impl FrameRangeAdjuster {
    pub fn new(extra_frames: Frame, min_animation_frames: Frame) -> Self {
        Self {
            extra_frames,
            min_animation_frames,
            last_processed: None,
            span: info_span!("frame_range_adjuster"),
        }
    }

    /// End frame the scene should have: the last animated frame plus
    /// padding, but never shorter than the minimum animation length.
    pub fn proposed_end(&self, scene: &Scene) -> Frame {
        let mut max_end = scene.frame_start;
        if let Some(target) = scene.target.as_ref() {
            for data in [&target.object_animation, &target.shape_animation] {
                max_end = max_end.max(animation_end(scene, data));
            }
        }
        (max_end + self.extra_frames).max(scene.frame_start + self.min_animation_frames)
    }

    /// Set `scene.frame_end` to [`proposed_end`](Self::proposed_end).
    ///
    /// Calls within [`ADJUST_COOLDOWN`] of the previous one leave the scene
    /// alone. Returns the resulting end frame either way.
    pub fn adjust(&mut self, scene: &mut Scene, now: Instant) -> Frame {
        let _guard = self.span.enter();
        if let Some(last) = self.last_processed
            && now.saturating_duration_since(last) < ADJUST_COOLDOWN
        {
            debug!("frame range adjust skipped, cooling down");
            return scene.frame_end;
        }
        self.last_processed = Some(now);

        let proposed = self.proposed_end(scene);
        if proposed != scene.frame_end {
            info!(from = scene.frame_end, to = proposed, "scene frame range updated");
            scene.frame_end = proposed;
        }
        scene.frame_end
    }
}

fn animation_end(scene: &Scene, data: &AnimationData) -> Frame {
    let action_end = data
        .action
        .as_deref()
        .and_then(|name| scene.clips.get(name))
        .and_then(|clip| clip.frame_range())
        .map(|(_, last)| last);
    let strip_end = data.tracks.iter().map(|t| t.end_frame).max();
    action_end.into_iter().chain(strip_end).max().unwrap_or(scene.frame_start)
}
