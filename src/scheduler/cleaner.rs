//! Wipes generated lip-sync animation and audio off the scene.

use super::{FrameRangeAdjuster, LIPSYNC_PREFIX};
use crate::playback::BG_MUSIC_NAME;
use crate::scene::Scene;
use std::time::Instant;
use tracing::{Span, info, info_span};

/// Removes lip-sync tracks, clips and audio, then refits the frame range.
#[derive(Debug)]
pub struct LipSyncCleaner {
    adjuster: FrameRangeAdjuster,
    span: Span,
}

impl Default for LipSyncCleaner {
    fn default() -> Self {
        Self::new(FrameRangeAdjuster::default())
    }
}

impl LipSyncCleaner {
    pub fn new(adjuster: FrameRangeAdjuster) -> Self {
        Self {
            adjuster,
            span: info_span!("lipsync_cleaner"),
        }
    }

    /// Remove every generated lip-sync element from `scene`.
    ///
    /// Idle tracks and the background track are kept.
    pub fn clear(&mut self, scene: &mut Scene, now: Instant) {
        let _guard = self.span.enter();
        let mut tracks_removed = 0;
        if let Some(target) = scene.target.as_mut() {
            let before = target.object_animation.tracks.len();
            target
                .object_animation
                .tracks
                .retain(|t| !t.track_name.contains(LIPSYNC_PREFIX));
            tracks_removed = before - target.object_animation.tracks.len();

            for data in [&mut target.object_animation, &mut target.shape_animation] {
                if data.action_containing(LIPSYNC_PREFIX).is_some() {
                    data.action = None;
                }
            }
        }

        let strips_removed = scene.remove_strips_where(|s| s.name != BG_MUSIC_NAME);
        let clips_removed = scene.purge_unused_clips(|name| name.contains(LIPSYNC_PREFIX));
        info!(tracks_removed, strips_removed, clips_removed, "lip-sync animation cleared");

        self.adjuster.adjust(scene, now);
    }
}
