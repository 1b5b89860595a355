//! Detects lip-sync output written onto the scene since the last check.
//!
//! The signature is polled rather than pushed: producers commit clips
//! whenever they finish, and the tick loop compares what it sees with what
//! it recorded last time.

use super::LIPSYNC_PREFIX;
use crate::playback::BG_MUSIC_NAME;
use crate::scene::Scene;
use std::time::{Duration, Instant};
use tracing::info;

/// Minimum time between recording a signature and reporting a new one.
pub const DEBOUNCE: Duration = Duration::from_secs(1);

/// Snapshot of the lip-sync output present on a scene.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSignature {
    /// Active object clip, if it is a lip-sync clip.
    pub action_name: String,
    /// Number of lip-sync object tracks.
    pub track_count: usize,
    /// Active shape clip, if it is a lip-sync clip.
    pub shape_action_name: String,
    /// Audio strips other than the background track.
    pub audio_refs: Vec<String>,
}

impl OutputSignature {
    /// Read the signature from `scene`.
    pub fn observe(scene: &Scene) -> Self {
        let audio_refs = scene
            .sequences
            .iter()
            .filter(|s| s.name != BG_MUSIC_NAME)
            .map(|s| s.name.clone())
            .collect();
        let Some(target) = scene.target.as_ref() else {
            return Self {
                audio_refs,
                ..Self::default()
            };
        };
        Self {
            action_name: target
                .object_animation
                .action_containing(LIPSYNC_PREFIX)
                .unwrap_or_default()
                .to_owned(),
            track_count: target
                .object_animation
                .tracks_containing(LIPSYNC_PREFIX)
                .count(),
            shape_action_name: target
                .shape_animation
                .action_containing(LIPSYNC_PREFIX)
                .unwrap_or_default()
                .to_owned(),
            audio_refs,
        }
    }

    /// Whether any lip-sync output is present at all.
    pub fn has_output(&self) -> bool {
        !self.action_name.is_empty() || self.track_count > 0 || !self.shape_action_name.is_empty()
    }

    /// Whether the animation part differs from `other` (audio is not compared).
    pub fn differs_from(&self, other: &Self) -> bool {
        self.action_name != other.action_name
            || self.track_count != other.track_count
            || self.shape_action_name != other.shape_action_name
    }
}

/// Last recorded signature plus the debounce clock.
#[derive(Debug, Clone, Default)]
pub struct SignatureTracker {
    last: OutputSignature,
    last_marked: Option<Instant>,
}

impl SignatureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently recorded signature.
    pub fn last(&self) -> &OutputSignature {
        &self.last
    }

    /// Whether `observed` is new output worth scheduling.
    ///
    /// Returns `false` within [`DEBOUNCE`] of the last recording, when no
    /// lip-sync output is present, or when nothing changed.
    pub fn detect_new_output(&self, observed: &OutputSignature, now: Instant) -> bool {
        if let Some(marked) = self.last_marked
            && now.saturating_duration_since(marked) < DEBOUNCE
        {
            return false;
        }
        if !observed.has_output() || !observed.differs_from(&self.last) {
            return false;
        }

        if observed.action_name != self.last.action_name {
            info!(from = %self.last.action_name, to = %observed.action_name, "new output: object clip changed");
        }
        if observed.track_count != self.last.track_count {
            info!(from = self.last.track_count, to = observed.track_count, "new output: track count changed");
        }
        if observed.shape_action_name != self.last.shape_action_name {
            info!(from = %self.last.shape_action_name, to = %observed.shape_action_name, "new output: shape clip changed");
        }
        true
    }

    /// Observe `scene` and test it with [`detect_new_output`](Self::detect_new_output).
    pub fn detect(&self, scene: &Scene, now: Instant) -> bool {
        self.detect_new_output(&OutputSignature::observe(scene), now)
    }

    /// Record the scene's signature and restart the debounce window.
    pub fn record(&mut self, scene: &Scene, now: Instant) -> &OutputSignature {
        self.last = OutputSignature::observe(scene);
        self.last_marked = Some(now);
        &self.last
    }

    /// Record the scene's signature without touching the debounce window.
    pub fn refresh(&mut self, scene: &Scene) {
        self.last = OutputSignature::observe(scene);
    }
}
