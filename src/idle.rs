//! Idle animations layered under lip-sync clips.
//!
//! Each idle animation pulses one shape channel from 0 to 1 and back at
//! random intervals, on its own additive track, so blinks and small
//! twitches keep playing while the mouth is driven by speech.

use crate::clip::{AnimationClip, BASIS_CHANNEL};
use crate::error::{LipSyncError, Result};
use crate::scene::{BlendMode, Frame, Scene, TrackPlacement};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{Span, info, info_span, warn};

/// One idle animation, configured per shape channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleAnimationSpec {
    /// Display name.
    pub name: String,
    /// Name of the target object.
    pub target: String,
    /// Shape channel to pulse.
    pub shape_channel: String,
    /// Shortest gap between pulses, in frames.
    pub min_interval: f32,
    /// Longest gap between pulses, in frames.
    pub max_interval: f32,
    /// Shortest pulse, in frames.
    pub min_duration: f32,
    /// Longest pulse, in frames.
    pub max_duration: f32,
}

impl Default for IdleAnimationSpec {
    fn default() -> Self {
        Self {
            name: "Idle".to_owned(),
            target: String::new(),
            shape_channel: String::new(),
            min_interval: 1.0,
            max_interval: 5.0,
            min_duration: 0.1,
            max_duration: 1.0,
        }
    }
}

impl IdleAnimationSpec {
    /// Reject timings random sampling cannot use.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Config`] for a non-finite or negative interval
    /// or duration.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("min_interval", self.min_interval),
            ("max_interval", self.max_interval),
            ("min_duration", self.min_duration),
            ("max_duration", self.max_duration),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(LipSyncError::Config(format!(
                    "idle '{}': {field} must be a finite value >= 0, got {value}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn interval_range(&self) -> (f32, f32) {
        ordered(self.min_interval, self.max_interval)
    }

    fn duration_range(&self) -> (f32, f32) {
        ordered(self.min_duration, self.max_duration)
    }

    /// Whether pulses advance the timeline at all.
    fn advances(&self) -> bool {
        let (interval, _) = self.interval_range();
        let (duration, _) = self.duration_range();
        self.validate().is_ok() && interval + duration > 0.0
    }
}

fn ordered(a: f32, b: f32) -> (f32, f32) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Summary of a generation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdleReport {
    /// Track names created.
    pub generated: Vec<String>,
    /// Names of specs that were skipped.
    pub skipped: Vec<String>,
    /// Scene end frame after generation.
    pub total_frames: Frame,
}

/// Builds and clears idle animation tracks.
#[derive(Debug)]
pub struct IdleAnimationGenerator {
    span: Span,
}

impl Default for IdleAnimationGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleAnimationGenerator {
    pub fn new() -> Self {
        Self {
            span: info_span!("idle_animation"),
        }
    }

    /// Generate one idle track per usable spec and fit the scene to them.
    ///
    /// `custom_frames` overrides the scene length when positive. The scene
    /// range becomes `1..=total`.
    pub fn generate(
        &self,
        scene: &mut Scene,
        specs: &[IdleAnimationSpec],
        custom_frames: Frame,
        rng: &mut impl Rng,
    ) -> IdleReport {
        let _guard = self.span.enter();
        let total = if custom_frames > 0 {
            custom_frames
        } else {
            scene.frame_end
        };
        let mut report = IdleReport {
            total_frames: total,
            ..IdleReport::default()
        };

        for (index, spec) in specs.iter().enumerate() {
            let Some(target) = scene.target.as_mut() else {
                warn!(idle = %spec.name, "no target in scene, skipping");
                report.skipped.push(spec.name.clone());
                continue;
            };
            if target.name != spec.target {
                warn!(idle = %spec.name, target = %spec.target, "target not found, skipping");
                report.skipped.push(spec.name.clone());
                continue;
            }
            if !target.is_mesh {
                warn!(idle = %spec.name, target = %target.name, "target is not a mesh, skipping");
                report.skipped.push(spec.name.clone());
                continue;
            }
            if !target.has_channel(&spec.shape_channel) {
                warn!(
                    idle = %spec.name,
                    channel = %spec.shape_channel,
                    "shape channel not found, skipping"
                );
                report.skipped.push(spec.name.clone());
                continue;
            }
            if !spec.advances() {
                warn!(idle = %spec.name, "timings never advance the timeline, skipping");
                report.skipped.push(spec.name.clone());
                continue;
            }

            let clip_name = format!("IdleAction_{}_{index}", spec.shape_channel);
            let clip = pulse_clip(&clip_name, spec, total, rng);
            let track_name = format!("Idle_{}_{index}", spec.shape_channel);

            target
                .shape_animation
                .tracks
                .retain(|t| t.track_name != track_name);
            target.shape_animation.tracks.push(TrackPlacement {
                track_name: track_name.clone(),
                strip_name: format!("Strips_{}_{index}", spec.shape_channel),
                clip_name: clip_name.clone(),
                start_frame: 1,
                end_frame: 1 + clip.duration(),
                blend_mode: BlendMode::Add,
                influence: 1.0,
            });
            scene.clips.insert(clip_name, clip);
            report.generated.push(track_name);
        }

        scene.frame_start = 1;
        scene.frame_end = total;
        info!(
            generated = report.generated.len(),
            skipped = report.skipped.len(),
            frame_end = total,
            "idle animations generated"
        );
        report
    }

    /// Remove idle tracks and clips and zero every non-basis channel.
    ///
    /// Keys on the active shape clip are dropped as well.
    pub fn clear(&self, scene: &mut Scene) {
        let _guard = self.span.enter();
        let Some(target) = scene.target.as_mut() else {
            return;
        };
        for data in [&mut target.object_animation, &mut target.shape_animation] {
            data.tracks.retain(|t| !is_idle_track(&t.track_name));
        }
        if let Some(action) = target.shape_animation.action.as_deref()
            && let Some(clip) = scene.clips.get_mut(action)
        {
            clip.curves.clear();
        }
        for channel in &mut target.shape_channels {
            if channel.name != BASIS_CHANNEL {
                channel.value = 0.0;
            }
        }
        let removed =
            scene.purge_unused_clips(|name| name == "IdleAction" || name.starts_with("IdleAction_"));
        info!(clips_removed = removed, "idle animations cleared");
    }
}

fn is_idle_track(name: &str) -> bool {
    name == "Idle" || name.starts_with("Idle_")
}

/// 0 → 1 → 0 pulses on `spec.shape_channel` until `total` frames are covered.
fn pulse_clip(
    name: &str,
    spec: &IdleAnimationSpec,
    total: Frame,
    rng: &mut impl Rng,
) -> AnimationClip {
    let (min_interval, max_interval) = spec.interval_range();
    let (min_duration, max_duration) = spec.duration_range();
    let mut clip = AnimationClip::new(name);
    let curve = clip.curve_mut(&spec.shape_channel);

    let mut frame = 0.0f64;
    while frame < total as f64 {
        let interval = f64::from(rng.gen_range(min_interval..=max_interval));
        let duration = f64::from(rng.gen_range(min_duration..=max_duration));

        curve.insert(frame as Frame, 0.0);
        curve.insert((frame + duration * 0.5) as Frame, 1.0);
        curve.insert((frame + duration) as Frame, 0.0);

        frame += duration + interval;
    }
    clip
}
