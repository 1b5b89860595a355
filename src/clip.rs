//! Keyed animation clips and the builder that turns visemes into them.

use crate::error::{LipSyncError, Result};
use crate::playback::BG_MUSIC_NAME;
use crate::scene::{AudioStrip, BlendMode, Frame, LipSyncTarget, Scene, TrackPlacement};
use crate::viseme::{Viseme, VisemeFrame};
use crate::worker::AnalysisOutput;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{Span, debug, info, info_span};

/// Neutral shape channel created on targets without any channels.
pub const BASIS_CHANNEL: &str = "Basis";

/// Name of the audio strip inserted alongside a committed clip.
pub const LIPSYNC_AUDIO_NAME: &str = "LipSync Audio";

static CLIP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Unique id for a new clip: UNIX seconds plus a process-wide counter.
pub fn next_clip_id() -> String {
    let seq = CLIP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}_{seq}", chrono::Utc::now().timestamp())
}

/// A single key on a channel curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyframe {
    pub frame: Frame,
    pub value: f32,
}

/// Keys for one shape channel, sorted by frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelCurve {
    pub channel: String,
    pub keyframes: Vec<Keyframe>,
}

impl ChannelCurve {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            keyframes: Vec::new(),
        }
    }

    /// Insert a key, replacing any existing key on the same frame.
    pub fn insert(&mut self, frame: Frame, value: f32) {
        match self.keyframes.binary_search_by_key(&frame, |k| k.frame) {
            Ok(i) => self.keyframes[i].value = value,
            Err(i) => self.keyframes.insert(i, Keyframe { frame, value }),
        }
    }
}

/// Named bundle of channel curves.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClip {
    pub name: String,
    pub curves: Vec<ChannelCurve>,
    /// Frame the keys were last placed at by [`place_at`](Self::place_at).
    pub offset: Frame,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            curves: Vec::new(),
            offset: 0,
        }
    }

    pub fn curve(&self, channel: &str) -> Option<&ChannelCurve> {
        self.curves.iter().find(|c| c.channel == channel)
    }

    /// Curve for `channel`, created empty if missing.
    pub fn curve_mut(&mut self, channel: &str) -> &mut ChannelCurve {
        let index = match self.curves.iter().position(|c| c.channel == channel) {
            Some(i) => i,
            None => {
                self.curves.push(ChannelCurve::new(channel));
                self.curves.len() - 1
            }
        };
        &mut self.curves[index]
    }

    /// First and last keyed frame across all curves.
    pub fn frame_range(&self) -> Option<(Frame, Frame)> {
        let mut keys = self.curves.iter().flat_map(|c| c.keyframes.iter().map(|k| k.frame));
        let first = keys.next()?;
        Some(keys.fold((first, first), |(lo, hi), f| (lo.min(f), hi.max(f))))
    }

    /// Number of frames spanned by the keys (0 when unkeyed).
    pub fn duration(&self) -> Frame {
        self.frame_range().map_or(0, |(first, last)| last - first + 1)
    }

    /// Move every key by `offset` frames.
    pub fn shift(&mut self, offset: Frame) {
        for key in self.curves.iter_mut().flat_map(|c| c.keyframes.iter_mut()) {
            key.frame += offset;
        }
    }

    /// Place the keys `start_frame` frames after their built position.
    ///
    /// Placing an already placed clip moves it from its previous offset, so
    /// applying the same clip twice never shifts it twice.
    pub fn place_at(&mut self, start_frame: Frame) {
        self.shift(start_frame - self.offset);
        self.offset = start_frame;
    }

    /// Number of keys over all curves.
    pub fn key_count(&self) -> usize {
        self.curves.iter().map(|c| c.keyframes.len()).sum()
    }
}

/// Outcome of committing an analysis onto the scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub clip_name: String,
    pub track_name: String,
    pub audio_strip: String,
}

/// Builds lip-sync clips and commits them onto a scene.
#[derive(Debug, Clone)]
pub struct ClipBuilder {
    span: Span,
}

impl Default for ClipBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipBuilder {
    pub fn new() -> Self {
        Self {
            span: info_span!("clip_builder"),
        }
    }

    /// Key every viseme channel at every analyzed frame.
    ///
    /// The active channel gets the frame's intensity, the others get 0.
    pub fn build(&self, visemes: &[VisemeFrame], name: &str) -> AnimationClip {
        let mut clip = AnimationClip::new(name);
        for viseme in Viseme::CHANNELS {
            if let Some(channel) = viseme.channel_name() {
                clip.curves.push(ChannelCurve {
                    channel: channel.to_owned(),
                    keyframes: Vec::with_capacity(visemes.len()),
                });
            }
        }

        for frame in visemes {
            for (curve, viseme) in clip.curves.iter_mut().zip(Viseme::CHANNELS) {
                let value = if frame.viseme == viseme {
                    frame.intensity
                } else {
                    0.0
                };
                curve.insert(Frame::from(frame.frame), value);
            }
        }

        self.span.in_scope(|| {
            debug!(clip = name, frames = visemes.len(), keys = clip.key_count(), "clip built");
        });
        clip
    }

    /// Make sure `target` can receive viseme keys.
    ///
    /// Adds a `Basis` channel to channel-less targets, then any missing
    /// viseme channel.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::InvalidTarget`] for non-mesh targets, without
    /// touching them.
    pub fn prepare_target(&self, target: &mut LipSyncTarget) -> Result<()> {
        let _guard = self.span.enter();
        if !target.is_mesh {
            return Err(LipSyncError::InvalidTarget(format!(
                "'{}' is not a mesh and has no shape channels",
                target.name
            )));
        }
        if target.shape_channels.is_empty() {
            target.ensure_channel(BASIS_CHANNEL);
            info!(target = %target.name, "created basis channel");
        }
        for viseme in Viseme::CHANNELS {
            if let Some(channel) = viseme.channel_name()
                && target.ensure_channel(channel)
            {
                info!(target = %target.name, channel, "created shape channel");
            }
        }
        Ok(())
    }

    /// Place a finished analysis on the scene.
    ///
    /// The clip becomes the active shape clip and gets its own object track
    /// at frame 1. Earlier lip-sync audio is replaced by the analyzed file;
    /// the background track is kept.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::InvalidTarget`] if the scene has no usable
    /// target. The scene is not modified in that case.
    pub fn commit(&self, scene: &mut Scene, output: AnalysisOutput) -> Result<CommitReport> {
        let target = scene
            .target
            .as_mut()
            .ok_or_else(|| LipSyncError::InvalidTarget("no lip-sync target selected".into()))?;
        self.prepare_target(target)?;

        let _guard = self.span.enter();
        let clip_name = output.clip.name.clone();
        let track_name = format!("LipSync_Track_{}", output.id);
        let duration = output.clip.duration();

        target.shape_animation.action = Some(clip_name.clone());
        target.object_animation.tracks.push(TrackPlacement {
            track_name: track_name.clone(),
            strip_name: format!("LipSync_Strip_{}", output.id),
            clip_name: clip_name.clone(),
            start_frame: 1,
            end_frame: 1 + duration,
            blend_mode: BlendMode::Replace,
            influence: 1.0,
        });
        scene.clips.insert(clip_name.clone(), output.clip);

        let removed = scene.remove_strips_where(|s| s.name != BG_MUSIC_NAME);
        if removed > 0 {
            debug!(removed, "removed previous lip-sync audio");
        }
        let audio_strip = scene.add_strip(AudioStrip::new(
            LIPSYNC_AUDIO_NAME,
            output.audio_path.clone(),
            1,
            output.audio_frames,
        ));

        info!(
            clip = %clip_name,
            track = %track_name,
            audio = %output.audio_path.display(),
            duration,
            "lip-sync clip committed"
        );
        Ok(CommitReport {
            clip_name,
            track_name,
            audio_strip,
        })
    }
}
