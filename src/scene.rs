//! In-process model of the host scene the lip-sync engine drives.
//!
//! The scene owns the timeline clock (`frame_start`, `frame_end`,
//! `frame_current`), the lip-sync target with its shape channels and
//! animation tracks, a clip library and the ordered audio strip list.
//! Transport (actually playing frames) is abstracted by [`Transport`].

use crate::clip::AnimationClip;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Timeline frame number.
pub type Frame = i64;

/// How a strip combines with the layers below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Overwrite lower layers.
    #[default]
    Replace,
    /// Add on top of lower layers.
    Add,
}

/// A clip placed on a named track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPlacement {
    pub track_name: String,
    pub strip_name: String,
    pub clip_name: String,
    pub start_frame: Frame,
    /// Exclusive end of the strip.
    pub end_frame: Frame,
    pub blend_mode: BlendMode,
    pub influence: f32,
}

impl TrackPlacement {
    /// Whether `frame` falls inside `[start_frame, end_frame)`.
    pub fn covers(&self, frame: Frame) -> bool {
        self.start_frame <= frame && frame < self.end_frame
    }
}

/// Active clip plus layered tracks for one animatable owner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnimationData {
    /// Name of the directly assigned clip.
    pub action: Option<String>,
    pub tracks: Vec<TrackPlacement>,
}

impl AnimationData {
    /// Active clip name if it contains `marker`.
    pub fn action_containing(&self, marker: &str) -> Option<&str> {
        self.action.as_deref().filter(|name| name.contains(marker))
    }

    /// Tracks whose name contains `marker`.
    pub fn tracks_containing<'a>(
        &'a self,
        marker: &'a str,
    ) -> impl Iterator<Item = &'a TrackPlacement> + 'a {
        self.tracks
            .iter()
            .filter(move |t| t.track_name.contains(marker))
    }

    /// Whether any strip or the active clip refers to `clip_name`.
    pub fn references(&self, clip_name: &str) -> bool {
        self.action.as_deref() == Some(clip_name)
            || self.tracks.iter().any(|t| t.clip_name == clip_name)
    }
}

/// Named scalar weight on a mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeChannel {
    pub name: String,
    pub value: f32,
}

/// The object that receives mouth shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct LipSyncTarget {
    pub name: String,
    /// Only mesh-like targets carry shape channels.
    pub is_mesh: bool,
    pub shape_channels: Vec<ShapeChannel>,
    /// Object-level animation (lip-sync tracks live here).
    pub object_animation: AnimationData,
    /// Shape-channel animation (active lip-sync clip and idle tracks).
    pub shape_animation: AnimationData,
}

impl LipSyncTarget {
    /// A mesh target without shape channels.
    pub fn mesh(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_mesh: true,
            shape_channels: Vec::new(),
            object_animation: AnimationData::default(),
            shape_animation: AnimationData::default(),
        }
    }

    /// Add channels by name, skipping ones that already exist.
    pub fn with_channels(mut self, names: &[&str]) -> Self {
        for name in names {
            self.ensure_channel(name);
        }
        self
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.shape_channels.iter().any(|c| c.name == name)
    }

    /// Add a channel at weight 0 if missing. Returns `true` if it was created.
    pub fn ensure_channel(&mut self, name: &str) -> bool {
        if self.has_channel(name) {
            return false;
        }
        self.shape_channels.push(ShapeChannel {
            name: name.to_owned(),
            value: 0.0,
        });
        true
    }

    pub fn channel_value(&self, name: &str) -> Option<f32> {
        self.shape_channels
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value)
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut ShapeChannel> {
        self.shape_channels.iter_mut().find(|c| c.name == name)
    }
}

/// One audio strip in the sequence list.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioStrip {
    pub name: String,
    pub path: PathBuf,
    pub frame_start: Frame,
    /// Length of the source audio in frames.
    pub frame_duration: Frame,
    pub frame_final_end: Frame,
    /// Frames skipped from the start of the source.
    pub frame_offset_start: Frame,
    pub volume: f32,
    pub mute: bool,
}

impl AudioStrip {
    /// A strip playing `path` from `frame_start` for `frame_duration` frames.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        frame_start: Frame,
        frame_duration: Frame,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            frame_start,
            frame_duration,
            frame_final_end: frame_start + frame_duration,
            frame_offset_start: 0,
            volume: 1.0,
            mute: false,
        }
    }
}

/// Host scene state.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub frame_start: Frame,
    pub frame_end: Frame,
    pub frame_current: Frame,
    /// Playback rate of the timeline.
    pub fps: f32,
    pub target: Option<LipSyncTarget>,
    /// Clip library, keyed by clip name.
    pub clips: BTreeMap<String, AnimationClip>,
    /// Audio strips in insertion order.
    pub sequences: Vec<AudioStrip>,
}

impl Scene {
    /// Empty scene spanning `frame_start..=frame_end`, play head at the start.
    pub fn new(frame_start: Frame, frame_end: Frame, fps: f32) -> Self {
        Self {
            frame_start,
            frame_end,
            frame_current: frame_start,
            fps,
            target: None,
            clips: BTreeMap::new(),
            sequences: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: LipSyncTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn strip(&self, name: &str) -> Option<&AudioStrip> {
        self.sequences.iter().find(|s| s.name == name)
    }

    pub fn strip_mut(&mut self, name: &str) -> Option<&mut AudioStrip> {
        self.sequences.iter_mut().find(|s| s.name == name)
    }

    /// Insert a strip, renaming it with a numeric suffix if the name is taken.
    ///
    /// Returns the name the strip was stored under.
    pub fn add_strip(&mut self, mut strip: AudioStrip) -> String {
        if self.strip(&strip.name).is_some() {
            let base = strip.name.clone();
            let mut n = 1;
            while self.strip(&format!("{base}.{n:03}")).is_some() {
                n += 1;
            }
            strip.name = format!("{base}.{n:03}");
        }
        let name = strip.name.clone();
        self.sequences.push(strip);
        name
    }

    /// Remove strips matching `predicate`, returning how many were removed.
    pub fn remove_strips_where(&mut self, predicate: impl Fn(&AudioStrip) -> bool) -> usize {
        let before = self.sequences.len();
        self.sequences.retain(|s| !predicate(s));
        before - self.sequences.len()
    }

    /// Whether anything on the target still refers to `clip_name`.
    pub fn clip_in_use(&self, clip_name: &str) -> bool {
        self.target.as_ref().is_some_and(|t| {
            t.object_animation.references(clip_name) || t.shape_animation.references(clip_name)
        })
    }

    /// Drop library clips whose name matches `predicate` and that nothing references.
    pub fn purge_unused_clips(&mut self, predicate: impl Fn(&str) -> bool) -> usize {
        let unused: Vec<String> = self
            .clips
            .keys()
            .filter(|name| predicate(name) && !self.clip_in_use(name))
            .cloned()
            .collect();
        for name in &unused {
            self.clips.remove(name);
        }
        unused.len()
    }
}

/// Host transport: actually advancing frames in real time.
pub trait Transport: Send {
    /// Start advancing frames.
    fn play(&mut self);
    /// Stop advancing frames. `restore_frame` asks the host to return the
    /// play head to where playback started.
    fn cancel(&mut self, restore_frame: bool);
    /// Whether frames are currently advancing.
    fn is_running(&self) -> bool;
}

/// Transport backed by a shared flag, read by whatever drives the clock.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport {
    running: Arc<AtomicBool>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared running flag.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }
}

impl Transport for SimulatedTransport {
    fn play(&mut self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn cancel(&mut self, _restore_frame: bool) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
