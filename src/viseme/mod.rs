//! Viseme analysis for lip-sync animation.
//!
//! A viseme is a visual mouth shape that corresponds to a class of sounds.
//! This module turns a waveform into one viseme per output frame using a
//! coarse spectral heuristic: the peak mel band and the peak pitch class of
//! each frame are summed and used to index a language-specific phoneme table.
//! The arithmetic is an approximation kept for timing compatibility with
//! existing animations, not a phoneme recognizer.

pub mod features;

use crate::audio::DecodedAudio;
use crate::config::AnalysisConfig;
use crate::error::{LipSyncError, Result};
use features::SpectralFeatures;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{Span, debug, info, info_span};

/// Mouth shape for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Viseme {
    /// Open wide.
    A,
    /// Wide, teeth apart.
    I,
    /// Rounded, small.
    U,
    /// Medium open.
    E,
    /// Rounded, medium.
    O,
    /// Mouth closed.
    Silence,
}

impl Viseme {
    /// Keyable mouth shapes, in channel order.
    pub const CHANNELS: [Viseme; 5] = [Viseme::A, Viseme::I, Viseme::U, Viseme::E, Viseme::O];

    /// Shape channel name (`None` for silence).
    pub fn channel_name(self) -> Option<&'static str> {
        match self {
            Viseme::A => Some("A"),
            Viseme::I => Some("I"),
            Viseme::U => Some("U"),
            Viseme::E => Some("E"),
            Viseme::O => Some("O"),
            Viseme::Silence => None,
        }
    }
}

/// One analyzed output frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisemeFrame {
    /// Output frame index, starting at 0.
    pub frame: u32,
    /// Active mouth shape.
    pub viseme: Viseme,
    /// Shape weight in `[0, 1]`; exactly 0 for silence.
    pub intensity: f32,
}

/// Phoneme table selection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    /// Mandarin initials and finals.
    #[default]
    Chinese,
    /// English phoneme approximations.
    English,
}

impl Language {
    /// Lowercase identifier used in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Chinese => "chinese",
            Language::English => "english",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = LipSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "chinese" => Ok(Language::Chinese),
            "english" => Ok(Language::English),
            other => Err(LipSyncError::Config(format!(
                "unsupported language '{other}', choose 'english' or 'chinese'"
            ))),
        }
    }
}

impl Serialize for Language {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

const ENGLISH_TABLE: &[(&str, Viseme)] = &[
    ("a", Viseme::A),
    ("i", Viseme::I),
    ("u", Viseme::U),
    ("e", Viseme::E),
    ("o", Viseme::O),
    ("m", Viseme::U),
    ("b", Viseme::U),
    ("p", Viseme::U),
    ("f", Viseme::U),
    ("v", Viseme::U),
    ("s", Viseme::I),
    ("z", Viseme::I),
    ("th", Viseme::I),
    ("ch", Viseme::I),
    ("sh", Viseme::I),
    ("j", Viseme::I),
    ("zh", Viseme::I),
    ("l", Viseme::I),
    ("r", Viseme::I),
    ("y", Viseme::I),
    ("w", Viseme::U),
    ("ng", Viseme::E),
    ("h", Viseme::A),
    ("k", Viseme::E),
    ("g", Viseme::E),
];

const CHINESE_TABLE: &[(&str, Viseme)] = &[
    ("a", Viseme::A),
    ("i", Viseme::I),
    ("u", Viseme::U),
    ("e", Viseme::E),
    ("o", Viseme::O),
    ("ü", Viseme::I),
    ("b", Viseme::U),
    ("p", Viseme::U),
    ("m", Viseme::U),
    ("f", Viseme::U),
    ("d", Viseme::I),
    ("t", Viseme::I),
    ("n", Viseme::I),
    ("l", Viseme::I),
    ("g", Viseme::E),
    ("k", Viseme::E),
    ("h", Viseme::E),
    ("j", Viseme::I),
    ("q", Viseme::I),
    ("x", Viseme::I),
    ("z", Viseme::I),
    ("c", Viseme::I),
    ("s", Viseme::I),
    ("zh", Viseme::I),
    ("ch", Viseme::I),
    ("sh", Viseme::I),
    ("r", Viseme::I),
    ("y", Viseme::U),
    ("w", Viseme::U),
    ("ai", Viseme::A),
    ("ei", Viseme::A),
    ("ao", Viseme::O),
    ("ou", Viseme::O),
    ("an", Viseme::E),
    ("en", Viseme::E),
    ("in", Viseme::E),
    ("un", Viseme::E),
    ("ün", Viseme::E),
    ("ang", Viseme::E),
    ("eng", Viseme::E),
    ("ing", Viseme::E),
    ("ong", Viseme::E),
];

/// Ordered, immutable phoneme → viseme table for one language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhonemeVisemeMap {
    entries: &'static [(&'static str, Viseme)],
}

impl PhonemeVisemeMap {
    /// Table for `language`.
    pub fn for_language(language: Language) -> Self {
        let entries = match language {
            Language::Chinese => CHINESE_TABLE,
            Language::English => ENGLISH_TABLE,
        };
        Self { entries }
    }

    /// Number of phoneme keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Phoneme key and viseme at `index` modulo the table size.
    pub fn entry(&self, index: usize) -> (&'static str, Viseme) {
        self.entries[index % self.entries.len()]
    }

    /// Viseme for a phoneme key.
    pub fn lookup(&self, phoneme: &str) -> Option<Viseme> {
        self.entries
            .iter()
            .find(|(key, _)| *key == phoneme)
            .map(|(_, v)| *v)
    }
}

/// Waveform → viseme sequence analyzer.
///
/// Pure function of its input and configuration: the same audio always
/// yields the same sequence.
#[derive(Debug, Clone)]
pub struct VisemeAnalyzer {
    frame_rate: f32,
    silence_threshold: f32,
    max_silence_frames: u32,
    map: PhonemeVisemeMap,
    span: Span,
}

impl VisemeAnalyzer {
    /// Create an analyzer from validated parameters.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Config`] if the parameters are out of range.
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let span = info_span!("viseme_analyzer", language = %config.language);
        span.in_scope(|| {
            debug!(
                frame_rate = config.frame_rate,
                silence_threshold = config.silence_threshold,
                max_silence_frames = config.max_silence_frames,
                "viseme analyzer initialized"
            );
        });
        Ok(Self {
            frame_rate: config.frame_rate,
            silence_threshold: config.silence_threshold,
            max_silence_frames: config.max_silence_frames,
            map: PhonemeVisemeMap::for_language(config.language),
            span,
        })
    }

    /// Phoneme table in use.
    pub fn map(&self) -> PhonemeVisemeMap {
        self.map
    }

    /// Decode and analyze an audio file.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Config`] if the file cannot be decoded.
    pub fn analyze_file(&self, path: &Path) -> Result<Vec<VisemeFrame>> {
        let audio = crate::audio::decode_file(path)?;
        self.span.in_scope(|| {
            info!(
                path = %path.display(),
                sample_rate = audio.sample_rate,
                duration_secs = audio.duration_secs(),
                "audio loaded"
            );
        });
        self.analyze_audio(&audio)
    }

    /// Analyze decoded audio.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Config`] for a zero sample rate.
    pub fn analyze_audio(&self, audio: &DecodedAudio) -> Result<Vec<VisemeFrame>> {
        self.analyze(&audio.samples, audio.sample_rate)
    }

    /// Analyze mono samples, producing `floor(duration * frame_rate)` frames.
    ///
    /// Input is resampled to [`features::ANALYSIS_SAMPLE_RATE`] first so the
    /// energy scale does not depend on the file's native rate.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Config`] for a zero sample rate.
    pub fn analyze(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<VisemeFrame>> {
        let _guard = self.span.enter();
        if sample_rate == 0 {
            return Err(LipSyncError::Config("sample rate must be > 0".to_owned()));
        }

        let samples = crate::audio::resample_linear(samples, sample_rate, features::ANALYSIS_SAMPLE_RATE);
        let sample_rate = features::ANALYSIS_SAMPLE_RATE;

        let duration = samples.len() as f64 / f64::from(sample_rate);
        let total_frames = (duration * f64::from(self.frame_rate)).floor() as usize;
        if total_frames == 0 {
            debug!("audio shorter than one frame, nothing to analyze");
            return Ok(Vec::new());
        }

        let hop = features::hop_length(sample_rate, self.frame_rate);
        let spectral = features::compute(&samples, sample_rate, hop, total_frames);
        debug!(total_frames, hop, "spectral features computed");

        let visemes = self.generate_visemes(&spectral);
        info!(frames = visemes.len(), "viseme sequence generated");
        Ok(visemes)
    }

    /// Walk precomputed features frame by frame, applying silence hysteresis.
    pub fn generate_visemes(&self, spectral: &SpectralFeatures) -> Vec<VisemeFrame> {
        let mut visemes = Vec::with_capacity(spectral.len());
        let mut silence_counter: u32 = 0;
        let mut current: Option<Viseme> = None;

        for (frame, (mel, chroma)) in spectral.mel.iter().zip(spectral.chroma.iter()).enumerate() {
            let energy: f32 = mel.iter().sum();

            if energy > self.silence_threshold {
                let band_peak = features::argmax(mel);
                let chroma_peak = features::argmax(chroma);
                let (_, viseme) = self.map.entry(band_peak + chroma_peak);
                current = Some(viseme);
                silence_counter = 0;
            } else if silence_counter >= self.max_silence_frames {
                current = None;
            } else {
                silence_counter += 1;
            }

            let (viseme, intensity) = match current {
                Some(v) => (v, (energy / self.silence_threshold).min(1.0)),
                None => (Viseme::Silence, 0.0),
            };

            if frame % 100 == 0 {
                debug!(
                    frame,
                    seconds = frame as f32 / self.frame_rate,
                    ?viseme,
                    intensity,
                    energy,
                    silence_counter,
                    "viseme progress"
                );
            }

            visemes.push(VisemeFrame {
                frame: frame as u32,
                viseme,
                intensity,
            });
        }

        visemes
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use features::{NUM_CHROMA, NUM_MEL_BANDS};

    fn analyzer(language: Language, max_silence_frames: u32) -> VisemeAnalyzer {
        VisemeAnalyzer::new(&AnalysisConfig {
            frame_rate: 24.0,
            silence_threshold: 0.01,
            max_silence_frames,
            language,
        })
        .unwrap()
    }

    fn tone(seconds: f32, sample_rate: u32) -> Vec<f32> {
        let n = (seconds * sample_rate as f32) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    /// Features where `voiced[i]` decides whether frame `i` is above threshold.
    fn features_from(voiced: &[bool]) -> SpectralFeatures {
        let mut spectral = SpectralFeatures::default();
        for &v in voiced {
            let mut mel = [0.0f32; NUM_MEL_BANDS];
            if v {
                mel[0] = 1.0;
            }
            let mut chroma = [0.0f32; NUM_CHROMA];
            chroma[0] = 1.0;
            spectral.mel.push(mel);
            spectral.chroma.push(chroma);
        }
        spectral
    }

    #[test]
    fn table_sizes() {
        assert_eq!(PhonemeVisemeMap::for_language(Language::English).len(), 25);
        assert_eq!(PhonemeVisemeMap::for_language(Language::Chinese).len(), 42);
    }

    #[test]
    fn table_lookup_and_wraparound() {
        let map = PhonemeVisemeMap::for_language(Language::English);
        assert_eq!(map.lookup("th"), Some(Viseme::I));
        assert_eq!(map.lookup("h"), Some(Viseme::A));
        assert_eq!(map.lookup("xyz"), None);
        assert_eq!(map.entry(0), ("a", Viseme::A));
        assert_eq!(map.entry(25), ("a", Viseme::A));
        assert_eq!(map.entry(24), ("g", Viseme::E));

        let zh = PhonemeVisemeMap::for_language(Language::Chinese);
        assert_eq!(zh.entry(5), ("ü", Viseme::I));
        assert_eq!(zh.entry(41), ("ong", Viseme::E));
    }

    #[test]
    fn language_parses_case_insensitively() {
        assert_eq!("English".parse::<Language>().unwrap(), Language::English);
        assert_eq!(" CHINESE ".parse::<Language>().unwrap(), Language::Chinese);
        assert!(matches!(
            "french".parse::<Language>(),
            Err(LipSyncError::Config(_))
        ));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let result = VisemeAnalyzer::new(&AnalysisConfig {
            silence_threshold: 0.0,
            ..AnalysisConfig::default()
        });
        assert!(matches!(result, Err(LipSyncError::Config(_))));
    }

    #[test]
    fn empty_audio_yields_empty_sequence() {
        let a = analyzer(Language::Chinese, 5);
        assert!(a.analyze(&[], 16_000).unwrap().is_empty());
        // Shorter than one frame at 24 fps.
        assert!(a.analyze(&[0.5; 100], 16_000).unwrap().is_empty());
    }

    #[test]
    fn zero_sample_rate_is_rejected() {
        let a = analyzer(Language::Chinese, 5);
        assert!(a.analyze(&[0.1; 10], 0).is_err());
    }

    #[test]
    fn frame_count_matches_duration() {
        let a = analyzer(Language::English, 5);
        for (seconds, sample_rate) in [(1.0, 16_000), (2.5, 22_050), (0.3, 8_000)] {
            let samples = tone(seconds, sample_rate);
            let visemes = a.analyze(&samples, sample_rate).unwrap();
            let expected =
                (samples.len() as f64 / f64::from(sample_rate) * 24.0).floor() as usize;
            assert_eq!(visemes.len(), expected);
            for (i, v) in visemes.iter().enumerate() {
                assert_eq!(v.frame as usize, i);
            }
        }
    }

    #[test]
    fn three_seconds_of_voice_has_no_silence() {
        let a = analyzer(Language::Chinese, 5);
        let visemes = a.analyze(&tone(3.0, 16_000), 16_000).unwrap();
        assert_eq!(visemes.len(), 72);
        assert!(visemes.iter().all(|v| v.viseme != Viseme::Silence));
        assert!(visemes.iter().all(|v| (v.intensity - 1.0).abs() < f32::EPSILON));
    }

    #[test]
    fn quiet_tone_is_silent() {
        let a = analyzer(Language::English, 5);
        // 440 Hz at -60 dBFS.
        let samples: Vec<f32> = tone(1.0, 22_050).iter().map(|s| s * 0.002).collect();
        let visemes = a.analyze(&samples, 22_050).unwrap();
        assert_eq!(visemes.len(), 24);
        assert!(visemes.iter().all(|v| v.viseme == Viseme::Silence));
        assert!(visemes.iter().all(|v| v.intensity == 0.0));
    }

    #[test]
    fn voice_fading_out_closes_the_mouth() {
        let a = analyzer(Language::English, 5);
        let mut samples = tone(1.0, 16_000);
        samples.extend(std::iter::repeat_n(0.0, 16_000));
        let visemes = a.analyze(&samples, 16_000).unwrap();
        assert_eq!(visemes.len(), 48);
        assert_ne!(visemes[10].viseme, Viseme::Silence);
        assert_eq!(visemes[47].viseme, Viseme::Silence);
        assert_eq!(visemes[47].intensity, 0.0);
    }

    #[test]
    fn analysis_is_deterministic() {
        let a = analyzer(Language::English, 5);
        let samples = tone(1.5, 16_000);
        let first = a.analyze(&samples, 16_000).unwrap();
        let second = a.analyze(&samples, 16_000).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn single_quiet_frame_keeps_previous_viseme() {
        let a = analyzer(Language::English, 5);
        let spectral = features_from(&[true, true, false, true, true]);
        let visemes = a.generate_visemes(&spectral);
        assert_eq!(visemes[2].viseme, Viseme::A);
        assert_eq!(visemes[2].intensity, 0.0);
        assert!(visemes.iter().all(|v| v.viseme == Viseme::A));
    }

    #[test]
    fn six_quiet_frames_close_the_mouth() {
        let a = analyzer(Language::English, 5);
        let mut pattern = vec![true];
        pattern.extend(std::iter::repeat_n(false, 6));
        let visemes = a.generate_visemes(&features_from(&pattern));
        for v in &visemes[1..6] {
            assert_eq!(v.viseme, Viseme::A);
        }
        assert_eq!(visemes[6].viseme, Viseme::Silence);
        assert_eq!(visemes[6].intensity, 0.0);
    }

    #[test]
    fn leading_silence_is_silent() {
        let a = analyzer(Language::Chinese, 5);
        let visemes = a.generate_visemes(&features_from(&[false, false, true]));
        assert_eq!(visemes[0].viseme, Viseme::Silence);
        assert_eq!(visemes[1].viseme, Viseme::Silence);
        assert_eq!(visemes[2].viseme, Viseme::A);
    }

    #[test]
    fn peak_indices_are_summed_into_table() {
        let a = analyzer(Language::English, 5);
        let mut mel = [0.0f32; NUM_MEL_BANDS];
        mel[3] = 2.0;
        let mut chroma = [0.0f32; NUM_CHROMA];
        chroma[10] = 1.0;
        let spectral = SpectralFeatures {
            mel: vec![mel],
            chroma: vec![chroma],
        };
        // 3 + 10 = 13 → "ch" → I
        let visemes = a.generate_visemes(&spectral);
        assert_eq!(visemes[0].viseme, Viseme::I);
    }

    #[test]
    fn intensity_scales_below_threshold_ratio() {
        let a = VisemeAnalyzer::new(&AnalysisConfig {
            silence_threshold: 1.0,
            ..AnalysisConfig::default()
        })
        .unwrap();
        let mut loud = [0.0f32; NUM_MEL_BANDS];
        loud[0] = 4.0;
        let mut quiet = [0.0f32; NUM_MEL_BANDS];
        quiet[0] = 0.25;
        let chroma = [0.0f32; NUM_CHROMA];
        let spectral = SpectralFeatures {
            mel: vec![loud, quiet],
            chroma: vec![chroma, chroma],
        };
        let visemes = a.generate_visemes(&spectral);
        assert_eq!(visemes[0].intensity, 1.0);
        assert!((visemes[1].intensity - 0.25).abs() < 1e-6);
    }
}
