//! Configuration types for analysis, playback and the producer backends.

use crate::error::{LipSyncError, Result};
use crate::idle::IdleAnimationSpec;
use crate::viseme::Language;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LipSyncConfig {
    /// Viseme analysis settings.
    pub analysis: AnalysisConfig,
    /// Playback and timeline settings.
    pub playback: PlaybackConfig,
    /// Upload listener and folder monitor settings.
    pub intake: IntakeConfig,
    /// Speech-to-text, content generation and text-to-speech backends.
    pub producers: ProducersConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
    /// Idle animations layered under the lip-sync clips.
    pub idle: Vec<IdleAnimationSpec>,
}

/// Viseme analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Output frames per second.
    pub frame_rate: f32,
    /// Summed mel energy below which a frame counts as silent.
    ///
    /// Also the normalization constant for viseme intensity, so it must be > 0.
    pub silence_threshold: f32,
    /// Silent frames tolerated before the mouth closes.
    pub max_silence_frames: u32,
    /// Phoneme table used to pick visemes.
    pub language: Language,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            frame_rate: 24.0,
            silence_threshold: 0.01,
            max_silence_frames: 5,
            language: Language::Chinese,
        }
    }
}

impl AnalysisConfig {
    /// Check the analysis parameters.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Config`] for a non-positive frame rate, a
    /// silence threshold outside `(0, 1]` or a zero silence run length.
    pub fn validate(&self) -> Result<()> {
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(LipSyncError::Config(format!(
                "frame_rate must be > 0, got {}",
                self.frame_rate
            )));
        }
        if !(self.silence_threshold > 0.0 && self.silence_threshold <= 1.0) {
            return Err(LipSyncError::Config(format!(
                "silence_threshold must be in (0, 1], got {}",
                self.silence_threshold
            )));
        }
        if self.max_silence_frames < 1 {
            return Err(LipSyncError::Config(
                "max_silence_frames must be >= 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Playback, background audio and scene range configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Restart from the first frame when the timeline runs out.
    pub loop_playback: bool,
    /// Background track volume in `[0, 1]`.
    pub bg_volume: f32,
    /// User-chosen background track (falls back to `default_background`).
    pub background_music: Option<PathBuf>,
    /// Bundled background track.
    pub default_background: PathBuf,
    /// First frame of the scene.
    pub frame_start: i64,
    /// Initial last frame of the scene.
    pub frame_end: i64,
    /// Name of the mesh that receives the mouth shapes.
    pub target_name: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            loop_playback: true,
            bg_volume: 1.0,
            background_music: None,
            default_background: PathBuf::from("assets/bg/default.mp3"),
            frame_start: 1,
            frame_end: 250,
            target_name: "Face".to_owned(),
        }
    }
}

/// Upload listener and folder monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Whether the HTTP upload listener runs.
    pub listen: bool,
    /// Listener port on localhost.
    pub port: u16,
    /// Directory uploaded audio files are written to.
    pub upload_dir: PathBuf,
    /// Whether the folder monitor runs.
    pub monitor: bool,
    /// Folder watched for new `.wav` / `.mp3` files.
    pub monitor_folder: PathBuf,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        let data = dirs_data_dir();
        Self {
            listen: true,
            port: 9990,
            upload_dir: data.join("uploads"),
            monitor: true,
            monitor_folder: data.join("voice"),
        }
    }
}

/// Which speech-to-text service to call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttBackend {
    /// Whisper ASR webservice.
    #[default]
    Whisper,
}

/// Which text generation service to call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorBackend {
    /// OpenAI-compatible chat completions.
    OpenAi,
    /// Local Ollama server.
    #[default]
    Ollama,
    /// Dify agent.
    Dify,
}

/// Which text-to-speech service to call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsBackend {
    /// ChatTTS web UI API.
    #[default]
    ChatTts,
}

/// Remote producer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducersConfig {
    /// Speech-to-text backend.
    pub stt: SttBackend,
    /// Whisper ASR endpoint (e.g. `http://localhost:9000/asr`).
    pub whisper_url: String,
    /// Text generation backend.
    pub generator: GeneratorBackend,
    /// Ollama generate endpoint.
    pub ollama_url: String,
    /// Ollama model name.
    pub ollama_model: String,
    /// OpenAI-compatible base URL (without `/v1`).
    pub openai_base_url: String,
    /// OpenAI API key.
    pub openai_api_key: String,
    /// OpenAI model name.
    pub openai_model: String,
    /// Dify chat-messages endpoint.
    pub dify_url: String,
    /// Dify API key.
    pub dify_api_key: String,
    /// Text-to-speech backend.
    pub tts: TtsBackend,
    /// ChatTTS `/tts` endpoint.
    pub chattts_url: String,
    /// Directory synthesized audio is downloaded to.
    ///
    /// Defaults to the monitored folder so new speech is picked up for analysis.
    pub voice_dir: Option<PathBuf>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ProducersConfig {
    fn default() -> Self {
        Self {
            stt: SttBackend::default(),
            whisper_url: "http://localhost:9000/asr".to_owned(),
            generator: GeneratorBackend::default(),
            ollama_url: "http://localhost:11434/api/generate".to_owned(),
            ollama_model: "qwen2".to_owned(),
            openai_base_url: "https://api.openai.com".to_owned(),
            openai_api_key: String::new(),
            openai_model: "gpt-4o-mini".to_owned(),
            dify_url: "http://localhost/v1/chat-messages".to_owned(),
            dify_api_key: String::new(),
            tts: TtsBackend::default(),
            chattts_url: "http://127.0.0.1:9966/tts".to_owned(),
            voice_dir: None,
            timeout_secs: 120,
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files (`None` = stderr only).
    pub log_dir: Option<PathBuf>,
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            filter: "lipsync=info".to_owned(),
        }
    }
}

fn dirs_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lipsync")
}

impl LipSyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| LipSyncError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| LipSyncError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lipsync")
            .join("config.toml")
    }

    /// Directory synthesized speech lands in.
    pub fn voice_dir(&self) -> PathBuf {
        self.producers
            .voice_dir
            .clone()
            .unwrap_or_else(|| self.intake.monitor_folder.clone())
    }

    /// Check every section for out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.analysis.validate()?;
        if !(0.0..=1.0).contains(&self.playback.bg_volume) {
            return Err(LipSyncError::Config(format!(
                "bg_volume must be in [0, 1], got {}",
                self.playback.bg_volume
            )));
        }
        if self.playback.frame_end < self.playback.frame_start {
            return Err(LipSyncError::Config(format!(
                "frame_end ({}) precedes frame_start ({})",
                self.playback.frame_end, self.playback.frame_start
            )));
        }
        for spec in &self.idle {
            spec.validate()?;
        }
        Ok(())
    }
}
