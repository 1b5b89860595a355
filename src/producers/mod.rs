//! Remote producers: speech-to-text, content generation and text-to-speech.
//!
//! Each producer is a thin HTTP adapter behind an async trait so the
//! pipeline can be assembled from configuration and tested against mock
//! servers. Every failure surfaces as [`LipSyncError::TransientIo`]; no
//! producer retries on its own.

mod chattts;
mod dify;
mod lines;
mod ollama;
mod openai;
mod pipeline;
mod whisper;

pub use chattts::ChatTtsSynthesizer;
pub use dify::DifyGenerator;
pub use ollama::OllamaGenerator;
pub use openai::OpenAiGenerator;
pub use pipeline::{ContentPipeline, Input};
pub use whisper::WhisperTranscriber;

use crate::config::{GeneratorBackend, ProducersConfig, SttBackend, TtsBackend};
use crate::error::{LipSyncError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Turns recorded speech into text.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Service name for logs.
    fn name(&self) -> &str;

    /// Transcribe the audio file at `path`.
    async fn transcribe(&self, path: &Path) -> Result<String>;
}

/// Produces a reply to the user's text.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Service name for logs.
    fn name(&self) -> &str;

    /// Generate a reply for `text`.
    async fn generate(&self, text: &str) -> Result<String>;
}

/// Speaks text into audio files.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Service name for logs.
    fn name(&self) -> &str;

    /// Synthesize `text`, returning the local audio files written.
    async fn synthesize(&self, text: &str) -> Result<Vec<PathBuf>>;
}

/// Shared HTTP client with the configured request timeout.
///
/// # Errors
///
/// Returns [`LipSyncError::TransientIo`] if the client cannot be built.
pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| LipSyncError::TransientIo(format!("failed to build HTTP client: {e}")))
}

/// Map a non-success HTTP response to a transient error.
pub(crate) fn map_http_error(service: &str, status: reqwest::StatusCode, body: &str) -> LipSyncError {
    let message = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => LipSyncError::TransientIo(format!("{service} authentication failed: {message}")),
        429 => LipSyncError::TransientIo(format!("{service} rate limited: {message}")),
        code => LipSyncError::TransientIo(format!("{service} HTTP {code}: {message}")),
    }
}

/// Map a transport failure to a transient error.
pub(crate) fn request_error(service: &str, error: &reqwest::Error) -> LipSyncError {
    LipSyncError::TransientIo(format!("{service} request failed: {error}"))
}

/// Pull a readable message out of a JSON error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let error = v.get("error");
            error
                .and_then(|e| e.get("message"))
                .or(error)
                .or_else(|| v.get("message"))
                .or_else(|| v.get("msg"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Build the producers selected in `config`.
///
/// # Errors
///
/// Returns [`LipSyncError::TransientIo`] if the HTTP client cannot be built.
pub fn build_pipeline(config: &ProducersConfig, voice_dir: PathBuf) -> Result<ContentPipeline> {
    let client = http_client(config.timeout_secs)?;

    let stt: Box<dyn SpeechToText> = match config.stt {
        SttBackend::Whisper => Box::new(WhisperTranscriber::new(
            client.clone(),
            config.whisper_url.clone(),
        )),
    };
    let generator: Box<dyn ContentGenerator> = match config.generator {
        GeneratorBackend::Ollama => Box::new(OllamaGenerator::new(
            client.clone(),
            config.ollama_url.clone(),
            config.ollama_model.clone(),
        )),
        GeneratorBackend::OpenAi => Box::new(OpenAiGenerator::new(
            client.clone(),
            config.openai_base_url.clone(),
            config.openai_api_key.clone(),
            config.openai_model.clone(),
        )),
        GeneratorBackend::Dify => Box::new(DifyGenerator::new(
            client.clone(),
            config.dify_url.clone(),
            config.dify_api_key.clone(),
        )),
    };
    let tts: Box<dyn TextToSpeech> = match config.tts {
        TtsBackend::ChatTts => Box::new(ChatTtsSynthesizer::new(
            client,
            config.chattts_url.clone(),
            voice_dir,
        )),
    };

    Ok(ContentPipeline::new(stt, generator, tts))
}
