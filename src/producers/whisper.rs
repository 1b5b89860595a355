//! Whisper ASR webservice adapter.

use super::{SpeechToText, map_http_error, request_error};
use crate::error::{LipSyncError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct AsrResponse {
    text: String,
}

/// Posts audio to a Whisper ASR webservice (`/asr?output=json`).
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    client: reqwest::Client,
    url: String,
}

impl WhisperTranscriber {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl SpeechToText for WhisperTranscriber {
    fn name(&self) -> &str {
        "whisper"
    }

    async fn transcribe(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            LipSyncError::TransientIo(format!("cannot read {}: {e}", path.display()))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_owned());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("audio_file", part);

        let response = self
            .client
            .post(&self.url)
            .query(&[("output", "json")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error("whisper", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error("whisper", status, &body));
        }

        let parsed: AsrResponse = response
            .json()
            .await
            .map_err(|e| LipSyncError::TransientIo(format!("whisper returned invalid JSON: {e}")))?;
        info!(chars = parsed.text.len(), "audio transcribed");
        Ok(parsed.text)
    }
}
