//! ChatTTS webui adapter.
//!
//! The service synthesizes one or more files and returns their URLs; each
//! is downloaded into the voice directory, where the folder monitor picks
//! it up for analysis.

use super::{TextToSpeech, map_http_error, request_error};
use crate::error::{LipSyncError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct TtsResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    audio_files: Vec<AudioFile>,
}

#[derive(Debug, Deserialize)]
struct AudioFile {
    url: String,
}

/// Synthesizes speech with a ChatTTS webui instance.
#[derive(Debug, Clone)]
pub struct ChatTtsSynthesizer {
    client: reqwest::Client,
    url: String,
    voice_dir: PathBuf,
}

impl ChatTtsSynthesizer {
    pub fn new(client: reqwest::Client, url: String, voice_dir: PathBuf) -> Self {
        Self {
            client,
            url,
            voice_dir,
        }
    }

    fn form(text: &str) -> [(&'static str, String); 13] {
        [
            ("text", text.to_owned()),
            ("prompt", "[break_6]".to_owned()),
            ("voice", "1031.pt".to_owned()),
            ("speed", "5".to_owned()),
            ("temperature", "0.1".to_owned()),
            ("top_p", "0.701".to_owned()),
            ("top_k", "20".to_owned()),
            ("refine_max_new_token", "384".to_owned()),
            ("infer_max_new_token", "2048".to_owned()),
            ("text_seed", "42".to_owned()),
            ("skip_refine", "1".to_owned()),
            ("is_stream", "0".to_owned()),
            ("custom_voice", "0".to_owned()),
        ]
    }

    async fn download(&self, url: &str) -> Result<PathBuf> {
        let file_name = url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| LipSyncError::TransientIo(format!("no file name in {url}")))?;
        let dest = self.voice_dir.join(file_name);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error("chattts", &e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error("chattts", status, &body));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| request_error("chattts", &e))?;
        tokio::fs::write(&dest, &bytes).await?;
        Ok(dest)
    }
}

#[async_trait]
impl TextToSpeech for ChatTtsSynthesizer {
    fn name(&self) -> &str {
        "chattts"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<PathBuf>> {
        let response = self
            .client
            .post(&self.url)
            .form(&Self::form(text))
            .send()
            .await
            .map_err(|e| request_error("chattts", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error("chattts", status, &body));
        }

        let parsed: TtsResponse = response
            .json()
            .await
            .map_err(|e| LipSyncError::TransientIo(format!("chattts returned invalid JSON: {e}")))?;
        if parsed.code != 0 {
            return Err(LipSyncError::TransientIo(format!(
                "chattts synthesis failed: {}",
                parsed.msg
            )));
        }

        tokio::fs::create_dir_all(&self.voice_dir).await?;
        let mut written = Vec::with_capacity(parsed.audio_files.len());
        for file in &parsed.audio_files {
            match self.download(&file.url).await {
                Ok(path) => {
                    info!(path = %path.display(), "synthesized audio saved");
                    written.push(path);
                }
                Err(e) => warn!(url = %file.url, error = %e, "failed to download synthesized audio"),
            }
        }
        Ok(written)
    }
}
