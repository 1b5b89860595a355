//! Ollama `/api/generate` adapter.
//!
//! The response is newline-delimited JSON; `response` fragments are
//! concatenated until a line reports `done`.

use super::lines::for_each_line;
use super::{ContentGenerator, map_http_error, request_error};
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
}

/// Generates replies with a local Ollama model.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(client: reqwest::Client, url: String, model: String) -> Self {
        Self { client, url, model }
    }
}

#[async_trait]
impl ContentGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, text: &str) -> Result<String> {
        let body = serde_json::json!({ "model": self.model, "prompt": text });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error("ollama", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error("ollama", status, &body));
        }

        let mut reply = String::new();
        for_each_line("ollama", response.bytes_stream(), |line| {
            if line.trim().is_empty() {
                return true;
            }
            match serde_json::from_str::<GenerateChunk>(line) {
                Ok(chunk) => {
                    if let Some(fragment) = chunk.response {
                        reply.push_str(&fragment);
                    }
                    !chunk.done
                }
                Err(e) => {
                    warn!(error = %e, "skipping malformed ollama line");
                    true
                }
            }
        })
        .await?;

        info!(model = %self.model, chars = reply.len(), "content generated");
        Ok(reply)
    }
}
