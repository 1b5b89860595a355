//! Dify agent adapter.
//!
//! Dify streams server-sent events; the reply is the concatenated `answer`
//! of every `agent_message` event.

use super::lines::for_each_line;
use super::{ContentGenerator, map_http_error, request_error};
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct AgentEvent {
    #[serde(default)]
    event: String,
    #[serde(default)]
    answer: Option<String>,
}

/// Generates replies with a Dify agent application.
#[derive(Clone)]
pub struct DifyGenerator {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl std::fmt::Debug for DifyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DifyGenerator").field("url", &self.url).finish()
    }
}

impl DifyGenerator {
    pub fn new(client: reqwest::Client, url: String, api_key: String) -> Self {
        Self {
            client,
            url,
            api_key,
        }
    }
}

#[async_trait]
impl ContentGenerator for DifyGenerator {
    fn name(&self) -> &str {
        "dify"
    }

    async fn generate(&self, text: &str) -> Result<String> {
        let body = serde_json::json!({
            "query": text,
            "user": "lipsync",
            "inputs": {},
            "response_mode": "streaming",
        });
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error("dify", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error("dify", status, &body));
        }

        let mut reply = String::new();
        for_each_line("dify", response.bytes_stream(), |line| {
            let Some(data) = line.strip_prefix("data: ") else {
                return true;
            };
            match serde_json::from_str::<AgentEvent>(data) {
                Ok(event) if event.event == "agent_message" => {
                    if let Some(answer) = event.answer {
                        reply.push_str(&answer);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "skipping malformed dify event"),
            }
            true
        })
        .await?;

        info!(chars = reply.len(), "content generated");
        Ok(reply)
    }
}
