//! Content pipeline: transcribe, generate a reply, synthesize speech.

use super::{ContentGenerator, SpeechToText, TextToSpeech};
use crate::error::{LipSyncError, Result};
use std::path::{Path, PathBuf};
use tracing::{Instrument, error, info, info_span};

/// A unit of user input accepted by the intake surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Recorded speech saved to disk.
    Audio(PathBuf),
    /// Text typed or posted by the user.
    Text(String),
}

/// Chains the three producers. Synthesized files land in the voice
/// directory; nothing here touches the scene.
pub struct ContentPipeline {
    stt: Box<dyn SpeechToText>,
    generator: Box<dyn ContentGenerator>,
    tts: Box<dyn TextToSpeech>,
    span: tracing::Span,
}

impl std::fmt::Debug for ContentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentPipeline")
            .field("stt", &self.stt.name())
            .field("generator", &self.generator.name())
            .field("tts", &self.tts.name())
            .finish()
    }
}

impl ContentPipeline {
    pub fn new(
        stt: Box<dyn SpeechToText>,
        generator: Box<dyn ContentGenerator>,
        tts: Box<dyn TextToSpeech>,
    ) -> Self {
        let span = info_span!(
            "content_pipeline",
            stt = stt.name(),
            generator = generator.name(),
            tts = tts.name()
        );
        Self {
            stt,
            generator,
            tts,
            span,
        }
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Run one input through the chain and return the synthesized files.
    ///
    /// Audio input is transcribed first; text input goes straight to the
    /// generator.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::TransientIo`] if any stage fails or yields
    /// nothing usable.
    pub async fn process(&self, input: Input) -> Result<Vec<PathBuf>> {
        self.run(input).instrument(self.span.clone()).await
    }

    async fn run(&self, input: Input) -> Result<Vec<PathBuf>> {
        info!(?input, "processing input");

        let text = match input {
            Input::Audio(path) => self.stt.transcribe(&path).await?,
            Input::Text(text) => text,
        };
        if text.trim().is_empty() {
            error!("no text to respond to");
            return Err(LipSyncError::TransientIo("no text to respond to".into()));
        }

        let reply = self.generator.generate(&text).await?;
        if reply.trim().is_empty() {
            error!(generator = self.generator.name(), "no content generated");
            return Err(LipSyncError::TransientIo("no content generated".into()));
        }

        self.speak(&reply).await
    }

    /// Synthesize the contents of a text file directly, skipping generation.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Io`] if the file cannot be read and
    /// [`LipSyncError::TransientIo`] if synthesis fails.
    pub async fn process_text_file(&self, path: &Path) -> Result<Vec<PathBuf>> {
        async {
            let text = tokio::fs::read_to_string(path).await?;
            info!(path = %path.display(), chars = text.len(), "synthesizing text file");
            self.speak(&text).await
        }
        .instrument(self.span.clone())
        .await
    }

    async fn speak(&self, text: &str) -> Result<Vec<PathBuf>> {
        let files = self.tts.synthesize(text).await?;
        if files.is_empty() {
            error!(tts = self.tts.name(), "no audio generated");
            return Err(LipSyncError::TransientIo("no audio generated".into()));
        }
        info!(count = files.len(), "speech generated");
        Ok(files)
    }
}
