//! Incremental line splitting for streamed HTTP bodies.
//!
//! Bytes are buffered until a newline so multi-byte UTF-8 sequences split
//! across chunks decode correctly.

use crate::error::{LipSyncError, Result};
use futures_util::{Stream, StreamExt};

#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every complete line, without the trailing
    /// `\n` or `\r\n`.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Return the unterminated tail, if any.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Feed every line of a byte stream to `on_line` until it returns `false`.
pub(crate) async fn for_each_line<S, B, F>(service: &str, stream: S, mut on_line: F) -> Result<()>
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
    F: FnMut(&str) -> bool,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer = LineBuffer::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            LipSyncError::TransientIo(format!("{service} stream interrupted: {e}"))
        })?;
        for line in buffer.push(chunk.as_ref()) {
            if !on_line(&line) {
                return Ok(());
            }
        }
    }
    if let Some(line) = buffer.finish() {
        on_line(&line);
    }
    Ok(())
}
