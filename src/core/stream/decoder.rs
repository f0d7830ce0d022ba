//! Incremental decoder for `data:`-prefixed server-sent event streams.
//!
//! The decoder is fed arbitrary byte chunks as they arrive from the network.
//! Chunk boundaries carry no meaning: a line (or a multi-byte UTF-8 sequence)
//! split across two chunks decodes exactly as if it had arrived whole.

use serde::Deserialize;
use tracing::{trace, warn};

/// Payload that marks the end of a response stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One text fragment of a streamed response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeltaEvent {
    /// Text to append to the message being assembled. May be empty.
    pub text: String,
    /// Set on the final event of a response.
    pub done: bool,
}

impl DeltaEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            text: String::new(),
            done: true,
        }
    }
}

/// Minimal view of a streamed chat completion chunk; everything except
/// `choices[0].delta.content` is ignored.
#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Stateful line decoder for one response. Not restartable: once the done
/// sentinel is seen every later byte is ignored.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    done: bool,
    skipped_lines: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the done sentinel has been decoded.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of lines dropped because they could not be parsed.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Consumes a chunk of bytes and returns the events completed by it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DeltaEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        self.buffer.extend_from_slice(bytes);

        let mut consumed = 0;
        while let Some(pos) = self.buffer[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + pos;
            let line = self.buffer[consumed..end].to_vec();
            consumed = end + 1;

            if let Some(event) = self.decode_line(&line) {
                events.push(event);
            }
            if self.done {
                self.buffer.clear();
                return events;
            }
        }
        self.buffer.drain(..consumed);

        events
    }

    /// Decodes a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<DeltaEvent> {
        if self.done || self.buffer.is_empty() {
            self.buffer.clear();
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line).into_iter().collect()
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<DeltaEvent> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            return None;
        }

        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                self.skipped_lines += 1;
                warn!("Skipping stream line with invalid UTF-8: {}", e);
                return None;
            }
        };

        // Comments and non-data fields (event:, id:, retry:) carry no text
        let Some(data) = line.strip_prefix("data:") else {
            trace!("Ignoring non-data stream line: {}", line);
            return None;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);

        if data.trim() == DONE_SENTINEL {
            self.done = true;
            return Some(DeltaEvent::done());
        }

        match serde_json::from_str::<ChunkPayload>(data) {
            Ok(payload) => payload
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta)
                .and_then(|delta| delta.content)
                .map(DeltaEvent::text),
            Err(e) => {
                self.skipped_lines += 1;
                warn!("Skipping malformed stream payload: {}", e);
                None
            }
        }
    }
}
