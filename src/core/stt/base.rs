use async_trait::async_trait;
use thiserror::Error;

use crate::core::audio::AudioFrame;

/// Error types for speech-to-text operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranscriptionError {
    #[error("Authentication failed: {0}")]
    Unauthorized(String),
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Audio encoding error: {0}")]
    Encoding(String),
}

/// Result type for transcription operations.
pub type TranscriptionResult<T> = Result<T, TranscriptionError>;

/// Converts one captured utterance to text.
///
/// Used by the speech-to-text input pipeline: the utterance is transcribed
/// and the transcript becomes the user message of a text turn.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Short provider name for logging.
    fn name(&self) -> &'static str;

    /// Transcribe the frames of one utterance. Returns an empty string when
    /// nothing intelligible was said.
    async fn transcribe(&self, frames: &[AudioFrame]) -> TranscriptionResult<String>;
}
