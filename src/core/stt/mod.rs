//! Speech-to-text for the transcription input pipeline.
//!
//! - [`Transcriber`] converts one utterance to text
//! - [`WhisperTranscriber`] uploads the utterance to the OpenAI transcription endpoint

mod base;
mod config;
mod whisper;

pub use base::{Transcriber, TranscriptionError, TranscriptionResult};
pub use config::{DEFAULT_TRANSCRIPTION_MODEL, TRANSCRIPTIONS_PATH, TranscriptionConfig};
pub use whisper::{WhisperTranscriber, encode_wav};
