use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::state::SessionError;
use crate::core::audio::SegmenterConfig;
use crate::core::completion::GenerationParams;
use crate::core::retry::RetryPolicy;
use crate::core::stt::Transcriber;

/// System instruction sent ahead of every user utterance.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful voice assistant. Keep your responses concise and natural, as if speaking in conversation.";

/// Per-session behaviour of the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prepended to every request as the system message.
    pub system_instruction: String,
    pub params: GenerationParams,
    pub retry: RetryPolicy,
    pub segmenter: SegmenterConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            params: GenerationParams::default(),
            retry: RetryPolicy::default(),
            segmenter: SegmenterConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if !(0.0..=2.0).contains(&self.params.temperature) {
            return Err(SessionError::InvalidConfiguration(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.params.temperature
            )));
        }
        if self.params.candidate_count == 0 {
            return Err(SessionError::InvalidConfiguration(
                "candidate_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// How captured speech becomes a turn.
#[derive(Clone)]
pub enum InputPipeline {
    /// Each utterance is sent to the transport as raw audio.
    AudioForwarding,
    /// Each utterance is transcribed and sent as text. Without a transcriber
    /// captured audio is ignored and text arrives through `submit_text`.
    SpeechToText {
        transcriber: Option<Arc<dyn Transcriber>>,
    },
}

impl InputPipeline {
    /// Text supplied only through `submit_text`.
    pub fn text_only() -> Self {
        InputPipeline::SpeechToText { transcriber: None }
    }

    pub(crate) fn consumes_audio(&self) -> bool {
        match self {
            InputPipeline::AudioForwarding => true,
            InputPipeline::SpeechToText { transcriber } => transcriber.is_some(),
        }
    }
}

impl fmt::Debug for InputPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputPipeline::AudioForwarding => write!(f, "AudioForwarding"),
            InputPipeline::SpeechToText { transcriber } => f
                .debug_struct("SpeechToText")
                .field("transcriber", &transcriber.as_ref().map(|t| t.name()))
                .finish(),
        }
    }
}
