use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::completion::OPENAI_API_BASE_URL;
use crate::core::credentials::ApiKey;

/// Path of the transcription endpoint below the API base URL.
pub const TRANSCRIPTIONS_PATH: &str = "/audio/transcriptions";

/// Model used when none is configured.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Settings for [`WhisperTranscriber`](super::WhisperTranscriber).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Credential sent as a bearer token.
    #[serde(skip_serializing)]
    pub api_key: ApiKey,

    /// API base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,

    /// Transcription model.
    pub model: String,

    /// ISO-639-1 language hint. Detected automatically when unset.
    pub language: Option<String>,

    /// Total time allowed for one transcription request (seconds).
    /// Default: 30
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: ApiKey::default(),
            base_url: OPENAI_API_BASE_URL.to_string(),
            model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            language: None,
            timeout_secs: 30,
        }
    }
}

impl TranscriptionConfig {
    pub fn new(api_key: impl Into<ApiKey>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Full URL of the transcription endpoint.
    pub fn api_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            TRANSCRIPTIONS_PATH
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
