use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::audio::CAPTURE_SAMPLE_RATE;
use crate::core::credentials::ApiKey;

pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// The realtime API takes PCM16 at the capture rate, so frames need no resampling.
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = CAPTURE_SAMPLE_RATE;

pub const OPENAI_REALTIME_INPUT_FORMAT: &str = "pcm16";

// =============================================================================
// Models
// =============================================================================

/// Realtime-capable models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenAIRealtimeModel {
    #[default]
    #[serde(rename = "gpt-4o-realtime-preview")]
    Gpt4oRealtimePreview,
    #[serde(rename = "gpt-4o-realtime-preview-2024-12-17")]
    Gpt4oRealtimePreview20241217,
    /// Lower latency, lower cost.
    #[serde(rename = "gpt-4o-mini-realtime-preview")]
    Gpt4oMiniRealtimePreview,
}

impl OpenAIRealtimeModel {
    const ALL: [Self; 3] = [
        Self::Gpt4oRealtimePreview,
        Self::Gpt4oRealtimePreview20241217,
        Self::Gpt4oMiniRealtimePreview,
    ];

    /// Value of the `model` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4oRealtimePreview => "gpt-4o-realtime-preview",
            Self::Gpt4oRealtimePreview20241217 => "gpt-4o-realtime-preview-2024-12-17",
            Self::Gpt4oMiniRealtimePreview => "gpt-4o-mini-realtime-preview",
        }
    }

    /// Case-insensitive lookup; `"mini"` is accepted as shorthand. Unknown
    /// names fall back to the default model.
    pub fn from_str_or_default(s: &str) -> Self {
        let name = s.trim().to_lowercase();
        if name == "mini" {
            return Self::Gpt4oMiniRealtimePreview;
        }
        Self::ALL
            .into_iter()
            .find(|model| model.as_str() == name)
            .unwrap_or_default()
    }
}

impl fmt::Display for OpenAIRealtimeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response output kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    /// Spoken output; its transcript is what gets rendered.
    Audio,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
        }
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Settings for [`OpenAIRealtimeTransport`](super::OpenAIRealtimeTransport).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAIRealtimeConfig {
    /// Sent as a bearer token on the upgrade request. Never serialized.
    #[serde(skip_serializing)]
    pub api_key: ApiKey,

    /// Endpoint without query string; the model is appended by [`ws_url`](Self::ws_url).
    pub url: String,

    pub model: OpenAIRealtimeModel,

    /// Requested for every response.
    pub modalities: Vec<Modality>,

    /// Handshake budget in seconds (default 10).
    pub connect_timeout_secs: u64,
}

impl Default for OpenAIRealtimeConfig {
    fn default() -> Self {
        Self {
            api_key: ApiKey::default(),
            url: OPENAI_REALTIME_URL.to_string(),
            model: OpenAIRealtimeModel::default(),
            modalities: vec![Modality::Text],
            connect_timeout_secs: 10,
        }
    }
}

impl OpenAIRealtimeConfig {
    pub fn new(api_key: impl Into<ApiKey>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn ws_url(&self) -> String {
        format!("{}?model={}", self.url, self.model)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub(crate) fn modality_names(&self) -> Vec<String> {
        self.modalities
            .iter()
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_names() {
        assert_eq!(
            OpenAIRealtimeModel::Gpt4oMiniRealtimePreview.to_string(),
            "gpt-4o-mini-realtime-preview"
        );
        assert_eq!(
            serde_json::to_string(&OpenAIRealtimeModel::Gpt4oRealtimePreview20241217).unwrap(),
            "\"gpt-4o-realtime-preview-2024-12-17\""
        );
    }

    #[test]
    fn test_model_lookup() {
        assert_eq!(
            OpenAIRealtimeModel::from_str_or_default("GPT-4o-mini-realtime-preview"),
            OpenAIRealtimeModel::Gpt4oMiniRealtimePreview
        );
        assert_eq!(
            OpenAIRealtimeModel::from_str_or_default("mini"),
            OpenAIRealtimeModel::Gpt4oMiniRealtimePreview
        );
        assert_eq!(
            OpenAIRealtimeModel::from_str_or_default("gpt-5-realtime"),
            OpenAIRealtimeModel::Gpt4oRealtimePreview
        );
    }

    #[test]
    fn test_ws_url_carries_model() {
        let config = OpenAIRealtimeConfig::new("sk-test");
        assert_eq!(
            config.ws_url(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );
    }

    #[test]
    fn test_defaults() {
        let config = OpenAIRealtimeConfig::default();
        assert_eq!(config.modality_names(), vec!["text".to_string()]);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(OPENAI_REALTIME_SAMPLE_RATE, 24_000);
    }
}
