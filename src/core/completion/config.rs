//! Configuration for the streaming chat completions endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::credentials::ApiKey;

/// Default API base; the chat completions path is appended to it.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Path of the chat completions endpoint below the base URL.
pub const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// Model used when none is configured.
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-4";

/// Settings for [`HttpCompletionTransport`](super::HttpCompletionTransport).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Credential sent as a bearer token.
    #[serde(skip_serializing)]
    pub api_key: ApiKey,

    /// API base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,

    /// Model identifier sent with each request.
    pub model: String,

    /// Time allowed to establish the connection (seconds).
    /// Default: 10
    pub connect_timeout_secs: u64,

    /// Time allowed between response chunks before the read is abandoned
    /// (seconds). Default: 60
    pub read_timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: ApiKey::default(),
            base_url: OPENAI_API_BASE_URL.to_string(),
            model: DEFAULT_COMPLETION_MODEL.to_string(),
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
        }
    }
}

impl CompletionConfig {
    pub fn new(api_key: impl Into<ApiKey>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Full URL of the chat completions endpoint.
    pub fn api_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            CHAT_COMPLETIONS_PATH
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}
