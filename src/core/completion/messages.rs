//! Wire types for the chat completions API.
//!
//! API Reference: https://platform.openai.com/docs/api-reference/chat/create

use serde::{Deserialize, Serialize};

use super::base::{ChatMessage, CompletionRequest};

// =============================================================================
// Request Types
// =============================================================================

/// JSON body of a streamed chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionBody<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    pub temperature: f32,
    /// Number of candidate completions.
    #[serde(rename = "n")]
    pub candidate_count: u32,
}

impl<'a> ChatCompletionBody<'a> {
    pub fn new(model: &'a str, request: &'a CompletionRequest) -> Self {
        let params = request.params();
        Self {
            model,
            messages: request.messages(),
            stream: request.stream(),
            temperature: params.temperature,
            candidate_count: params.candidate_count,
        }
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// Error envelope returned with non-success statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiError,
}

/// Error details.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub message: String,

    #[serde(rename = "type", default)]
    pub error_type: Option<String>,

    #[serde(default)]
    pub code: Option<String>,
}

/// Extracts a readable message from an error body, falling back to the raw
/// text when it is not the standard envelope.
pub fn error_message(status: u16, body: &str) -> String {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(parsed) => match parsed.error.error_type {
            Some(kind) => format!("{} ({})", parsed.error.message, kind),
            None => parsed.error.message,
        },
        Err(_) if body.trim().is_empty() => format!("HTTP {status}"),
        Err(_) => body.trim().to_string(),
    }
}
