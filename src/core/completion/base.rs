//! Base traits and types for conversational completion transports.
//!
//! A transport turns one user turn into a stream of [`DeltaEvent`]s. The
//! session controller only sees this trait, so the HTTP streaming endpoint
//! and the realtime WebSocket session are interchangeable.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::audio::AudioFrame;
use crate::core::stream::DeltaEvent;

// =============================================================================
// Error Types
// =============================================================================

/// Errors reported by a completion transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    /// The provider is temporarily overloaded (HTTP 503); safe to retry
    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    /// The credential was rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The request or the response could not be understood
    #[error("Malformed exchange: {0}")]
    Malformed(String),

    /// Connection-level failure before or during the response
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Any other non-success status from the provider
    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The transport cannot carry this kind of input
    #[error("Unsupported input: {0}")]
    Unsupported(String),
}

impl CompletionError {
    /// Whether the failure is transient and the same request may be reissued.
    pub fn is_transient(&self) -> bool {
        matches!(self, CompletionError::Overloaded(_))
    }
}

/// Result type for completion operations.
pub type CompletionResult<T> = Result<T, CompletionError>;

/// Ordered stream of response fragments for one turn.
pub type DeltaStream = BoxStream<'static, CompletionResult<DeltaEvent>>;

// =============================================================================
// Request Types
// =============================================================================

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
        }
    }
}

/// A role-tagged message sent to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Generation parameters attached to every request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Sampling temperature (0.0 to 2.0).
    /// Default: 0.7
    pub temperature: f32,

    /// Number of candidate completions requested.
    /// Default: 1
    pub candidate_count: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            candidate_count: 1,
        }
    }
}

/// One conversational request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    messages: Vec<ChatMessage>,
    params: GenerationParams,
    stream: bool,
}

impl CompletionRequest {
    /// Builds the request for one user utterance: the system instruction
    /// followed by the user's text. Responses are always streamed.
    pub fn for_utterance(
        system_instruction: &str,
        user_text: impl Into<String>,
        params: GenerationParams,
    ) -> Self {
        Self {
            messages: vec![
                ChatMessage::system(system_instruction),
                ChatMessage::user(user_text),
            ],
            params,
            stream: true,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn params(&self) -> GenerationParams {
        self.params
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    /// Text of the last user message.
    pub fn user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Text of the system instruction, if any.
    pub fn system_instruction(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }
}

/// A captured utterance forwarded as raw audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTurn {
    pub instructions: String,
    pub frames: Vec<AudioFrame>,
    pub params: GenerationParams,
}

/// Input for one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnInput {
    Text(CompletionRequest),
    Audio(AudioTurn),
}

impl TurnInput {
    pub fn kind(&self) -> &'static str {
        match self {
            TurnInput::Text(_) => "text",
            TurnInput::Audio(_) => "audio",
        }
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Strategy for delivering a turn to the completion provider.
///
/// # Example
///
/// ```rust,ignore
/// use futures::StreamExt;
///
/// let request = CompletionRequest::for_utterance(
///     "You are a helpful voice assistant.",
///     "What's the weather like?",
///     GenerationParams::default(),
/// );
/// let mut deltas = transport.send_turn(&TurnInput::Text(request)).await?;
/// while let Some(delta) = deltas.next().await {
///     print!("{}", delta?.text);
/// }
/// ```
#[async_trait]
pub trait TurnTransport: Send + Sync {
    /// Short provider name for logging.
    fn name(&self) -> &'static str;

    /// Whether [`TurnInput::Audio`] turns are accepted.
    fn accepts_audio(&self) -> bool;

    /// Prepare the transport for a session. Stateless transports do nothing.
    async fn open(&self) -> CompletionResult<()> {
        Ok(())
    }

    /// Send one turn; the returned stream yields the response fragments in
    /// order. Dropping the stream abandons the response.
    async fn send_turn(&self, input: &TurnInput) -> CompletionResult<DeltaStream>;

    /// Release any session resources. Idempotent.
    async fn close(&self) {}

    /// `false` once the transport can no longer serve turns.
    fn is_usable(&self) -> bool {
        true
    }
}
