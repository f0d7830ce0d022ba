//! Conversational completion transports.
//!
//! - [`TurnTransport`] is the seam the session controller talks to
//! - [`HttpCompletionTransport`] streams chat completions over HTTPS
//!
//! The realtime WebSocket transport lives in [`crate::core::realtime`].

mod base;
mod client;
mod config;
mod messages;

pub use base::{
    AudioTurn, ChatMessage, CompletionError, CompletionRequest, CompletionResult, DeltaStream,
    GenerationParams, Role, TurnInput, TurnTransport,
};
pub use client::HttpCompletionTransport;
pub use config::{
    CHAT_COMPLETIONS_PATH, CompletionConfig, DEFAULT_COMPLETION_MODEL, OPENAI_API_BASE_URL,
};
pub use messages::{ApiError, ApiErrorResponse, ChatCompletionBody, error_message};
