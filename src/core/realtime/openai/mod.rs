//! OpenAI Realtime API transport.
//!
//! Holds one WebSocket session open for a voice session and runs each turn
//! as an explicit commit followed by `response.create`.
//!
//! # Supported Models
//!
//! - `gpt-4o-realtime-preview` - GPT-4o Realtime Preview
//! - `gpt-4o-realtime-preview-2024-12-17` - December 2024 version
//! - `gpt-4o-mini-realtime-preview` - Mini model for lower latency
//!
//! # Audio Format
//!
//! Input audio is PCM 16-bit signed little-endian at 24kHz, the capture
//! format, so frames are forwarded without resampling.

mod client;
mod config;
mod messages;

pub use client::OpenAIRealtimeTransport;
pub use config::{
    Modality, OPENAI_REALTIME_INPUT_FORMAT, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL,
    OpenAIRealtimeConfig, OpenAIRealtimeModel,
};
pub use messages::{
    ApiError, ClientEvent, ConversationItem, ResponseConfig, ServerEvent, SessionConfig,
    TurnDetection,
};
