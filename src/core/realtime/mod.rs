//! Realtime WebSocket transports.
//!
//! A realtime transport keeps a persistent connection for the whole voice
//! session and accepts captured audio directly, so no separate transcription
//! step is needed.
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_voice_client::core::realtime::{OpenAIRealtimeConfig, OpenAIRealtimeTransport};
//!
//! let transport = OpenAIRealtimeTransport::new(OpenAIRealtimeConfig::new("sk-..."))?;
//! transport.open().await?;
//! ```

mod base;
pub mod openai;

pub use base::{ConnectionState, handshake_error};
pub use openai::{
    Modality, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtimeConfig,
    OpenAIRealtimeModel, OpenAIRealtimeTransport,
};
