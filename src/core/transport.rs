//! Transport selection.
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_voice_client::config::ClientConfig;
//! use waav_voice_client::core::create_transport;
//!
//! let config = ClientConfig::from_env()?;
//! let transport = create_transport(&config)?;
//! println!("using {}", transport.name());
//! ```

use std::fmt;
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::core::completion::{CompletionResult, HttpCompletionTransport, TurnTransport};
use crate::core::realtime::OpenAIRealtimeTransport;

/// Supported completion transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Streaming chat completions over HTTPS (text turns)
    #[default]
    Http,
    /// OpenAI Realtime WebSocket session (audio and text turns)
    Realtime,
}

impl TransportKind {
    /// Parse a transport name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" | "https" | "chat" | "sse" => Some(TransportKind::Http),
            "realtime" | "websocket" | "ws" => Some(TransportKind::Realtime),
            _ => None,
        }
    }

    /// Whether the transport can carry captured audio directly.
    pub fn accepts_audio(&self) -> bool {
        matches!(self, TransportKind::Realtime)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Http => write!(f, "http"),
            TransportKind::Realtime => write!(f, "realtime"),
        }
    }
}

/// Builds the transport selected by `config.transport`.
pub fn create_transport(config: &ClientConfig) -> CompletionResult<Arc<dyn TurnTransport>> {
    let transport: Arc<dyn TurnTransport> = match config.transport {
        TransportKind::Http => Arc::new(HttpCompletionTransport::new(config.completion_config())?),
        TransportKind::Realtime => {
            Arc::new(OpenAIRealtimeTransport::new(config.realtime_config())?)
        }
    };
    Ok(transport)
}

/// Names accepted by [`TransportKind::parse`].
pub fn get_supported_transports() -> Vec<&'static str> {
    vec!["http", "realtime"]
}
