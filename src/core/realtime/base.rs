//! Shared types for WebSocket realtime transports.

use std::fmt;

use tokio_tungstenite::tungstenite;

use crate::core::completion::CompletionError;

// =============================================================================
// Connection State
// =============================================================================

/// Where a realtime socket is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    Connected,
    /// The socket dropped without `close()` being called. Terminal.
    Failed,
}

impl ConnectionState {
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Classifies a WebSocket handshake failure. HTTP rejections of the upgrade
/// keep their status semantics so that 503 remains retryable.
pub fn handshake_error(err: tungstenite::Error) -> CompletionError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            let message = response
                .body()
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).trim().to_string())
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| format!("HTTP {status} during WebSocket upgrade"));
            match status {
                401 | 403 => CompletionError::Unauthorized(message),
                503 => CompletionError::Overloaded(message),
                _ => CompletionError::Rejected { status, message },
            }
        }
        other => CompletionError::NetworkFailure(format!("WebSocket connect failed: {other}")),
    }
}
