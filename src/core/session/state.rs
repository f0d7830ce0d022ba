//! Session lifecycle states, events and errors.

use std::fmt;

use thiserror::Error;

use crate::core::audio::CaptureError;
use crate::core::completion::CompletionError;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle of a voice session.
///
/// `Idle -> Connecting -> Active -> Disconnecting -> Idle`; `Connecting` and
/// `Active` may move to `Failed`, which is left only through `disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Disconnecting,
    Failed,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Disconnecting => write!(f, "disconnecting"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// One conversational message as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub text: String,
    pub is_user: bool,
    /// No further text will be appended.
    pub complete: bool,
}

impl Message {
    /// A finished user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_user: true,
            complete: true,
        }
    }

    /// An empty assistant message awaiting deltas.
    pub fn assistant() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, delta: &str) {
        if !self.complete {
            self.text.push_str(delta);
        }
    }
}

/// Current content of a message belonging to one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageUpdate {
    pub turn_id: u64,
    pub message: Message,
}

// =============================================================================
// Events
// =============================================================================

/// Notifications delivered to the presentation layer, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session moved to a new state
    StateChanged(SessionState),
    /// The session became connected (`true`) or was torn down (`false`)
    ConnectionChanged(bool),
    /// A user message was recognized or an assistant message grew
    Message(MessageUpdate),
    /// An utterance arrived while `turn_in_flight` was still running and was discarded
    UtteranceDropped { turn_in_flight: u64 },
    /// The request for a turn failed transiently and will be reissued after `delay_ms`
    Retrying {
        turn_id: u64,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    /// A turn failed terminally; the session remains usable
    TurnFailed { turn_id: u64, reason: String },
    /// The session failed
    Error(String),
}

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by [`SessionController`](super::SessionController) operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("Session already started (state: {0})")]
    AlreadyActive(SessionState),

    #[error("Session is not active (state: {0})")]
    NotActive(SessionState),

    #[error("Invalid session configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Audio capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("Transport failed: {0}")]
    Transport(#[from] CompletionError),
}
