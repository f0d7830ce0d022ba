//! Voice session orchestration.
//!
//! [`SessionController`] owns one session at a time: audio capture, the
//! completion transport and the turn currently in flight. Progress is
//! reported as [`SessionEvent`]s on an unbounded channel.
//!
//! Only one request is in flight per session. An utterance that completes
//! while a response is still streaming is dropped, not queued.

mod config;
mod controller;
mod state;
mod turn;

pub use config::{DEFAULT_SYSTEM_INSTRUCTION, InputPipeline, SessionConfig};
pub use controller::SessionController;
pub use state::{Message, MessageUpdate, SessionError, SessionEvent, SessionState};

#[cfg(test)]
mod tests;
