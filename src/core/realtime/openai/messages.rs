//! Wire events for the OpenAI Realtime WebSocket.
//!
//! Only what a text-rendering voice client acts on is modelled. Every other
//! server event lands in [`ServerEvent::Other`] and is ignored.
//!
//! API Reference: https://platform.openai.com/docs/api-reference/realtime

use std::collections::HashMap;

use base64::prelude::*;
use serde::{Deserialize, Serialize};

/// Metadata key tagging each `response.create` with the client turn that
/// requested it. The server echoes response metadata back on the response.
pub const TURN_TAG_KEY: &str = "client_turn";

// =============================================================================
// Session
// =============================================================================

/// Body of `session.update`. Unset fields keep the server's current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Always `pcm16` for this client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// `Some(TurnDetection::None {})` switches server VAD off so that the
    /// client decides where an utterance ends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Turn detection mode. The client segments utterances itself, so only the
/// disabled form is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    None {},
}

// =============================================================================
// Conversation items
// =============================================================================

/// Item added with `conversation.item.create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    /// A user message with a single `input_text` part.
    pub fn user_text(text: &str) -> Self {
        Self {
            item_type: "message".to_string(),
            role: "user".to_string(),
            content: vec![ContentPart {
                part_type: "input_text".to_string(),
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: String,
    pub text: String,
}

/// Overrides carried by one `response.create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl ResponseConfig {
    pub fn tagged(mut self, tag: &str) -> Self {
        self.metadata = Some(HashMap::from([(TURN_TAG_KEY.to_string(), tag.to_string())]));
        self
    }
}

// =============================================================================
// Client events
// =============================================================================

/// Events this client writes to the socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Base64 PCM16 LE audio appended to the input buffer.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    /// Closes the buffered audio as one user item.
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    /// Cancels `response_id`, or the in-progress response when unset.
    #[serde(rename = "response.cancel")]
    ResponseCancel {
        #[serde(skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
}

impl ClientEvent {
    /// Wraps raw PCM16 bytes in an append event.
    pub fn audio_append(pcm: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(pcm),
        }
    }

    /// Wire name, for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::ResponseCancel { .. } => "response.cancel",
        }
    }
}

// =============================================================================
// Server events
// =============================================================================

/// Events read from the socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(rename = "session.created")]
    SessionCreated { session: Session },

    #[serde(rename = "session.updated")]
    SessionUpdated { session: Session },

    /// First event of a response; carries the id later deltas refer to.
    #[serde(rename = "response.created")]
    ResponseCreated { response: Response },

    /// Last event of a response, whatever its outcome.
    #[serde(rename = "response.done")]
    ResponseDone { response: Response },

    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        response_id: String,
        delta: String,
    },

    /// Transcript of spoken output when audio modality is enabled.
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        response_id: String,
        delta: String,
    },

    #[serde(other)]
    Other,
}

/// Error payload of `error` events and failed responses.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: String,
    /// `in_progress`, `completed`, `cancelled`, `failed` or `incomplete`.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub status_details: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

impl Response {
    /// Turn tag echoed from the `response.create` that started this response.
    pub fn turn_tag(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get(TURN_TAG_KEY))
            .map(String::as_str)
    }

    pub fn is_failed(&self) -> bool {
        self.status.as_deref() == Some("failed")
    }

    /// Error nested in `status_details` of a failed response.
    pub fn failure(&self) -> Option<ApiError> {
        self.status_details
            .as_ref()
            .and_then(|details| details.get("error"))
            .and_then(|error| serde_json::from_value(error.clone()).ok())
    }
}
