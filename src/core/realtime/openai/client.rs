//! OpenAI Realtime API transport.
//!
//! One WebSocket session is held open for the lifetime of a voice session.
//! Each turn either appends and commits captured audio or creates a user
//! text item, then requests a text response whose deltas are streamed back.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use waav_voice_client::core::realtime::{OpenAIRealtimeConfig, OpenAIRealtimeTransport};
//!
//! let transport = OpenAIRealtimeTransport::new(OpenAIRealtimeConfig::new("sk-..."))?;
//! transport.open().await?;
//! let mut deltas = transport.send_turn(&TurnInput::Audio(turn)).await?;
//! while let Some(delta) = deltas.next().await {
//!     print!("{}", delta?.text);
//! }
//! transport.close().await;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use http::header::AUTHORIZATION;
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, error, info, warn};

use super::config::{OPENAI_REALTIME_INPUT_FORMAT, OpenAIRealtimeConfig};
use super::messages::{
    ApiError, ClientEvent, ConversationItem, Response, ResponseConfig, ServerEvent,
    SessionConfig, TurnDetection,
};
use crate::core::completion::{
    CompletionError, CompletionResult, DeltaStream, GenerationParams, TurnInput, TurnTransport,
};
use crate::core::realtime::base::{ConnectionState, handshake_error};
use crate::core::stream::DeltaEvent;

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Time allowed for the connection task to send a close frame and exit.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Temperature range accepted by the Realtime API.
const MIN_TEMPERATURE: f32 = 0.6;
const MAX_TEMPERATURE: f32 = 1.2;

type TurnSink = mpsc::UnboundedSender<CompletionResult<DeltaEvent>>;

/// Where server events for the turn in flight are delivered.
struct TurnRoute {
    sink: TurnSink,
    /// Sent as response metadata so the server's `response.created` can be
    /// matched to this turn.
    tag: String,
    /// Response claimed by this turn. Only `response.created` binds it.
    response_id: Option<String>,
}

impl TurnRoute {
    fn new(sink: TurnSink, tag: impl Into<String>) -> Self {
        Self {
            sink,
            tag: tag.into(),
            response_id: None,
        }
    }

    /// Binds the route to a newly created response. A response tagged for
    /// another turn is refused; an untagged one binds only an unbound route.
    fn claim(&mut self, response: &Response) -> bool {
        if self.response_id.is_some() {
            return false;
        }
        if response.turn_tag().is_some_and(|tag| tag != self.tag) {
            return false;
        }
        self.response_id = Some(response.id.clone());
        true
    }

    fn owns(&self, response_id: &str) -> bool {
        self.response_id.as_deref() == Some(response_id)
    }
}

type SharedRoute = Arc<SyncMutex<Option<TurnRoute>>>;

// =============================================================================
// OpenAI Realtime Transport
// =============================================================================

/// [`TurnTransport`] over the OpenAI Realtime WebSocket API.
///
/// # Thread Safety
///
/// State shared with the spawned WebSocket task is held behind `Arc`.
/// The `connected` flag uses `Arc<AtomicBool>` for lock-free status checks.
/// A lost connection is not re-established; the transport reports itself
/// unusable and the session decides what to do.
pub struct OpenAIRealtimeTransport {
    /// Configuration
    config: OpenAIRealtimeConfig,
    /// Connection state
    state: Arc<RwLock<ConnectionState>>,
    /// Connected flag for fast checks (shared with connection task)
    connected: Arc<AtomicBool>,
    /// Session ID assigned by the server
    session_id: Arc<RwLock<Option<String>>>,

    /// WebSocket sender channel
    ws_sender: Mutex<Option<mpsc::Sender<ClientEvent>>>,

    /// Delivery route for the turn in flight
    turn_route: SharedRoute,

    /// Connection task handle
    connection_handle: Mutex<Option<JoinHandle<()>>>,

    /// Set by `close` so the connection task does not report a failure
    intentional_disconnect: Arc<AtomicBool>,

    /// Source of per-turn response tags
    turn_counter: AtomicU64,
}

impl OpenAIRealtimeTransport {
    pub fn new(config: OpenAIRealtimeConfig) -> CompletionResult<Self> {
        if config.api_key.is_empty() {
            return Err(CompletionError::Unauthorized("API key is required".into()));
        }

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            session_id: Arc::new(RwLock::new(None)),
            ws_sender: Mutex::new(None),
            turn_route: Arc::new(SyncMutex::new(None)),
            connection_handle: Mutex::new(None),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
            turn_counter: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &OpenAIRealtimeConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Session ID from `session.created`, once received.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn build_session_config(&self) -> SessionConfig {
        SessionConfig {
            modalities: Some(self.config.modality_names()),
            input_audio_format: Some(OPENAI_REALTIME_INPUT_FORMAT.to_string()),
            // Utterances are segmented locally and committed explicitly.
            turn_detection: Some(TurnDetection::None {}),
            ..Default::default()
        }
    }

    fn response_create(
        &self,
        instructions: &str,
        params: GenerationParams,
        tag: &str,
    ) -> ClientEvent {
        let instructions = (!instructions.is_empty()).then(|| instructions.to_string());
        let response = ResponseConfig {
            modalities: Some(self.config.modality_names()),
            instructions,
            temperature: Some(params.temperature.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)),
            metadata: None,
        };
        ClientEvent::ResponseCreate {
            response: Some(response.tagged(tag)),
        }
    }

    /// Send an event to the WebSocket.
    async fn send_event(&self, event: ClientEvent) -> CompletionResult<()> {
        let sender = self.ws_sender.lock().await.clone();
        match sender {
            Some(sender) => sender.send(event).await.map_err(|_| {
                CompletionError::NetworkFailure("Realtime connection closed".into())
            }),
            None => Err(CompletionError::NetworkFailure(
                "Realtime session is not connected".into(),
            )),
        }
    }

    async fn submit(&self, input: &TurnInput, tag: &str) -> CompletionResult<()> {
        match input {
            TurnInput::Audio(turn) => {
                for frame in &turn.frames {
                    self.send_event(ClientEvent::audio_append(&frame.to_pcm16_le()))
                        .await?;
                }
                self.send_event(ClientEvent::InputAudioBufferCommit).await?;
                self.send_event(self.response_create(&turn.instructions, turn.params, tag))
                    .await
            }
            TurnInput::Text(request) => {
                let text = request.user_text().unwrap_or_default();
                self.send_event(ClientEvent::ConversationItemCreate {
                    item: ConversationItem::user_text(text),
                })
                .await?;
                let instructions = request.system_instruction().unwrap_or_default();
                self.send_event(self.response_create(instructions, request.params(), tag))
                    .await
            }
        }
    }
}

/// Maps a Realtime API error event to a completion error.
fn map_api_error(error: &ApiError) -> CompletionError {
    let message = error.message.clone();
    let code = error.code.as_deref().unwrap_or_default();
    match (error.error_type.as_str(), code) {
        (_, "invalid_api_key") | ("authentication_error", _) => {
            CompletionError::Unauthorized(message)
        }
        (_, "overloaded") | (_, "server_overloaded") => CompletionError::Overloaded(message),
        (_, "rate_limit_exceeded") | ("rate_limit_error", _) => CompletionError::Rejected {
            status: 429,
            message,
        },
        ("invalid_request_error", _) => CompletionError::Malformed(message),
        ("server_error", _) => CompletionError::Rejected {
            status: 500,
            message,
        },
        _ => CompletionError::Rejected {
            status: 400,
            message,
        },
    }
}

/// Delivers one server event to the turn in flight.
///
/// Deltas and completions reach the turn only for the response it claimed on
/// `response.created`; everything else belongs to an abandoned response and
/// is dropped. Returns an event to write back, used to cancel responses that
/// no turn is waiting for.
fn route_server_event(
    event: ServerEvent,
    turn_route: &SyncMutex<Option<TurnRoute>>,
    session_id: &RwLock<Option<String>>,
) -> Option<ClientEvent> {
    match event {
        ServerEvent::SessionCreated { session } => {
            info!("Realtime session created: {}", session.id);
            *session_id.write() = Some(session.id);
        }
        ServerEvent::SessionUpdated { session } => {
            debug!("Realtime session updated: {}", session.id);
        }
        ServerEvent::ResponseCreated { response } => {
            let claimed = turn_route
                .lock()
                .as_mut()
                .is_some_and(|route| route.claim(&response));
            if !claimed {
                debug!("Cancelling orphaned response {}", response.id);
                return Some(ClientEvent::ResponseCancel {
                    response_id: Some(response.id),
                });
            }
            debug!("Response created: {}", response.id);
        }
        ServerEvent::TextDelta { response_id, delta }
        | ServerEvent::AudioTranscriptDelta { response_id, delta } => {
            if let Some(route) = turn_route.lock().as_ref()
                && route.owns(&response_id)
            {
                let _ = route.sink.send(Ok(DeltaEvent::text(delta)));
            }
        }
        ServerEvent::ResponseDone { response } => {
            let mut guard = turn_route.lock();
            if !guard.as_ref().is_some_and(|r| r.owns(&response.id)) {
                debug!("Ignoring completion of abandoned response {}", response.id);
                return None;
            }
            let result = if response.is_failed() {
                Err(response
                    .failure()
                    .map(|e| map_api_error(&e))
                    .unwrap_or_else(|| CompletionError::Rejected {
                        status: 500,
                        message: format!("response {} failed", response.id),
                    }))
            } else {
                Ok(DeltaEvent::done())
            };
            if let Some(route) = guard.take() {
                let _ = route.sink.send(result);
            }
        }
        ServerEvent::Error { error } => {
            warn!(
                "Realtime API error ({}): {}",
                error.error_type, error.message
            );
            if let Some(route) = turn_route.lock().take() {
                let _ = route.sink.send(Err(map_api_error(&error)));
                // Stop the response this turn started
                if let Some(response_id) = route.response_id {
                    return Some(ClientEvent::ResponseCancel {
                        response_id: Some(response_id),
                    });
                }
            }
        }
        ServerEvent::Other => {}
    }
    None
}

#[async_trait]
impl TurnTransport for OpenAIRealtimeTransport {
    fn name(&self) -> &'static str {
        "openai-realtime"
    }

    fn accepts_audio(&self) -> bool {
        true
    }

    async fn open(&self) -> CompletionResult<()> {
        // Check if already connected
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.intentional_disconnect.store(false, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connecting;

        let url = self.config.ws_url();
        let mut request = url.as_str().into_client_request().map_err(|e| {
            *self.state.write() = ConnectionState::Failed;
            CompletionError::Malformed(format!("Invalid realtime URL {url}: {e}"))
        })?;
        let authorization = HeaderValue::from_str(&self.config.api_key.bearer()).map_err(|_| {
            *self.state.write() = ConnectionState::Failed;
            CompletionError::Unauthorized("API key contains invalid header characters".into())
        })?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert("openai-beta", HeaderValue::from_static("realtime=v1"));

        let connect = tokio::time::timeout(
            self.config.connect_timeout(),
            tokio_tungstenite::connect_async(request),
        )
        .await;
        let ws_stream = match connect {
            Ok(Ok((ws_stream, _response))) => ws_stream,
            Ok(Err(e)) => {
                *self.state.write() = ConnectionState::Failed;
                return Err(handshake_error(e));
            }
            Err(_) => {
                *self.state.write() = ConnectionState::Failed;
                return Err(CompletionError::NetworkFailure(format!(
                    "Realtime connect timed out after {}s",
                    self.config.connect_timeout_secs
                )));
            }
        };

        info!("Connected to OpenAI Realtime API ({})", self.config.model);

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        // Create channel for sending messages
        let (tx, mut rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        *self.ws_sender.lock().await = Some(tx);

        let turn_route = self.turn_route.clone();
        let session_id = self.session_id.clone();
        let state = self.state.clone();
        let connected = self.connected.clone();
        let intentional_disconnect = self.intentional_disconnect.clone();

        // Mark as connected before spawning task
        self.connected.store(true, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connected;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Handle outgoing messages
                    event = rx.recv() => {
                        let Some(event) = event else {
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        };
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                error!("Failed to serialize {}: {}", event.event_type(), e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            error!("Failed to send WebSocket message: {}", e);
                            break;
                        }
                    }

                    // Handle incoming messages
                    msg = ws_stream.next() => {
                        let Some(msg) = msg else {
                            info!("WebSocket stream ended");
                            break;
                        };
                        match msg {
                            Ok(Message::Text(text)) => {
                                let reply = match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => route_server_event(event, &turn_route, &session_id),
                                    Err(e) => {
                                        warn!("Failed to parse server event: {} - {}", e, text);
                                        None
                                    }
                                };
                                if let Some(reply) = reply {
                                    let sent = match serde_json::to_string(&reply) {
                                        Ok(json) => ws_sink.send(Message::Text(json.into())).await,
                                        Err(e) => {
                                            error!("Failed to serialize {}: {}", reply.event_type(), e);
                                            Ok(())
                                        }
                                    };
                                    if let Err(e) = sent {
                                        error!("Failed to send WebSocket message: {}", e);
                                        break;
                                    }
                                }
                            }
                            Ok(Message::Close(_)) => {
                                info!("WebSocket closed by server");
                                break;
                            }
                            Ok(Message::Ping(data)) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    error!("Failed to send pong: {}", e);
                                }
                            }
                            Err(e) => {
                                error!("WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }

                }
            }

            connected.store(false, Ordering::SeqCst);

            if intentional_disconnect.load(Ordering::SeqCst) {
                *state.write() = ConnectionState::Disconnected;
                return;
            }

            warn!("Realtime connection lost");
            *state.write() = ConnectionState::Failed;
            if let Some(route) = turn_route.lock().take() {
                let _ = route.sink.send(Err(CompletionError::NetworkFailure(
                    "Realtime connection lost".into(),
                )));
            }
        });

        *self.connection_handle.lock().await = Some(handle);

        self.send_event(ClientEvent::SessionUpdate {
            session: self.build_session_config(),
        })
        .await
    }

    async fn send_turn(&self, input: &TurnInput) -> CompletionResult<DeltaStream> {
        if !self.is_usable() {
            return Err(CompletionError::NetworkFailure(
                "Realtime session is not connected".into(),
            ));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let turn = self.turn_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let tag = format!("turn-{turn}");
        let abandoned = self
            .turn_route
            .lock()
            .replace(TurnRoute::new(tx, tag.as_str()));
        if let Some(abandoned) = abandoned {
            debug!("Cancelling abandoned response before new turn");
            let cancel = ClientEvent::ResponseCancel {
                response_id: abandoned.response_id,
            };
            if let Err(e) = self.send_event(cancel).await {
                self.turn_route.lock().take();
                return Err(e);
            }
        }

        if let Err(e) = self.submit(input, &tag).await {
            self.turn_route.lock().take();
            return Err(e);
        }
        debug!("Submitted {} turn to realtime session", input.kind());

        let stream = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                let last = match &item {
                    Ok(event) => event.done,
                    Err(_) => true,
                };
                yield item;
                if last {
                    return;
                }
            }
        };
        Ok(stream.boxed())
    }

    async fn close(&self) {
        self.intentional_disconnect.store(true, Ordering::SeqCst);

        // Dropping the sender makes the connection task send a close frame
        *self.ws_sender.lock().await = None;

        let handle = self.connection_handle.lock().await.take();
        if let Some(mut handle) = handle
            && tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await.is_err()
        {
            handle.abort();
        }

        self.turn_route.lock().take();
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Disconnected;
        *self.session_id.write() = None;

        if was_connected {
            info!("Disconnected from OpenAI Realtime API");
        }
    }

    fn is_usable(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Tests
// =============================================================================
