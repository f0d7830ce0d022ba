use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::{InputPipeline, SessionConfig};
use super::state::{SessionError, SessionEvent, SessionState};
use super::turn::{SessionDriver, SessionShared, TurnContext};
use crate::core::audio::AudioCapture;
use crate::core::completion::TurnTransport;

/// Handles of a running session.
struct ActiveSession {
    cancel: CancellationToken,
    driver: JoinHandle<()>,
    text_tx: mpsc::UnboundedSender<String>,
}

/// Owner of one voice session at a time.
///
/// Starts capture, opens the transport, turns utterances into requests and
/// reports progress through the event receiver returned by [`new`](Self::new).
///
/// # Example
///
/// ```rust,ignore
/// let (mut session, mut events) = SessionController::new(
///     SessionConfig::default(),
///     InputPipeline::AudioForwarding,
///     transport,
///     Box::new(CpalCapture::default()),
/// )?;
/// session.connect().await?;
/// while let Some(event) = events.recv().await {
///     if let SessionEvent::Message(update) = event {
///         println!("{}", update.message.text);
///     }
/// }
/// session.disconnect().await;
/// ```
pub struct SessionController {
    config: Arc<SessionConfig>,
    pipeline: InputPipeline,
    transport: Arc<dyn TurnTransport>,
    capture: Box<dyn AudioCapture>,
    shared: SessionShared,
    session_id: Option<Uuid>,
    active: Option<ActiveSession>,
}

impl SessionController {
    /// Creates an idle controller and the receiver for its events.
    pub fn new(
        config: SessionConfig,
        pipeline: InputPipeline,
        transport: Arc<dyn TurnTransport>,
        capture: Box<dyn AudioCapture>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        config.validate()?;
        if matches!(pipeline, InputPipeline::AudioForwarding) && !transport.accepts_audio() {
            return Err(SessionError::InvalidConfiguration(format!(
                "{} transport cannot carry audio turns; use the speech-to-text pipeline",
                transport.name()
            )));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let controller = Self {
            config: Arc::new(config),
            pipeline,
            transport,
            capture,
            shared: SessionShared::new(events_tx),
            session_id: None,
            active: None,
        };
        Ok((controller, events_rx))
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Identifier of the current session, while connected.
    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.subscribe()
    }

    pub fn pipeline(&self) -> &InputPipeline {
        &self.pipeline
    }

    /// Starts capture and opens the transport.
    ///
    /// Fails with [`SessionError::AlreadyActive`] unless the session is idle.
    /// On capture or transport failure the session is left `Failed` and one
    /// [`SessionEvent::Error`] is emitted.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        let current = self.state();
        if current != SessionState::Idle {
            return Err(SessionError::AlreadyActive(current));
        }

        self.shared.set_state(SessionState::Connecting);
        let session_id = Uuid::new_v4();
        info!(
            "Connecting session {} via {} ({:?})",
            session_id,
            self.transport.name(),
            self.pipeline
        );

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.capture.start(frame_tx).await {
            self.capture.stop();
            return Err(self.fail_connect(e.into()));
        }

        if let Err(e) = self.transport.open().await {
            self.capture.stop();
            self.transport.close().await;
            return Err(self.fail_connect(e.into()));
        }

        let cancel = CancellationToken::new();
        let (text_tx, text_rx) = mpsc::unbounded_channel();
        let ctx = TurnContext {
            shared: self.shared.clone(),
            transport: self.transport.clone(),
            config: self.config.clone(),
            pipeline: self.pipeline.clone(),
            session_cancel: cancel.clone(),
        };

        self.session_id = Some(session_id);
        self.shared.set_state(SessionState::Active);
        self.shared.emit(SessionEvent::ConnectionChanged(true));

        let driver = tokio::spawn(SessionDriver::new(ctx, frame_rx, text_rx).run());
        self.active = Some(ActiveSession {
            cancel,
            driver,
            text_tx,
        });

        info!("Session {} active", session_id);
        Ok(())
    }

    fn fail_connect(&self, err: SessionError) -> SessionError {
        error!("Failed to connect session: {}", err);
        self.shared.set_state(SessionState::Failed);
        self.shared.emit(SessionEvent::Error(err.to_string()));
        err
    }

    /// Tears the session down and returns to `Idle`.
    ///
    /// Any in-flight response read or pending retry is abandoned. Calling
    /// this on an idle session does nothing.
    pub async fn disconnect(&mut self) {
        let current = self.state();
        if matches!(current, SessionState::Idle | SessionState::Disconnecting) {
            debug!("Disconnect ignored in state {}", current);
            return;
        }

        self.shared.set_state(SessionState::Disconnecting);

        let active = self.active.take();
        let was_connected = active.is_some();
        if let Some(active) = active {
            active.cancel.cancel();
            drop(active.text_tx);
            if let Err(e) = active.driver.await {
                warn!("Session driver ended abnormally: {}", e);
            }
        }

        // Synchronous: device-backed captures join their audio thread here,
        // which is bounded by the thread's 5ms poll interval.
        self.capture.stop();
        self.transport.close().await;

        if was_connected {
            self.shared.emit(SessionEvent::ConnectionChanged(false));
        }
        if let Some(session_id) = self.session_id.take() {
            info!("Session {} disconnected", session_id);
        }
        self.shared.set_state(SessionState::Idle);
    }

    /// Supplies recognized text as one utterance.
    ///
    /// Dropped with [`SessionEvent::UtteranceDropped`] if a turn is still in
    /// flight.
    pub fn submit_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let current = self.state();
        let active = match &self.active {
            Some(active) if current == SessionState::Active => active,
            _ => return Err(SessionError::NotActive(current)),
        };

        let text = text.into();
        if text.trim().is_empty() {
            debug!("Ignoring empty text input");
            return Ok(());
        }
        active
            .text_tx
            .send(text)
            .map_err(|_| SessionError::NotActive(current))
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}
