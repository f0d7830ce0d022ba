//! Session driver and per-turn tasks.
//!
//! The driver is the single queue of a session: it multiplexes cancellation,
//! captured frames and supplied text, and starts at most one turn at a time.
//! A turn runs in its own task so capture keeps flowing while the response
//! streams in.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{InputPipeline, SessionConfig};
use super::state::{Message, MessageUpdate, SessionEvent, SessionState};
use crate::core::audio::{AudioFrame, Utterance, UtteranceSegmenter};
use crate::core::completion::{
    AudioTurn, CompletionError, CompletionRequest, TurnInput, TurnTransport,
};

// =============================================================================
// Shared session handles
// =============================================================================

/// State and event handles shared by the controller and its tasks.
#[derive(Clone)]
pub(crate) struct SessionShared {
    state: Arc<watch::Sender<SessionState>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionShared {
    pub(crate) fn new(events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            state: Arc::new(state),
            events,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // The receiver may be gone; the session keeps running regardless.
        let _ = self.events.send(event);
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Session state {} -> {}", previous, next);
            self.emit(SessionEvent::StateChanged(next));
        }
    }

    /// Moves an active session to `Failed` and reports `reason` once.
    /// Returns `false` if the session was not active.
    pub(crate) fn fail_active(&self, reason: &str) -> bool {
        let failed = self.state.send_if_modified(|state| {
            if *state == SessionState::Active {
                *state = SessionState::Failed;
                true
            } else {
                false
            }
        });
        if failed {
            error!("Session failed: {}", reason);
            self.emit(SessionEvent::StateChanged(SessionState::Failed));
            self.emit(SessionEvent::Error(reason.to_string()));
        }
        failed
    }
}

/// Everything a turn task needs.
#[derive(Clone)]
pub(crate) struct TurnContext {
    pub(crate) shared: SessionShared,
    pub(crate) transport: Arc<dyn TurnTransport>,
    pub(crate) config: Arc<SessionConfig>,
    pub(crate) pipeline: InputPipeline,
    /// Cancelling ends the whole session driver.
    pub(crate) session_cancel: CancellationToken,
}

/// Raw input for one turn before it is turned into a request.
enum PendingInput {
    Text(String),
    Audio(Utterance),
}

// =============================================================================
// Driver
// =============================================================================

pub(crate) struct SessionDriver {
    ctx: TurnContext,
    frames: mpsc::UnboundedReceiver<AudioFrame>,
    texts: mpsc::UnboundedReceiver<String>,
    segmenter: UtteranceSegmenter,
    in_flight: Option<(u64, JoinHandle<()>)>,
    next_turn_id: u64,
}

impl SessionDriver {
    pub(crate) fn new(
        ctx: TurnContext,
        frames: mpsc::UnboundedReceiver<AudioFrame>,
        texts: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        let segmenter = UtteranceSegmenter::new(ctx.config.segmenter.clone());
        Self {
            ctx,
            frames,
            texts,
            segmenter,
            in_flight: None,
            next_turn_id: 1,
        }
    }

    pub(crate) async fn run(mut self) {
        let cancel = self.ctx.session_cancel.clone();
        let consumes_audio = self.ctx.pipeline.consumes_audio();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                frame = self.frames.recv() => {
                    let Some(frame) = frame else {
                        self.ctx.shared.fail_active("Audio capture stream ended unexpectedly");
                        cancel.cancel();
                        break;
                    };
                    if !consumes_audio {
                        continue;
                    }
                    if let Some(utterance) = self.segmenter.push(frame) {
                        debug!(
                            "Utterance of {}ms ({} frames)",
                            utterance.duration_ms(),
                            utterance.frames().len()
                        );
                        self.begin_turn(PendingInput::Audio(utterance));
                    }
                }

                Some(text) = self.texts.recv() => {
                    self.begin_turn(PendingInput::Text(text));
                }
            }
        }

        if let Some((turn_id, handle)) = self.in_flight.take()
            && let Err(e) = handle.await
        {
            warn!("Turn {} ended abnormally: {}", turn_id, e);
        }
    }

    /// Starts a turn unless one is still running, in which case the input
    /// is dropped.
    fn begin_turn(&mut self, input: PendingInput) {
        if let Some((turn_id, handle)) = &self.in_flight
            && !handle.is_finished()
        {
            info!("Dropping utterance: turn {} still in flight", turn_id);
            self.ctx.shared.emit(SessionEvent::UtteranceDropped {
                turn_in_flight: *turn_id,
            });
            return;
        }

        let turn_id = self.next_turn_id;
        self.next_turn_id += 1;

        let ctx = self.ctx.clone();
        let cancel = self.ctx.session_cancel.child_token();
        let handle = tokio::spawn(run_turn(ctx, turn_id, input, cancel));
        self.in_flight = Some((turn_id, handle));
    }
}

// =============================================================================
// Turn
// =============================================================================

/// Why a response attempt ended early.
struct AttemptFailure {
    error: CompletionError,
    /// At least one non-empty delta reached the user.
    delivered: bool,
}

async fn run_turn(ctx: TurnContext, turn_id: u64, input: PendingInput, cancel: CancellationToken) {
    let Some(input) = prepare_input(&ctx, turn_id, input, &cancel).await else {
        return;
    };
    debug!("Turn {} started ({} input)", turn_id, input.kind());

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Turn {} cancelled", turn_id);
                return;
            }
            outcome = stream_response(&ctx, turn_id, &input) => outcome,
        };

        let Err(failure) = outcome else {
            return;
        };

        if !failure.delivered {
            let decision = ctx.config.retry.should_retry(attempt, &failure.error);
            if decision.retry {
                warn!(
                    "Turn {} attempt {} failed ({}), retrying in {}ms",
                    turn_id, attempt, failure.error, decision.delay_ms
                );
                ctx.shared.emit(SessionEvent::Retrying {
                    turn_id,
                    attempt,
                    delay_ms: decision.delay_ms,
                    reason: failure.error.to_string(),
                });
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(decision.delay()) => continue,
                }
            }
        }

        if !ctx.transport.is_usable() {
            ctx.shared.fail_active(&format!(
                "{} transport is no longer usable: {}",
                ctx.transport.name(),
                failure.error
            ));
            ctx.session_cancel.cancel();
            return;
        }

        warn!("Turn {} failed: {}", turn_id, failure.error);
        ctx.shared.emit(SessionEvent::TurnFailed {
            turn_id,
            reason: failure.error.to_string(),
        });
        return;
    }
}

/// Turns raw input into a transport request. Returns `None` when there is
/// nothing to send or the turn ended.
async fn prepare_input(
    ctx: &TurnContext,
    turn_id: u64,
    input: PendingInput,
    cancel: &CancellationToken,
) -> Option<TurnInput> {
    let text = match input {
        PendingInput::Text(text) => text,
        PendingInput::Audio(utterance) => match &ctx.pipeline {
            InputPipeline::AudioForwarding => {
                return Some(TurnInput::Audio(AudioTurn {
                    instructions: ctx.config.system_instruction.clone(),
                    frames: utterance.into_frames(),
                    params: ctx.config.params,
                }));
            }
            InputPipeline::SpeechToText { transcriber: None } => return None,
            InputPipeline::SpeechToText {
                transcriber: Some(transcriber),
            } => {
                let result = tokio::select! {
                    _ = cancel.cancelled() => return None,
                    result = transcriber.transcribe(utterance.frames()) => result,
                };
                match result {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Turn {} transcription failed: {}", turn_id, e);
                        ctx.shared.emit(SessionEvent::TurnFailed {
                            turn_id,
                            reason: e.to_string(),
                        });
                        return None;
                    }
                }
            }
        },
    };

    let text = text.trim();
    if text.is_empty() {
        debug!("Turn {} has no recognized text", turn_id);
        return None;
    }

    ctx.shared.emit(SessionEvent::Message(MessageUpdate {
        turn_id,
        message: Message::user(text),
    }));
    Some(TurnInput::Text(CompletionRequest::for_utterance(
        &ctx.config.system_instruction,
        text,
        ctx.config.params,
    )))
}

/// One request attempt: sends the turn and forwards deltas as message
/// updates until the response completes.
async fn stream_response(
    ctx: &TurnContext,
    turn_id: u64,
    input: &TurnInput,
) -> Result<(), AttemptFailure> {
    let mut deltas = ctx
        .transport
        .send_turn(input)
        .await
        .map_err(|error| AttemptFailure {
            error,
            delivered: false,
        })?;

    let mut message: Option<Message> = None;
    let emit = |message: &Message| {
        ctx.shared.emit(SessionEvent::Message(MessageUpdate {
            turn_id,
            message: message.clone(),
        }));
    };

    while let Some(item) = deltas.next().await {
        match item {
            Ok(delta) => {
                if !delta.text.is_empty() {
                    message
                        .get_or_insert_with(Message::assistant)
                        .append(&delta.text);
                    if !delta.done && let Some(message) = &message {
                        emit(message);
                    }
                }
                if delta.done {
                    break;
                }
            }
            Err(error) => {
                return Err(AttemptFailure {
                    error,
                    delivered: message.is_some(),
                });
            }
        }
    }

    match message.as_mut() {
        Some(message) => {
            message.complete = true;
            emit(message);
            debug!("Turn {} complete ({} chars)", turn_id, message.text.len());
        }
        None => debug!("Turn {} completed without text", turn_id),
    }
    Ok(())
}
