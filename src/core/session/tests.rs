use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;
use crate::core::audio::{
    AudioCapture, CaptureError, CaptureResult, ChannelCapture, FrameFeeder, FrameSink,
    SegmenterConfig,
};
use crate::core::completion::{
    CompletionError, CompletionResult, DeltaStream, TurnInput, TurnTransport,
};
use crate::core::retry::RetryPolicy;
use crate::core::stream::DeltaEvent;
use crate::core::stt::{Transcriber, TranscriptionError, TranscriptionResult};

// =============================================================================
// Test doubles
// =============================================================================

enum Script {
    Fail(CompletionError),
    Respond(Vec<CompletionResult<DeltaEvent>>),
    /// Yields the given items, then never completes.
    Hang(Vec<CompletionResult<DeltaEvent>>),
}

struct ScriptedTransport {
    accepts_audio: bool,
    open_error: Option<CompletionError>,
    scripts: Mutex<VecDeque<Script>>,
    inputs: Mutex<Vec<TurnInput>>,
    usable: AtomicBool,
    closes: AtomicUsize,
}

impl ScriptedTransport {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            accepts_audio: true,
            open_error: None,
            scripts: Mutex::new(scripts.into()),
            inputs: Mutex::new(Vec::new()),
            usable: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
        })
    }

    fn inputs(&self) -> Vec<TurnInput> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl TurnTransport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn accepts_audio(&self) -> bool {
        self.accepts_audio
    }

    async fn open(&self) -> CompletionResult<()> {
        match &self.open_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn send_turn(&self, input: &TurnInput) -> CompletionResult<DeltaStream> {
        self.inputs.lock().push(input.clone());
        let script = self.scripts.lock().pop_front();
        match script {
            Some(Script::Fail(e)) => Err(e),
            Some(Script::Respond(items)) => Ok(stream::iter(items).boxed()),
            Some(Script::Hang(items)) => Ok(stream::iter(items).chain(stream::pending()).boxed()),
            None => Ok(stream::iter(vec![Ok(DeltaEvent::done())]).boxed()),
        }
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_usable(&self) -> bool {
        self.usable.load(Ordering::SeqCst)
    }
}

struct FailingCapture(CaptureError);

#[async_trait]
impl AudioCapture for FailingCapture {
    async fn start(&mut self, _sink: FrameSink) -> CaptureResult<()> {
        Err(self.0.clone())
    }

    fn stop(&mut self) {}

    fn is_capturing(&self) -> bool {
        false
    }
}

struct FixedTranscriber(&'static str);

#[async_trait]
impl Transcriber for FixedTranscriber {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn transcribe(&self, frames: &[crate::core::audio::AudioFrame]) -> TranscriptionResult<String> {
        if frames.is_empty() {
            return Err(TranscriptionError::Encoding("no frames".into()));
        }
        Ok(self.0.to_string())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn config() -> SessionConfig {
    SessionConfig {
        system_instruction: "be brief".to_string(),
        retry: RetryPolicy {
            base_delay_ms: 1,
            jitter_ms: 0,
            ..Default::default()
        },
        segmenter: SegmenterConfig {
            rms_threshold: 0.01,
            silence_duration_ms: 300,
            min_speech_ms: 200,
            max_utterance_ms: 10_000,
        },
        ..Default::default()
    }
}

fn session(
    transport: Arc<ScriptedTransport>,
    pipeline: InputPipeline,
) -> (SessionController, UnboundedReceiver<SessionEvent>, FrameFeeder) {
    let (capture, feeder) = ChannelCapture::new();
    let (controller, events) =
        SessionController::new(config(), pipeline, transport, Box::new(capture)).unwrap();
    (controller, events, feeder)
}

/// Feeds one spoken utterance: 300ms of speech followed by 300ms of silence.
fn speak(feeder: &FrameFeeder) {
    for _ in 0..3 {
        assert!(feeder.feed(vec![0.3f32; 2400]));
    }
    for _ in 0..3 {
        assert!(feeder.feed(vec![0.0f32; 2400]));
    }
}

async fn next_event(events: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

/// Skips events until one matches.
async fn wait_for(
    events: &mut UnboundedReceiver<SessionEvent>,
    matches: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

fn drain(events: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn assistant(turn_id: u64, text: &str, complete: bool) -> SessionEvent {
    SessionEvent::Message(MessageUpdate {
        turn_id,
        message: Message {
            text: text.to_string(),
            is_user: false,
            complete,
        },
    })
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_connect_emits_state_progression() {
    let transport = ScriptedTransport::new(vec![]);
    let (mut session, mut events, _feeder) = session(transport, InputPipeline::text_only());

    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.session_id().is_none());

    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Active);
    assert!(session.session_id().is_some());

    assert_eq!(
        drain(&mut events),
        vec![
            SessionEvent::StateChanged(SessionState::Connecting),
            SessionEvent::StateChanged(SessionState::Active),
            SessionEvent::ConnectionChanged(true),
        ]
    );
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let transport = ScriptedTransport::new(vec![]);
    let (mut session, _events, _feeder) = session(transport, InputPipeline::text_only());

    session.connect().await.unwrap();
    assert_eq!(
        session.connect().await,
        Err(SessionError::AlreadyActive(SessionState::Active))
    );
    assert_eq!(session.state(), SessionState::Active);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let transport = ScriptedTransport::new(vec![]);
    let (mut session, mut events, _feeder) = session(transport.clone(), InputPipeline::text_only());

    // Disconnect before connect does nothing
    session.disconnect().await;
    assert!(drain(&mut events).is_empty());

    session.connect().await.unwrap();
    drain(&mut events);

    session.disconnect().await;
    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.session_id().is_none());
    assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    assert_eq!(
        drain(&mut events),
        vec![
            SessionEvent::StateChanged(SessionState::Disconnecting),
            SessionEvent::ConnectionChanged(false),
            SessionEvent::StateChanged(SessionState::Idle),
        ]
    );

    // A fresh session can be started afterwards
    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Active);
}

#[tokio::test]
async fn test_watch_state_observes_transitions() {
    let transport = ScriptedTransport::new(vec![]);
    let (mut session, _events, _feeder) = session(transport, InputPipeline::text_only());
    let mut state = session.watch_state();

    session.connect().await.unwrap();
    assert!(state.has_changed().unwrap());
    assert_eq!(*state.borrow_and_update(), SessionState::Active);

    session.disconnect().await;
    assert_eq!(*state.borrow_and_update(), SessionState::Idle);
}

#[tokio::test]
async fn test_audio_forwarding_requires_audio_transport() {
    let transport = Arc::new(ScriptedTransport {
        accepts_audio: false,
        open_error: None,
        scripts: Mutex::new(VecDeque::new()),
        inputs: Mutex::new(Vec::new()),
        usable: AtomicBool::new(true),
        closes: AtomicUsize::new(0),
    });
    let (capture, _feeder) = ChannelCapture::new();
    let result = SessionController::new(
        config(),
        InputPipeline::AudioForwarding,
        transport,
        Box::new(capture),
    );
    assert!(matches!(result, Err(SessionError::InvalidConfiguration(_))));
}

#[tokio::test]
async fn test_capture_failure_fails_session() {
    let transport = ScriptedTransport::new(vec![]);
    let (mut session, mut events) = SessionController::new(
        config(),
        InputPipeline::text_only(),
        transport,
        Box::new(FailingCapture(CaptureError::PermissionDenied(
            "microphone access denied".into(),
        ))),
    )
    .unwrap();

    let result = session.connect().await;
    assert!(matches!(
        result,
        Err(SessionError::Capture(CaptureError::PermissionDenied(_)))
    ));
    assert_eq!(session.state(), SessionState::Failed);

    let emitted = drain(&mut events);
    let errors = emitted
        .iter()
        .filter(|e| matches!(e, SessionEvent::Error(_)))
        .count();
    assert_eq!(errors, 1);
    assert!(emitted.contains(&SessionEvent::StateChanged(SessionState::Failed)));
    assert!(!emitted.contains(&SessionEvent::ConnectionChanged(true)));

    // Failed sessions must be reset before reconnecting
    assert_eq!(
        session.connect().await,
        Err(SessionError::AlreadyActive(SessionState::Failed))
    );
    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_transport_open_failure_fails_session() {
    let transport = Arc::new(ScriptedTransport {
        accepts_audio: true,
        open_error: Some(CompletionError::Unauthorized("bad key".into())),
        scripts: Mutex::new(VecDeque::new()),
        inputs: Mutex::new(Vec::new()),
        usable: AtomicBool::new(true),
        closes: AtomicUsize::new(0),
    });
    let (mut session, mut events, feeder) = session(transport, InputPipeline::AudioForwarding);

    let result = session.connect().await;
    assert!(matches!(
        result,
        Err(SessionError::Transport(CompletionError::Unauthorized(_)))
    ));
    assert_eq!(session.state(), SessionState::Failed);
    // Capture was released again
    assert!(!feeder.feed(vec![0.0f32; 16]));
    assert_eq!(
        drain(&mut events)
            .iter()
            .filter(|e| matches!(e, SessionEvent::Error(_)))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_submit_text_requires_active_session() {
    let transport = ScriptedTransport::new(vec![]);
    let (session, _events, _feeder) = session(transport, InputPipeline::text_only());
    assert_eq!(
        session.submit_text("hello"),
        Err(SessionError::NotActive(SessionState::Idle))
    );
}

#[tokio::test]
async fn test_capture_loss_fails_session() {
    let transport = ScriptedTransport::new(vec![]);
    let (mut session, mut events, feeder) = session(transport, InputPipeline::AudioForwarding);
    session.connect().await.unwrap();

    feeder.close();

    let error = wait_for(&mut events, |e| matches!(e, SessionEvent::Error(_))).await;
    assert!(matches!(error, SessionEvent::Error(reason) if reason.contains("capture")));
    assert_eq!(session.state(), SessionState::Failed);

    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Idle);
}

// =============================================================================
// Turns
// =============================================================================

#[tokio::test]
async fn test_text_turn_streams_message() {
    let transport = ScriptedTransport::new(vec![Script::Respond(vec![
        Ok(DeltaEvent::text("Hel")),
        Ok(DeltaEvent::text("lo")),
        Ok(DeltaEvent::done()),
    ])]);
    let (mut session, mut events, _feeder) = session(transport.clone(), InputPipeline::text_only());
    session.connect().await.unwrap();
    drain(&mut events);

    session.submit_text("hi there").unwrap();

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Message(MessageUpdate {
            turn_id: 1,
            message: Message::user("hi there"),
        })
    );
    assert_eq!(next_event(&mut events).await, assistant(1, "Hel", false));
    assert_eq!(next_event(&mut events).await, assistant(1, "Hello", false));
    assert_eq!(next_event(&mut events).await, assistant(1, "Hello", true));

    let inputs = transport.inputs();
    assert_eq!(inputs.len(), 1);
    let TurnInput::Text(request) = &inputs[0] else {
        panic!("expected a text turn");
    };
    assert_eq!(request.system_instruction(), Some("be brief"));
    assert_eq!(request.user_text(), Some("hi there"));
}

#[tokio::test]
async fn test_stream_end_without_done_completes_message() {
    let transport = ScriptedTransport::new(vec![Script::Respond(vec![Ok(DeltaEvent::text(
        "Partial",
    ))])]);
    let (mut session, mut events, _feeder) = session(transport, InputPipeline::text_only());
    session.connect().await.unwrap();

    session.submit_text("go").unwrap();
    let done = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Message(u) if u.message.complete && !u.message.is_user)
    })
    .await;
    assert_eq!(done, assistant(1, "Partial", true));
}

#[tokio::test]
async fn test_second_utterance_is_dropped_while_in_flight() {
    let transport = ScriptedTransport::new(vec![Script::Hang(vec![Ok(DeltaEvent::text(
        "Thinking",
    ))])]);
    let (mut session, mut events, _feeder) = session(transport.clone(), InputPipeline::text_only());
    session.connect().await.unwrap();

    session.submit_text("first").unwrap();
    wait_for(&mut events, |e| *e == assistant(1, "Thinking", false)).await;

    session.submit_text("second").unwrap();
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::UtteranceDropped { .. })).await,
        SessionEvent::UtteranceDropped { turn_in_flight: 1 }
    );
    assert_eq!(transport.inputs().len(), 1);

    // Disconnect abandons the hanging response
    tokio::time::timeout(Duration::from_secs(2), session.disconnect())
        .await
        .expect("disconnect should not wait for the response");
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_overloaded_turn_is_retried() {
    let transport = ScriptedTransport::new(vec![
        Script::Fail(CompletionError::Overloaded("503".into())),
        Script::Respond(vec![Ok(DeltaEvent::text("ok")), Ok(DeltaEvent::done())]),
    ]);
    let (mut session, mut events, _feeder) = session(transport.clone(), InputPipeline::text_only());
    session.connect().await.unwrap();

    session.submit_text("hello").unwrap();

    let retry = wait_for(&mut events, |e| matches!(e, SessionEvent::Retrying { .. })).await;
    assert!(matches!(
        retry,
        SessionEvent::Retrying {
            turn_id: 1,
            attempt: 1,
            delay_ms: 2,
            ..
        }
    ));
    wait_for(&mut events, |e| *e == assistant(1, "ok", true)).await;
    assert_eq!(transport.inputs().len(), 2);
    assert_eq!(transport.inputs()[0], transport.inputs()[1]);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let transport = ScriptedTransport::new(
        (0..5)
            .map(|_| Script::Fail(CompletionError::Overloaded("503".into())))
            .collect(),
    );
    let (mut session, mut events, _feeder) = session(transport.clone(), InputPipeline::text_only());
    session.connect().await.unwrap();

    session.submit_text("hello").unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::TurnFailed { .. })).await;

    // Initial attempt plus three retries
    assert_eq!(transport.inputs().len(), 4);
    assert_eq!(session.state(), SessionState::Active);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_retry() {
    let transport = ScriptedTransport::new(vec![
        Script::Fail(CompletionError::Overloaded("503".into())),
        Script::Respond(vec![Ok(DeltaEvent::text("late")), Ok(DeltaEvent::done())]),
    ]);
    let slow_retry = SessionConfig {
        retry: RetryPolicy {
            base_delay_ms: 10_000,
            jitter_ms: 0,
            ..Default::default()
        },
        ..config()
    };
    let (capture, _feeder) = ChannelCapture::new();
    let (mut session, mut events) = SessionController::new(
        slow_retry,
        InputPipeline::text_only(),
        transport.clone(),
        Box::new(capture),
    )
    .unwrap();
    session.connect().await.unwrap();

    session.submit_text("hello").unwrap();
    let retry = wait_for(&mut events, |e| matches!(e, SessionEvent::Retrying { .. })).await;
    assert!(matches!(
        retry,
        SessionEvent::Retrying {
            delay_ms: 20_000,
            ..
        }
    ));

    tokio::time::timeout(Duration::from_secs(2), session.disconnect())
        .await
        .expect("disconnect should not wait out the retry delay");
    assert_eq!(session.state(), SessionState::Idle);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.inputs().len(), 1);
    let after = drain(&mut events);
    assert!(
        !after
            .iter()
            .any(|e| matches!(e, SessionEvent::TurnFailed { .. } | SessionEvent::Message(_))),
        "unexpected events after disconnect: {after:?}"
    );
}

#[tokio::test]
async fn test_unauthorized_turn_fails_once_without_retry() {
    let transport = ScriptedTransport::new(vec![Script::Fail(CompletionError::Unauthorized(
        "invalid key".into(),
    ))]);
    let (mut session, mut events, _feeder) = session(transport.clone(), InputPipeline::text_only());
    session.connect().await.unwrap();
    drain(&mut events);

    session.submit_text("hello").unwrap();
    let failed = wait_for(&mut events, |e| matches!(e, SessionEvent::TurnFailed { .. })).await;
    assert!(matches!(failed, SessionEvent::TurnFailed { turn_id: 1, .. }));

    // Next turn proceeds normally; no retry happened in between
    session.submit_text("again").unwrap();
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Message(u) if u.turn_id == 2 && u.message.is_user)
    })
    .await;
    assert_eq!(transport.inputs().len(), 2);
    assert_eq!(session.state(), SessionState::Active);
}

#[tokio::test]
async fn test_failure_after_delta_is_not_retried() {
    let transport = ScriptedTransport::new(vec![Script::Respond(vec![
        Ok(DeltaEvent::text("Hal")),
        Err(CompletionError::Overloaded("503 mid-stream".into())),
    ])]);
    let (mut session, mut events, _feeder) = session(transport.clone(), InputPipeline::text_only());
    session.connect().await.unwrap();
    drain(&mut events);

    session.submit_text("hello").unwrap();
    let mut seen = Vec::new();
    loop {
        let event = next_event(&mut events).await;
        let last = matches!(event, SessionEvent::TurnFailed { .. });
        seen.push(event);
        if last {
            break;
        }
    }
    assert!(!seen.iter().any(|e| matches!(e, SessionEvent::Retrying { .. })));
    assert_eq!(transport.inputs().len(), 1);
}

#[tokio::test]
async fn test_dead_transport_fails_session() {
    let transport = ScriptedTransport::new(vec![Script::Fail(CompletionError::NetworkFailure(
        "connection lost".into(),
    ))]);
    transport.usable.store(false, Ordering::SeqCst);
    let (mut session, mut events, _feeder) = session(transport, InputPipeline::text_only());
    session.connect().await.unwrap();
    drain(&mut events);

    session.submit_text("hello").unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::Error(_))).await;
    assert_eq!(session.state(), SessionState::Failed);
    assert!(
        !drain(&mut events)
            .iter()
            .any(|e| matches!(e, SessionEvent::TurnFailed { .. }))
    );
}

#[tokio::test]
async fn test_audio_utterance_is_forwarded() {
    let transport = ScriptedTransport::new(vec![Script::Respond(vec![
        Ok(DeltaEvent::text("Heard you")),
        Ok(DeltaEvent::done()),
    ])]);
    let (mut session, mut events, feeder) = session(transport.clone(), InputPipeline::AudioForwarding);
    session.connect().await.unwrap();

    speak(&feeder);
    wait_for(&mut events, |e| *e == assistant(1, "Heard you", true)).await;

    let inputs = transport.inputs();
    let TurnInput::Audio(turn) = &inputs[0] else {
        panic!("expected an audio turn");
    };
    assert_eq!(turn.instructions, "be brief");
    assert_eq!(turn.frames.len(), 6);
    let sequences: Vec<u64> = turn.frames.iter().map(|f| f.sequence()).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_transcribed_utterance_becomes_text_turn() {
    let transport = ScriptedTransport::new(vec![]);
    let pipeline = InputPipeline::SpeechToText {
        transcriber: Some(Arc::new(FixedTranscriber("what time is it"))),
    };
    let (mut session, mut events, feeder) = session(transport.clone(), pipeline);
    session.connect().await.unwrap();

    speak(&feeder);
    let user = wait_for(&mut events, |e| matches!(e, SessionEvent::Message(_))).await;
    assert_eq!(
        user,
        SessionEvent::Message(MessageUpdate {
            turn_id: 1,
            message: Message::user("what time is it"),
        })
    );

    session.disconnect().await;
    let TurnInput::Text(request) = &transport.inputs()[0] else {
        panic!("expected a text turn");
    };
    assert_eq!(request.user_text(), Some("what time is it"));
}

#[tokio::test]
async fn test_text_only_pipeline_ignores_audio() {
    let transport = ScriptedTransport::new(vec![]);
    let (mut session, mut events, feeder) = session(transport.clone(), InputPipeline::text_only());
    session.connect().await.unwrap();
    drain(&mut events);

    speak(&feeder);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(drain(&mut events).is_empty());
    assert!(transport.inputs().is_empty());
}
