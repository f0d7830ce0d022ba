//! Session integration tests against a mocked OpenAI HTTP API
//!
//! These tests drive a full [`SessionController`] through the chat
//! completions transport and the Whisper transcriber, with wiremock
//! standing in for the provider:
//! - Streamed deltas become incremental assistant messages
//! - Overloaded responses are retried, authorization failures are not
//! - Utterances arriving during a response are dropped
//! - Captured speech is transcribed and answered

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_test::assert_ok;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use waav_voice_client::core::audio::SegmenterConfig;
use waav_voice_client::core::stt::Transcriber;
use waav_voice_client::{
    ChannelCapture, CompletionConfig, FrameFeeder, HttpCompletionTransport, InputPipeline,
    RetryPolicy, SessionConfig, SessionController, SessionEvent, SessionState,
    TranscriptionConfig, WhisperTranscriber,
};

// =============================================================================
// Helpers
// =============================================================================

fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for delta in deltas {
        let chunk = json!({ "choices": [{ "index": 0, "delta": { "content": delta } }] });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn sse_response(deltas: &[&str]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(sse_body(deltas))
}

fn session_config() -> SessionConfig {
    SessionConfig {
        system_instruction: "Answer briefly.".to_string(),
        retry: RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1,
            jitter_ms: 0,
            max_delay_ms: 20,
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

fn completion_transport(server: &MockServer) -> Arc<HttpCompletionTransport> {
    let config = CompletionConfig {
        base_url: format!("{}/v1", server.uri()),
        ..CompletionConfig::new("sk-test")
    };
    Arc::new(HttpCompletionTransport::new(config).unwrap())
}

async fn connect(
    server: &MockServer,
    pipeline: InputPipeline,
) -> (SessionController, UnboundedReceiver<SessionEvent>, FrameFeeder) {
    let (capture, feeder) = ChannelCapture::new();
    let (mut session, events) = SessionController::new(
        session_config(),
        pipeline,
        completion_transport(server),
        Box::new(capture),
    )
    .unwrap();
    assert_ok!(session.connect().await);
    (session, events, feeder)
}

async fn wait_for<F>(events: &mut UnboundedReceiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

fn is_complete_reply(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::Message(u) if !u.message.is_user && u.message.complete)
}

// =============================================================================
// Streaming
// =============================================================================

#[tokio::test]
async fn test_streamed_reply_builds_incrementally() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4",
            "stream": true,
            "messages": [
                { "role": "system", "content": "Answer briefly." },
                { "role": "user", "content": "Say hello" }
            ]
        })))
        .respond_with(sse_response(&["Hel", "lo"]))
        .expect(1)
        .mount(&server)
        .await;

    let (mut session, mut events, _feeder) =
        connect(&server, InputPipeline::text_only()).await;
    session.submit_text("Say hello").unwrap();

    let user = wait_for(&mut events, |e| matches!(e, SessionEvent::Message(_))).await;
    match user {
        SessionEvent::Message(update) => {
            assert!(update.message.is_user);
            assert!(update.message.complete);
            assert_eq!(update.message.text, "Say hello");
        }
        other => panic!("expected user message, got {other:?}"),
    }

    let mut partials = Vec::new();
    loop {
        let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Message(_))).await;
        let SessionEvent::Message(update) = event else {
            unreachable!()
        };
        partials.push(update.message.text.clone());
        if update.message.complete {
            break;
        }
    }
    assert_eq!(partials.first().map(String::as_str), Some("Hel"));
    assert_eq!(partials.last().map(String::as_str), Some("Hello"));

    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Idle);
}

// =============================================================================
// Retry
// =============================================================================

#[tokio::test]
async fn test_overloaded_request_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": { "message": "The engine is currently overloaded", "type": "server_error" }
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(&["Recovered"]))
        .with_priority(2)
        .mount(&server)
        .await;

    let (mut session, mut events, _feeder) =
        connect(&server, InputPipeline::text_only()).await;
    session.submit_text("Are you there?").unwrap();

    let retry = wait_for(&mut events, |e| matches!(e, SessionEvent::Retrying { .. })).await;
    match retry {
        SessionEvent::Retrying {
            attempt, reason, ..
        } => {
            assert_eq!(attempt, 1);
            assert!(reason.contains("overloaded"));
        }
        other => panic!("expected retry, got {other:?}"),
    }

    let reply = wait_for(&mut events, is_complete_reply).await;
    let SessionEvent::Message(update) = reply else {
        unreachable!()
    };
    assert_eq!(update.message.text, "Recovered");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    session.disconnect().await;
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (mut session, mut events, _feeder) =
        connect(&server, InputPipeline::text_only()).await;
    session.submit_text("Hello?").unwrap();

    let failed = wait_for(&mut events, |e| {
        assert!(!matches!(e, SessionEvent::Retrying { .. }), "unexpected retry");
        matches!(e, SessionEvent::TurnFailed { .. })
    })
    .await;
    match failed {
        SessionEvent::TurnFailed { turn_id, reason } => {
            assert_eq!(turn_id, 1);
            assert!(reason.contains("Incorrect API key"));
        }
        other => panic!("expected turn failure, got {other:?}"),
    }

    // A failed turn leaves the session usable
    assert_eq!(session.state(), SessionState::Active);
    session.disconnect().await;
}

// =============================================================================
// Single in-flight turn
// =============================================================================

#[tokio::test]
async fn test_input_during_response_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(&["Slow answer"]).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let (mut session, mut events, _feeder) =
        connect(&server, InputPipeline::text_only()).await;
    session.submit_text("First question").unwrap();
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Message(u) if u.message.is_user)
    })
    .await;

    session.submit_text("Second question").unwrap();
    let dropped = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::UtteranceDropped { .. })
    })
    .await;
    assert_eq!(dropped, SessionEvent::UtteranceDropped { turn_in_flight: 1 });

    let reply = wait_for(&mut events, is_complete_reply).await;
    let SessionEvent::Message(update) = reply else {
        unreachable!()
    };
    assert_eq!(update.turn_id, 1);
    assert_eq!(update.message.text, "Slow answer");
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    session.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_abandons_pending_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(&["never read"]).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let (mut session, mut events, _feeder) =
        connect(&server, InputPipeline::text_only()).await;
    session.submit_text("Long question").unwrap();
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Message(u) if u.message.is_user)
    })
    .await;

    tokio::time::timeout(Duration::from_secs(2), session.disconnect())
        .await
        .expect("disconnect should not wait for the response");
    assert_eq!(session.state(), SessionState::Idle);
}

// =============================================================================
// Speech-to-text pipeline
// =============================================================================

#[tokio::test]
async fn test_transcribed_speech_is_answered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": " What time is it? " })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [
                { "role": "system", "content": "Answer briefly." },
                { "role": "user", "content": "What time is it?" }
            ]
        })))
        .respond_with(sse_response(&["Noon."]))
        .expect(1)
        .mount(&server)
        .await;

    let transcription = TranscriptionConfig {
        base_url: format!("{}/v1", server.uri()),
        ..TranscriptionConfig::new("sk-test")
    };
    let transcriber: Arc<dyn Transcriber> =
        Arc::new(WhisperTranscriber::new(transcription).unwrap());
    let pipeline = InputPipeline::SpeechToText {
        transcriber: Some(transcriber),
    };

    let (mut session, mut events, feeder) = connect(&server, pipeline).await;
    for _ in 0..3 {
        assert!(feeder.feed(vec![0.3f32; 2400]));
    }
    for _ in 0..3 {
        assert!(feeder.feed(vec![0.0f32; 2400]));
    }

    let user = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Message(u) if u.message.is_user)
    })
    .await;
    let SessionEvent::Message(update) = user else {
        unreachable!()
    };
    assert_eq!(update.message.text, "What time is it?");

    let reply = wait_for(&mut events, is_complete_reply).await;
    let SessionEvent::Message(update) = reply else {
        unreachable!()
    };
    assert_eq!(update.message.text, "Noon.");

    session.disconnect().await;
}
