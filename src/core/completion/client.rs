//! Streaming chat completions over HTTPS.
//!
//! Each text turn is one `POST /chat/completions` with `stream: true`; the
//! response body is a server-sent event stream decoded incrementally.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use super::base::{CompletionError, CompletionResult, DeltaStream, TurnInput, TurnTransport};
use super::config::CompletionConfig;
use super::messages::{ChatCompletionBody, error_message};
use crate::core::stream::decode_body;

/// [`TurnTransport`] for the chat completions endpoint. Text turns only.
pub struct HttpCompletionTransport {
    config: CompletionConfig,
    /// HTTP client for API requests (reused for connection pooling).
    http_client: Client,
}

impl HttpCompletionTransport {
    pub fn new(config: CompletionConfig) -> CompletionResult<Self> {
        if config.api_key.is_empty() {
            return Err(CompletionError::Unauthorized("API key is required".into()));
        }

        let http_client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| {
                CompletionError::NetworkFailure(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }
}

/// Maps a non-success status to the error the retry policy understands.
fn status_error(status: StatusCode, message: String) -> CompletionError {
    match status {
        StatusCode::SERVICE_UNAVAILABLE => CompletionError::Overloaded(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CompletionError::Unauthorized(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            CompletionError::Malformed(message)
        }
        other => CompletionError::Rejected {
            status: other.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl TurnTransport for HttpCompletionTransport {
    fn name(&self) -> &'static str {
        "openai-chat"
    }

    fn accepts_audio(&self) -> bool {
        false
    }

    async fn send_turn(&self, input: &TurnInput) -> CompletionResult<DeltaStream> {
        let TurnInput::Text(request) = input else {
            return Err(CompletionError::Unsupported(
                "chat completions accept text turns only".into(),
            ));
        };

        let body = ChatCompletionBody::new(&self.config.model, request);
        debug!(
            "Sending completion request: model={}, messages={}",
            self.config.model,
            request.messages().len()
        );

        let response = self
            .http_client
            .post(self.config.api_url())
            .header("Authorization", self.config.api_key.bearer())
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::NetworkFailure(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = error_message(status.as_u16(), &text);
            warn!("Completion request failed ({}): {}", status, message);
            return Err(status_error(status, message));
        }

        info!("Completion stream opened ({})", status);

        let read_timeout = self.config.read_timeout();
        let mut bytes = response.bytes_stream();
        let body = async_stream::stream! {
            loop {
                match tokio::time::timeout(read_timeout, bytes.next()).await {
                    Ok(Some(chunk)) => yield chunk.map_err(|e| e.to_string()),
                    Ok(None) => break,
                    Err(_) => {
                        yield Err(format!("no data received for {}s", read_timeout.as_secs()));
                        break;
                    }
                }
            }
        };

        Ok(decode_body(body))
    }
}
