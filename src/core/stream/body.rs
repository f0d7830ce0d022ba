use std::fmt::Display;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::debug;

use super::decoder::StreamDecoder;
use crate::core::completion::{CompletionError, DeltaStream};

/// Decodes a streamed response body into delta events.
///
/// The stream ends after the done event, or when the body ends. A body error
/// is yielded once as [`CompletionError::NetworkFailure`] and ends the stream.
pub fn decode_body<S, E>(body: S) -> DeltaStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut decoder = StreamDecoder::new();
        let mut body = Box::pin(body);

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in decoder.feed(&bytes) {
                        let done = event.done;
                        yield Ok(event);
                        if done {
                            return;
                        }
                    }
                }
                Err(e) => {
                    yield Err(CompletionError::NetworkFailure(format!(
                        "response body interrupted: {e}"
                    )));
                    return;
                }
            }
        }

        for event in decoder.finish() {
            yield Ok(event);
        }
        if decoder.skipped_lines() > 0 {
            debug!("Response stream ended with {} skipped lines", decoder.skipped_lines());
        }
    }
    .boxed()
}
