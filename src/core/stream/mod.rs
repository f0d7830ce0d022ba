//! Decoding of streamed completion responses.

mod body;
mod decoder;

pub use body::decode_body;
pub use decoder::{DONE_SENTINEL, DeltaEvent, StreamDecoder};
