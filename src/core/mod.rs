pub mod audio;
pub mod completion;
pub mod credentials;
pub mod realtime;
pub mod retry;
pub mod session;
pub mod stream;
pub mod stt;
pub mod transport;

// Re-export commonly used types for convenience
pub use audio::{
    AudioCapture, AudioFrame, CAPTURE_SAMPLE_RATE, CaptureConfig, CaptureError, ChannelCapture,
    CpalCapture, DEFAULT_FRAME_SIZE, FrameFeeder, SegmenterConfig,
};

pub use completion::{
    CompletionConfig, CompletionError, CompletionRequest, CompletionResult,
    HttpCompletionTransport, TurnInput, TurnTransport,
};

pub use realtime::{ConnectionState, OpenAIRealtimeConfig, OpenAIRealtimeTransport};

pub use retry::RetryPolicy;

pub use session::{
    InputPipeline, Message, MessageUpdate, SessionConfig, SessionController, SessionError,
    SessionEvent, SessionState,
};

pub use stream::{DeltaEvent, StreamDecoder};

pub use stt::{Transcriber, TranscriptionConfig, TranscriptionError, WhisperTranscriber};

pub use transport::{TransportKind, create_transport, get_supported_transports};
