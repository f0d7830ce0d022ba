//! Microphone capture, framing and utterance segmentation.
//!
//! All audio leaving this module is mono `f32` at 24kHz, sliced into
//! fixed-size [`AudioFrame`]s.

mod capture;
mod cpal_capture;
mod frame;
mod resampler;
mod segmenter;

pub use capture::{
    AudioCapture, CaptureConfig, CaptureError, CaptureResult, ChannelCapture, FrameFeeder,
    FrameSink,
};
pub use cpal_capture::CpalCapture;
pub use frame::{
    AudioFrame, CAPTURE_SAMPLE_RATE, DEFAULT_FRAME_SIZE, f32_to_i16, frames_to_pcm16_le,
};
pub use resampler::{FrameResampler, downmix_to_mono};
pub use segmenter::{SegmenterConfig, Utterance, UtteranceSegmenter};
