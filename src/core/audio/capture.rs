//! Audio capture contract and the externally-fed capture source.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use super::frame::{AudioFrame, CAPTURE_SAMPLE_RATE, DEFAULT_FRAME_SIZE};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while acquiring or running an input device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// No usable input device, or the device stream could not be built
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The platform refused microphone access
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Failure inside the audio backend after acquisition
    #[error("Audio backend error: {0}")]
    Backend(String),
}

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

// =============================================================================
// Configuration
// =============================================================================

/// Requested capture format and processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Output sample rate in Hz.
    /// Default: 24000
    pub sample_rate: u32,

    /// Output channel count. Only mono is produced.
    /// Default: 1
    pub channels: u16,

    /// Samples per emitted frame.
    /// Default: 4096
    pub frame_size: usize,

    /// Request acoustic echo cancellation from the platform.
    /// Default: true
    pub echo_cancellation: bool,

    /// Request noise suppression from the platform.
    /// Default: true
    pub noise_suppression: bool,

    /// Input device name; the host default device is used when unset.
    pub device_name: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: 1,
            frame_size: DEFAULT_FRAME_SIZE,
            echo_cancellation: true,
            noise_suppression: true,
            device_name: None,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> CaptureResult<()> {
        if self.sample_rate != CAPTURE_SAMPLE_RATE {
            return Err(CaptureError::Backend(format!(
                "unsupported sample rate {}, capture delivers {} Hz",
                self.sample_rate, CAPTURE_SAMPLE_RATE
            )));
        }
        if self.channels != 1 {
            return Err(CaptureError::Backend(format!(
                "unsupported channel count {}, capture delivers mono",
                self.channels
            )));
        }
        if self.frame_size == 0 {
            return Err(CaptureError::Backend("frame size must be non-zero".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Capture Trait
// =============================================================================

/// Destination for captured frames. Unbounded so that the device side never
/// blocks and no frame is lost; frames arrive in capture order.
pub type FrameSink = mpsc::UnboundedSender<AudioFrame>;

/// Owner of a microphone (or other frame source).
///
/// `start` may be awaited while the device is being acquired. `stop` is
/// synchronous: once it returns no further frame is delivered to the sink.
/// Calling `stop` without a prior `start`, twice, or after a `start` that was
/// abandoned midway is a no-op.
#[async_trait]
pub trait AudioCapture: Send {
    /// Acquire the device and begin delivering frames to `sink`.
    async fn start(&mut self, sink: FrameSink) -> CaptureResult<()>;

    /// Release the device. Called from async code, so it must return
    /// promptly; no frame is delivered after it returns.
    fn stop(&mut self);

    /// Whether frames are currently being delivered.
    fn is_capturing(&self) -> bool;
}

// =============================================================================
// Externally-fed capture
// =============================================================================

#[derive(Default)]
struct ChannelShared {
    sink: Mutex<Option<FrameSink>>,
    next_sequence: AtomicU64,
}

/// Capture source whose frames are pushed through a [`FrameFeeder`] rather
/// than read from a device. Used for text-only sessions and for driving a
/// session from pre-recorded audio.
pub struct ChannelCapture {
    shared: Arc<ChannelShared>,
}

/// Handle that pushes frames into a [`ChannelCapture`].
#[derive(Clone)]
pub struct FrameFeeder {
    shared: Arc<ChannelShared>,
}

impl ChannelCapture {
    pub fn new() -> (Self, FrameFeeder) {
        let shared = Arc::new(ChannelShared::default());
        (
            Self {
                shared: shared.clone(),
            },
            FrameFeeder { shared },
        )
    }
}

#[async_trait]
impl AudioCapture for ChannelCapture {
    async fn start(&mut self, sink: FrameSink) -> CaptureResult<()> {
        self.shared.next_sequence.store(0, Ordering::Relaxed);
        *self.shared.sink.lock() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.sink.lock().take();
    }

    fn is_capturing(&self) -> bool {
        self.shared.sink.lock().is_some()
    }
}

impl FrameFeeder {
    /// Delivers one frame. Returns `false` when the capture is stopped and the
    /// samples were discarded.
    pub fn feed(&self, samples: impl Into<Box<[f32]>>) -> bool {
        let guard = self.shared.sink.lock();
        let Some(sink) = guard.as_ref() else {
            return false;
        };
        let sequence = self.shared.next_sequence.fetch_add(1, Ordering::Relaxed);
        sink.send(AudioFrame::new(sequence, samples)).is_ok()
    }

    /// Simulates loss of the underlying device: the frame stream ends while
    /// the owner still believes capture is running.
    pub fn close(&self) {
        self.shared.sink.lock().take();
    }
}
