//! Fixed-size mono audio frames produced by capture.

use bytes::{BufMut, Bytes, BytesMut};

/// Sample rate every frame is delivered at (Hz).
pub const CAPTURE_SAMPLE_RATE: u32 = 24_000;

/// Default number of samples per frame (~170ms at 24kHz).
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// An immutable buffer of mono `f32` samples at [`CAPTURE_SAMPLE_RATE`].
///
/// Frames are moved from capture to the session driver by value; the sample
/// storage is a boxed slice so it can never grow after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    sequence: u64,
    samples: Box<[f32]>,
}

impl AudioFrame {
    pub fn new(sequence: u64, samples: impl Into<Box<[f32]>>) -> Self {
        Self {
            sequence,
            samples: samples.into(),
        }
    }

    /// Monotonically increasing position of this frame within one capture run.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration covered by this frame in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        samples_to_ms(self.samples.len())
    }

    /// Root-mean-square energy of the frame, in the `0.0..=1.0` range for
    /// normalized input.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let s = s as f64;
                s * s
            })
            .sum();
        (sum_squares / self.samples.len() as f64).sqrt() as f32
    }

    /// PCM 16-bit signed little-endian encoding, the wire format expected by
    /// realtime providers.
    pub fn to_pcm16_le(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.samples.len() * 2);
        for &sample in self.samples.iter() {
            out.put_i16_le(f32_to_i16(sample));
        }
        out.freeze()
    }
}

/// Converts a normalized float sample to 16-bit PCM, clamping out-of-range input.
pub fn f32_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32).round() as i16
}

/// Concatenates the PCM16 encoding of several frames in order.
pub fn frames_to_pcm16_le(frames: &[AudioFrame]) -> Bytes {
    let total: usize = frames.iter().map(AudioFrame::len).sum();
    let mut out = BytesMut::with_capacity(total * 2);
    for frame in frames {
        out.extend_from_slice(&frame.to_pcm16_le());
    }
    out.freeze()
}

pub(crate) fn samples_to_ms(samples: usize) -> u64 {
    (samples as u64 * 1000) / CAPTURE_SAMPLE_RATE as u64
}

pub(crate) fn ms_to_samples(ms: u64) -> usize {
    ((ms * CAPTURE_SAMPLE_RATE as u64) / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_silence_is_zero() {
        let frame = AudioFrame::new(0, vec![0.0; 256]);
        assert_eq!(frame.rms(), 0.0);
    }

    #[test]
    fn test_rms_of_constant_signal() {
        let frame = AudioFrame::new(0, vec![0.5; 256]);
        assert!((frame.rms() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rms_of_empty_frame() {
        let frame = AudioFrame::new(0, Vec::new());
        assert!(frame.is_empty());
        assert_eq!(frame.rms(), 0.0);
    }

    #[test]
    fn test_pcm16_encoding_is_little_endian_and_clamped() {
        let frame = AudioFrame::new(3, vec![0.0, 1.0, -1.0, 2.0]);
        let pcm = frame.to_pcm16_le();
        assert_eq!(pcm.len(), 8);
        assert_eq!(&pcm[0..2], &[0, 0]);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[4], pcm[5]]), -i16::MAX);
        // Out of range input is clamped rather than wrapped
        assert_eq!(i16::from_le_bytes([pcm[6], pcm[7]]), i16::MAX);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(0, vec![0.0; 2400]);
        assert_eq!(frame.duration_ms(), 100);
        assert_eq!(ms_to_samples(100), 2400);
    }

    #[test]
    fn test_frames_to_pcm16_preserves_order() {
        let frames = vec![
            AudioFrame::new(0, vec![1.0]),
            AudioFrame::new(1, vec![-1.0]),
        ];
        let pcm = frames_to_pcm16_le(&frames);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), -i16::MAX);
    }
}
