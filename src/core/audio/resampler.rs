//! Conversion of device-native audio into fixed-size 24kHz frames.

use rubato::{FftFixedIn, Resampler};

use super::capture::CaptureError;

/// Input chunk handed to the FFT resampler per call.
const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Resamples a mono stream and slices the output into frames of exactly
/// `frame_samples` samples.
///
/// When input and output rates match the resampler is bypassed and input is
/// only re-framed.
pub struct FrameResampler {
    resampler: Option<FftFixedIn<f32>>,
    chunk_in: usize,
    in_buf: Vec<f32>,
    frame_samples: usize,
    pending: Vec<f32>,
}

impl FrameResampler {
    pub fn new(in_hz: u32, out_hz: u32, frame_samples: usize) -> Result<Self, CaptureError> {
        if frame_samples == 0 {
            return Err(CaptureError::Backend("frame size must be non-zero".into()));
        }

        let resampler = if in_hz != out_hz {
            let r = FftFixedIn::<f32>::new(
                in_hz as usize,
                out_hz as usize,
                RESAMPLER_CHUNK_SIZE,
                1,
                1,
            )
            .map_err(|e| CaptureError::Backend(format!("failed to create resampler: {e}")))?;
            Some(r)
        } else {
            None
        };

        Ok(Self {
            resampler,
            chunk_in: RESAMPLER_CHUNK_SIZE,
            in_buf: Vec::with_capacity(RESAMPLER_CHUNK_SIZE),
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        })
    }

    /// Feeds mono samples, calling `emit` once per completed frame.
    pub fn push(&mut self, mut src: &[f32], mut emit: impl FnMut(&[f32])) {
        if self.resampler.is_none() {
            self.emit_frames(src, &mut emit);
            return;
        }

        while !src.is_empty() {
            let space = self.chunk_in - self.in_buf.len();
            let take = space.min(src.len());
            self.in_buf.extend_from_slice(&src[..take]);
            src = &src[take..];

            if self.in_buf.len() == self.chunk_in {
                self.process_chunk(&mut emit);
            }
        }
    }

    /// Flushes buffered input; a trailing partial frame is zero-padded.
    pub fn finish(&mut self, mut emit: impl FnMut(&[f32])) {
        if self.resampler.is_some() && !self.in_buf.is_empty() {
            self.in_buf.resize(self.chunk_in, 0.0);
            self.process_chunk(&mut emit);
        }

        if !self.pending.is_empty() {
            self.pending.resize(self.frame_samples, 0.0);
            emit(&self.pending);
            self.pending.clear();
        }
    }

    fn process_chunk(&mut self, emit: &mut impl FnMut(&[f32])) {
        let Some(resampler) = self.resampler.as_mut() else {
            return;
        };
        match resampler.process(&[&self.in_buf[..]], None) {
            Ok(out) => {
                if let Some(channel) = out.into_iter().next() {
                    self.emit_frames(&channel, emit);
                }
            }
            Err(e) => tracing::warn!("Resampler dropped a chunk: {}", e),
        }
        self.in_buf.clear();
    }

    fn emit_frames(&mut self, mut data: &[f32], emit: &mut impl FnMut(&[f32])) {
        while !data.is_empty() {
            let space = self.frame_samples - self.pending.len();
            let take = space.min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() == self.frame_samples {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }
}

/// Averages interleaved channels, handing each mono sample to `emit`.
/// Allocation-free so it can run inside the device callback. A trailing
/// partial frame is dropped.
pub fn downmix_to_mono(
    interleaved: impl IntoIterator<Item = f32>,
    channels: usize,
    mut emit: impl FnMut(f32),
) {
    let channels = channels.max(1);
    let mut sum = 0.0f32;
    let mut count = 0;
    for sample in interleaved {
        sum += sample;
        count += 1;
        if count == channels {
            emit(sum / channels as f32);
            sum = 0.0;
            count = 0;
        }
    }
}
