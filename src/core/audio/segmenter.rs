//! Grouping of captured frames into utterances by RMS energy.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::frame::{AudioFrame, ms_to_samples, samples_to_ms};

/// Configuration for utterance segmentation.
///
/// Durations are measured in captured samples rather than wall-clock time,
/// so segmentation is independent of delivery jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// RMS energy threshold below which a frame is considered silent.
    /// Default is 0.01 (relative to normalized audio -1.0 to 1.0).
    pub rms_threshold: f32,

    /// Trailing silence (ms) that ends an utterance.
    /// Default is 700ms.
    pub silence_duration_ms: u32,

    /// Minimum voiced audio (ms) for an utterance to be kept.
    /// Shorter bursts (clicks, coughs) are discarded.
    /// Default is 300ms.
    pub min_speech_ms: u32,

    /// Upper bound (ms) on a single utterance; longer speech is cut here.
    /// Default is 30000ms.
    pub max_utterance_ms: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            rms_threshold: 0.01,
            silence_duration_ms: 700,
            min_speech_ms: 300,
            max_utterance_ms: 30_000,
        }
    }
}

/// A completed user utterance: consecutive frames in capture order.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
}

impl Utterance {
    pub fn new(frames: Vec<AudioFrame>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<AudioFrame> {
        self.frames
    }

    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(AudioFrame::len).sum()
    }

    pub fn duration_ms(&self) -> u64 {
        samples_to_ms(self.sample_count())
    }
}

/// Splits a frame stream into utterances using energy-based silence detection.
#[derive(Debug)]
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    frames: Vec<AudioFrame>,
    buffered_samples: usize,
    voiced_samples: usize,
    trailing_silence_samples: usize,
}

impl UtteranceSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            frames: Vec::new(),
            buffered_samples: 0,
            voiced_samples: 0,
            trailing_silence_samples: 0,
        }
    }

    /// Whether speech has started and frames are being collected.
    pub fn in_speech(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Feeds one frame; returns an utterance when this frame completes one.
    pub fn push(&mut self, frame: AudioFrame) -> Option<Utterance> {
        let len = frame.len();
        let silent = frame.rms() < self.config.rms_threshold;

        if silent && !self.in_speech() {
            // Leading silence is never part of an utterance
            return None;
        }

        self.frames.push(frame);
        self.buffered_samples += len;
        if silent {
            self.trailing_silence_samples += len;
        } else {
            self.voiced_samples += len;
            self.trailing_silence_samples = 0;
        }

        if self.trailing_silence_samples >= ms_to_samples(self.config.silence_duration_ms as u64) {
            debug!(
                "Silence threshold reached after {}ms of audio",
                samples_to_ms(self.buffered_samples)
            );
            return self.take();
        }

        if self.buffered_samples >= ms_to_samples(self.config.max_utterance_ms as u64) {
            debug!(
                "Utterance reached maximum duration ({}ms), cutting",
                self.config.max_utterance_ms
            );
            return self.take();
        }

        None
    }

    fn take(&mut self) -> Option<Utterance> {
        let voiced = self.voiced_samples;
        let frames = std::mem::take(&mut self.frames);
        self.buffered_samples = 0;
        self.voiced_samples = 0;
        self.trailing_silence_samples = 0;

        if voiced < ms_to_samples(self.config.min_speech_ms as u64) {
            debug!(
                "Discarding {}ms burst shorter than minimum speech duration",
                samples_to_ms(voiced)
            );
            return None;
        }
        Some(Utterance::new(frames))
    }
}
