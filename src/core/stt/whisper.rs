//! Batch transcription through the OpenAI audio transcriptions endpoint.
//!
//! Each utterance is encoded as a mono 16-bit WAV file and uploaded as a
//! multipart form. The endpoint answers with `{"text": "..."}`.

use std::io::Cursor;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::base::{Transcriber, TranscriptionError, TranscriptionResult};
use super::config::TranscriptionConfig;
use crate::core::audio::{AudioFrame, CAPTURE_SAMPLE_RATE, f32_to_i16};
use crate::core::completion::error_message;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Encodes frames as a mono PCM16 WAV file.
pub fn encode_wav(frames: &[AudioFrame], sample_rate: u32) -> TranscriptionResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| TranscriptionError::Encoding(e.to_string()))?;
        for frame in frames {
            for &sample in frame.samples() {
                writer
                    .write_sample(f32_to_i16(sample))
                    .map_err(|e| TranscriptionError::Encoding(e.to_string()))?;
            }
        }
        writer
            .finalize()
            .map_err(|e| TranscriptionError::Encoding(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

/// [`Transcriber`] backed by the Whisper transcription endpoint.
pub struct WhisperTranscriber {
    config: TranscriptionConfig,
    http_client: Client,
}

impl WhisperTranscriber {
    pub fn new(config: TranscriptionConfig) -> TranscriptionResult<Self> {
        if config.api_key.is_empty() {
            return Err(TranscriptionError::Unauthorized(
                "API key is required".into(),
            ));
        }

        let http_client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| TranscriptionError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &TranscriptionConfig {
        &self.config
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn name(&self) -> &'static str {
        "openai-whisper"
    }

    async fn transcribe(&self, frames: &[AudioFrame]) -> TranscriptionResult<String> {
        if frames.iter().all(AudioFrame::is_empty) {
            debug!("No audio data to transcribe");
            return Ok(String::new());
        }

        let wav_data = encode_wav(frames, CAPTURE_SAMPLE_RATE)?;
        info!(
            "Sending {} bytes of audio to {}",
            wav_data.len(),
            self.config.model
        );

        let file_part = Part::bytes(wav_data)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscriptionError::Encoding(format!("Invalid MIME type: {e}")))?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.config.model.clone())
            .text("response_format", "json");
        if let Some(language) = self.config.language.as_ref().filter(|l| !l.is_empty()) {
            form = form.text("language", language.clone());
        }

        let response = self
            .http_client
            .post(self.config.api_url())
            .header("Authorization", self.config.api_key.bearer())
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscriptionError::Network(format!("Request failed: {e}")))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| TranscriptionError::Network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let message = error_message(status.as_u16(), &response_text);
            warn!("Transcription failed ({}): {}", status, message);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    TranscriptionError::Unauthorized(message)
                }
                _ => TranscriptionError::Provider(message),
            });
        }

        let parsed: TranscriptionResponse = serde_json::from_str(&response_text)
            .map_err(|e| TranscriptionError::Provider(format!("Failed to parse response: {e}")))?;
        let text = parsed.text.trim().to_string();
        info!("Transcription complete: {} characters", text.len());
        Ok(text)
    }
}
