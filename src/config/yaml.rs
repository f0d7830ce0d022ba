use serde::Deserialize;
use std::path::Path;

use super::{ClientConfig, ConfigError, parse_input_mode, parse_transport};
use crate::core::credentials::ApiKey;
use crate::core::realtime::OpenAIRealtimeModel;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override the environment.
///
/// # Example YAML structure
/// ```yaml
/// api_key: "sk-..."
/// transport: realtime
/// input_mode: audio
///
/// completion:
///   base_url: "https://api.openai.com/v1"
///   model: "gpt-4"
///   temperature: 0.7
///   candidate_count: 1
///   system_instruction: "You are a concise voice assistant."
///
/// realtime:
///   url: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview"
///
/// transcription:
///   base_url: "https://api.openai.com/v1"
///   model: "whisper-1"
///   language: "en"
///
/// audio:
///   input_device: "USB Microphone"
///   echo_cancellation: true
///   noise_suppression: true
///   rms_threshold: 0.015
///   silence_duration_ms: 700
///
/// retry:
///   max_retries: 3
///   base_delay_ms: 2000
///   jitter_ms: 1000
///   max_delay_ms: 64000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub api_key: Option<String>,
    pub transport: Option<String>,
    pub input_mode: Option<String>,
    pub completion: Option<CompletionYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub transcription: Option<TranscriptionYaml>,
    pub audio: Option<AudioYaml>,
    pub retry: Option<RetryYaml>,
}

/// Chat completion settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CompletionYaml {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub candidate_count: Option<u32>,
    pub system_instruction: Option<String>,
}

/// Realtime settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub url: Option<String>,
    pub model: Option<String>,
}

/// Transcription settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TranscriptionYaml {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
}

/// Capture and segmentation settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub input_device: Option<String>,
    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
    pub rms_threshold: Option<f32>,
    pub silence_duration_ms: Option<u32>,
    pub min_speech_ms: Option<u32>,
    pub max_utterance_ms: Option<u32>,
}

/// Retry settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RetryYaml {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub jitter_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Overwrite every field of `config` that the file sets.
    pub(crate) fn apply(self, config: &mut ClientConfig) -> Result<(), ConfigError> {
        if let Some(api_key) = self.api_key.filter(|k| !k.trim().is_empty()) {
            config.api_key = ApiKey::new(api_key.trim());
        }
        if let Some(transport) = self.transport {
            config.transport = parse_transport(&transport, "transport")?;
        }
        if let Some(mode) = self.input_mode {
            config.input_mode = parse_input_mode(&mode, "input_mode")?;
        }

        if let Some(completion) = self.completion {
            if let Some(base_url) = completion.base_url {
                config.completion_base_url = base_url;
            }
            if let Some(model) = completion.model {
                config.completion_model = model;
            }
            if let Some(temperature) = completion.temperature {
                config.params.temperature = temperature;
            }
            if let Some(candidate_count) = completion.candidate_count {
                config.params.candidate_count = candidate_count;
            }
            if let Some(instruction) = completion.system_instruction {
                config.system_instruction = instruction;
            }
        }

        if let Some(realtime) = self.realtime {
            if let Some(url) = realtime.url {
                config.realtime_url = url;
            }
            if let Some(model) = realtime.model {
                config.realtime_model = OpenAIRealtimeModel::from_str_or_default(&model);
            }
        }

        if let Some(transcription) = self.transcription {
            if let Some(base_url) = transcription.base_url {
                config.transcription_base_url = base_url;
            }
            if let Some(model) = transcription.model {
                config.transcription_model = model;
            }
            if transcription.language.is_some() {
                config.transcription_language = transcription.language;
            }
        }

        if let Some(audio) = self.audio {
            if audio.input_device.is_some() {
                config.capture.device_name = audio.input_device;
            }
            if let Some(enabled) = audio.echo_cancellation {
                config.capture.echo_cancellation = enabled;
            }
            if let Some(enabled) = audio.noise_suppression {
                config.capture.noise_suppression = enabled;
            }
            if let Some(threshold) = audio.rms_threshold {
                config.segmenter.rms_threshold = threshold;
            }
            if let Some(ms) = audio.silence_duration_ms {
                config.segmenter.silence_duration_ms = ms;
            }
            if let Some(ms) = audio.min_speech_ms {
                config.segmenter.min_speech_ms = ms;
            }
            if let Some(ms) = audio.max_utterance_ms {
                config.segmenter.max_utterance_ms = ms;
            }
        }

        if let Some(retry) = self.retry {
            if let Some(max_retries) = retry.max_retries {
                config.retry.max_retries = max_retries;
            }
            if let Some(ms) = retry.base_delay_ms {
                config.retry.base_delay_ms = ms;
            }
            if let Some(ms) = retry.jitter_ms {
                config.retry.jitter_ms = ms;
            }
            if let Some(ms) = retry.max_delay_ms {
                config.retry.max_delay_ms = ms;
            }
        }

        Ok(())
    }
}
