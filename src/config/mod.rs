//! Configuration module for the voice client
//!
//! Configuration is read from `.env` files, environment variables and an
//! optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `env`: Environment variable loading
//! - `yaml`: YAML configuration file loading and merging
//!
//! # Example
//! ```rust,no_run
//! use waav_voice_client::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variables as the base
//! let config = ClientConfig::from_file(&PathBuf::from("voice.yaml"))?;
//! println!("Transport: {}", config.transport);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

mod env;
mod yaml;

pub use yaml::{
    AudioYaml, CompletionYaml, RealtimeYaml, RetryYaml, TranscriptionYaml, YamlConfig,
};

use crate::core::audio::{CaptureConfig, SegmenterConfig};
use crate::core::completion::{
    CompletionConfig, DEFAULT_COMPLETION_MODEL, GenerationParams, OPENAI_API_BASE_URL,
};
use crate::core::credentials::ApiKey;
use crate::core::realtime::{OPENAI_REALTIME_URL, OpenAIRealtimeConfig, OpenAIRealtimeModel};
use crate::core::retry::RetryPolicy;
use crate::core::session::{DEFAULT_SYSTEM_INSTRUCTION, SessionConfig};
use crate::core::stt::{DEFAULT_TRANSCRIPTION_MODEL, TranscriptionConfig};
use crate::core::transport::TransportKind;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No API key configured (set OPENAI_API_KEY or api_key in the config file)")]
    MissingApiKey,
}

/// How captured speech reaches the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    /// Utterances are transcribed and sent as text
    #[default]
    SpeechToText,
    /// Utterances are sent as raw audio (realtime transport only)
    AudioForwarding,
}

impl InputMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "stt" | "speech-to-text" | "speech_to_text" | "text" => Some(InputMode::SpeechToText),
            "audio" | "audio-forwarding" | "audio_forwarding" => Some(InputMode::AudioForwarding),
            _ => None,
        }
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputMode::SpeechToText => write!(f, "stt"),
            InputMode::AudioForwarding => write!(f, "audio"),
        }
    }
}

/// Client configuration
///
/// Contains everything needed to run a voice session:
/// - Credential and transport selection
/// - Completion model and generation parameters
/// - Realtime and transcription endpoints
/// - Capture device, segmentation and retry behaviour
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: ApiKey,
    pub transport: TransportKind,
    pub input_mode: InputMode,

    // Chat completions
    pub completion_base_url: String,
    pub completion_model: String,
    pub params: GenerationParams,
    pub system_instruction: String,

    // Realtime
    pub realtime_url: String,
    pub realtime_model: OpenAIRealtimeModel,

    // Transcription
    pub transcription_base_url: String,
    pub transcription_model: String,
    pub transcription_language: Option<String>,

    // Audio
    pub capture: CaptureConfig,
    pub segmenter: SegmenterConfig,

    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: ApiKey::default(),
            transport: TransportKind::default(),
            input_mode: InputMode::default(),
            completion_base_url: OPENAI_API_BASE_URL.to_string(),
            completion_model: DEFAULT_COMPLETION_MODEL.to_string(),
            params: GenerationParams::default(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            realtime_url: OPENAI_REALTIME_URL.to_string(),
            realtime_model: OpenAIRealtimeModel::default(),
            transcription_base_url: OPENAI_API_BASE_URL.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            transcription_language: None,
            capture: CaptureConfig::default(),
            segmenter: SegmenterConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// `.env` values must already be in the environment (loaded by the
    /// binary at startup). Validation runs on the result.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from a YAML file with environment variables as the base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_file_with(path, |key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = env::load(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn from_file_with<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = env::load(lookup)?;
        yaml_config.apply(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the merged configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if !(0.0..=2.0).contains(&self.params.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.params.temperature
            )));
        }
        if self.params.candidate_count == 0 {
            return Err(ConfigError::Invalid(
                "candidate_count must be at least 1".into(),
            ));
        }
        if self.input_mode == InputMode::AudioForwarding && !self.transport.accepts_audio() {
            return Err(ConfigError::Invalid(format!(
                "input mode '{}' requires the realtime transport, got '{}'",
                self.input_mode, self.transport
            )));
        }
        for (name, url) in [
            ("completion base URL", &self.completion_base_url),
            ("transcription base URL", &self.transcription_base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be an http(s) URL, got '{url}'"
                )));
            }
        }
        if !(self.realtime_url.starts_with("ws://") || self.realtime_url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "realtime URL must be a ws(s) URL, got '{}'",
                self.realtime_url
            )));
        }
        self.capture
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            api_key: self.api_key.clone(),
            base_url: self.completion_base_url.clone(),
            model: self.completion_model.clone(),
            ..Default::default()
        }
    }

    pub fn realtime_config(&self) -> OpenAIRealtimeConfig {
        OpenAIRealtimeConfig {
            api_key: self.api_key.clone(),
            url: self.realtime_url.clone(),
            model: self.realtime_model,
            ..Default::default()
        }
    }

    pub fn transcription_config(&self) -> TranscriptionConfig {
        TranscriptionConfig {
            api_key: self.api_key.clone(),
            base_url: self.transcription_base_url.clone(),
            model: self.transcription_model.clone(),
            language: self.transcription_language.clone(),
            ..Default::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            system_instruction: self.system_instruction.clone(),
            params: self.params,
            retry: self.retry.clone(),
            segmenter: self.segmenter.clone(),
        }
    }
}

fn parse_transport(value: &str, source: &str) -> Result<TransportKind, ConfigError> {
    TransportKind::parse(value).ok_or_else(|| {
        ConfigError::Invalid(format!(
            "{source} must be 'http' or 'realtime', got '{value}'"
        ))
    })
}

fn parse_input_mode(value: &str, source: &str) -> Result<InputMode, ConfigError> {
    InputMode::parse(value).ok_or_else(|| {
        ConfigError::Invalid(format!("{source} must be 'stt' or 'audio', got '{value}'"))
    })
}
