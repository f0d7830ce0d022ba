use std::str::FromStr;

use super::{ClientConfig, ConfigError, parse_input_mode, parse_transport};
use crate::core::credentials::ApiKey;
use crate::core::realtime::OpenAIRealtimeModel;

/// Build a configuration from environment-style key lookups.
///
/// Recognized variables:
/// - `OPENAI_API_KEY`
/// - `VOICE_TRANSPORT` (`http` | `realtime`), `VOICE_INPUT_MODE` (`stt` | `audio`)
/// - `COMPLETION_BASE_URL`, `COMPLETION_MODEL`, `COMPLETION_TEMPERATURE`,
///   `COMPLETION_CANDIDATE_COUNT`, `SYSTEM_INSTRUCTION`
/// - `REALTIME_URL`, `REALTIME_MODEL`
/// - `TRANSCRIPTION_BASE_URL`, `TRANSCRIPTION_MODEL`, `TRANSCRIPTION_LANGUAGE`
/// - `AUDIO_INPUT_DEVICE`
/// - `RETRY_MAX_RETRIES`, `RETRY_BASE_DELAY_MS`, `RETRY_JITTER_MS`, `RETRY_MAX_DELAY_MS`
///
/// Blank values are treated as unset.
pub(crate) fn load<F>(lookup: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let mut config = ClientConfig::default();

    if let Some(key) = get("OPENAI_API_KEY") {
        config.api_key = ApiKey::new(key);
    }
    if let Some(value) = get("VOICE_TRANSPORT") {
        config.transport = parse_transport(&value, "VOICE_TRANSPORT")?;
    }
    if let Some(value) = get("VOICE_INPUT_MODE") {
        config.input_mode = parse_input_mode(&value, "VOICE_INPUT_MODE")?;
    }

    if let Some(value) = get("COMPLETION_BASE_URL") {
        config.completion_base_url = value;
    }
    if let Some(value) = get("COMPLETION_MODEL") {
        config.completion_model = value;
    }
    if let Some(value) = get("COMPLETION_TEMPERATURE") {
        config.params.temperature = parse_number("COMPLETION_TEMPERATURE", &value)?;
    }
    if let Some(value) = get("COMPLETION_CANDIDATE_COUNT") {
        config.params.candidate_count = parse_number("COMPLETION_CANDIDATE_COUNT", &value)?;
    }
    if let Some(value) = get("SYSTEM_INSTRUCTION") {
        config.system_instruction = value;
    }

    if let Some(value) = get("REALTIME_URL") {
        config.realtime_url = value;
    }
    if let Some(value) = get("REALTIME_MODEL") {
        config.realtime_model = OpenAIRealtimeModel::from_str_or_default(&value);
    }

    if let Some(value) = get("TRANSCRIPTION_BASE_URL") {
        config.transcription_base_url = value;
    }
    if let Some(value) = get("TRANSCRIPTION_MODEL") {
        config.transcription_model = value;
    }
    config.transcription_language = get("TRANSCRIPTION_LANGUAGE");
    config.capture.device_name = get("AUDIO_INPUT_DEVICE");

    if let Some(value) = get("RETRY_MAX_RETRIES") {
        config.retry.max_retries = parse_number("RETRY_MAX_RETRIES", &value)?;
    }
    if let Some(value) = get("RETRY_BASE_DELAY_MS") {
        config.retry.base_delay_ms = parse_number("RETRY_BASE_DELAY_MS", &value)?;
    }
    if let Some(value) = get("RETRY_JITTER_MS") {
        config.retry.jitter_ms = parse_number("RETRY_JITTER_MS", &value)?;
    }
    if let Some(value) = get("RETRY_MAX_DELAY_MS") {
        config.retry.max_delay_ms = parse_number("RETRY_MAX_DELAY_MS", &value)?;
    }

    Ok(config)
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} is not a valid number: '{value}'")))
}
