//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between section and field)
//! - Well-known deployment variables (HOST, PORT, ANTHROPIC_API_KEY, ...)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Well-known variables (`ANTHROPIC_API_KEY`, `SPEECH_API_KEY`, `VOICE_CHANNEL_ID`, ...)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_SPEECH__VOICE_NAME`, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Runtime updates:
//! Only the speech voice settings and memory limits can be changed while the
//! process runs. `speech.input_format` decides how streamed text is segmented and is
//! fixed for the lifetime of the process.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Upper bound for `memory.max_age_secs`.
pub const MAX_MEMORY_AGE_SECS: u64 = 365 * 24 * 60 * 60;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each remote collaborator (completion service, speech service, voice gateway)
/// gets its own group so they can be overridden independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub completion: CompletionConfig,
    pub speech: SpeechConfig,
    pub voice: VoiceConfig,
    pub memory: MemoryConfig,
    pub control: ControlConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Completion (LLM) service settings.
///
/// ## Fields:
/// - `base_url`: Messages API root, without the `/v1/messages` suffix
/// - `model`: Model identifier sent with every request
/// - `max_tokens`: Upper bound on generated output tokens
/// - `persona_name`: Speaker name recorded for assistant turns in memory
/// - `prompts_path`: Optional TOML file overriding the built-in prompt library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_version: String,
    pub model: String,
    pub max_tokens: u32,
    pub persona_name: String,
    pub prompts_path: Option<String>,
    pub request_timeout_secs: u64,
}

/// How responses are formatted, and therefore how they are cut into speakable units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// Plain prose, split on sentence punctuation followed by a space
    Plain,
    /// Structured speech markup (SSML), split on the closing `</speak>` tag
    Markup,
}

impl InputFormat {
    /// Name of the system prompt profile matching this format.
    pub fn system_profile(&self) -> &'static str {
        match self {
            InputFormat::Plain => "base_plain",
            InputFormat::Markup => "base_ssml",
        }
    }
}

/// Speech synthesis service settings.
///
/// ## Audio format:
/// The voice transport expects 16-bit little-endian PCM at 48kHz, so the defaults
/// request `LINEAR16` at 48000 Hz. Mono output is widened to stereo before playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub base_url: String,
    pub api_key: String,
    pub language_code: String,
    pub voice_name: String,
    pub audio_encoding: String,
    pub sample_rate_hz: u32,
    pub speaking_rate: f32,
    pub pitch: f32,
    pub input_format: InputFormat,
    pub request_timeout_secs: u64,
}

/// Voice gateway settings.
///
/// ## Fields:
/// - `gateway_url`: WebSocket URL of the voice gateway bridge
/// - `guild_id` / `channel_id`: Target used by `bot_control:connect`
/// - `join_timeout_secs`: Handshake budget before a join is declared failed
/// - `reconnect_attempts`: Automatic rejoin attempts after a transport error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub gateway_url: String,
    pub guild_id: String,
    pub channel_id: String,
    pub self_deaf: bool,
    pub join_timeout_secs: u64,
    pub reconnect_attempts: u32,
    pub auto_connect: bool,
}

impl VoiceConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

/// Conversational memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Entries older than this are never sent to the completion service
    pub max_age_secs: u64,
    /// How often the background sweep prunes expired entries
    pub sweep_interval_secs: u64,
    /// Maximum number of entries included in one request
    pub recent_window: usize,
}

/// Operator control channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub status_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3001,
            },
            completion: CompletionConfig {
                base_url: "https://api.anthropic.com".to_string(),
                api_key: String::new(),
                api_version: "2023-06-01".to_string(),
                model: "claude-3-haiku-20240307".to_string(),
                max_tokens: 1024,
                persona_name: "Delta".to_string(),
                prompts_path: None,
                request_timeout_secs: 60,
            },
            speech: SpeechConfig {
                base_url: "https://texttospeech.googleapis.com".to_string(),
                api_key: String::new(),
                language_code: "en-US".to_string(),
                voice_name: "en-US-Wavenet-C".to_string(),
                audio_encoding: "LINEAR16".to_string(),
                sample_rate_hz: 48_000,
                speaking_rate: 1.0,
                pitch: 0.0,
                input_format: InputFormat::Plain,
                request_timeout_secs: 10,
            },
            voice: VoiceConfig {
                gateway_url: "ws://127.0.0.1:7880/voice".to_string(),
                guild_id: String::new(),
                channel_id: String::new(),
                self_deaf: false,
                join_timeout_secs: 30,
                reconnect_attempts: 2,
                auto_connect: false,
            },
            memory: MemoryConfig {
                max_age_secs: 24 * 60 * 60,  // 24 hours
                sweep_interval_secs: 60 * 60, // hourly
                recent_window: 20,
            },
            control: ControlConfig {
                status_interval_secs: 10,
                heartbeat_interval_secs: 30,
                heartbeat_timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_SPEECH__VOICE_NAME=en-GB-Wavenet-B`: Override the synthesis voice
    /// - `APP_SPEECH__INPUT_FORMAT=markup`: Speak SSML responses
    /// - `ANTHROPIC_API_KEY=...`: Completion service key
    /// - `VOICE_CHANNEL_ID=...`: Target voice channel for `bot_control:connect`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Variables commonly injected by deployment platforms and secret managers
        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("ANTHROPIC_API_KEY", "completion.api_key"),
            ("SPEECH_API_KEY", "speech.api_key"),
            ("VOICE_GATEWAY_URL", "voice.gateway_url"),
            ("VOICE_GUILD_ID", "voice.guild_id"),
            ("VOICE_CHANNEL_ID", "voice.channel_id"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Model name and token budget are present
    /// - Sample rate, timeouts and memory window are non-zero
    ///
    /// API keys are not required here: the service can start and accept
    /// operator commands before credentials are provisioned.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.completion.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Completion model must not be empty"));
        }

        if self.completion.max_tokens == 0 {
            return Err(anyhow::anyhow!("Completion max_tokens must be greater than 0"));
        }

        if self.speech.sample_rate_hz == 0 {
            return Err(anyhow::anyhow!("Speech sample rate must be greater than 0"));
        }

        if !(0.25..=4.0).contains(&self.speech.speaking_rate) {
            return Err(anyhow::anyhow!("Speaking rate must be between 0.25 and 4.0"));
        }

        if self.voice.join_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Voice join timeout must be greater than 0"));
        }

        if self.memory.max_age_secs == 0 || self.memory.sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!("Memory max age and sweep interval must be greater than 0"));
        }

        if self.memory.max_age_secs > MAX_MEMORY_AGE_SECS {
            return Err(anyhow::anyhow!(
                "Memory max age must be at most {} seconds (one year)",
                MAX_MEMORY_AGE_SECS
            ));
        }

        if self.memory.recent_window == 0 {
            return Err(anyhow::anyhow!("Memory recent window must be greater than 0"));
        }

        if self.control.status_interval_secs == 0 {
            return Err(anyhow::anyhow!("Control status interval must be greater than 0"));
        }

        if self.control.heartbeat_interval_secs == 0
            || self.control.heartbeat_timeout_secs < self.control.heartbeat_interval_secs
        {
            return Err(anyhow::anyhow!(
                "Control heartbeat interval must be non-zero and no longer than the heartbeat timeout"
            ));
        }

        Ok(())
    }

    /// Apply a partial runtime update from a JSON string.
    ///
    /// ## Accepted fields:
    /// - `speech.voice_name`, `speech.language_code`, `speech.speaking_rate`, `speech.pitch`
    /// - `memory.max_age_secs`, `memory.recent_window`
    ///
    /// Attempts to change `speech.input_format` are rejected: segmentation mode is
    /// fixed for the process lifetime.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(speech) = partial_config.get("speech") {
            if let Some(format) = speech.get("input_format") {
                let requested: InputFormat = serde_json::from_value(format.clone())?;
                if requested != self.speech.input_format {
                    return Err(anyhow::anyhow!(
                        "speech.input_format cannot be changed at runtime"
                    ));
                }
            }
            if let Some(voice) = speech.get("voice_name").and_then(|v| v.as_str()) {
                self.speech.voice_name = voice.to_string();
            }
            if let Some(language) = speech.get("language_code").and_then(|v| v.as_str()) {
                self.speech.language_code = language.to_string();
            }
            if let Some(rate) = speech.get("speaking_rate").and_then(|v| v.as_f64()) {
                self.speech.speaking_rate = rate as f32;
            }
            if let Some(pitch) = speech.get("pitch").and_then(|v| v.as_f64()) {
                self.speech.pitch = pitch as f32;
            }
        }

        if let Some(memory) = partial_config.get("memory") {
            if let Some(age) = memory.get("max_age_secs").and_then(|v| v.as_u64()) {
                self.memory.max_age_secs = age;
            }
            if let Some(window) = memory.get("recent_window").and_then(|v| v.as_u64()) {
                self.memory.recent_window = window as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.memory.recent_window, 20);
        assert_eq!(config.speech.input_format, InputFormat::Plain);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.memory.recent_window = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"speech": {"voice_name": "en-GB-Wavenet-B", "speaking_rate": 1.25}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.speech.voice_name, "en-GB-Wavenet-B");
        assert!((config.speech.speaking_rate - 1.25).abs() < f32::EPSILON);
        assert_eq!(config.server.port, 3001);
    }

    #[test]
    fn test_input_format_is_not_hot_swappable() {
        let mut config = AppConfig::default();
        let json = r#"{"speech": {"input_format": "markup"}}"#;
        assert!(config.update_from_json(json).is_err());
        assert_eq!(config.speech.input_format, InputFormat::Plain);

        // Restating the current format is harmless
        let json = r#"{"speech": {"input_format": "plain"}}"#;
        assert!(config.update_from_json(json).is_ok());
    }

    #[test]
    fn test_invalid_update_is_rejected() {
        let mut config = AppConfig::default();
        let json = r#"{"memory": {"recent_window": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }

    #[test]
    fn test_memory_age_is_bounded() {
        let mut config = AppConfig::default();
        let json = r#"{"memory": {"max_age_secs": 10000000000000}}"#;
        assert!(config.update_from_json(json).is_err());

        let mut config = AppConfig::default();
        let json = format!(r#"{{"memory": {{"max_age_secs": {}}}}}"#, MAX_MEMORY_AGE_SECS);
        assert!(config.update_from_json(&json).is_ok());
    }

    #[test]
    fn test_system_profile_follows_format() {
        assert_eq!(InputFormat::Plain.system_profile(), "base_plain");
        assert_eq!(InputFormat::Markup.system_profile(), "base_ssml");
    }
}
