use crate::defaults;
use crate::error::{LiveError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub session: SessionConfig,
}

/// Audio capture and playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub capture_frame_size: usize,
    pub output_gain: f32,
}

/// Live session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub system_instruction: Option<String>,
    pub stop_playback_on_interrupt: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            input_sample_rate: defaults::INPUT_SAMPLE_RATE,
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            capture_frame_size: defaults::CAPTURE_FRAME_SIZE,
            output_gain: defaults::OUTPUT_GAIN,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::DEFAULT_ENDPOINT.to_string(),
            model: defaults::DEFAULT_MODEL.to_string(),
            voice: defaults::DEFAULT_VOICE.to_string(),
            api_key: None,
            system_instruction: None,
            stop_playback_on_interrupt: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only a missing file yields defaults; invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - GEMINI_API_KEY, then API_KEY → session.api_key
    /// - PAPAYA_MODEL → session.model
    /// - PAPAYA_VOICE → session.voice
    /// - PAPAYA_AUDIO_DEVICE → audio.input_device
    pub fn with_env_overrides(mut self) -> Self {
        let api_key = ["GEMINI_API_KEY", "API_KEY"]
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.is_empty());
        if let Some(key) = api_key {
            self.session.api_key = Some(key);
        }

        if let Ok(model) = std::env::var("PAPAYA_MODEL")
            && !model.is_empty()
        {
            self.session.model = model;
        }

        if let Ok(voice) = std::env::var("PAPAYA_VOICE")
            && !voice.is_empty()
        {
            self.session.voice = voice;
        }

        if let Ok(device) = std::env::var("PAPAYA_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        self
    }

    /// Reject values the audio pipelines cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.input_sample_rate == 0 {
            return Err(invalid("audio.input_sample_rate", "must be positive"));
        }
        if self.audio.output_sample_rate == 0 {
            return Err(invalid("audio.output_sample_rate", "must be positive"));
        }
        if self.audio.capture_frame_size == 0 {
            return Err(invalid("audio.capture_frame_size", "must be positive"));
        }
        if !(0.0..=defaults::MAX_OUTPUT_GAIN).contains(&self.audio.output_gain) {
            return Err(invalid(
                "audio.output_gain",
                &format!("must be between 0 and {}", defaults::MAX_OUTPUT_GAIN),
            ));
        }
        if self.session.model.trim().is_empty() {
            return Err(invalid("session.model", "must not be empty"));
        }
        Ok(())
    }

    /// The API key used to authenticate the live session.
    pub fn api_key(&self) -> Result<&str> {
        self.session
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(LiveError::MissingApiKey)
    }

    /// Render the effective configuration as TOML with the API key masked.
    pub fn to_display_toml(&self) -> anyhow::Result<String> {
        let mut shown = self.clone();
        if shown.session.api_key.is_some() {
            shown.session.api_key = Some("********".to_string());
        }
        Ok(toml::to_string_pretty(&shown)?)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/papaya-voice/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("papaya-voice")
            .join("config.toml")
    }
}

fn invalid(key: &str, message: &str) -> LiveError {
    LiveError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
