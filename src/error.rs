//! Error types for papaya-voice.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LiveError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("API key not found (set GEMINI_API_KEY or session.api_key)")]
    MissingApiKey,

    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Microphone access denied: {message}")]
    AudioPermission { message: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    #[error("Audio decode failed: {message}")]
    AudioDecode { message: String },

    // Live session errors
    #[error("Live session transport error: {message}")]
    Transport { message: String },

    #[error("Live session protocol error: {message}")]
    Protocol { message: String },

    #[error("Live session is closed")]
    SessionClosed,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LiveError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = LiveError::ConfigInvalidValue {
            key: "audio.capture_frame_size".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for audio.capture_frame_size: must be positive"
        );
    }

    #[test]
    fn test_missing_api_key_mentions_env_var() {
        assert!(LiveError::MissingApiKey.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_audio_device_not_found_display() {
        let error = LiveError::AudioDeviceNotFound {
            device: "default".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device not found: default");
    }

    #[test]
    fn test_audio_permission_display() {
        let error = LiveError::AudioPermission {
            message: "denied by user".to_string(),
        };
        assert_eq!(error.to_string(), "Microphone access denied: denied by user");
    }

    #[test]
    fn test_audio_decode_display() {
        let error = LiveError::AudioDecode {
            message: "odd byte count".to_string(),
        };
        assert_eq!(error.to_string(), "Audio decode failed: odd byte count");
    }

    #[test]
    fn test_transport_display() {
        let error = LiveError::Transport {
            message: "connection reset".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Live session transport error: connection reset"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: LiveError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: LiveError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<LiveError>();
        assert_sync::<LiveError>();
    }
}
