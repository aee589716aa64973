//! papaya-voice - realtime voice support chat
//!
//! Streams microphone audio to a live voice model and plays its spoken
//! answers back gaplessly while tracking the transcription of each turn.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod chat;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod live;
pub mod output;

// Composition root - needs real devices and the CLI types
#[cfg(all(feature = "cpal-audio", feature = "cli"))]
pub mod app;

// Device seams
pub use audio::capture::AudioInput;
pub use audio::playback::AudioOutput;
pub use live::transport::{SessionLink, Transport};

// Session
pub use live::handle::VoiceChat;
pub use live::session::{LiveSession, SessionParts};
pub use live::state::{LiveState, SessionState};
pub use live::transcript::{Transcription, Turn, TurnSink};

// Error handling
pub use error::{LiveError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_hash_only_when_built_from_git() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            assert!(ver.contains('+'), "expected '+<hash>', got: {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
