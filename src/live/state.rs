//! Session lifecycle and the state snapshot published to callers.

use crate::live::transcript::Transcription;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the session channel.
///
/// `Idle -> Connecting -> Open -> Closing -> Idle`. Failures go straight to
/// teardown and back to `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
}

impl SessionState {
    /// A session is being set up or is running.
    pub fn is_busy(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Open)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Observable state of the voice chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveState {
    pub is_active: bool,
    pub is_connecting: bool,
    pub is_model_speaking: bool,
    pub current_transcription: Transcription,
}

impl LiveState {
    pub fn session_state(&self) -> SessionState {
        match (self.is_connecting, self.is_active) {
            (true, _) => SessionState::Connecting,
            (false, true) => SessionState::Open,
            (false, false) => SessionState::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_states() {
        assert!(!SessionState::Idle.is_busy());
        assert!(SessionState::Connecting.is_busy());
        assert!(SessionState::Open.is_busy());
        assert!(!SessionState::Closing.is_busy());
    }

    #[test]
    fn default_state_is_idle_and_silent() {
        let state = LiveState::default();
        assert_eq!(state.session_state(), SessionState::Idle);
        assert!(!state.is_model_speaking);
        assert!(state.current_transcription.is_empty());
    }

    #[test]
    fn state_serializes_with_flag_names() {
        let state = LiveState {
            is_active: true,
            ..LiveState::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["is_active"], true);
        assert_eq!(json["current_transcription"]["user"], "");
    }
}
