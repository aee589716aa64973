//! Per-turn transcription accumulation.

use serde::{Deserialize, Serialize};

/// Which side of the conversation a transcript fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The user's recognized speech.
    Input,
    /// The model's spoken response.
    Output,
}

/// Live partial text of the current turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcription {
    pub user: String,
    pub model: String,
}

impl Transcription {
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.model.is_empty()
    }
}

/// Text of one finished turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    pub model: String,
}

/// Accumulates deltas until a turn boundary.
#[derive(Debug, Default)]
pub struct TurnTracker {
    current: Transcription,
}

impl TurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment verbatim. Fragments carry their own spacing.
    pub fn push(&mut self, direction: Direction, delta: &str) {
        match direction {
            Direction::Input => self.current.user.push_str(delta),
            Direction::Output => self.current.model.push_str(delta),
        }
    }

    pub fn snapshot(&self) -> &Transcription {
        &self.current
    }

    /// Take the accumulated turn and clear both buffers.
    pub fn finish_turn(&mut self) -> Turn {
        let Transcription { user, model } = std::mem::take(&mut self.current);
        Turn { user, model }
    }

    pub fn reset(&mut self) {
        self.current = Transcription::default();
    }
}

/// Receives each finished turn, `(user_text, model_text)`.
///
/// Called on the session task before the cleared transcription is published.
pub trait TurnSink: Send {
    fn turn_complete(&mut self, user: &str, model: &str);
}

impl<F> TurnSink for F
where
    F: FnMut(&str, &str) + Send,
{
    fn turn_complete(&mut self, user: &str, model: &str) {
        self(user, model)
    }
}

/// Sink that forwards turns over a channel, for callers that consume them
/// on another task.
pub struct ChannelTurnSink {
    tx: tokio::sync::mpsc::UnboundedSender<Turn>,
}

impl ChannelTurnSink {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Turn>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TurnSink for ChannelTurnSink {
    fn turn_complete(&mut self, user: &str, model: &str) {
        let turn = Turn {
            user: user.to_string(),
            model: model.to_string(),
        };
        if self.tx.send(turn).is_err() {
            tracing::debug!("turn receiver dropped");
        }
    }
}
