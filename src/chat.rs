//! Support conversation log built from finished voice turns.

use crate::defaults;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub sender: Sender,
    pub text: String,
}

/// Ordered message log, opened with the bot greeting.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    next_id: u64,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        let mut conversation = Self {
            messages: Vec::new(),
            next_id: 1,
        };
        conversation.push(Sender::Bot, defaults::GREETING);
        conversation
    }

    /// Record a finished voice turn as a user message and a bot reply.
    ///
    /// Turns where the user said nothing intelligible (blank transcription)
    /// are not recorded. Returns whether the turn was kept.
    pub fn record_turn(&mut self, user: &str, model: &str) -> bool {
        if user.trim().is_empty() {
            return false;
        }
        self.push(Sender::User, user);
        self.push(Sender::Bot, model);
        true
    }

    /// Add a status line such as a connection error.
    pub fn push_system(&mut self, text: &str) {
        self.push(Sender::System, text);
    }

    fn push(&mut self, sender: Sender, text: &str) {
        self.messages.push(ChatMessage {
            id: self.next_id,
            sender,
            text: text.to_string(),
        });
        self.next_id += 1;
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of recorded voice turns.
    pub fn turn_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.sender == Sender::User)
            .count()
    }
}
