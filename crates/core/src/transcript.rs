use crate::consts::ASSISTANT_ERROR_TEXT;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single transcribed chunk of spoken input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub captured_at: DateTime<Utc>,
}

impl Utterance {
    pub fn new(text: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            captured_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in the conversation. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp,
        }
    }

    pub fn assistant(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp,
        }
    }

    /// The stand-in reply recorded when the assistant could not answer.
    pub fn assistant_error(timestamp: DateTime<Utc>) -> Self {
        Self::assistant(ASSISTANT_ERROR_TEXT, timestamp)
    }
}

/// Ordered, append-only conversation log kept by the host.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Forget the whole conversation.
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
