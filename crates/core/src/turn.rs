//! Conversation turn types

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(Uuid);

impl TurnId {
    /// Generate a fresh turn ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Assistant => write!(f, "assistant"),
        }
    }
}

/// Lifecycle status of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnStatus {
    /// Speech in progress, text still accumulating
    Open,
    /// Turn closed normally, text fixed
    Finalized,
    /// Assistant turn cut off by the user speaking; partial text retained
    Interrupted,
}

/// One contiguous span of speech attributed to a single speaker.
///
/// At most one turn per speaker is `Open` at any instant. A new user turn
/// cannot open while an assistant turn is open unless that turn is first
/// marked `Interrupted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub speaker: Speaker,
    pub text: String,
    pub started_at_ms: u64,
    pub ended_at_ms: Option<u64>,
    pub status: TurnStatus,
}

impl Turn {
    /// Open a new turn at the given timeline instant
    pub fn open(speaker: Speaker, started_at_ms: u64) -> Self {
        Self {
            id: TurnId::new(),
            speaker,
            text: String::new(),
            started_at_ms,
            ended_at_ms: None,
            status: TurnStatus::Open,
        }
    }

    /// Close the turn with its final text
    pub fn finalize(&mut self, text: impl Into<String>, ended_at_ms: u64) {
        self.text = text.into();
        self.ended_at_ms = Some(ended_at_ms);
        self.status = TurnStatus::Finalized;
    }

    /// Mark an assistant turn as interrupted, retaining whatever text it had
    pub fn interrupt(&mut self, ended_at_ms: u64) {
        self.ended_at_ms = Some(ended_at_ms);
        self.status = TurnStatus::Interrupted;
    }

    /// Is this turn still open?
    pub fn is_open(&self) -> bool {
        self.status == TurnStatus::Open
    }

    /// Duration in milliseconds, zero while still open
    pub fn duration_ms(&self) -> u64 {
        self.ended_at_ms
            .map(|end| end.saturating_sub(self.started_at_ms))
            .unwrap_or(0)
    }
}
