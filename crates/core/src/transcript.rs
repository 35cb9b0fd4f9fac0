//! Transcript fragment types for STT output

use serde::{Deserialize, Serialize};

use crate::turn::TurnId;

/// An incremental piece of transcribed text for one user turn.
///
/// Fragments for a turn form a monotonically extending sequence; a fragment
/// with `is_final = true` closes the sequence for that turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptFragment {
    /// Turn this fragment belongs to
    pub turn_id: TurnId,

    /// Position within the turn; strictly increasing
    pub sequence: u64,

    /// Transcribed text for this fragment
    pub text: String,

    /// Does this fragment close the turn's transcript?
    pub is_final: bool,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,

    /// Start time offset in milliseconds
    pub start_ms: u64,

    /// End time offset in milliseconds
    pub end_ms: u64,
}

impl TranscriptFragment {
    /// Create a partial (non-final) fragment
    pub fn partial(turn_id: TurnId, sequence: u64, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            turn_id,
            sequence,
            text: text.into(),
            is_final: false,
            confidence,
            start_ms: 0,
            end_ms: 0,
        }
    }

    /// Create a final fragment that closes the turn's transcript
    pub fn final_fragment(
        turn_id: TurnId,
        sequence: u64,
        text: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            turn_id,
            sequence,
            text: text.into(),
            is_final: true,
            confidence,
            start_ms: 0,
            end_ms: 0,
        }
    }

    /// Set the time range
    pub fn with_time_range(mut self, start_ms: u64, end_ms: u64) -> Self {
        self.start_ms = start_ms;
        self.end_ms = end_ms;
        self
    }

    /// Check if the fragment carries no usable text
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Word count of this fragment
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}
