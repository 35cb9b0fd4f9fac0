//! Speculative candidates and buffer decisions

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::turn::TurnId;

/// A response generated ahead of turn finalization, held pending a decision.
///
/// At most one active candidate is retained per open user turn; a newer
/// candidate supersedes and discards the older one, never queues behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeculativeCandidate {
    /// Unique candidate ID
    pub id: Uuid,

    /// User turn this candidate was generated for
    pub turn_id: TurnId,

    /// Transcript prefix the generation was conditioned on
    pub based_on_prefix: String,

    /// Generated response text
    pub text: String,

    /// Timeline instant the generation completed
    pub generated_at_ms: u64,
}

impl SpeculativeCandidate {
    /// Create a candidate for a turn
    pub fn new(
        turn_id: TurnId,
        based_on_prefix: impl Into<String>,
        text: impl Into<String>,
        generated_at_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            turn_id,
            based_on_prefix: based_on_prefix.into(),
            text: text.into(),
            generated_at_ms,
        }
    }

    /// Age of the candidate at the given instant
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.generated_at_ms)
    }

    /// Has the candidate exceeded the configured age ceiling?
    pub fn is_expired(&self, now_ms: u64, max_age_ms: u64) -> bool {
        self.age_ms(now_ms) > max_age_ms
    }

    /// Is the prefix this candidate was built on a prefix of the final text?
    ///
    /// Comparison is case-insensitive and ignores surrounding whitespace so
    /// that STT capitalization jitter does not break the match.
    pub fn matches_prefix(&self, final_text: &str) -> bool {
        let prefix = self.based_on_prefix.trim().to_lowercase();
        let final_norm = final_text.trim().to_lowercase();
        !prefix.is_empty() && final_norm.starts_with(&prefix)
    }

    /// The text the user added after the candidate's prefix, empty when the
    /// final text matches the prefix exactly.
    ///
    /// The split point is found by walking chars: case folding can change
    /// byte lengths, so slicing the raw text at the prefix's byte length
    /// could land inside a codepoint.
    pub fn trailing_addition<'a>(&self, final_text: &'a str) -> &'a str {
        let final_trim = final_text.trim();
        let matched_len = self.based_on_prefix.trim().to_lowercase().len();
        let mut consumed = 0usize;
        for (idx, ch) in final_trim.char_indices() {
            if consumed >= matched_len {
                return final_trim[idx..].trim_start();
            }
            consumed += ch.to_lowercase().map(char::len_utf8).sum::<usize>();
        }
        ""
    }
}

/// What to do with a speculative candidate once the user turn is final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferAction {
    /// Speak the buffered candidate
    Continue,
    /// Re-generate using the candidate as a drafting head start
    Merge,
    /// Discard the candidate, generate fresh
    Drop,
}

/// Immutable decision record, one per finalized user turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferDecision {
    /// Chosen action
    pub action: BufferAction,

    /// Text handed to playback
    pub final_text: String,

    /// Timeline instant the decision completed
    pub decided_at_ms: u64,

    /// Milliseconds between the user turn ending and this decision
    pub latency_from_user_end_ms: u64,

    /// True when the decision degraded to an acknowledgment filler because
    /// generation missed its budget
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_age() {
        let cand = SpeculativeCandidate::new(TurnId::new(), "I think", "Nice!", 1000);
        assert_eq!(cand.age_ms(3500), 2500);
        assert!(!cand.is_expired(4000, 3000));
        assert!(cand.is_expired(4001, 3000));
    }

    #[test]
    fn test_prefix_matching() {
        let cand = SpeculativeCandidate::new(TurnId::new(), "I went to the market", "Great!", 0);

        assert!(cand.matches_prefix("I went to the market"));
        assert!(cand.matches_prefix("i went to the market yesterday"));
        assert!(!cand.matches_prefix("the weather is nice"));
    }

    #[test]
    fn test_decision_serializes_for_event_sinks() {
        let decision = BufferDecision {
            action: BufferAction::Merge,
            final_text: "merged".to_string(),
            decided_at_ms: 5000,
            latency_from_user_end_ms: 120,
            degraded: false,
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "Merge");
        assert_eq!(json["latency_from_user_end_ms"], 120);
    }

    #[test]
    fn test_trailing_addition() {
        let cand = SpeculativeCandidate::new(TurnId::new(), "I think the weather", "Hmm", 0);

        assert_eq!(cand.trailing_addition("I think the weather"), "");
        assert_eq!(
            cand.trailing_addition("I think the weather is nice but I'm worried"),
            "is nice but I'm worried"
        );
    }

    #[test]
    fn test_trailing_addition_survives_multibyte_case_folding() {
        // Lowercasing the final text shifts byte offsets here
        let cand = SpeculativeCandidate::new(TurnId::new(), "straß", "Gut!", 0);

        assert!(cand.matches_prefix("STRAẞE"));
        assert_eq!(cand.trailing_addition("STRAẞE"), "E");
        assert_eq!(cand.trailing_addition("STRAẞ"), "");
    }
}
