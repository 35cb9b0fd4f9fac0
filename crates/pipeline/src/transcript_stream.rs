//! Ordered transcript assembly per turn
//!
//! Fragments arrive from the external STT service, possibly misordered or
//! duplicated. Each turn's transcript is an append-only sequence in strictly
//! increasing sequence-number order; offenders are dropped and reported as a
//! non-fatal ordering fault so the turn can proceed on its best-known prefix.

use std::collections::HashMap;

use tutor_core::{TranscriptFragment, TurnId};

use crate::PipelineError;

/// Result of a successful append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Partial fragment accepted, turn still open
    Partial,
    /// Final fragment accepted, transcript closed for this turn
    Finalized,
}

#[derive(Debug, Default)]
struct TurnTranscript {
    fragments: Vec<TranscriptFragment>,
    finalized: bool,
    force_finalized: bool,
}

impl TurnTranscript {
    fn last_sequence(&self) -> Option<u64> {
        self.fragments.last().map(|f| f.sequence)
    }

    fn text(&self) -> String {
        let parts: Vec<&str> = self
            .fragments
            .iter()
            .map(|f| f.text.trim())
            .filter(|t| !t.is_empty())
            .collect();
        parts.join(" ")
    }
}

/// Append-only transcript store keyed by turn
#[derive(Debug, Default)]
pub struct TranscriptStream {
    turns: HashMap<TurnId, TurnTranscript>,
}

impl TranscriptStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open bookkeeping for a new turn
    pub fn begin_turn(&mut self, turn_id: TurnId) {
        self.turns.entry(turn_id).or_default();
    }

    /// Append a fragment, enforcing strictly increasing sequence numbers.
    ///
    /// # Errors
    ///
    /// Returns a `TranscriptOrdering` fault for duplicate or out-of-order
    /// fragments and for fragments arriving after finalization. Callers
    /// treat these as non-fatal: the fragment is dropped, the turn proceeds.
    pub fn append(&mut self, fragment: TranscriptFragment) -> Result<AppendOutcome, PipelineError> {
        let turn_id = fragment.turn_id;
        let transcript = self
            .turns
            .get_mut(&turn_id)
            .ok_or(PipelineError::UnknownTurn(turn_id))?;

        if transcript.finalized {
            return Err(PipelineError::TranscriptOrdering {
                turn_id,
                message: format!(
                    "fragment {} arrived after finalization",
                    fragment.sequence
                ),
            });
        }

        if let Some(last) = transcript.last_sequence() {
            if fragment.sequence <= last {
                return Err(PipelineError::TranscriptOrdering {
                    turn_id,
                    message: format!(
                        "sequence {} not after {}",
                        fragment.sequence, last
                    ),
                });
            }
        }

        let is_final = fragment.is_final;
        transcript.fragments.push(fragment);

        if is_final {
            transcript.finalized = true;
            tracing::debug!(%turn_id, "transcript closed by STT-final fragment");
            Ok(AppendOutcome::Finalized)
        } else {
            Ok(AppendOutcome::Partial)
        }
    }

    /// Best-known text for an open or finalized turn, in sequence order
    pub fn current_text(&self, turn_id: TurnId) -> Option<String> {
        self.turns.get(&turn_id).map(TurnTranscript::text)
    }

    /// Close the transcript using the latest partials, when the pause signal
    /// fires without an STT-final fragment within the grace period.
    pub fn force_finalize(&mut self, turn_id: TurnId) -> Result<String, PipelineError> {
        let transcript = self
            .turns
            .get_mut(&turn_id)
            .ok_or(PipelineError::UnknownTurn(turn_id))?;

        if !transcript.finalized {
            transcript.finalized = true;
            transcript.force_finalized = true;
            tracing::debug!(%turn_id, "transcript force-finalized from latest partial");
        }
        Ok(transcript.text())
    }

    /// Reopen a closed transcript when the turn turns out to continue, so
    /// later fragments are accepted again on the same sequence.
    pub fn reopen(&mut self, turn_id: TurnId) -> Result<(), PipelineError> {
        let transcript = self
            .turns
            .get_mut(&turn_id)
            .ok_or(PipelineError::UnknownTurn(turn_id))?;
        if transcript.finalized {
            transcript.finalized = false;
            transcript.force_finalized = false;
            tracing::debug!(%turn_id, "transcript reopened, turn continues");
        }
        Ok(())
    }

    /// Final text for a turn; valid only after finalization
    pub fn final_text(&self, turn_id: TurnId) -> Result<String, PipelineError> {
        let transcript = self
            .turns
            .get(&turn_id)
            .ok_or(PipelineError::UnknownTurn(turn_id))?;
        if !transcript.finalized {
            return Err(PipelineError::NotFinalized(turn_id));
        }
        Ok(transcript.text())
    }

    /// Has this turn's transcript been closed?
    pub fn is_finalized(&self, turn_id: TurnId) -> bool {
        self.turns.get(&turn_id).map(|t| t.finalized).unwrap_or(false)
    }

    /// Drop bookkeeping for a turn once the engine no longer needs it
    pub fn discard_turn(&mut self, turn_id: TurnId) {
        self.turns.remove(&turn_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_core::TranscriptFragment as Frag;

    #[test]
    fn test_final_text_is_in_order_concatenation() {
        let mut stream = TranscriptStream::new();
        let id = TurnId::new();
        stream.begin_turn(id);

        stream.append(Frag::partial(id, 0, "I went", 0.8)).unwrap();
        stream.append(Frag::partial(id, 1, "to the", 0.8)).unwrap();
        stream
            .append(Frag::final_fragment(id, 2, "market", 0.9))
            .unwrap();

        assert_eq!(stream.final_text(id).unwrap(), "I went to the market");
    }

    #[test]
    fn test_out_of_order_fragment_dropped() {
        let mut stream = TranscriptStream::new();
        let id = TurnId::new();
        stream.begin_turn(id);

        stream.append(Frag::partial(id, 0, "hello", 0.8)).unwrap();
        stream.append(Frag::partial(id, 3, "there", 0.8)).unwrap();

        // Late arrival with a lower sequence is rejected, non-fatally
        let err = stream.append(Frag::partial(id, 1, "stale", 0.8));
        assert!(matches!(
            err,
            Err(PipelineError::TranscriptOrdering { .. })
        ));

        assert_eq!(stream.current_text(id).unwrap(), "hello there");
    }

    #[test]
    fn test_duplicate_sequence_dropped() {
        let mut stream = TranscriptStream::new();
        let id = TurnId::new();
        stream.begin_turn(id);

        stream.append(Frag::partial(id, 0, "one", 0.8)).unwrap();
        let err = stream.append(Frag::partial(id, 0, "one again", 0.8));
        assert!(err.is_err());
        assert_eq!(stream.current_text(id).unwrap(), "one");
    }

    #[test]
    fn test_final_text_requires_finalization() {
        let mut stream = TranscriptStream::new();
        let id = TurnId::new();
        stream.begin_turn(id);
        stream.append(Frag::partial(id, 0, "partial", 0.8)).unwrap();

        assert!(matches!(
            stream.final_text(id),
            Err(PipelineError::NotFinalized(_))
        ));
    }

    #[test]
    fn test_force_finalize_uses_latest_partial() {
        let mut stream = TranscriptStream::new();
        let id = TurnId::new();
        stream.begin_turn(id);
        stream.append(Frag::partial(id, 0, "I went to the", 0.7)).unwrap();

        let text = stream.force_finalize(id).unwrap();
        assert_eq!(text, "I went to the");
        assert!(stream.is_finalized(id));

        // Nothing is accepted after finalization
        let err = stream.append(Frag::final_fragment(id, 1, "market", 0.9));
        assert!(err.is_err());
        assert_eq!(stream.final_text(id).unwrap(), "I went to the");
    }

    #[test]
    fn test_reopen_accepts_fragments_after_stt_final() {
        let mut stream = TranscriptStream::new();
        let id = TurnId::new();
        stream.begin_turn(id);

        stream
            .append(Frag::final_fragment(id, 0, "I think that's all", 0.9))
            .unwrap();
        assert!(stream.is_finalized(id));

        // The speaker kept going; the early final was premature
        stream.reopen(id).unwrap();
        assert!(!stream.is_finalized(id));
        stream
            .append(Frag::partial(id, 1, "actually one more thing", 0.8))
            .unwrap();
        stream
            .append(Frag::final_fragment(id, 2, "about the trip", 0.9))
            .unwrap();

        assert_eq!(
            stream.final_text(id).unwrap(),
            "I think that's all actually one more thing about the trip"
        );
    }

    #[test]
    fn test_stt_final_closes_turn() {
        let mut stream = TranscriptStream::new();
        let id = TurnId::new();
        stream.begin_turn(id);

        let outcome = stream
            .append(Frag::final_fragment(id, 0, "short answer", 0.9))
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Finalized);
        assert!(stream.is_finalized(id));
    }

    #[test]
    fn test_unknown_turn_rejected() {
        let mut stream = TranscriptStream::new();
        let err = stream.append(Frag::partial(TurnId::new(), 0, "x", 0.5));
        assert!(matches!(err, Err(PipelineError::UnknownTurn(_))));
    }
}
