//! Speculative response drafting
//!
//! Generates candidate replies against in-progress transcript prefixes so a
//! reply is often ready the instant the turn finalizes. Launches are
//! throttled by time and prefix growth, and at most one generation is in
//! flight per turn; a newer launch aborts the older one.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use tutor_core::{Speaker, SpeculativeCandidate, TurnId};

use crate::backend::GenerationBackend;
use crate::prompt;
use crate::LlmError;

/// Speculative generation configuration
#[derive(Debug, Clone)]
pub struct SpeculativeConfig {
    /// Master switch; when off no speculative work runs at all
    pub enabled: bool,

    /// Minimum time between generation launches for one turn
    pub min_gap_ms: u64,

    /// Minimum prefix growth in characters since the last launch
    pub min_prefix_growth_chars: usize,

    /// Per-generation timeout
    pub generation_timeout_ms: u64,
}

impl Default for SpeculativeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_gap_ms: 400,
            min_prefix_growth_chars: 8,
            generation_timeout_ms: 10_000,
        }
    }
}

#[derive(Default)]
struct ResponderState {
    turn_id: Option<TurnId>,
    last_launch_ms: Option<u64>,
    last_prefix_chars: usize,
    inflight: Option<AbortHandle>,
}

/// Drafts replies to transcript prefixes and emits them as candidates.
pub struct SpeculativeResponder {
    backend: Arc<dyn GenerationBackend>,
    config: SpeculativeConfig,
    candidate_tx: mpsc::Sender<SpeculativeCandidate>,
    state: Mutex<ResponderState>,
}

impl SpeculativeResponder {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        config: SpeculativeConfig,
        candidate_tx: mpsc::Sender<SpeculativeCandidate>,
    ) -> Self {
        Self {
            backend,
            config,
            candidate_tx,
            state: Mutex::new(ResponderState::default()),
        }
    }

    /// Reset throttle bookkeeping for a new user turn, aborting any
    /// generation still running for the previous one.
    pub fn begin_turn(&self, turn_id: TurnId) {
        let mut state = self.state.lock();
        if let Some(handle) = state.inflight.take() {
            handle.abort();
        }
        *state = ResponderState {
            turn_id: Some(turn_id),
            ..ResponderState::default()
        };
    }

    /// Abort the in-flight generation, if any
    pub fn cancel_inflight(&self) {
        let mut state = self.state.lock();
        if let Some(handle) = state.inflight.take() {
            tracing::debug!("aborting in-flight speculative generation");
            handle.abort();
        }
    }

    /// Consider launching a generation for an updated transcript prefix.
    ///
    /// Returns true when a generation was launched. The candidate, when the
    /// generation succeeds, arrives on the candidate channel.
    pub fn on_partial(
        &self,
        turn_id: TurnId,
        prefix: &str,
        history: &[(Speaker, String)],
        now_ms: u64,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }

        let mut state = self.state.lock();
        if state.turn_id != Some(turn_id) {
            // A prefix for a turn we were never told about; ignore it
            return false;
        }

        let prefix_chars = prefix.trim().chars().count();
        let grown = prefix_chars.saturating_sub(state.last_prefix_chars);
        if grown < self.config.min_prefix_growth_chars {
            return false;
        }
        if let Some(last) = state.last_launch_ms {
            if now_ms.saturating_sub(last) < self.config.min_gap_ms {
                return false;
            }
        }

        if let Some(handle) = state.inflight.take() {
            handle.abort();
        }

        state.last_launch_ms = Some(now_ms);
        state.last_prefix_chars = prefix_chars;

        let messages = prompt::speculative_messages(history, prefix);
        let backend = Arc::clone(&self.backend);
        let candidate_tx = self.candidate_tx.clone();
        let prefix = prefix.trim().to_string();
        let timeout = Duration::from_millis(self.config.generation_timeout_ms);

        let task = tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, backend.generate(&messages)).await;
            match result {
                Ok(Ok(text)) => {
                    let candidate =
                        SpeculativeCandidate::new(turn_id, prefix, text, tutor_core::now_ms());
                    tracing::debug!(%turn_id, candidate_id = %candidate.id, "speculative candidate ready");
                    if candidate_tx.send(candidate).await.is_err() {
                        tracing::debug!("candidate channel closed, dropping candidate");
                    }
                }
                Ok(Err(err)) => {
                    // A failed draft costs nothing; the fallback path covers it
                    tracing::debug!(%turn_id, error = %err, "speculative generation failed");
                }
                Err(_) => {
                    tracing::debug!(%turn_id, "speculative generation timed out");
                }
            }
        });

        state.inflight = Some(task.abort_handle());
        true
    }

    /// Generate a reply for a finalized utterance, outside the speculative
    /// path, honoring the same per-generation timeout.
    pub async fn generate_reply(
        &self,
        history: &[(Speaker, String)],
        final_text: &str,
    ) -> Result<String, LlmError> {
        let messages = prompt::reply_messages(history, final_text);
        self.timed_generate(&messages).await
    }

    /// Regenerate for the full utterance using a buffered draft as head start
    pub async fn generate_merge(
        &self,
        history: &[(Speaker, String)],
        candidate_text: &str,
        final_text: &str,
    ) -> Result<String, LlmError> {
        let messages = prompt::merge_messages(history, candidate_text, final_text);
        self.timed_generate(&messages).await
    }

    async fn timed_generate(&self, messages: &[prompt::Message]) -> Result<String, LlmError> {
        let timeout = Duration::from_millis(self.config.generation_timeout_ms);
        tokio::time::timeout(timeout, self.backend.generate(messages))
            .await
            .map_err(|_| LlmError::Timeout(self.config.generation_timeout_ms))?
    }
}
