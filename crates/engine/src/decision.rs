//! Buffer decision policy
//!
//! When a user turn finalizes while a speculative candidate is buffered, the
//! engine must choose between speaking the candidate, regenerating with it
//! as a head start, or discarding it. `plan` is the pure, deterministic core
//! of that choice; `BufferDecisionEngine::decide` executes the plan against
//! the generation backend under a latency budget.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use tutor_core::{now_ms, BufferAction, BufferDecision, Speaker, SpeculativeCandidate};
use tutor_llm::prompt::{acknowledgment_for, FILLER_RESPONSE, TROUBLE_RESPONSE};
use tutor_llm::SpeculativeResponder;

/// Decision policy configuration
#[derive(Debug, Clone)]
pub struct DecisionConfig {
    /// Candidates older than this at decision time are always dropped
    pub max_candidate_age_ms: u64,

    /// Drop threshold for the relevance score when the prefix no longer
    /// matches the final text
    pub relevance_threshold: f32,

    /// When disabled, would-be merges degrade to drops
    pub merge_enabled: bool,

    /// Ceiling on decision-path generation before degrading to the filler
    pub decision_budget_ms: u64,

    /// Trailing additions longer than this are never low-importance
    pub low_importance_max_words: usize,

    /// Retry a failed decision-path generation once in the background
    pub retry_once: bool,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            max_candidate_age_ms: 3000,
            relevance_threshold: 0.6,
            merge_enabled: true,
            decision_budget_ms: 2000,
            low_importance_max_words: 4,
            retry_once: true,
        }
    }
}

impl DecisionConfig {
    pub fn from_settings(
        decision: &tutor_config::DecisionSettings,
        retry_once: bool,
    ) -> Self {
        Self {
            max_candidate_age_ms: decision.max_candidate_age_ms,
            relevance_threshold: decision.relevance_threshold,
            merge_enabled: decision.merge_enabled,
            decision_budget_ms: decision.decision_budget_ms,
            low_importance_max_words: decision.low_importance_max_words,
            retry_once,
        }
    }
}

/// What `plan` chose to do with the buffered candidate
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    /// No candidate was buffered; generate from scratch
    Fresh,

    /// Speak this text verbatim, no generation call needed
    Continue { text: String, acknowledged: bool },

    /// Regenerate for the full utterance with the draft as head start
    Merge { draft: String },

    /// Discard the candidate and generate from scratch
    Drop,
}

impl PlannedAction {
    /// The action recorded on the decision; `Fresh` records as a drop since
    /// nothing buffered was used
    pub fn buffer_action(&self) -> BufferAction {
        match self {
            PlannedAction::Continue { .. } => BufferAction::Continue,
            PlannedAction::Merge { .. } => BufferAction::Merge,
            PlannedAction::Fresh | PlannedAction::Drop => BufferAction::Drop,
        }
    }
}

/// Filler and hedge words that do not change what the user asked
const LOW_IMPORTANCE_WORDS: &[&str] = &[
    "yeah", "yes", "so", "um", "uh", "er", "like", "you", "know", "right", "okay", "ok", "well",
    "hmm", "mhm", "just",
];

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Fraction of the candidate's basis tokens still present in the final text.
///
/// Pure and deterministic: identical inputs always score identically.
pub fn relevance(candidate_basis: &str, final_text: &str) -> f32 {
    let basis: HashSet<String> = tokens(candidate_basis).into_iter().collect();
    if basis.is_empty() {
        return 0.0;
    }
    let final_tokens: HashSet<String> = tokens(final_text).into_iter().collect();
    let shared = basis.intersection(&final_tokens).count();
    shared as f32 / basis.len() as f32
}

/// Is the trailing addition all filler or repetition of the prefix?
fn is_low_importance(addition: &str, prefix: &str, max_words: usize) -> bool {
    let words = tokens(addition);
    if words.is_empty() || words.len() > max_words {
        return words.is_empty();
    }
    let prefix_tokens: HashSet<String> = tokens(prefix).into_iter().collect();
    words
        .iter()
        .all(|w| LOW_IMPORTANCE_WORDS.contains(&w.as_str()) || prefix_tokens.contains(w))
}

/// Choose what to do with the buffered candidate. Pure: no clocks, no I/O,
/// no randomness. Staleness is checked before anything else, so an expired
/// candidate is dropped no matter how well it matches.
pub fn plan(
    candidate: Option<&SpeculativeCandidate>,
    final_text: &str,
    now_ms: u64,
    config: &DecisionConfig,
) -> PlannedAction {
    let Some(candidate) = candidate else {
        return PlannedAction::Fresh;
    };

    if candidate.is_expired(now_ms, config.max_candidate_age_ms) {
        tracing::debug!(
            candidate_id = %candidate.id,
            age_ms = candidate.age_ms(now_ms),
            "candidate expired, dropping"
        );
        return PlannedAction::Drop;
    }

    let merge_or_drop = |draft: &str| {
        if config.merge_enabled {
            PlannedAction::Merge {
                draft: draft.to_string(),
            }
        } else {
            PlannedAction::Drop
        }
    };

    if candidate.matches_prefix(final_text) {
        let addition = candidate.trailing_addition(final_text);
        if addition.is_empty() {
            return PlannedAction::Continue {
                text: candidate.text.clone(),
                acknowledged: false,
            };
        }
        if is_low_importance(addition, &candidate.based_on_prefix, config.low_importance_max_words)
        {
            let ack = acknowledgment_for(final_text);
            return PlannedAction::Continue {
                text: format!("{ack} {}", candidate.text),
                acknowledged: true,
            };
        }
        return merge_or_drop(&candidate.text);
    }

    let score = relevance(&candidate.based_on_prefix, final_text);
    if score >= config.relevance_threshold {
        merge_or_drop(&candidate.text)
    } else {
        tracing::debug!(candidate_id = %candidate.id, score, "candidate irrelevant, dropping");
        PlannedAction::Drop
    }
}

enum GenerationKind {
    Reply,
    Merge { draft: String },
}

/// Executes buffer decisions against the generation backend.
pub struct BufferDecisionEngine {
    config: DecisionConfig,
    responder: Arc<SpeculativeResponder>,
}

impl BufferDecisionEngine {
    pub fn new(config: DecisionConfig, responder: Arc<SpeculativeResponder>) -> Self {
        Self { config, responder }
    }

    /// Decide and produce speakable text for a finalized user turn.
    ///
    /// Continue needs no generation and resolves immediately. Merge and the
    /// fresh paths generate under the decision budget; on overrun or failure
    /// the decision degrades to the acknowledgment filler and the real reply
    /// arrives later on the `follow_up` channel.
    pub async fn decide(
        &self,
        candidate: Option<SpeculativeCandidate>,
        final_text: &str,
        history: &[(Speaker, String)],
        user_end_ms: u64,
        follow_up: mpsc::Sender<String>,
    ) -> BufferDecision {
        let planned = plan(candidate.as_ref(), final_text, now_ms(), &self.config);
        let action = planned.buffer_action();

        match planned {
            PlannedAction::Continue { text, acknowledged } => {
                let decided_at_ms = now_ms();
                tracing::info!(action = ?action, acknowledged, "speaking buffered candidate");
                BufferDecision {
                    action,
                    final_text: text,
                    decided_at_ms,
                    latency_from_user_end_ms: decided_at_ms.saturating_sub(user_end_ms),
                    degraded: false,
                }
            }
            PlannedAction::Merge { draft } => {
                self.generate_within_budget(
                    GenerationKind::Merge { draft },
                    action,
                    final_text,
                    history,
                    user_end_ms,
                    follow_up,
                )
                .await
            }
            PlannedAction::Fresh | PlannedAction::Drop => {
                self.generate_within_budget(
                    GenerationKind::Reply,
                    action,
                    final_text,
                    history,
                    user_end_ms,
                    follow_up,
                )
                .await
            }
        }
    }

    async fn generate_within_budget(
        &self,
        kind: GenerationKind,
        action: BufferAction,
        final_text: &str,
        history: &[(Speaker, String)],
        user_end_ms: u64,
        follow_up: mpsc::Sender<String>,
    ) -> BufferDecision {
        let budget = Duration::from_millis(self.config.decision_budget_ms);
        let generated = tokio::time::timeout(budget, self.generate(&kind, final_text, history))
            .await
            .unwrap_or(Err(tutor_llm::LlmError::Timeout(
                self.config.decision_budget_ms,
            )));

        match generated {
            Ok(text) => {
                let decided_at_ms = now_ms();
                tracing::info!(
                    action = ?action,
                    latency_ms = decided_at_ms.saturating_sub(user_end_ms),
                    "decision generation complete"
                );
                BufferDecision {
                    action,
                    final_text: text,
                    decided_at_ms,
                    latency_from_user_end_ms: decided_at_ms.saturating_sub(user_end_ms),
                    degraded: false,
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "decision generation missed its budget, degrading");
                self.spawn_follow_up(kind, final_text, history, follow_up);
                let decided_at_ms = now_ms();
                BufferDecision {
                    action,
                    final_text: FILLER_RESPONSE.to_string(),
                    decided_at_ms,
                    latency_from_user_end_ms: decided_at_ms.saturating_sub(user_end_ms),
                    degraded: true,
                }
            }
        }
    }

    async fn generate(
        &self,
        kind: &GenerationKind,
        final_text: &str,
        history: &[(Speaker, String)],
    ) -> Result<String, tutor_llm::LlmError> {
        match kind {
            GenerationKind::Reply => self.responder.generate_reply(history, final_text).await,
            GenerationKind::Merge { draft } => {
                self.responder.generate_merge(history, draft, final_text).await
            }
        }
    }

    /// Finish the degraded turn in the background while the filler plays
    fn spawn_follow_up(
        &self,
        kind: GenerationKind,
        final_text: &str,
        history: &[(Speaker, String)],
        follow_up: mpsc::Sender<String>,
    ) {
        let responder = Arc::clone(&self.responder);
        let retry_once = self.config.retry_once;
        let final_text = final_text.to_string();
        let history = history.to_vec();

        tokio::spawn(async move {
            let generate = || async {
                match &kind {
                    GenerationKind::Reply => {
                        responder.generate_reply(&history, &final_text).await
                    }
                    GenerationKind::Merge { draft } => {
                        responder.generate_merge(&history, draft, &final_text).await
                    }
                }
            };

            let mut result = generate().await;
            if result.is_err() && retry_once {
                tracing::debug!("retrying follow-up generation");
                result = generate().await;
            }

            let text = match result {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(error = %err, "follow-up generation failed twice");
                    TROUBLE_RESPONSE.to_string()
                }
            };
            if follow_up.send(text).await.is_err() {
                tracing::debug!("follow-up receiver gone, dropping late reply");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_core::TurnId;
    use tutor_llm::{SpeculativeConfig, StubGeneration};

    fn candidate(prefix: &str, text: &str, generated_at_ms: u64) -> SpeculativeCandidate {
        SpeculativeCandidate::new(TurnId::new(), prefix, text, generated_at_ms)
    }

    #[test]
    fn test_no_candidate_is_fresh() {
        let planned = plan(None, "hello there", 1000, &DecisionConfig::default());
        assert_eq!(planned, PlannedAction::Fresh);
        assert_eq!(planned.buffer_action(), BufferAction::Drop);
    }

    #[test]
    fn test_exact_prefix_continues_verbatim() {
        let cand = candidate("I went to the market", "Nice! What did you buy?", 1000);
        let planned = plan(
            Some(&cand),
            "I went to the market",
            2000,
            &DecisionConfig::default(),
        );
        assert_eq!(
            planned,
            PlannedAction::Continue {
                text: "Nice! What did you buy?".to_string(),
                acknowledged: false,
            }
        );
    }

    #[test]
    fn test_low_importance_addition_continues_with_acknowledgment() {
        let cand = candidate("I went to the market", "Nice! What did you buy?", 1000);
        let planned = plan(
            Some(&cand),
            "I went to the market yeah so um",
            2000,
            &DecisionConfig::default(),
        );
        match planned {
            PlannedAction::Continue { text, acknowledged } => {
                assert!(acknowledged);
                assert!(text.ends_with("Nice! What did you buy?"));
            }
            other => panic!("expected acknowledged continue, got {other:?}"),
        }
    }

    #[test]
    fn test_substantive_addition_merges() {
        let cand = candidate("I went to the market", "Nice! What did you buy?", 1000);
        let planned = plan(
            Some(&cand),
            "I went to the market but it was closed because of the storm",
            2000,
            &DecisionConfig::default(),
        );
        assert_eq!(
            planned,
            PlannedAction::Merge {
                draft: "Nice! What did you buy?".to_string()
            }
        );
    }

    #[test]
    fn test_merge_disabled_degrades_to_drop() {
        let cand = candidate("I went to the market", "Nice!", 1000);
        let config = DecisionConfig {
            merge_enabled: false,
            ..DecisionConfig::default()
        };
        let planned = plan(
            Some(&cand),
            "I went to the market but it was closed because of the storm",
            2000,
            &config,
        );
        assert_eq!(planned, PlannedAction::Drop);
    }

    #[test]
    fn test_expired_candidate_dropped_before_anything_else() {
        // Exact prefix match, but four seconds old
        let cand = candidate("I went to the market", "Nice!", 1000);
        let planned = plan(
            Some(&cand),
            "I went to the market",
            5001,
            &DecisionConfig::default(),
        );
        assert_eq!(planned, PlannedAction::Drop);
    }

    #[test]
    fn test_unrelated_final_text_dropped() {
        let cand = candidate("tell me about the weather", "It looks sunny today.", 1000);
        let planned = plan(
            Some(&cand),
            "actually let's practice ordering food",
            2000,
            &DecisionConfig::default(),
        );
        assert_eq!(planned, PlannedAction::Drop);
    }

    #[test]
    fn test_rewritten_but_relevant_text_merges() {
        // Same content words, different sentence shape
        let cand = candidate("I visited the old market", "Sounds fun!", 1000);
        let planned = plan(
            Some(&cand),
            "the old market is what I visited",
            2000,
            &DecisionConfig::default(),
        );
        assert_eq!(
            planned,
            PlannedAction::Merge {
                draft: "Sounds fun!".to_string()
            }
        );
    }

    #[test]
    fn test_plan_is_deterministic() {
        let cand = candidate("I went to the market", "Nice!", 1000);
        let config = DecisionConfig::default();
        let first = plan(Some(&cand), "I went to the market yesterday morning early", 2000, &config);
        let second = plan(Some(&cand), "I went to the market yesterday morning early", 2000, &config);
        assert_eq!(first, second);
    }

    #[test]
    fn test_relevance_scoring() {
        assert_eq!(relevance("", "anything"), 0.0);
        assert_eq!(relevance("the market", "the market"), 1.0);
        assert!(relevance("the old market", "the old market is closed") > 0.9);
        assert!(relevance("tell me about weather", "let's order some food") < 0.3);
    }

    fn engine_with(backend: Arc<StubGeneration>, config: DecisionConfig) -> BufferDecisionEngine {
        let (candidate_tx, _candidate_rx) = mpsc::channel(8);
        let responder = Arc::new(SpeculativeResponder::new(
            backend,
            SpeculativeConfig::default(),
            candidate_tx,
        ));
        BufferDecisionEngine::new(config, responder)
    }

    #[tokio::test]
    async fn test_continue_needs_no_generation() {
        let backend = Arc::new(StubGeneration::canned("unused"));
        let engine = engine_with(Arc::clone(&backend), DecisionConfig::default());
        let cand = candidate("I went to the market", "Nice! What did you buy?", now_ms());

        let (ftx, _frx) = mpsc::channel(1);
        let decision = engine
            .decide(Some(cand), "I went to the market", &[], now_ms(), ftx)
            .await;

        assert_eq!(decision.action, BufferAction::Continue);
        assert_eq!(decision.final_text, "Nice! What did you buy?");
        assert!(!decision.degraded);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_merge_regenerates_with_draft_in_prompt() {
        let backend = Arc::new(StubGeneration::with_reply(|msgs| {
            let has_draft = msgs
                .iter()
                .any(|m| m.content.contains("Nice! What did you buy?"));
            assert!(has_draft, "merge prompt should carry the draft");
            "merged reply".to_string()
        }));
        let engine = engine_with(Arc::clone(&backend), DecisionConfig::default());
        let cand = candidate("I went to the market", "Nice! What did you buy?", now_ms());

        let (ftx, _frx) = mpsc::channel(1);
        let decision = engine
            .decide(
                Some(cand),
                "I went to the market but it was closed because of the storm",
                &[],
                now_ms(),
                ftx,
            )
            .await;

        assert_eq!(decision.action, BufferAction::Merge);
        assert_eq!(decision.final_text, "merged reply");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_budget_overrun_degrades_to_filler_then_follows_up() {
        let backend = Arc::new(StubGeneration::canned("real reply").with_delay_ms(100));
        let config = DecisionConfig {
            decision_budget_ms: 20,
            ..DecisionConfig::default()
        };
        let engine = engine_with(backend, config);

        let (ftx, mut frx) = mpsc::channel(1);
        let decision = engine.decide(None, "a question", &[], now_ms(), ftx).await;

        assert!(decision.degraded);
        assert_eq!(decision.final_text, FILLER_RESPONSE);

        let follow_up = frx.recv().await.unwrap();
        assert_eq!(follow_up, "real reply");
    }

    #[tokio::test]
    async fn test_follow_up_retries_once_after_failure() {
        // Budget generation fails, first follow-up attempt fails, retry works
        let backend = Arc::new(StubGeneration::canned("recovered").failing_first(2));
        let engine = engine_with(backend, DecisionConfig::default());

        let (ftx, mut frx) = mpsc::channel(1);
        let decision = engine.decide(None, "a question", &[], now_ms(), ftx).await;

        assert!(decision.degraded);
        let follow_up = frx.recv().await.unwrap();
        assert_eq!(follow_up, "recovered");
    }

    #[tokio::test]
    async fn test_persistent_failure_yields_trouble_response() {
        let backend = Arc::new(StubGeneration::canned("never").failing_first(10));
        let engine = engine_with(backend, DecisionConfig::default());

        let (ftx, mut frx) = mpsc::channel(1);
        let decision = engine.decide(None, "a question", &[], now_ms(), ftx).await;

        assert!(decision.degraded);
        let follow_up = frx.recv().await.unwrap();
        assert_eq!(follow_up, TROUBLE_RESPONSE);
    }
}
