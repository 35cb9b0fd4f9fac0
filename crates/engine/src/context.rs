//! Rolling conversation context
//!
//! The engine is the single writer; everything else reads immutable
//! snapshots. Eviction is oldest-first by turn count and by total
//! character budget.

use std::collections::VecDeque;
use std::sync::Arc;

use tutor_core::{Speaker, Turn};

/// Context window configuration
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Rolling window size in turns
    pub max_turns: usize,

    /// Rolling character budget across retained turns
    pub max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_chars: 8000,
        }
    }
}

/// Immutable view of the context at one instant
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    turns: Arc<[Turn]>,
}

impl ContextSnapshot {
    /// Retained turns, oldest first
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// (speaker, text) pairs for prompt construction, skipping empty turns
    pub fn as_pairs(&self) -> Vec<(Speaker, String)> {
        self.turns
            .iter()
            .filter(|turn| !turn.text.trim().is_empty())
            .map(|turn| (turn.speaker, turn.text.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Append-only history of closed turns with bounded retention
#[derive(Debug)]
pub struct ConversationContext {
    config: ContextConfig,
    turns: VecDeque<Turn>,
    total_chars: usize,
}

impl ConversationContext {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            turns: VecDeque::new(),
            total_chars: 0,
        }
    }

    /// Record a closed turn. Open turns never enter the context.
    pub fn push(&mut self, turn: Turn) {
        if turn.is_open() {
            tracing::warn!(turn_id = %turn.id, "refusing to record an open turn");
            return;
        }

        self.total_chars += turn.text.chars().count();
        self.turns.push_back(turn);
        self.evict();
    }

    fn evict(&mut self) {
        while self.turns.len() > self.config.max_turns
            || (self.total_chars > self.config.max_chars && self.turns.len() > 1)
        {
            if let Some(evicted) = self.turns.pop_front() {
                self.total_chars -= evicted.text.chars().count();
                tracing::debug!(turn_id = %evicted.id, "evicted turn from context window");
            }
        }
    }

    /// Cheap immutable snapshot for readers
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            turns: self.turns.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_core::TurnStatus;

    fn closed(speaker: Speaker, text: &str, at: u64) -> Turn {
        let mut turn = Turn::open(speaker, at);
        turn.finalize(text, at + 1000);
        turn
    }

    #[test]
    fn test_push_and_snapshot() {
        let mut ctx = ConversationContext::new(ContextConfig::default());
        ctx.push(closed(Speaker::User, "hello", 0));
        ctx.push(closed(Speaker::Assistant, "hi there", 2000));

        let snap = ctx.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(
            snap.as_pairs(),
            vec![
                (Speaker::User, "hello".to_string()),
                (Speaker::Assistant, "hi there".to_string()),
            ]
        );
    }

    #[test]
    fn test_turn_count_eviction() {
        let config = ContextConfig {
            max_turns: 3,
            max_chars: 8000,
        };
        let mut ctx = ConversationContext::new(config);
        for i in 0..5 {
            ctx.push(closed(Speaker::User, &format!("turn {i}"), i * 1000));
        }

        let snap = ctx.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.turns()[0].text, "turn 2");
        assert_eq!(snap.turns()[2].text, "turn 4");
    }

    #[test]
    fn test_char_budget_eviction() {
        let config = ContextConfig {
            max_turns: 100,
            max_chars: 30,
        };
        let mut ctx = ConversationContext::new(config);
        ctx.push(closed(Speaker::User, "aaaaaaaaaaaaaaaaaaaa", 0));
        ctx.push(closed(Speaker::Assistant, "bbbbbbbbbbbbbbbbbbbb", 1000));

        // First turn evicted to fit the budget
        let snap = ctx.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.turns()[0].text, "bbbbbbbbbbbbbbbbbbbb");
    }

    #[test]
    fn test_last_turn_kept_even_over_budget() {
        let config = ContextConfig {
            max_turns: 100,
            max_chars: 5,
        };
        let mut ctx = ConversationContext::new(config);
        ctx.push(closed(Speaker::User, "much longer than the budget", 0));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_open_turn_rejected() {
        let mut ctx = ConversationContext::new(ContextConfig::default());
        ctx.push(Turn::open(Speaker::User, 0));
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_interrupted_turn_retained_with_partial_text() {
        let mut ctx = ConversationContext::new(ContextConfig::default());
        let mut turn = Turn::open(Speaker::Assistant, 0);
        turn.text = "That sounds".to_string();
        turn.interrupt(900);
        ctx.push(turn);

        let snap = ctx.snapshot();
        assert_eq!(snap.turns()[0].status, TurnStatus::Interrupted);
        assert_eq!(snap.as_pairs()[0].1, "That sounds");
    }

    #[test]
    fn test_snapshot_unaffected_by_later_pushes() {
        let mut ctx = ConversationContext::new(ContextConfig::default());
        ctx.push(closed(Speaker::User, "first", 0));
        let snap = ctx.snapshot();
        ctx.push(closed(Speaker::Assistant, "second", 1000));

        assert_eq!(snap.len(), 1);
        assert_eq!(ctx.snapshot().len(), 2);
    }
}
