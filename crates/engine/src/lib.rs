//! Turn-taking engine
//!
//! Owns the session state machine that sequences user speech, buffer
//! decisions, and assistant playback so that exactly one party holds the
//! floor at a time. Companion modules provide the rolling conversation
//! context and the buffer decision policy.

pub mod context;
pub mod decision;
pub mod state_machine;

pub use context::{ContextConfig, ContextSnapshot, ConversationContext};
pub use decision::{plan, BufferDecisionEngine, DecisionConfig, PlannedAction};
pub use state_machine::{EngineEvent, TurnEngine, TurnEvent};

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine's event channel closed without a shutdown request
    #[error("engine event channel closed")]
    ChannelClosed,
}

impl From<EngineError> for tutor_core::Error {
    fn from(err: EngineError) -> Self {
        tutor_core::Error::Engine(err.to_string())
    }
}
