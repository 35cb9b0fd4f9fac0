//! Language model boundary for the tutor engine
//!
//! Provides the generation backend trait, prompt construction for the
//! speaking-tutor persona, and the speculative responder that drafts replies
//! against in-progress transcript prefixes.

pub mod backend;
pub mod prompt;
pub mod speculative;

pub use backend::{GenerationBackend, StubGeneration};
pub use prompt::{Message, Role};
pub use speculative::{SpeculativeConfig, SpeculativeResponder};

/// Errors from the generation boundary
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Backend did not answer within its timeout
    #[error("generation timed out after {0}ms")]
    Timeout(u64),

    /// Backend reported a failure
    #[error("generation failed: {0}")]
    Generation(String),

    /// In-flight generation was cancelled by a newer request
    #[error("generation cancelled")]
    Cancelled,

    /// Candidate channel closed; the engine has shut down
    #[error("candidate channel closed")]
    ChannelClosed,
}

impl From<LlmError> for tutor_core::Error {
    fn from(err: LlmError) -> Self {
        tutor_core::Error::Generation(err.to_string())
    }
}
