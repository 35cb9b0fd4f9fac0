//! Core types for the speaking tutor turn-taking engine
//!
//! This crate provides foundational types used across all other crates:
//! - Voice activity events (the VAD boundary)
//! - Transcript fragments
//! - Turn lifecycle types
//! - Speculative candidates and buffer decisions
//! - Error types

pub mod decision;
pub mod error;
pub mod events;
pub mod transcript;
pub mod turn;

pub use decision::{BufferAction, BufferDecision, SpeculativeCandidate};
pub use error::{Error, Result};
pub use events::{VadEventKind, VoiceActivityEvent};
pub use transcript::TranscriptFragment;
pub use turn::{Speaker, Turn, TurnId, TurnStatus};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// All timeline fields (VAD events, turn boundaries, candidate ages) are
/// expressed on this clock. Tests construct timestamps explicitly instead
/// of calling this, which keeps decision logic deterministic.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
