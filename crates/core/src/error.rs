//! Shared error type

use thiserror::Error;

/// Result type alias for tutor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Umbrella error for cross-crate boundaries.
///
/// Component crates define their own error enums and convert into this type
/// at the seams.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("configuration error: {0}")]
    Config(String),
}
