//! Configuration for the speaking tutor engine
//!
//! All tunable thresholds live here; no magic numbers elsewhere. Settings
//! load from `config/default.yaml`, an optional environment-specific file,
//! and `TUTOR__`-prefixed environment variables, in ascending priority.

mod settings;

pub use settings::{
    load_settings, ContextSettings, DecisionSettings, GenerationSettings, ObservabilitySettings,
    PauseSettings, PlaybackSettings, Settings, SpeculativeSettings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<ConfigError> for tutor_core::Error {
    fn from(err: ConfigError) -> Self {
        tutor_core::Error::Config(err.to_string())
    }
}
