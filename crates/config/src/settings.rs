//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Pause detection thresholds
    #[serde(default)]
    pub pause: PauseSettings,

    /// Speculative generation throttling
    #[serde(default)]
    pub speculative: SpeculativeSettings,

    /// Buffer decision policy
    #[serde(default)]
    pub decision: DecisionSettings,

    /// Conversation context window
    #[serde(default)]
    pub context: ContextSettings,

    /// Playback behavior
    #[serde(default)]
    pub playback: PlaybackSettings,

    /// Generation call limits
    #[serde(default)]
    pub generation: GenerationSettings,

    /// Observability
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

impl Settings {
    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pause.threshold_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pause.threshold_ms".to_string(),
                message: "pause threshold must be positive".to_string(),
            });
        }

        if self.pause.threshold_ms < self.pause.min_speech_ms {
            return Err(ConfigError::InvalidValue {
                field: "pause.threshold_ms".to_string(),
                message: "pause threshold must exceed the speech debounce window".to_string(),
            });
        }

        if self.decision.decision_budget_ms < 200 {
            return Err(ConfigError::InvalidValue {
                field: "decision.decision_budget_ms".to_string(),
                message: "decision budget too low (minimum 200ms)".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.decision.relevance_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "decision.relevance_threshold".to_string(),
                message: "relevance threshold must be within 0.0..=1.0".to_string(),
            });
        }

        if self.context.max_turns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "context.max_turns".to_string(),
                message: "context window must hold at least one turn".to_string(),
            });
        }

        Ok(())
    }
}

/// Pause detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseSettings {
    /// Silence duration that ends a user turn (tuned within 1500-2500ms)
    #[serde(default = "default_pause_threshold_ms")]
    pub threshold_ms: u64,

    /// Minimum continuous speech to count as real speech, not noise
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u64,

    /// How long to wait for an in-flight STT-final fragment after the pause
    /// signal before force-finalizing with the latest partial
    #[serde(default = "default_stt_final_grace_ms")]
    pub stt_final_grace_ms: u64,
}

fn default_pause_threshold_ms() -> u64 {
    2000
}
fn default_min_speech_ms() -> u64 {
    300
}
fn default_stt_final_grace_ms() -> u64 {
    250
}

impl Default for PauseSettings {
    fn default() -> Self {
        Self {
            threshold_ms: default_pause_threshold_ms(),
            min_speech_ms: default_min_speech_ms(),
            stt_final_grace_ms: default_stt_final_grace_ms(),
        }
    }
}

/// Speculative generation throttling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeculativeSettings {
    /// Enable speculative generation while the user is speaking
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum gap between speculative generation starts
    #[serde(default = "default_min_gap_ms")]
    pub min_gap_ms: u64,

    /// Minimum prefix growth before another speculative call
    #[serde(default = "default_min_prefix_growth")]
    pub min_prefix_growth_chars: usize,
}

fn default_min_gap_ms() -> u64 {
    400
}
fn default_min_prefix_growth() -> usize {
    8
}

impl Default for SpeculativeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_gap_ms: default_min_gap_ms(),
            min_prefix_growth_chars: default_min_prefix_growth(),
        }
    }
}

/// Buffer decision policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSettings {
    /// Candidates older than this at decision time are always dropped
    #[serde(default = "default_max_candidate_age_ms")]
    pub max_candidate_age_ms: u64,

    /// Drop the candidate when relevance falls below this score
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,

    /// Allow merging the candidate with new user input; when disabled the
    /// merge path degrades to a drop
    #[serde(default = "default_true")]
    pub merge_enabled: bool,

    /// Ceiling for decision plus fallback/merge generation before the
    /// acknowledgment filler is used
    #[serde(default = "default_decision_budget_ms")]
    pub decision_budget_ms: u64,

    /// Trailing additions of at most this many words are eligible to be
    /// classified as low-importance filler
    #[serde(default = "default_low_importance_max_words")]
    pub low_importance_max_words: usize,
}

fn default_max_candidate_age_ms() -> u64 {
    3000
}
fn default_relevance_threshold() -> f32 {
    0.6
}
fn default_decision_budget_ms() -> u64 {
    2000
}
fn default_low_importance_max_words() -> usize {
    4
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            max_candidate_age_ms: default_max_candidate_age_ms(),
            relevance_threshold: default_relevance_threshold(),
            merge_enabled: true,
            decision_budget_ms: default_decision_budget_ms(),
            low_importance_max_words: default_low_importance_max_words(),
        }
    }
}

/// Conversation context window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSettings {
    /// Rolling window size in turns
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Rolling character budget across retained turns
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_max_turns() -> usize {
    20
}
fn default_max_chars() -> usize {
    8000
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_chars: default_max_chars(),
        }
    }
}

/// Playback behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackSettings {
    /// Target latency for stop() to take effect
    #[serde(default = "default_stop_latency_ms")]
    pub stop_latency_ms: u64,

    /// Natural pause before the assistant starts speaking
    #[serde(default = "default_response_delay_ms")]
    pub response_delay_ms: u64,
}

fn default_stop_latency_ms() -> u64 {
    200
}
fn default_response_delay_ms() -> u64 {
    400
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            stop_latency_ms: default_stop_latency_ms(),
            response_delay_ms: default_response_delay_ms(),
        }
    }
}

/// Generation call limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Timeout for a single generation call
    #[serde(default = "default_generation_timeout_ms")]
    pub timeout_ms: u64,

    /// Retry a failed decision-path generation once in the background
    #[serde(default = "default_true")]
    pub retry_once: bool,
}

fn default_generation_timeout_ms() -> u64 {
    10_000
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_generation_timeout_ms(),
            retry_once: true,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (TUTOR__ prefix)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("TUTOR")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    tracing::debug!(
        pause_threshold_ms = settings.pause.threshold_ms,
        speculative_enabled = settings.speculative.enabled,
        merge_enabled = settings.decision.merge_enabled,
        "settings loaded"
    );
    Ok(settings)
}
