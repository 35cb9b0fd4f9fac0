//! Audio-side pipeline: pause detection, transcript assembly, playback
//!
//! This crate provides the components that sit between the external
//! VAD/STT/TTS services and the turn engine:
//! - End-of-turn pause detection over voice activity events
//! - Ordered transcript fragment assembly per turn
//! - Interruptible playback with bounded stop latency

pub mod pause;
pub mod playback;
pub mod stt;
pub mod transcript_stream;
pub mod tts;

pub use pause::{PauseConfig, PauseDetector, PauseSignal};
pub use playback::{PlaybackConfig, PlaybackController, PlaybackOutcome};
pub use stt::{ScriptedStt, SttBackend};
pub use transcript_stream::{AppendOutcome, TranscriptStream};
pub use tts::{StubTts, TtsBackend};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    /// Out-of-order or duplicate transcript fragment; non-fatal, the
    /// offending fragment is dropped and the turn proceeds
    #[error("transcript ordering fault for turn {turn_id}: {message}")]
    TranscriptOrdering { turn_id: tutor_core::TurnId, message: String },

    #[error("unknown turn: {0}")]
    UnknownTurn(tutor_core::TurnId),

    #[error("transcript not finalized for turn {0}")]
    NotFinalized(tutor_core::TurnId),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("playback error: {0}")]
    Playback(String),

    #[error("channel closed")]
    ChannelClosed,
}

impl From<PipelineError> for tutor_core::Error {
    fn from(err: PipelineError) -> Self {
        tutor_core::Error::Pipeline(err.to_string())
    }
}
