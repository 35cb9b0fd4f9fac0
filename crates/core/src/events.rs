//! Voice activity events
//!
//! The external VAD reports boundary transitions only; the core never sees
//! raw audio samples.

use serde::{Deserialize, Serialize};

/// Kind of voice activity transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VadEventKind {
    /// User started speaking
    SpeechStart,
    /// User stopped speaking
    SpeechEnd,
}

/// A single voice activity transition, immutable once emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceActivityEvent {
    /// Timestamp in milliseconds (shared timeline clock)
    pub timestamp_ms: u64,
    /// Transition kind
    pub kind: VadEventKind,
}

impl VoiceActivityEvent {
    /// Create a speech-start event
    pub fn speech_start(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            kind: VadEventKind::SpeechStart,
        }
    }

    /// Create a speech-end event
    pub fn speech_end(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            kind: VadEventKind::SpeechEnd,
        }
    }

    /// Is this a speech-start transition?
    pub fn is_speech_start(&self) -> bool {
        self.kind == VadEventKind::SpeechStart
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_constructors() {
        let start = VoiceActivityEvent::speech_start(100);
        assert!(start.is_speech_start());
        assert_eq!(start.timestamp_ms, 100);

        let end = VoiceActivityEvent::speech_end(250);
        assert!(!end.is_speech_start());
        assert_eq!(end.kind, VadEventKind::SpeechEnd);
    }
}
