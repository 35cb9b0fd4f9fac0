//! End-of-turn pause detection
//!
//! Consumes voice activity transitions and decides when enough silence has
//! accumulated to end the user's turn. This is the sole authority that ends
//! a user turn; no explicit "I'm done" signal is required or accepted in
//! normal operation.

use tutor_core::{TurnId, VadEventKind, VoiceActivityEvent};

/// Pause detector configuration
#[derive(Debug, Clone)]
pub struct PauseConfig {
    /// Silence duration that ends the turn; the comparison is inclusive, so
    /// a silence of exactly `threshold_ms` fires
    pub threshold_ms: u64,

    /// Speech shorter than this during an armed period is treated as a blip
    /// (cough, noise) and does not reset the silence clock
    pub min_speech_ms: u64,
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            threshold_ms: 2000,
            min_speech_ms: 300,
        }
    }
}

/// Emitted exactly once per armed silence period when the threshold elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseSignal {
    /// The user turn this silence closes
    pub turn_id: TurnId,
    /// Measured silence duration at emission time
    pub silence_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct ArmedState {
    armed_at_ms: u64,
    fired: bool,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    /// No turn in progress
    Idle,
    /// User speaking, timer disarmed
    Speaking,
    /// Speech resumed during an armed period but is not yet long enough to
    /// count; `prior` holds the armed state to restore if it was a blip
    Tentative {
        speech_since_ms: u64,
        prior: ArmedState,
    },
    /// Silence timer running
    Armed(ArmedState),
}

/// Silence timer over voice activity events.
///
/// `observe` arms the timer on speech end and disarms it on speech start;
/// `poll` reports the elapsed timer. The detector never mutates turn state,
/// that is the turn engine's job.
#[derive(Debug)]
pub struct PauseDetector {
    config: PauseConfig,
    turn_id: Option<TurnId>,
    phase: Phase,
}

impl PauseDetector {
    /// Create a detector with the given thresholds
    pub fn new(config: PauseConfig) -> Self {
        Self {
            config,
            turn_id: None,
            phase: Phase::Idle,
        }
    }

    /// Associate the detector with the currently open user turn
    pub fn bind_turn(&mut self, turn_id: TurnId) {
        self.turn_id = Some(turn_id);
        self.phase = Phase::Speaking;
    }

    /// Clear turn association after finalization
    pub fn reset(&mut self) {
        self.turn_id = None;
        self.phase = Phase::Idle;
    }

    /// Feed one voice activity transition
    pub fn observe(&mut self, event: &VoiceActivityEvent) {
        match (self.phase, event.kind) {
            (Phase::Idle, VadEventKind::SpeechStart) => {
                // Turn opening is the engine's call; just track speech
                self.phase = Phase::Speaking;
            }
            (Phase::Speaking, VadEventKind::SpeechEnd) => {
                self.phase = Phase::Armed(ArmedState {
                    armed_at_ms: event.timestamp_ms,
                    fired: false,
                });
            }
            (Phase::Armed(prior), VadEventKind::SpeechStart) => {
                self.phase = Phase::Tentative {
                    speech_since_ms: event.timestamp_ms,
                    prior,
                };
            }
            (Phase::Tentative { speech_since_ms, prior }, VadEventKind::SpeechEnd) => {
                let speech_ms = event.timestamp_ms.saturating_sub(speech_since_ms);
                if speech_ms < self.config.min_speech_ms {
                    // Blip: restore the original armed period so the silence
                    // clock keeps running and no duplicate signal is emitted
                    self.phase = Phase::Armed(prior);
                } else {
                    // Real speech resumed and ended again: fresh armed period
                    self.phase = Phase::Armed(ArmedState {
                        armed_at_ms: event.timestamp_ms,
                        fired: false,
                    });
                }
            }
            (Phase::Tentative { speech_since_ms, prior }, VadEventKind::SpeechStart) => {
                // Repeated start without an end; keep the earliest start
                self.phase = Phase::Tentative { speech_since_ms, prior };
            }
            (Phase::Idle, VadEventKind::SpeechEnd)
            | (Phase::Speaking, VadEventKind::SpeechStart)
            | (Phase::Armed(_), VadEventKind::SpeechEnd) => {
                // No-op transitions
            }
        }
    }

    /// Check the timer at the given instant; emits at most once per armed
    /// period.
    pub fn poll(&mut self, now_ms: u64) -> Option<PauseSignal> {
        let turn_id = self.turn_id?;
        if let Phase::Armed(ref mut armed) = self.phase {
            if !armed.fired {
                let silence_ms = now_ms.saturating_sub(armed.armed_at_ms);
                if silence_ms >= self.config.threshold_ms {
                    armed.fired = true;
                    return Some(PauseSignal { turn_id, silence_ms });
                }
            }
        }
        None
    }

    /// Instant at which the armed timer would elapse, for async waiters
    pub fn deadline_ms(&self) -> Option<u64> {
        match self.phase {
            Phase::Armed(armed) if !armed.fired => {
                Some(armed.armed_at_ms + self.config.threshold_ms)
            }
            _ => None,
        }
    }

    /// Is the silence timer currently running?
    pub fn is_armed(&self) -> bool {
        matches!(self.phase, Phase::Armed(armed) if !armed.fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_core::VoiceActivityEvent as Vad;

    fn detector() -> PauseDetector {
        let mut d = PauseDetector::new(PauseConfig {
            threshold_ms: 2000,
            min_speech_ms: 300,
        });
        d.bind_turn(TurnId::new());
        d
    }

    #[test]
    fn test_no_signal_below_threshold() {
        let mut d = detector();
        d.observe(&Vad::speech_end(1000));

        assert!(d.poll(1500).is_none());
        assert!(d.poll(2999).is_none());
    }

    #[test]
    fn test_fires_at_exact_threshold() {
        let mut d = detector();
        d.observe(&Vad::speech_end(1000));

        let signal = d.poll(3000).expect("inclusive boundary must fire");
        assert_eq!(signal.silence_ms, 2000);
    }

    #[test]
    fn test_fires_exactly_once() {
        let mut d = detector();
        d.observe(&Vad::speech_end(1000));

        assert!(d.poll(3200).is_some());
        assert!(d.poll(3300).is_none());
        assert!(d.poll(10_000).is_none());
    }

    #[test]
    fn test_speech_start_disarms() {
        let mut d = detector();
        d.observe(&Vad::speech_end(1000));
        d.observe(&Vad::speech_start(1800));
        // Resumed speech long enough to count
        d.observe(&Vad::speech_end(2500));

        // Original deadline passed while speaking: no signal
        assert!(d.poll(3000).is_none());
        // New armed period from 2500
        assert!(d.poll(4500).is_some());
    }

    #[test]
    fn test_blip_does_not_reset_silence_clock() {
        let mut d = detector();
        d.observe(&Vad::speech_end(1000));
        // 100ms cough at 1500, shorter than min_speech_ms
        d.observe(&Vad::speech_start(1500));
        d.observe(&Vad::speech_end(1600));

        // Silence clock still counts from 1000
        let signal = d.poll(3000).expect("blip must not reset the clock");
        assert_eq!(signal.silence_ms, 2000);
    }

    #[test]
    fn test_no_duplicate_after_blip_restore() {
        let mut d = detector();
        d.observe(&Vad::speech_end(1000));
        assert!(d.poll(3000).is_some());

        // Blip after firing; restored period already fired
        d.observe(&Vad::speech_start(3100));
        d.observe(&Vad::speech_end(3150));
        assert!(d.poll(6000).is_none());
    }

    #[test]
    fn test_deadline_tracks_armed_period() {
        let mut d = detector();
        assert_eq!(d.deadline_ms(), None);

        d.observe(&Vad::speech_end(1000));
        assert_eq!(d.deadline_ms(), Some(3000));

        d.observe(&Vad::speech_start(1200));
        // Tentative phase has no deadline of its own
        assert_eq!(d.deadline_ms(), None);
    }

    #[test]
    fn test_unbound_detector_never_fires() {
        let mut d = PauseDetector::new(PauseConfig::default());
        d.observe(&Vad::speech_start(0));
        d.observe(&Vad::speech_end(100));
        assert!(d.poll(10_000).is_none());
    }
}
