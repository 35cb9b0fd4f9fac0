//! Interruptible playback control
//!
//! Drives the external TTS backend chunk by chunk so that `stop()` takes
//! effect within a bounded latency, never mid-buffer. The controller reports
//! actual spoken duration back to the engine for turn bookkeeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::tts::TtsBackend;
use crate::PipelineError;

/// Playback configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Granularity of the stop-flag check while audio plays out; this bounds
    /// the stop latency (target well under 200ms)
    pub stop_poll_interval_ms: u64,

    /// Natural pause before the assistant starts speaking
    pub response_delay_ms: u64,

    /// Words per synthesis chunk
    pub chunk_words: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            stop_poll_interval_ms: 50,
            response_delay_ms: 400,
            chunk_words: 6,
        }
    }
}

/// Outcome of one playback run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Playback ran to the end of the text
    Completed { spoken_ms: u64 },
    /// `stop()` was called; reports how much was spoken before stopping
    Interrupted { spoken_ms: u64 },
}

impl PlaybackOutcome {
    pub fn spoken_ms(&self) -> u64 {
        match *self {
            PlaybackOutcome::Completed { spoken_ms }
            | PlaybackOutcome::Interrupted { spoken_ms } => spoken_ms,
        }
    }
}

/// Audio handed to the external output sink
#[derive(Debug, Clone)]
pub struct PlaybackChunk {
    pub samples: Arc<[f32]>,
    pub text: String,
    pub sample_rate: u32,
}

/// Drives TTS synthesis and playout with fast interruption.
pub struct PlaybackController {
    tts: Arc<dyn TtsBackend>,
    config: PlaybackConfig,
    stop_requested: Arc<AtomicBool>,
    speaking: Arc<AtomicBool>,
    sink: Option<mpsc::Sender<PlaybackChunk>>,
}

impl PlaybackController {
    pub fn new(tts: Arc<dyn TtsBackend>, config: PlaybackConfig) -> Self {
        Self {
            tts,
            config,
            stop_requested: Arc::new(AtomicBool::new(false)),
            speaking: Arc::new(AtomicBool::new(false)),
            sink: None,
        }
    }

    /// Attach an output sink receiving synthesized audio chunks
    pub fn with_sink(mut self, sink: mpsc::Sender<PlaybackChunk>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Request playback stop; takes effect within the poll interval
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Is a playback run currently in progress?
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Speak the given text, returning how the run ended.
    ///
    /// # Errors
    ///
    /// Returns error if the TTS backend fails; the engine surfaces that as a
    /// text-only turn rather than blocking in the speaking state.
    pub async fn speak(&self, text: &str) -> Result<PlaybackOutcome, PipelineError> {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.speaking.store(true, Ordering::SeqCst);

        let result = self.speak_inner(text).await;

        self.speaking.store(false, Ordering::SeqCst);
        result
    }

    async fn speak_inner(&self, text: &str) -> Result<PlaybackOutcome, PipelineError> {
        let mut spoken_ms: u64 = 0;

        // Natural pause before speaking, still interruptible
        if self
            .interruptible_wait(self.config.response_delay_ms)
            .await
        {
            tracing::debug!("playback stopped during response delay");
            return Ok(PlaybackOutcome::Interrupted { spoken_ms: 0 });
        }

        for chunk_text in chunk_text(text, self.config.chunk_words) {
            if self.stop_requested.load(Ordering::SeqCst) {
                tracing::debug!(spoken_ms, "playback interrupted between chunks");
                return Ok(PlaybackOutcome::Interrupted { spoken_ms });
            }

            let samples = self.tts.synthesize(&chunk_text).await?;
            let sample_rate = self.tts.sample_rate();
            let chunk_ms = samples.len() as u64 * 1000 / u64::from(sample_rate.max(1));

            if let Some(sink) = &self.sink {
                let chunk = PlaybackChunk {
                    samples: samples.into(),
                    text: chunk_text.clone(),
                    sample_rate,
                };
                if sink.send(chunk).await.is_err() {
                    return Err(PipelineError::ChannelClosed);
                }
            }

            // Play out in short slices so stop() lands quickly
            let mut remaining = chunk_ms;
            while remaining > 0 {
                let slice = remaining.min(self.config.stop_poll_interval_ms);
                tokio::time::sleep(Duration::from_millis(slice)).await;
                spoken_ms += slice;
                remaining -= slice;

                if self.stop_requested.load(Ordering::SeqCst) {
                    tracing::debug!(spoken_ms, "playback interrupted mid-chunk");
                    return Ok(PlaybackOutcome::Interrupted { spoken_ms });
                }
            }
        }

        tracing::debug!(spoken_ms, "playback complete");
        Ok(PlaybackOutcome::Completed { spoken_ms })
    }

    /// Sleep in poll-interval slices; returns true when stopped
    async fn interruptible_wait(&self, total_ms: u64) -> bool {
        let mut remaining = total_ms;
        while remaining > 0 {
            if self.stop_requested.load(Ordering::SeqCst) {
                return true;
            }
            let slice = remaining.min(self.config.stop_poll_interval_ms);
            tokio::time::sleep(Duration::from_millis(slice)).await;
            remaining -= slice;
        }
        self.stop_requested.load(Ordering::SeqCst)
    }
}

/// Split text into word-bounded synthesis chunks
fn chunk_text(text: &str, chunk_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    words
        .chunks(chunk_words.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::StubTts;

    fn fast_controller() -> PlaybackController {
        let config = PlaybackConfig {
            stop_poll_interval_ms: 5,
            response_delay_ms: 0,
            chunk_words: 3,
        };
        PlaybackController::new(Arc::new(StubTts::new().with_ms_per_char(1)), config)
    }

    #[test]
    fn test_chunk_text() {
        let chunks = chunk_text("one two three four five", 2);
        assert_eq!(chunks, vec!["one two", "three four", "five"]);
        assert!(chunk_text("   ", 3).is_empty());
    }

    #[tokio::test]
    async fn test_speak_completes() {
        let controller = fast_controller();
        let outcome = controller.speak("hello there friend").await.unwrap();
        assert!(matches!(outcome, PlaybackOutcome::Completed { .. }));
        assert!(outcome.spoken_ms() > 0);
        assert!(!controller.is_speaking());
    }

    #[tokio::test]
    async fn test_stop_interrupts_quickly() {
        let controller = Arc::new(fast_controller());

        let speaker = Arc::clone(&controller);
        let handle = tokio::spawn(async move {
            speaker
                .speak("a fairly long sentence that would otherwise play for a while yet")
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.stop();

        let outcome = handle.await.unwrap().unwrap();
        match outcome {
            PlaybackOutcome::Interrupted { spoken_ms } => {
                // Far less than the full utterance length
                assert!(spoken_ms < 60, "spoken_ms = {spoken_ms}");
            }
            other => panic!("expected interruption, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stop_before_speaking_yields_zero_spoken() {
        let config = PlaybackConfig {
            stop_poll_interval_ms: 5,
            response_delay_ms: 50,
            chunk_words: 3,
        };
        let controller =
            PlaybackController::new(Arc::new(StubTts::new().with_ms_per_char(1)), config);

        controller.stop();
        // stop() before speak() is cleared by speak(); stop again during delay
        let c = Arc::new(controller);
        let speaker = Arc::clone(&c);
        let handle = tokio::spawn(async move { speaker.speak("hello world").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        c.stop();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, PlaybackOutcome::Interrupted { spoken_ms: 0 });
    }

    #[tokio::test]
    async fn test_sink_receives_chunks() {
        let (tx, mut rx) = mpsc::channel(16);
        let config = PlaybackConfig {
            stop_poll_interval_ms: 5,
            response_delay_ms: 0,
            chunk_words: 2,
        };
        let controller =
            PlaybackController::new(Arc::new(StubTts::new().with_ms_per_char(1)), config)
                .with_sink(tx);

        controller.speak("one two three four").await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.text, "one two");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.text, "three four");
    }
}
