//! Text-to-speech service boundary

use crate::PipelineError;

/// TTS backend trait
#[async_trait::async_trait]
pub trait TtsBackend: Send + Sync {
    /// Synthesize text to audio samples
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>, PipelineError>;

    /// Output sample rate
    fn sample_rate(&self) -> u32;
}

/// Stub TTS for tests: emits silence proportional to text length.
pub struct StubTts {
    sample_rate: u32,
    ms_per_char: u64,
}

impl StubTts {
    pub fn new() -> Self {
        Self {
            sample_rate: 16_000,
            ms_per_char: 2,
        }
    }

    /// Override the synthetic speaking rate, mostly to keep tests fast
    pub fn with_ms_per_char(mut self, ms_per_char: u64) -> Self {
        self.ms_per_char = ms_per_char;
        self
    }
}

impl Default for StubTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TtsBackend for StubTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let duration_ms = text.chars().count() as u64 * self.ms_per_char;
        let samples = (duration_ms * u64::from(self.sample_rate) / 1000) as usize;
        Ok(vec![0.0; samples])
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
