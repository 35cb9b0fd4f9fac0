//! Speech-to-text service boundary
//!
//! The engine never talks to an STT provider directly; adapters implement
//! this trait and stream fragments into the engine's event loop. Provider
//! identity is configuration, not logic.

use tokio::sync::mpsc;

use tutor_core::TranscriptFragment;

use crate::PipelineError;

/// STT backend trait
#[async_trait::async_trait]
pub trait SttBackend: Send {
    /// Stream transcript fragments until the source is exhausted or the
    /// receiver goes away.
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<TranscriptFragment>,
    ) -> Result<(), PipelineError>;
}

/// Scripted STT for tests: replays a fixed fragment sequence with delays.
pub struct ScriptedStt {
    script: Vec<(u64, TranscriptFragment)>,
}

impl ScriptedStt {
    pub fn new(script: Vec<(u64, TranscriptFragment)>) -> Self {
        Self { script }
    }
}

#[async_trait::async_trait]
impl SttBackend for ScriptedStt {
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<TranscriptFragment>,
    ) -> Result<(), PipelineError> {
        for (delay_ms, fragment) in self.script {
            if delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
            if tx.send(fragment).await.is_err() {
                return Err(PipelineError::ChannelClosed);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_core::TurnId;

    #[tokio::test]
    async fn test_scripted_stt_replays_in_order() {
        let id = TurnId::new();
        let stt = ScriptedStt::new(vec![
            (0, TranscriptFragment::partial(id, 0, "hello", 0.8)),
            (0, TranscriptFragment::final_fragment(id, 1, "world", 0.9)),
        ]);

        let (tx, mut rx) = mpsc::channel(8);
        Box::new(stt).run(tx).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().text, "hello");
        let last = rx.recv().await.unwrap();
        assert_eq!(last.text, "world");
        assert!(last.is_final);
        assert!(rx.recv().await.is_none());
    }
}
