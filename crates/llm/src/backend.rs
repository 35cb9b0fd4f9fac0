//! Generation backend boundary
//!
//! The engine never talks to a model provider directly; adapters implement
//! this trait. Which provider backs it is configuration, not logic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::prompt::Message;
use crate::LlmError;

/// Generation backend trait
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a single assistant reply for the given message list
    async fn generate(&self, messages: &[Message]) -> Result<String, LlmError>;
}

type ReplyFn = dyn Fn(&[Message]) -> String + Send + Sync;

/// Stub backend for tests: canned or computed replies with optional delay
/// and failure injection.
pub struct StubGeneration {
    reply: Arc<ReplyFn>,
    delay_ms: u64,
    fail_first: AtomicUsize,
    calls: AtomicUsize,
}

impl StubGeneration {
    /// Reply with a fixed string
    pub fn canned(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::with_reply(move |_| text.clone())
    }

    /// Reply computed from the request; the closure sees the full message
    /// list, so tests can assert on what the prompt contained
    pub fn with_reply(reply: impl Fn(&[Message]) -> String + Send + Sync + 'static) -> Self {
        Self {
            reply: Arc::new(reply),
            delay_ms: 0,
            fail_first: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Delay every reply, for exercising timeout paths
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Fail the first `n` calls before succeeding
    pub fn failing_first(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// How many times `generate` has been called
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl GenerationBackend for StubGeneration {
    async fn generate(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(LlmError::Generation("injected failure".into()));
        }

        Ok((self.reply)(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{Message, Role};

    #[tokio::test]
    async fn test_canned_reply() {
        let backend = StubGeneration::canned("hello back");
        let reply = backend
            .generate(&[Message::new(Role::User, "hello")])
            .await
            .unwrap();
        assert_eq!(reply, "hello back");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection_then_recovery() {
        let backend = StubGeneration::canned("ok").failing_first(1);
        let msgs = [Message::new(Role::User, "hi")];

        assert!(backend.generate(&msgs).await.is_err());
        assert_eq!(backend.generate(&msgs).await.unwrap(), "ok");
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_reply_sees_messages() {
        let backend = StubGeneration::with_reply(|msgs| {
            format!("echo: {}", msgs.last().map(|m| m.content.as_str()).unwrap_or(""))
        });
        let reply = backend
            .generate(&[Message::new(Role::User, "ping")])
            .await
            .unwrap();
        assert_eq!(reply, "echo: ping");
    }
}
