//! In-memory backend for exercising the council without any network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{BackendError, ChatBackend, ChatRequest, ChatResponse};

/// Scripted [`ChatBackend`]: returns a fixed reply (or error), counts
/// invocations, and can simulate latency.
pub struct MockBackend {
    reply: String,
    fail_with: Mutex<Option<BackendError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fail_with: Mutex::new(None),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next (and every subsequent) call with `err`.
    pub fn failing(err: BackendError) -> Self {
        Self {
            reply: String::new(),
            fail_with: Mutex::new(Some(err)),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep for `delay` before answering. Combined with a short reactor
    /// deadline this simulates a hung backend.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next call with `err`, then answer normally.
    pub fn failing_once(self, err: BackendError) -> Self {
        *self.fail_with.lock().expect("mock lock") = Some(err);
        self
    }

    /// How many times `complete` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.fail_with.lock().expect("mock lock").take() {
            return Err(err);
        }

        Ok(ChatResponse {
            content: self.reply.clone(),
            model: req.model.clone(),
            tokens_in: req.turns.iter().map(|t| t.content.len() as u32).sum(),
            tokens_out: self.reply.len() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatTurn, Role};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "mock-model".to_string(),
            turns: vec![ChatTurn::new(Role::User, "hello")],
            max_tokens: 64,
        }
    }

    #[tokio::test]
    async fn scripted_reply_and_call_count() {
        let backend = MockBackend::replying("a1");
        let resp = backend.complete(&request()).await.unwrap();
        assert_eq!(resp.content, "a1");
        assert_eq!(backend.calls(), 1);

        backend.complete(&request()).await.unwrap();
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn scripted_failure_fires_once() {
        let backend = MockBackend::failing(BackendError::Unavailable("down".to_string()));
        assert!(backend.complete(&request()).await.is_err());
        // the scripted error is consumed; later calls answer normally
        assert!(backend.complete(&request()).await.is_ok());
    }
}
