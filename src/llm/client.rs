//! LlmClient trait and a scripted mock

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::types::{CompletionRequest, CompletionResponse};
use crate::error::{AnvilError, Result};

/// Stateless LLM client - each call is independent (fresh context)
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single completion request
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Model identifier, recorded with generated versions
    fn model(&self) -> &str;

    /// Whether the client has what it needs to make calls
    fn is_ready(&self) -> bool;
}

/// One scripted reply
#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Unavailable(String),
}

/// Mock client that replays scripted responses in order
///
/// Once the script is exhausted the last reply repeats. Every request is
/// recorded for assertions.
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<Reply>>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockLlmClient {
    /// Create a mock that answers with the given texts
    pub fn new(responses: Vec<impl Into<String>>) -> Self {
        Self {
            replies: Mutex::new(responses.into_iter().map(|r| Reply::Text(r.into())).collect()),
            ..Default::default()
        }
    }

    /// Queue a reply that fails with `OracleUnavailable`
    pub fn then_unavailable(self, reason: impl Into<String>) -> Self {
        self.push(Reply::Unavailable(reason.into()))
    }

    /// Queue a text reply
    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.push(Reply::Text(text.into()))
    }

    /// Sleep before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(self, reply: Reply) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
        self
    }

    /// Number of `complete` calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Copies of every request received
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_reply(&self) -> Result<Reply> {
        let mut replies = self.replies.lock().map_err(|e| AnvilError::Llm(e.to_string()))?;
        let mut last = self.last.lock().map_err(|e| AnvilError::Llm(e.to_string()))?;
        match replies.pop_front() {
            Some(reply) => {
                *last = Some(reply.clone());
                Ok(reply)
            }
            None => last
                .clone()
                .ok_or_else(|| AnvilError::OracleUnavailable("mock has no scripted responses".to_string())),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.next_reply()? {
            Reply::Text(text) => Ok(CompletionResponse::text(text)),
            Reply::Unavailable(reason) => Err(AnvilError::OracleUnavailable(reason)),
        }
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_replays_in_order_then_repeats() {
        let mock = MockLlmClient::new(vec!["one", "two"]);
        let req = || CompletionRequest::new("s").with_user_message("u");

        assert_eq!(mock.complete(req()).await.unwrap().content, "one");
        assert_eq!(mock.complete(req()).await.unwrap().content, "two");
        assert_eq!(mock.complete(req()).await.unwrap().content, "two");
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_unavailable() {
        let mock = MockLlmClient::new(Vec::<String>::new())
            .then_unavailable("down")
            .then_text("ok");
        let req = || CompletionRequest::new("s");

        let err = mock.complete(req()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(mock.complete(req()).await.unwrap().content, "ok");
    }

    #[tokio::test]
    async fn test_empty_mock_is_unavailable() {
        let mock = MockLlmClient::default();
        let err = mock.complete(CompletionRequest::new("s")).await.unwrap_err();
        assert!(matches!(err, AnvilError::OracleUnavailable(_)));
    }
}
