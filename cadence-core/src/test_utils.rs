//! Test utilities for cadence-core.
//!
//! Mock implementations for exercising the engine without a real
//! text-completion backend, usable both by this crate's tests and by
//! downstream crates.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;

use crate::backend::{Backend, BackendError, ModelRequest, ModelResponse};
use crate::events::{AgentEvent, FinishReason, TokenUsage};
use crate::types::{ContentBlock, Message, StopReason, ToolUseBlock};

/// A scripted backend for testing.
///
/// Returns pre-programmed responses in order and errors once the script is
/// exhausted.
///
/// # Example
///
/// ```rust
/// use cadence_core::test_utils::MockBackend;
/// use serde_json::json;
///
/// let backend = MockBackend::new()
///     .with_tool_use("calculator", json!({"expr": "2+2"}))
///     .with_text("The answer is 4");
/// ```
#[derive(Clone)]
pub struct MockBackend {
    responses: Arc<Mutex<Vec<ModelResponse>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
    call_count: Arc<AtomicUsize>,
    window: usize,
    /// When set, every scripted response repeats forever instead of draining
    repeat_last: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(AtomicUsize::new(0)),
            window: 200_000,
            repeat_last: false,
        }
    }

    /// Set the advertised context window (default 200k tokens)
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Keep replaying the final scripted response instead of erroring when
    /// the script runs out. Useful for turn-budget tests.
    pub fn repeating_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Queue a plain text response (`StopReason::EndTurn`)
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.push(ModelResponse {
            message: Message::assistant(text),
            stop_reason: StopReason::EndTurn,
            usage: None,
        });
        self
    }

    /// Queue a tool call response (`StopReason::ToolUse`)
    pub fn with_tool_use(self, tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        let n = self.responses.lock().unwrap().len();
        self.push(ModelResponse {
            message: Message::assistant_with_content(vec![ContentBlock::ToolUse(ToolUseBlock {
                id: format!("call_{n}"),
                name: tool_name.into(),
                input,
            })]),
            stop_reason: StopReason::ToolUse,
            usage: None,
        });
        self
    }

    /// Queue an arbitrary response
    pub fn with_response(self, response: ModelResponse) -> Self {
        self.push(response);
        self
    }

    /// Attach usage numbers to the most recently queued response
    pub fn with_usage(self, input_tokens: u64, output_tokens: u64) -> Self {
        if let Some(last) = self.responses.lock().unwrap().last_mut() {
            last.usage = Some(TokenUsage {
                input_tokens,
                output_tokens,
            });
        }
        self
    }

    fn push(&self, response: ModelResponse) {
        self.responses.lock().unwrap().push(response);
    }

    /// Number of `generate` calls made so far
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// The requests received, in order
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Backend for MockBackend {
    fn model_id(&self) -> &str {
        "mock-backend"
    }

    fn max_context_tokens(&self) -> usize {
        self.window
    }

    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, BackendError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(BackendError::Other(
                "MockBackend: no more responses configured".to_string(),
            ));
        }
        if self.repeat_last && responses.len() == 1 {
            return Ok(responses[0].clone());
        }
        Ok(responses.remove(0))
    }
}

/// Drain an agent event stream, returning all events.
///
/// Panics if the stream ends without a `Finished` event.
pub async fn collect_events<S>(stream: S) -> Vec<AgentEvent>
where
    S: futures::Stream<Item = AgentEvent>,
{
    let events: Vec<AgentEvent> = stream.collect().await;
    assert!(
        matches!(events.last(), Some(AgentEvent::Finished { .. })),
        "event stream must end with Finished, got {:?}",
        events.last()
    );
    events
}

/// The finish reason of a collected event sequence
pub fn finish_reason(events: &[AgentEvent]) -> FinishReason {
    match events.last() {
        Some(AgentEvent::Finished { reason }) => *reason,
        other => panic!("expected Finished as last event, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_backend_scripted_responses() {
        let backend = MockBackend::new().with_text("one").with_text("two");

        let r1 = backend.generate(ModelRequest::default()).await.unwrap();
        assert_eq!(r1.message.text(), "one");
        let r2 = backend.generate(ModelRequest::default()).await.unwrap();
        assert_eq!(r2.message.text(), "two");
        assert!(backend.generate(ModelRequest::default()).await.is_err());
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_backend_repeating_last() {
        let backend = MockBackend::new()
            .with_tool_use("spin", serde_json::json!({}))
            .repeating_last();

        for _ in 0..5 {
            let r = backend.generate(ModelRequest::default()).await.unwrap();
            assert_eq!(r.stop_reason, StopReason::ToolUse);
        }
        assert_eq!(backend.call_count(), 5);
    }

    #[tokio::test]
    async fn test_mock_backend_records_requests() {
        let backend = MockBackend::new().with_text("ok");
        let request = ModelRequest::new(vec![Message::user("hello")]);
        backend.generate(request).await.unwrap();

        let seen = backend.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].messages[0].text(), "hello");
    }
}
