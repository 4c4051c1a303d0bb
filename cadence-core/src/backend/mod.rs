//! The text-completion backend contract
//!
//! This module contains the `Backend` trait the engine generates against.
//! Concrete implementations (an HTTP client for a hosted model, a local
//! inference server, a scripted mock) live outside the engine and are
//! injected at construction time; the core never looks up a backend at
//! runtime.

pub mod retry;

use futures::stream::BoxStream;

use crate::events::TokenUsage;
use crate::types::{ContentBlock, Message, StopReason, ToolDefinition, ToolUseBlock};

pub use retry::{retry_with_backoff, RetryConfig};

/// A request to the backend
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// Conversation history, oldest first
    pub messages: Vec<Message>,
    /// Tools the model may call this turn
    pub tools: Vec<ToolDefinition>,
    /// Optional system prompt
    pub system: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Output token cap
    pub max_output_tokens: Option<u32>,
}

impl ModelRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }
}

/// A complete response from the backend
#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// The assistant message (text, tool calls, thinking)
    pub message: Message,
    /// Why generation stopped
    pub stop_reason: StopReason,
    /// Token usage, when the backend reports it
    pub usage: Option<TokenUsage>,
}

/// Events from streaming backend responses
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text delta
    TextDelta(String),
    /// Tool call detected
    ToolUse(ToolUseBlock),
    /// Incremental thinking delta (extended reasoning)
    ThinkingDelta(String),
    /// Streaming stopped; terminal chunk
    Stop {
        /// Why the model stopped
        stop_reason: StopReason,
        /// Token usage for this response (if available)
        usage: Option<TokenUsage>,
    },
}

/// Error types for backends
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Rate limiting or throttling (HTTP 429)
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Network or connectivity issues
    #[error("network error: {0}")]
    Network(String),

    /// Service unavailable or temporary server-side issues (5xx)
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Authentication or authorization failed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Model-side errors (content filtered, context too long, bad request)
    #[error("model error: {0}")]
    Model(String),

    /// Invalid configuration (bad model id, missing parameters)
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Other backend-specific errors
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Whether this error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimited(_)
                | BackendError::Network(_)
                | BackendError::ServiceUnavailable(_)
        )
    }
}

/// Trait for text-completion backends
///
/// A backend combines model metadata (id, context window, thinking policy)
/// with the generation call itself. The engine only ever talks to a
/// `dyn Backend`.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Identifier used for pricing lookup and display (e.g. "sonnet-4-5")
    fn model_id(&self) -> &str;

    /// Maximum context window in tokens
    fn max_context_tokens(&self) -> usize;

    /// Whether thinking blocks must be re-sent on subsequent turns.
    ///
    /// Most models do not need previously generated thinking content back;
    /// the loop strips it from history unless this returns true.
    fn resend_thinking(&self) -> bool {
        false
    }

    /// Send a request to the model and get a complete response
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, BackendError>;

    /// Send a request and stream the response chunk-by-chunk (optional)
    ///
    /// The default implementation calls `generate` and replays the complete
    /// response as a short stream.
    async fn generate_stream(
        &self,
        request: ModelRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent, BackendError>>, BackendError> {
        let response = self.generate(request).await?;

        let mut events = Vec::new();
        for content in &response.message.content {
            match content {
                ContentBlock::Text(text) if !text.is_empty() => {
                    events.push(Ok(StreamEvent::TextDelta(text.clone())));
                }
                ContentBlock::ToolUse(tool_use) => {
                    events.push(Ok(StreamEvent::ToolUse(tool_use.clone())));
                }
                ContentBlock::Thinking { thinking, .. } => {
                    events.push(Ok(StreamEvent::ThinkingDelta(thinking.clone())));
                }
                _ => {}
            }
        }
        events.push(Ok(StreamEvent::Stop {
            stop_reason: response.stop_reason,
            usage: response.usage,
        }));

        Ok(Box::pin(futures::stream::iter(events)))
    }
}

// Allow Arc<dyn Backend> wherever a Backend is expected
#[async_trait::async_trait]
impl Backend for std::sync::Arc<dyn Backend> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn max_context_tokens(&self) -> usize {
        (**self).max_context_tokens()
    }

    fn resend_thinking(&self) -> bool {
        (**self).resend_thinking()
    }

    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, BackendError> {
        (**self).generate(request).await
    }

    async fn generate_stream(
        &self,
        request: ModelRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent, BackendError>>, BackendError> {
        (**self).generate_stream(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::RateLimited("429".into()).is_transient());
        assert!(BackendError::Network("reset".into()).is_transient());
        assert!(BackendError::ServiceUnavailable("503".into()).is_transient());

        assert!(!BackendError::Authentication("expired".into()).is_transient());
        assert!(!BackendError::Model("filtered".into()).is_transient());
        assert!(!BackendError::Configuration("bad id".into()).is_transient());
        assert!(!BackendError::Other("unknown".into()).is_transient());
    }
}
