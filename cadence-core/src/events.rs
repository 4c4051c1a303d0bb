use std::time::Duration;

use serde_json::Value;

use crate::tool::ToolOutput;

/// Events emitted by [`crate::Agent::run`]
///
/// The run surfaces its progress as a typed event stream; the consumer
/// drives the loop forward by polling it.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A chunk of assistant text (one per streaming delta, or one per turn
    /// when the backend does not stream)
    AssistantText {
        /// Incremental text
        chunk: String,
    },

    /// The model requested a tool call (fires exactly once per call)
    ToolCallRequested {
        /// Unique ID for this tool call
        tool_use_id: String,
        /// Tool name
        name: String,
        /// Input parameters
        input: Value,
    },

    /// A tool call finished (successfully, with an error, or denied)
    ToolCallCompleted {
        /// Matching ID from `ToolCallRequested`
        tool_use_id: String,
        /// Tool name
        name: String,
        /// Tool output or error description
        result: ToolOutput,
        /// Whether the call succeeded
        success: bool,
        /// Execution duration
        elapsed: Duration,
    },

    /// Token usage reported by the backend for one generation
    TokenUsage {
        input_tokens: u64,
        output_tokens: u64,
    },

    /// A non-fatal or fatal error; fatal kinds are followed by `Finished`
    Error { kind: ErrorKind, message: String },

    /// The run ended; always the final event
    Finished { reason: FinishReason },
}

/// Error kinds surfaced in [`AgentEvent::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retryable backend failure (network, throttling, 5xx)
    Transient,
    /// A tool call was denied by the permission gate
    PermissionDenied,
    /// A tool raised an error
    ToolFailure,
    /// An MCP plugin did not respond
    PluginUnavailable,
    /// The protected tail alone exceeds the context window
    ContextTooLarge,
    /// Non-transient backend failure
    BackendError,
    /// A sub-agent limit (depth or concurrency) was hit
    SubAgentLimit,
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The model returned a final answer with no tool calls
    Completed,
    /// The tool-turn budget was exhausted
    BudgetExceeded,
    /// The usage limiter said stop
    UsageLimit,
    /// A non-transient backend failure
    BackendError,
    /// The cancellation signal fired
    Cancelled,
    /// Compaction could not fit the history into the window
    ContextTooLarge,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FinishReason::Completed => "completed",
            FinishReason::BudgetExceeded => "budget_exceeded",
            FinishReason::UsageLimit => "usage_limit",
            FinishReason::BackendError => "backend_error",
            FinishReason::Cancelled => "cancelled",
            FinishReason::ContextTooLarge => "context_too_large",
        };
        write!(f, "{s}")
    }
}

/// Token usage statistics from one backend response
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
