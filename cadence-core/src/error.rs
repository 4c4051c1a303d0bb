//! Top-level error types
//!
//! This module provides a simplified, user-facing error type that flattens
//! the internal error hierarchy into actionable categories.

use thiserror::Error;

use crate::backend::BackendError;
use crate::context::ContextError;
use crate::mode::InvalidModeTransition;
use crate::permission::PermissionError;
use crate::plan::PlanError;
use crate::subagent::SubAgentError;
use crate::tool::ToolError;

/// Top-level error type for cadence operations
///
/// - [`Error::RateLimited`] / [`Error::Network`] / [`Error::Unavailable`] - back off and retry
/// - [`Error::Backend`] - non-retryable backend failure
/// - [`Error::Tool`] - a tool failed
/// - [`Error::Context`] - history could not fit the window
/// - [`Error::Config`] - fix the configuration
#[derive(Debug, Error)]
pub enum Error {
    /// Rate limited - slow down requests
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Network connectivity issue
    #[error("network error: {0}")]
    Network(String),

    /// Service temporarily unavailable
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Non-retryable backend failure
    #[error("backend error: {0}")]
    Backend(String),

    /// Tool execution failed
    #[error("tool error: {0}")]
    Tool(String),

    /// Context management failed (history cannot fit the window)
    #[error("context error: {0}")]
    Context(String),

    /// Invalid mode transition
    #[error("{0}")]
    Mode(String),

    /// Plan orchestration failed
    #[error("plan error: {0}")]
    Plan(String),

    /// Sub-agent limit hit
    #[error("sub-agent error: {0}")]
    SubAgent(String),

    /// Configuration error (bad pattern, missing backend, malformed file)
    #[error("configuration error: {0}")]
    Config(String),

    /// MCP plugin error
    #[cfg(feature = "mcp")]
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns true if this error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Network(_) | Self::Unavailable(_)
        )
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::RateLimited(msg) => Self::RateLimited(msg),
            BackendError::Network(msg) => Self::Network(msg),
            BackendError::ServiceUnavailable(msg) => Self::Unavailable(msg),
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<ToolError> for Error {
    fn from(err: ToolError) -> Self {
        Self::Tool(err.to_string())
    }
}

impl From<ContextError> for Error {
    fn from(err: ContextError) -> Self {
        Self::Context(err.to_string())
    }
}

impl From<InvalidModeTransition> for Error {
    fn from(err: InvalidModeTransition) -> Self {
        Self::Mode(err.to_string())
    }
}

impl From<PermissionError> for Error {
    fn from(err: PermissionError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<PlanError> for Error {
    fn from(err: PlanError) -> Self {
        Self::Plan(err.to_string())
    }
}

impl From<SubAgentError> for Error {
    fn from(err: SubAgentError) -> Self {
        Self::SubAgent(err.to_string())
    }
}

#[cfg(feature = "mcp")]
impl From<crate::mcp::McpError> for Error {
    fn from(err: crate::mcp::McpError) -> Self {
        Self::Mcp(err.to_string())
    }
}

/// Result type for cadence operations
pub type Result<T> = std::result::Result<T, Error>;
