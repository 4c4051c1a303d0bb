//! MCP plugin integration
//!
//! Plugins are long-lived external MCP servers (stdio subprocesses or HTTP
//! sessions) whose tools are discovered at startup and merged into the
//! [`crate::registry::ToolRegistry`] under an `mcp/<plugin>/` prefix. The
//! [`PluginManager`] owns plugin lifecycles: discovery, per-call timeouts,
//! failure marking with backoff restarts, and digest-triggered hot reload
//! with an atomic registry swap.

mod client;
mod config;
mod manager;
pub(crate) mod tool_adapter;

pub use client::{DiscoveredTool, PluginClient};
pub use config::{
    config_digest, load_config_file, PluginConfig, PluginManagerConfig, PluginTransport,
};
pub use manager::{PluginManager, PluginState, DEFAULT_GRACE_PERIOD};

use thiserror::Error;

/// Errors that can occur during MCP operations
#[derive(Debug, Error)]
pub enum McpError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("tool execution error: {0}")]
    ToolExecution(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("plugin unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MCP protocol error: {0}")]
    Protocol(String),
}
