//! Plugin configuration file loading
//!
//! The persisted format maps plugin names to their launch configuration,
//! plus two globals:
//!
//! ```json
//! {
//!   "plugins": {
//!     "filesystem": {
//!       "transport": "stdio",
//!       "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-filesystem"],
//!       "env": {"API_KEY": "${MY_KEY}"},
//!       "timeoutMs": 30000
//!     },
//!     "search": {"transport": "http", "url": "https://api.example.com/mcp"},
//!     "disabled-one": {"command": "old-server", "excluded": true}
//!   },
//!   "autoConnect": true,
//!   "defaultTimeoutMs": 30000
//! }
//! ```
//!
//! Environment variables expand with `${VAR}` or `${VAR:-default}` syntax,
//! and the config path itself is tilde-expanded.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::McpError;

/// Default per-call timeout when neither the plugin nor the globals set one
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Raw file format
#[derive(Debug, Deserialize)]
struct PluginConfigFile {
    #[serde(default)]
    plugins: HashMap<String, PluginEntry>,
    #[serde(default = "default_true", rename = "autoConnect")]
    auto_connect: bool,
    #[serde(default = "default_timeout_ms", rename = "defaultTimeoutMs")]
    default_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}

/// Raw per-plugin entry
#[derive(Debug, Deserialize)]
struct PluginEntry {
    /// "stdio" (default) or "http"
    #[serde(default)]
    transport: Option<String>,
    command: Option<String>,
    args: Option<Vec<String>>,
    env: Option<HashMap<String, String>>,
    url: Option<String>,
    headers: Option<HashMap<String, String>>,
    #[serde(rename = "timeoutMs")]
    timeout_ms: Option<u64>,
    #[serde(default)]
    excluded: bool,
}

/// How to reach a plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginTransport {
    /// Spawn a child process and speak MCP over stdio
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    /// Connect to a streamable-HTTP MCP endpoint
    Http {
        url: String,
        headers: HashMap<String, String>,
    },
}

/// Resolved configuration for one plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    pub name: String,
    pub transport: PluginTransport,
    /// Per-call timeout
    pub timeout: Duration,
    /// Excluded plugins are parsed but never started
    pub excluded: bool,
}

/// Everything the manager needs from one config file
#[derive(Debug, Clone)]
pub struct PluginManagerConfig {
    pub plugins: Vec<PluginConfig>,
    pub auto_connect: bool,
}

/// Load and resolve a plugin configuration file
pub async fn load_config_file(path: impl AsRef<Path>) -> Result<PluginManagerConfig, McpError> {
    let path_str = path.as_ref().to_string_lossy().to_string();
    let expanded_path = shellexpand::tilde(&path_str);
    let content = tokio::fs::read_to_string(Path::new(expanded_path.as_ref())).await?;
    parse_config(&content)
}

/// Parse config content (separated from IO for the hot-reload path)
pub(crate) fn parse_config(content: &str) -> Result<PluginManagerConfig, McpError> {
    let expanded = expand_env_vars(content);
    let file: PluginConfigFile = serde_json::from_str(&expanded)?;

    let mut plugins = Vec::new();
    for (name, entry) in file.plugins {
        plugins.push(entry_to_config(name, entry, file.default_timeout_ms)?);
    }
    // Deterministic ordering regardless of map iteration
    plugins.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(PluginManagerConfig {
        plugins,
        auto_connect: file.auto_connect,
    })
}

/// Digest of a config file's content, used to detect changes for hot reload
pub fn config_digest(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

fn entry_to_config(
    name: String,
    entry: PluginEntry,
    default_timeout_ms: u64,
) -> Result<PluginConfig, McpError> {
    let transport = match entry.transport.as_deref().unwrap_or("stdio") {
        "stdio" => {
            let command = entry
                .command
                .ok_or_else(|| McpError::Config(format!("plugin '{name}': missing 'command'")))?;
            PluginTransport::Stdio {
                command,
                args: entry.args.unwrap_or_default(),
                env: entry.env.unwrap_or_default(),
            }
        }
        "http" => {
            let url = entry
                .url
                .ok_or_else(|| McpError::Config(format!("plugin '{name}': missing 'url'")))?;
            PluginTransport::Http {
                url,
                headers: entry.headers.unwrap_or_default(),
            }
        }
        other => {
            return Err(McpError::Config(format!(
                "plugin '{name}': unknown transport type '{other}'"
            )))
        }
    };

    Ok(PluginConfig {
        name,
        transport,
        timeout: Duration::from_millis(entry.timeout_ms.unwrap_or(default_timeout_ms)),
        excluded: entry.excluded,
    })
}

/// Expand `${VAR}` and `${VAR:-default}` references
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'

            let mut var_name = String::new();
            let mut default_value: Option<String> = None;

            while let Some(&next) = chars.peek() {
                if next == '}' {
                    chars.next();
                    break;
                } else if next == ':' {
                    chars.next();
                    if chars.peek() == Some(&'-') {
                        chars.next();
                        let mut default = String::new();
                        while let Some(&d) = chars.peek() {
                            if d == '}' {
                                chars.next();
                                break;
                            }
                            default.push(d);
                            chars.next();
                        }
                        default_value = Some(default);
                        break;
                    }
                } else {
                    var_name.push(next);
                    chars.next();
                }
            }

            let value = std::env::var(&var_name)
                .ok()
                .or(default_value)
                .unwrap_or_default();
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }
    result
}
