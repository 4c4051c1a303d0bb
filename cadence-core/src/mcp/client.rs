//! MCP client for one plugin
//!
//! A [`PluginClient`] wraps one MCP session (a spawned subprocess or a
//! streamable-HTTP connection). The session opens on first use; calls that
//! race on a cold client take the write lock once and everyone else reads
//! the established session.

use std::collections::HashMap;

use rmcp::service::RunningService;
use rmcp::transport::streamable_http_client::{
    StreamableHttpClientTransport, StreamableHttpClientTransportConfig,
};
use rmcp::transport::TokioChildProcess;
use rmcp::{model::CallToolRequestParam, RoleClient, ServiceExt};
use tokio::process::Command;
use tokio::sync::{RwLock, RwLockReadGuard};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::config::{PluginConfig, PluginTransport};
use super::McpError;

type Session = RunningService<RoleClient, ()>;

/// A tool schema discovered from a plugin's `list_tools` handshake
#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl From<rmcp::model::Tool> for DiscoveredTool {
    fn from(tool: rmcp::model::Tool) -> Self {
        Self {
            name: tool.name.to_string(),
            description: tool.description.unwrap_or_default().to_string(),
            input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
        }
    }
}

/// Client for one plugin process or HTTP session
pub struct PluginClient {
    name: String,
    transport: PluginTransport,
    session: RwLock<Option<Session>>,
}

impl PluginClient {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            name: config.name,
            transport: config.transport,
            session: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open the session now instead of on first use. Idempotent.
    pub async fn connect(&self) -> Result<(), McpError> {
        self.session().await.map(drop)
    }

    /// Discover the plugin's tool schemas
    pub async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, McpError> {
        let session = self.session().await?;
        let listing = require(&session, &self.name)?
            .list_tools(Default::default())
            .await
            .map_err(|e| McpError::Protocol(format!("list_tools failed: {e}")))?;

        Ok(listing.tools.into_iter().map(DiscoveredTool::from).collect())
    }

    /// Call a tool on the plugin
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let request = CallToolRequestParam {
            name: name.to_string().into(),
            arguments: arguments.as_object().cloned(),
        };

        let session = self.session().await?;
        let outcome = require(&session, &self.name)?
            .call_tool(request)
            .await
            .map_err(|e| McpError::ToolExecution(format!("tool call failed: {e}")))?;

        serde_json::to_value(outcome).map_err(McpError::Json)
    }

    /// Shut the session down.
    ///
    /// Stdio subprocesses are terminated; a later call re-opens the session.
    pub async fn disconnect(&self) -> Result<(), McpError> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };
        session.cancel().await.map_err(|e| {
            McpError::Connection(format!("plugin '{}': shutdown failed: {e}", self.name))
        })?;
        tracing::info!(plugin = %self.name, "plugin session closed");
        Ok(())
    }

    /// Read guard over the live session, establishing it first when cold.
    ///
    /// Double-checked: the common path is a plain read; only a cold (or
    /// concurrently closed) client pays for the write lock, which is then
    /// downgraded so racing callers proceed together.
    async fn session(&self) -> Result<RwLockReadGuard<'_, Option<Session>>, McpError> {
        let guard = self.session.read().await;
        if guard.is_some() {
            return Ok(guard);
        }
        drop(guard);

        let mut guard = self.session.write().await;
        if guard.is_none() {
            *guard = Some(open_session(&self.name, &self.transport).await?);
            tracing::info!(plugin = %self.name, "plugin session established");
        }
        Ok(guard.downgrade())
    }
}

fn require<'a>(
    slot: &'a Option<Session>,
    plugin: &str,
) -> Result<&'a Session, McpError> {
    slot.as_ref()
        .ok_or_else(|| McpError::Connection(format!("plugin '{plugin}' session was closed")))
}

/// Open a session over the configured transport
async fn open_session(name: &str, transport: &PluginTransport) -> Result<Session, McpError> {
    match transport {
        PluginTransport::Stdio { command, args, env } => {
            let mut launch = Command::new(command);
            launch.args(args).envs(env);

            let child = TokioChildProcess::new(launch).map_err(|e| {
                McpError::Transport(format!("plugin '{name}': failed to spawn '{command}': {e}"))
            })?;
            ().serve(child).await.map_err(|e| {
                McpError::Connection(format!("plugin '{name}': stdio handshake failed: {e}"))
            })
        }
        PluginTransport::Http { url, headers } => {
            let transport = StreamableHttpClientTransport::with_client(
                http_client_with(headers)?,
                StreamableHttpClientTransportConfig::with_uri(url.clone()),
            );
            ().serve(transport).await.map_err(|e| {
                McpError::Connection(format!("plugin '{name}': HTTP handshake failed: {e}"))
            })
        }
    }
}

/// An HTTP client carrying the configured headers on every request
fn http_client_with(headers: &HashMap<String, String>) -> Result<reqwest::Client, McpError> {
    let mut defaults = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        let parsed_key: HeaderName = key
            .parse()
            .map_err(|e| McpError::Config(format!("invalid header name '{key}': {e}")))?;
        let parsed_value: HeaderValue = value
            .parse()
            .map_err(|e| McpError::Config(format!("invalid header value for '{key}': {e}")))?;
        defaults.insert(parsed_key, parsed_value);
    }

    reqwest::Client::builder()
        .default_headers(defaults)
        .build()
        .map_err(|e| McpError::Transport(format!("HTTP client construction failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stdio_config(name: &str, command: &str) -> PluginConfig {
        PluginConfig {
            name: name.to_string(),
            transport: PluginTransport::Stdio {
                command: command.to_string(),
                args: vec![],
                env: HashMap::new(),
            },
            timeout: Duration::from_secs(30),
            excluded: false,
        }
    }

    #[test]
    fn test_client_creation() {
        let client = PluginClient::new(stdio_config("test-plugin", "echo"));
        assert_eq!(client.name(), "test-plugin");
    }

    #[tokio::test]
    async fn test_session_is_lazy() {
        let client = PluginClient::new(stdio_config("test", "echo"));
        assert!(client.session.read().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_on_missing_command() {
        let client = PluginClient::new(stdio_config("ghost", "/nonexistent/command"));
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let client = PluginClient::new(stdio_config("test", "echo"));
        assert!(client.disconnect().await.is_ok());
        assert!(client.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_http_header_rejected() {
        let mut headers = HashMap::new();
        headers.insert("Bad Header".to_string(), "value".to_string());

        let client = PluginClient::new(PluginConfig {
            name: "bad-headers".to_string(),
            transport: PluginTransport::Http {
                url: "https://example.com/mcp".to_string(),
                headers,
            },
            timeout: Duration::from_secs(30),
            excluded: false,
        });

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, McpError::Config(_)));
    }

    #[test]
    fn test_http_header_parsing() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer token".to_string());
        assert!(http_client_with(&headers).is_ok());

        headers.insert("X-Bad".to_string(), "line\nbreak".to_string());
        assert!(matches!(
            http_client_with(&headers),
            Err(McpError::Config(_))
        ));
    }
}
