//! Adapter exposing a discovered plugin tool as a [`crate::tool::Tool`]

use std::sync::Weak;

use super::client::DiscoveredTool;
use super::manager::{namespaced, PluginManager};
use super::McpError;
use crate::tool::{Tool, ToolError, ToolOutput};
use crate::types::ToolCategory;

/// Wraps one discovered plugin tool.
///
/// The adapter routes calls through the [`PluginManager`] so timeouts and
/// failure marking apply; it holds only a weak reference, since the
/// manager (indirectly, via the registry) owns the adapter.
pub struct PluginToolAdapter {
    manager: Weak<PluginManager>,
    plugin: String,
    /// Original tool name, used on the wire
    original_name: String,
    /// Namespaced name shown to the model: `mcp/<plugin>/<tool>`
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

impl PluginToolAdapter {
    pub fn new(manager: Weak<PluginManager>, plugin: &str, tool: DiscoveredTool) -> Self {
        Self {
            manager,
            plugin: plugin.to_string(),
            name: namespaced(plugin, &tool.name),
            original_name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
        }
    }
}

impl Tool for PluginToolAdapter {
    // Plugin tools accept dynamic JSON input; the schema comes from discovery
    type Input = serde_json::Value;

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::McpTools
    }

    fn input_schema(&self) -> serde_json::Value {
        self.input_schema.clone()
    }

    async fn execute(&self, input: Self::Input) -> Result<ToolOutput, ToolError> {
        let Some(manager) = self.manager.upgrade() else {
            return Err(ToolError::PluginUnavailable(format!(
                "plugin manager for '{}' is gone",
                self.plugin
            )));
        };

        match manager
            .call_tool(&self.plugin, &self.original_name, input)
            .await
        {
            Ok(value) => Ok(ToolOutput::Json(value)),
            Err(McpError::Unavailable(msg)) => Err(ToolError::PluginUnavailable(msg)),
            Err(e) => Err(ToolError::Custom(e.to_string())),
        }
    }
}
