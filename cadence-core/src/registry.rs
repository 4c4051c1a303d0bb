//! Tool registry
//!
//! Aggregates built-in tools, plugin-discovered tools, and sub-agent tools
//! into one catalog. Readers take an immutable snapshot (`Arc<Vec<...>>`);
//! mutations rebuild the merged list and swap it in one move, so a reader
//! observes either the old or the new catalog, never a partial state. The
//! agent loop consumes snapshots through a thunk, which is what makes plugin
//! hot-reload invisible to it.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::tool::{box_tool, DynTool, Tool};
use crate::types::ToolDefinition;

/// An immutable view of the catalog at one point in time
pub type ToolSnapshot = Arc<Vec<Arc<dyn DynTool>>>;

struct RegistryInner {
    builtin: Vec<Arc<dyn DynTool>>,
    /// Per-plugin tool slices, swapped wholesale on (re)discovery
    plugins: BTreeMap<String, Vec<Arc<dyn DynTool>>>,
    merged: ToolSnapshot,
}

impl RegistryInner {
    fn rebuild(&mut self) {
        let mut merged: Vec<Arc<dyn DynTool>> = self.builtin.clone();
        for tools in self.plugins.values() {
            merged.extend(tools.iter().cloned());
        }
        self.merged = Arc::new(merged);
    }
}

/// Thread-safe tool catalog with atomic snapshot swaps
pub struct ToolRegistry {
    inner: parking_lot::RwLock<RegistryInner>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            inner: parking_lot::RwLock::new(RegistryInner {
                builtin: Vec::new(),
                plugins: BTreeMap::new(),
                merged: Arc::new(Vec::new()),
            }),
        }
    }

    /// Register a built-in tool
    pub fn register<T: Tool + 'static>(&self, tool: T) {
        self.register_dyn(box_tool(tool));
    }

    /// Register an already type-erased tool
    pub fn register_dyn(&self, tool: Arc<dyn DynTool>) {
        let mut inner = self.inner.write();
        if inner.merged.iter().any(|t| t.name() == tool.name()) {
            tracing::warn!(
                tool = tool.name(),
                "tool name already registered; the model will see duplicates"
            );
        }
        inner.builtin.push(tool);
        inner.rebuild();
    }

    /// Replace the tool slice for one plugin atomically
    pub fn set_plugin_tools(&self, plugin: &str, tools: Vec<Arc<dyn DynTool>>) {
        let mut inner = self.inner.write();
        inner.plugins.insert(plugin.to_string(), tools);
        inner.rebuild();
    }

    /// Remove a plugin's tools. Returns true when the plugin was present.
    pub fn remove_plugin(&self, plugin: &str) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.plugins.remove(plugin).is_some();
        if removed {
            inner.rebuild();
        }
        removed
    }

    /// The current catalog snapshot
    pub fn snapshot(&self) -> ToolSnapshot {
        self.inner.read().merged.clone()
    }

    /// Descriptors of the current catalog, for the backend request
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.snapshot().iter().map(|t| t.definition()).collect()
    }

    /// Look up a tool by name in the current snapshot
    pub fn find(&self, name: &str) -> Option<Arc<dyn DynTool>> {
        self.snapshot().iter().find(|t| t.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolError, ToolOutput};
    use crate::types::ToolCategory;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct EmptyInput {}

    struct NamedTool(&'static str);

    impl Tool for NamedTool {
        type Input = EmptyInput;

        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test tool"
        }

        fn category(&self) -> ToolCategory {
            ToolCategory::Read
        }

        async fn execute(&self, _input: Self::Input) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(self.0))
        }
    }

    #[test]
    fn test_register_and_find() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());

        registry.register(NamedTool("alpha"));
        registry.register(NamedTool("beta"));

        assert_eq!(registry.len(), 2);
        assert!(registry.find("alpha").is_some());
        assert!(registry.find("missing").is_none());
    }

    #[test]
    fn test_snapshot_is_immutable_view() {
        let registry = ToolRegistry::new();
        registry.register(NamedTool("alpha"));

        let before = registry.snapshot();
        registry.register(NamedTool("beta"));
        let after = registry.snapshot();

        // The earlier snapshot still sees the old catalog
        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
    }

    #[test]
    fn test_plugin_slice_swap() {
        let registry = ToolRegistry::new();
        registry.register(NamedTool("builtin"));

        registry.set_plugin_tools("db", vec![box_tool(NamedTool("mcp/db/query"))]);
        assert_eq!(registry.len(), 2);

        // Swapping replaces the whole slice, not appends
        registry.set_plugin_tools(
            "db",
            vec![
                box_tool(NamedTool("mcp/db/query_v2")),
                box_tool(NamedTool("mcp/db/insert")),
            ],
        );
        assert_eq!(registry.len(), 3);
        assert!(registry.find("mcp/db/query").is_none());
        assert!(registry.find("mcp/db/query_v2").is_some());

        assert!(registry.remove_plugin("db"));
        assert!(!registry.remove_plugin("db"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_definitions_reflect_snapshot() {
        let registry = ToolRegistry::new();
        registry.register(NamedTool("alpha"));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[0].category, ToolCategory::Read);
    }
}
