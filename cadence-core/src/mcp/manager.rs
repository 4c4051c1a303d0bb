//! Plugin lifecycle management
//!
//! Owns the long-lived plugin clients and keeps the tool registry's plugin
//! slices in sync with discovery. State machine per plugin:
//! `NotStarted → Starting → Ready → Reloading → Stopped/Failed`.
//!
//! Hot reload compares the config file digest; on change, replacement
//! clients start and discover in parallel with the old ones, the registry
//! slice is swapped atomically, and the old process is torn down after a
//! grace period so in-flight calls can drain.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use super::client::PluginClient;
use super::config::{config_digest, parse_config, PluginConfig, PluginManagerConfig};
use super::tool_adapter::PluginToolAdapter;
use super::McpError;
use crate::backend::retry::{backoff_delay, RetryConfig};
use crate::registry::ToolRegistry;
use crate::tool::DynTool;

/// How long an old client lives after a hot-reload swap
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Lifecycle state of one plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    NotStarted,
    Starting,
    Ready,
    Reloading,
    Stopped,
    Failed,
}

struct PluginHandle {
    config: PluginConfig,
    client: Arc<PluginClient>,
    state: PluginState,
}

/// Owns plugin processes and their registry slices
pub struct PluginManager {
    registry: Arc<ToolRegistry>,
    plugins: RwLock<HashMap<String, PluginHandle>>,
    last_digest: Mutex<Option<String>>,
    grace_period: Duration,
    restart_backoff: RetryConfig,
}

impl PluginManager {
    pub fn new(registry: Arc<ToolRegistry>) -> Arc<Self> {
        Self::with_grace_period(registry, DEFAULT_GRACE_PERIOD)
    }

    pub fn with_grace_period(registry: Arc<ToolRegistry>, grace_period: Duration) -> Arc<Self> {
        Arc::new(Self {
            registry,
            plugins: RwLock::new(HashMap::new()),
            last_digest: Mutex::new(None),
            grace_period,
            restart_backoff: RetryConfig::default(),
        })
    }

    /// Load a config file and start its plugins (when `autoConnect` is set)
    pub async fn load_file(self: &Arc<Self>, path: impl AsRef<Path>) -> Result<(), McpError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        *self.last_digest.lock().await = Some(config_digest(&content));
        let config = parse_config(&content)?;
        self.apply_config(config).await;
        Ok(())
    }

    /// Re-read the config file; when its digest changed, reconcile plugins.
    ///
    /// Returns true when a reload happened.
    pub async fn reload_if_changed(
        self: &Arc<Self>,
        path: impl AsRef<Path>,
    ) -> Result<bool, McpError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let digest = config_digest(&content);
        {
            let mut last = self.last_digest.lock().await;
            if last.as_deref() == Some(digest.as_str()) {
                return Ok(false);
            }
            *last = Some(digest);
        }
        tracing::info!("plugin config changed; reloading");
        let config = parse_config(&content)?;
        self.apply_config(config).await;
        Ok(true)
    }

    /// Poll the config file for changes on an interval
    pub fn spawn_config_watcher(
        self: &Arc<Self>,
        path: PathBuf,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = manager.reload_if_changed(&path).await {
                    tracing::warn!(error = %e, "plugin config reload failed");
                }
            }
        })
    }

    /// Reconcile running plugins with a desired configuration
    pub async fn apply_config(self: &Arc<Self>, config: PluginManagerConfig) {
        let desired: HashMap<String, PluginConfig> = config
            .plugins
            .into_iter()
            .filter(|p| !p.excluded)
            .map(|p| (p.name.clone(), p))
            .collect();

        // Stop plugins that disappeared from (or were excluded in) the config
        let current: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        for name in current {
            if !desired.contains_key(&name) {
                self.stop_plugin(&name).await;
            }
        }

        for (name, plugin_config) in desired {
            let needs_reload = {
                let plugins = self.plugins.read().await;
                match plugins.get(&name) {
                    Some(handle) => handle.config != plugin_config,
                    None => false,
                }
            };
            let is_new = !self.plugins.read().await.contains_key(&name);

            if !config.auto_connect {
                // Parsed but not started; callers connect on demand
                let mut plugins = self.plugins.write().await;
                plugins.entry(name.clone()).or_insert_with(|| PluginHandle {
                    client: Arc::new(PluginClient::new(plugin_config.clone())),
                    config: plugin_config.clone(),
                    state: PluginState::NotStarted,
                });
                continue;
            }

            if is_new {
                if let Err(e) = self.start_plugin(plugin_config).await {
                    tracing::warn!(plugin = %name, error = %e, "plugin failed to start");
                }
            } else if needs_reload {
                if let Err(e) = self.reload_plugin(plugin_config).await {
                    tracing::warn!(plugin = %name, error = %e, "plugin failed to reload");
                }
            }
        }
    }

    /// Start one plugin: connect, discover, merge tools into the registry
    pub async fn start_plugin(self: &Arc<Self>, config: PluginConfig) -> Result<(), McpError> {
        let name = config.name.clone();
        let client = Arc::new(PluginClient::new(config.clone()));

        {
            let mut plugins = self.plugins.write().await;
            plugins.insert(
                name.clone(),
                PluginHandle {
                    config: config.clone(),
                    client: client.clone(),
                    state: PluginState::Starting,
                },
            );
        }

        match self.discover(&name, &client, config.timeout).await {
            Ok(tools) => {
                self.registry.set_plugin_tools(&name, tools);
                self.set_state(&name, PluginState::Ready).await;
                Ok(())
            }
            Err(e) => {
                self.set_state(&name, PluginState::Failed).await;
                self.schedule_restart(name.clone());
                Err(e)
            }
        }
    }

    /// Replace a running plugin with a new configuration.
    ///
    /// The replacement connects and discovers before the registry slice is
    /// swapped; the old client keeps serving in-flight calls until the
    /// grace period elapses.
    async fn reload_plugin(self: &Arc<Self>, config: PluginConfig) -> Result<(), McpError> {
        let name = config.name.clone();
        self.set_state(&name, PluginState::Reloading).await;

        let new_client = Arc::new(PluginClient::new(config.clone()));
        let tools = match self.discover(&name, &new_client, config.timeout).await {
            Ok(tools) => tools,
            Err(e) => {
                self.set_state(&name, PluginState::Failed).await;
                self.schedule_restart(name.clone());
                return Err(e);
            }
        };

        let old_client = {
            let mut plugins = self.plugins.write().await;
            match plugins.get_mut(&name) {
                Some(handle) => {
                    let old = std::mem::replace(&mut handle.client, new_client);
                    handle.config = config;
                    handle.state = PluginState::Ready;
                    Some(old)
                }
                None => None,
            }
        };
        // Atomic swap: readers see the old slice or the new one, whole
        self.registry.set_plugin_tools(&name, tools);

        if let Some(old) = old_client {
            let grace = self.grace_period;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let _ = old.disconnect().await;
            });
        }
        Ok(())
    }

    /// Stop a plugin and drop its tools
    pub async fn stop_plugin(&self, name: &str) {
        self.registry.remove_plugin(name);
        let client = {
            let mut plugins = self.plugins.write().await;
            plugins.get_mut(name).map(|handle| {
                handle.state = PluginState::Stopped;
                handle.client.clone()
            })
        };
        if let Some(client) = client {
            let _ = client.disconnect().await;
        }
    }

    /// Call a plugin tool with the plugin's per-call timeout.
    ///
    /// A timeout or transport failure marks the plugin `Failed`, schedules
    /// a restart, and surfaces as `McpError::Unavailable`, which the tool
    /// adapter turns into a `PluginUnavailable` tool result.
    pub async fn call_tool(
        self: &Arc<Self>,
        plugin: &str,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let (client, timeout) = {
            let plugins = self.plugins.read().await;
            let handle = plugins
                .get(plugin)
                .ok_or_else(|| McpError::Unavailable(format!("unknown plugin '{plugin}'")))?;
            if handle.state != PluginState::Ready {
                return Err(McpError::Unavailable(format!(
                    "plugin '{plugin}' is {:?}",
                    handle.state
                )));
            }
            (handle.client.clone(), handle.config.timeout)
        };

        match tokio::time::timeout(timeout, client.call_tool(tool, args)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(plugin, tool, error = %e, "plugin call failed");
                self.mark_failed(plugin).await;
                Err(McpError::Unavailable(format!("plugin '{plugin}': {e}")))
            }
            Err(_) => {
                tracing::warn!(plugin, tool, ?timeout, "plugin call timed out");
                self.mark_failed(plugin).await;
                Err(McpError::Unavailable(format!(
                    "plugin '{plugin}' did not reply within {timeout:?}"
                )))
            }
        }
    }

    /// Current state of a plugin
    pub async fn state(&self, name: &str) -> Option<PluginState> {
        self.plugins.read().await.get(name).map(|h| h.state)
    }

    /// Disconnect every plugin
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        for name in names {
            self.stop_plugin(&name).await;
        }
    }

    async fn discover(
        self: &Arc<Self>,
        name: &str,
        client: &Arc<PluginClient>,
        timeout: Duration,
    ) -> Result<Vec<Arc<dyn DynTool>>, McpError> {
        let discovered = tokio::time::timeout(timeout, client.list_tools())
            .await
            .map_err(|_| {
                McpError::Unavailable(format!("plugin '{name}' discovery timed out"))
            })??;

        tracing::info!(plugin = name, tools = discovered.len(), "plugin tools discovered");
        Ok(discovered
            .into_iter()
            .map(|tool| {
                crate::tool::box_tool(PluginToolAdapter::new(Arc::downgrade(self), name, tool))
            })
            .collect())
    }

    async fn mark_failed(self: &Arc<Self>, name: &str) {
        self.set_state(name, PluginState::Failed).await;
        self.schedule_restart(name.to_string());
    }

    async fn set_state(&self, name: &str, state: PluginState) {
        if let Some(handle) = self.plugins.write().await.get_mut(name) {
            handle.state = state;
        }
    }

    /// Restart a failed plugin with the backend retry backoff
    fn schedule_restart(self: &Arc<Self>, name: String) {
        let manager = self.clone();
        tokio::spawn(async move {
            for attempt in 1..=manager.restart_backoff.max_attempts {
                tokio::time::sleep(backoff_delay(attempt, &manager.restart_backoff)).await;

                let config = {
                    let plugins = manager.plugins.read().await;
                    match plugins.get(&name) {
                        // Someone stopped or already recovered it meanwhile
                        Some(handle) if handle.state == PluginState::Failed => {
                            handle.config.clone()
                        }
                        _ => return,
                    }
                };

                tracing::info!(plugin = %name, attempt, "restarting failed plugin");
                if manager.start_plugin(config).await.is_ok() {
                    return;
                }
            }
            tracing::warn!(plugin = %name, "plugin restart attempts exhausted");
        });
    }
}

/// Registry name for a plugin tool: `mcp/<plugin>/<tool>`
pub(crate) fn namespaced(plugin: &str, tool: &str) -> String {
    format!("mcp/{plugin}/{tool}")
}
