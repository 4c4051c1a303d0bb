//! Sub-agent scheduling
//!
//! The top-level agent can delegate work to child agents through the
//! [`SubAgentScheduler`]. Children run their own loops against the same
//! backend with a restricted tool catalog, a reduced turn budget, and the
//! parent's usage tracker, so their tokens and cost count against the
//! parent's session caps. Depth and concurrency are hard-capped; hitting a
//! cap fails the spawn, which the wrapping tool surfaces as a tool error
//! for the model to react to.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, AgentOptions};
use crate::backend::Backend;
use crate::events::FinishReason;
use crate::permission::PermissionGate;
use crate::registry::ToolRegistry;
use crate::tool::{Tool, ToolError, ToolOutput};
use crate::types::ToolCategory;
use crate::usage::UsageLimiter;

/// Default nesting cap
pub const DEFAULT_MAX_DEPTH: usize = 3;
/// Default cap on concurrently running children
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
/// Turns held back from the child's budget
pub const DEFAULT_TURN_RESERVE: u32 = 5;

/// Name under which the spawn tool registers itself
pub const SPAWN_TOOL_NAME: &str = "spawn_agent";

/// What kind of child to spawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SubAgentKind {
    /// Read-only investigation: Read-category tools only, no further spawns
    Explore,
    /// Full catalog minus anything outside the capability allowlist
    General,
}

/// Declaration of a sub-agent kind, loaded from a JSON file
///
/// ```json
/// {
///   "name": "researcher",
///   "description": "Deep codebase research",
///   "version": "1.0.0",
///   "systemPrompt": "You research code...",
///   "model": { "deployment": "haiku-4-5", "temperature": 0.2 },
///   "capabilities": ["read_file", "grep"]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub version: Option<String>,
    pub system_prompt: String,
    pub model: ModelSpec,
    /// Tool-name allowlist restricting what the child may see
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Model selection inside an [`AgentSpec`]
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    pub deployment: String,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl AgentSpec {
    /// Load a declaration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SubAgentError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SubAgentError::Spec(format!("cannot read spec file: {e}")))?;
        serde_json::from_str(&content)
            .map_err(|e| SubAgentError::Spec(format!("malformed spec file: {e}")))
    }
}

/// Errors from the scheduler
#[derive(Debug, thiserror::Error)]
pub enum SubAgentError {
    #[error("sub-agent depth limit ({0}) reached")]
    DepthExceeded(usize),

    #[error("sub-agent concurrency limit ({0}) reached")]
    ConcurrencyExceeded(usize),

    #[error("invalid agent spec: {0}")]
    Spec(String),

    #[error("failed to build child agent: {0}")]
    Build(String),
}

/// Scheduler caps
#[derive(Debug, Clone)]
pub struct SubAgentLimits {
    pub max_depth: usize,
    pub max_concurrent: usize,
    pub turn_reserve: u32,
}

impl Default for SubAgentLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            turn_reserve: DEFAULT_TURN_RESERVE,
        }
    }
}

/// Spawns bounded child agent loops
pub struct SubAgentScheduler {
    backend: Arc<dyn Backend>,
    registry: Arc<ToolRegistry>,
    permissions: Arc<PermissionGate>,
    limiter: Arc<UsageLimiter>,
    limits: SubAgentLimits,
    slots: Arc<Semaphore>,
    /// Parent capability allowlist for `General` children; empty = no restriction
    capabilities: Vec<String>,
    child_options: AgentOptions,
}

impl SubAgentScheduler {
    pub fn new(
        backend: Arc<dyn Backend>,
        registry: Arc<ToolRegistry>,
        permissions: Arc<PermissionGate>,
        limiter: Arc<UsageLimiter>,
    ) -> Self {
        let limits = SubAgentLimits::default();
        let slots = Arc::new(Semaphore::new(limits.max_concurrent));
        Self {
            backend,
            registry,
            permissions,
            limiter,
            limits,
            slots,
            capabilities: Vec::new(),
            child_options: AgentOptions::default(),
        }
    }

    pub fn with_limits(mut self, limits: SubAgentLimits) -> Self {
        self.slots = Arc::new(Semaphore::new(limits.max_concurrent));
        self.limits = limits;
        self
    }

    /// Restrict `General` children to these tool names
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Base options for children (system prompt, timeouts)
    pub fn with_child_options(mut self, options: AgentOptions) -> Self {
        self.child_options = options;
        self
    }

    /// Spawn a child, run it to completion, and return its final text.
    ///
    /// `parent_depth` is how deeply nested the caller already is;
    /// `parent_remaining_turns` is the caller's unused turn budget, of
    /// which the child receives everything but a reserve.
    pub async fn spawn(
        &self,
        kind: SubAgentKind,
        goal: &str,
        parent_depth: usize,
        parent_remaining_turns: u32,
        cancel: CancellationToken,
    ) -> Result<String, SubAgentError> {
        if parent_depth >= self.limits.max_depth {
            return Err(SubAgentError::DepthExceeded(self.limits.max_depth));
        }
        let _permit = self
            .slots
            .try_acquire()
            .map_err(|_| SubAgentError::ConcurrencyExceeded(self.limits.max_concurrent))?;

        let budget = parent_remaining_turns
            .saturating_sub(self.limits.turn_reserve)
            .max(1);

        let mut options = self.child_options.clone();
        options.max_tool_turns = budget;

        let agent = Agent::builder()
            .backend_arc(self.backend.clone())
            .registry(self.restricted_registry(kind))
            .permissions_arc(self.permissions.clone())
            .limiter(self.limiter.clone())
            .options(options)
            .build()
            .map_err(|e| SubAgentError::Build(e.to_string()))?;

        tracing::debug!(?kind, depth = parent_depth + 1, budget, "spawning sub-agent");
        let outcome = agent.run_to_completion(goal, cancel).await;

        if outcome.reason != FinishReason::Completed {
            tracing::debug!(reason = %outcome.reason, "sub-agent stopped early");
        }
        if outcome.text.is_empty() {
            Ok(format!("(sub-agent produced no text output; {})", outcome.reason))
        } else {
            Ok(outcome.text)
        }
    }

    /// Number of children that could start right now
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    fn restricted_registry(&self, kind: SubAgentKind) -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new();
        for tool in self.registry.snapshot().iter() {
            let keep = match kind {
                SubAgentKind::Explore => {
                    tool.category() == ToolCategory::Read && tool.name() != SPAWN_TOOL_NAME
                }
                SubAgentKind::General => {
                    self.capabilities.is_empty()
                        || self.capabilities.iter().any(|c| c == tool.name())
                }
            };
            if keep {
                registry.register_dyn(tool.clone());
            }
        }
        Arc::new(registry)
    }
}

/// Input for the spawn tool
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SpawnInput {
    /// What kind of sub-agent to run
    pub kind: SubAgentKind,
    /// The task the child should complete
    pub goal: String,
}

/// Exposes the scheduler to the model as a tool.
///
/// Each invocation spawns one child; limit violations come back as tool
/// errors so the model can adjust instead of the run dying.
pub struct SubAgentTool {
    scheduler: Arc<SubAgentScheduler>,
    depth: Arc<AtomicUsize>,
    /// Turn budget handed down to children (the parent's configured budget)
    parent_turn_budget: u32,
    cancel: CancellationToken,
}

impl SubAgentTool {
    pub fn new(
        scheduler: Arc<SubAgentScheduler>,
        depth: Arc<AtomicUsize>,
        parent_turn_budget: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            depth,
            parent_turn_budget,
            cancel,
        }
    }
}

impl Tool for SubAgentTool {
    type Input = SpawnInput;

    fn name(&self) -> &str {
        SPAWN_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Spawn a sub-agent to complete a focused task and return its final text. \
         Use kind 'explore' for read-only investigation and 'general' for tasks \
         that may modify state. Nesting depth and concurrency are limited."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    async fn execute(&self, input: Self::Input) -> Result<ToolOutput, ToolError> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst);
        let result = self
            .scheduler
            .spawn(
                input.kind,
                &input.goal,
                depth,
                self.parent_turn_budget,
                self.cancel.clone(),
            )
            .await;
        self.depth.fetch_sub(1, Ordering::SeqCst);

        result
            .map(ToolOutput::text)
            .map_err(|e| ToolError::Custom(e.to_string()))
    }
}
