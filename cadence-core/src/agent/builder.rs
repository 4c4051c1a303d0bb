//! Builder for [`Agent`]
//!
//! All collaborators are constructor-injected; the core never looks up a
//! dependency at runtime. Only the backend is mandatory; everything else
//! has a working default.

use std::sync::Arc;
use std::time::Duration;

use super::Agent;
use crate::backend::{Backend, RetryConfig};
use crate::context::ContextConfig;
use crate::error::Error;
use crate::mode::{Mode, ModeManager};
use crate::permission::PermissionGate;
use crate::registry::ToolRegistry;
use crate::tokenizer::{CharacterTokenizer, TokenCounter};
use crate::tool::Tool;
use crate::usage::{LimiterConfig, PricingTable, UsageLimiter, UsageTracker};

/// Default cap on tool-dispatch turns per run
pub const DEFAULT_MAX_TOOL_TURNS: u32 = 25;

/// Default per-tool-call timeout
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default concurrency for parallel tool execution
pub const DEFAULT_MAX_CONCURRENT_TOOLS: usize = 12;

/// Per-run knobs
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Maximum tool-dispatch turns before the run stops with
    /// `FinishReason::BudgetExceeded` (default 25)
    pub max_tool_turns: u32,
    /// Sampling temperature forwarded to the backend
    pub temperature: Option<f32>,
    /// Output token cap forwarded to the backend
    pub max_output_tokens: Option<u32>,
    /// Per-tool-call timeout; a timed-out call fails alone (default 60 s)
    pub tool_timeout: Duration,
    /// Concurrency cap for parallel tool execution (default 12)
    pub max_concurrent_tools: usize,
    /// System prompt forwarded with every request
    pub system_prompt: Option<String>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_tool_turns: DEFAULT_MAX_TOOL_TURNS,
            temperature: None,
            max_output_tokens: None,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            max_concurrent_tools: DEFAULT_MAX_CONCURRENT_TOOLS,
            system_prompt: None,
        }
    }
}

/// Builder for [`Agent`]
pub struct AgentBuilder {
    backend: Option<Arc<dyn Backend>>,
    registry: Option<Arc<ToolRegistry>>,
    modes: Option<Arc<ModeManager>>,
    permissions: Option<Arc<PermissionGate>>,
    limiter: Option<Arc<UsageLimiter>>,
    counter: Option<Arc<dyn TokenCounter>>,
    context_config: ContextConfig,
    retry: RetryConfig,
    options: AgentOptions,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            registry: None,
            modes: None,
            permissions: None,
            limiter: None,
            counter: None,
            context_config: ContextConfig::default(),
            retry: RetryConfig::default(),
            options: AgentOptions::default(),
        }
    }

    /// Set the text-completion backend (required)
    pub fn backend(mut self, backend: impl Backend + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Set an already shared backend
    pub fn backend_arc(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use a shared tool registry (default: a fresh empty one)
    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register a tool on the agent's registry
    pub fn add_tool<T: Tool + 'static>(self, tool: T) -> Self {
        let registry = self
            .registry
            .clone()
            .unwrap_or_else(|| Arc::new(ToolRegistry::new()));
        registry.register(tool);
        Self {
            registry: Some(registry),
            ..self
        }
    }

    /// Use a shared mode manager (default: starts in `Working`)
    pub fn modes(mut self, modes: Arc<ModeManager>) -> Self {
        self.modes = Some(modes);
        self
    }

    /// Use a permission gate (default: category defaults, no confirmer)
    pub fn permissions(mut self, gate: PermissionGate) -> Self {
        self.permissions = Some(Arc::new(gate));
        self
    }

    /// Use a shared permission gate
    pub fn permissions_arc(mut self, gate: Arc<PermissionGate>) -> Self {
        self.permissions = Some(gate);
        self
    }

    /// Use a usage limiter (default: no caps, default pricing)
    pub fn limiter(mut self, limiter: Arc<UsageLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Use a custom token counter (default: [`CharacterTokenizer`])
    pub fn token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Tune context management (compaction thresholds, reminders)
    pub fn context_config(mut self, config: ContextConfig) -> Self {
        self.context_config = config;
        self
    }

    /// Tune backend retry behavior
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Set all per-run options at once
    pub fn options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    /// Cap the number of tool-dispatch turns
    pub fn with_max_tool_turns(mut self, turns: u32) -> Self {
        self.options.max_tool_turns = turns;
        self
    }

    /// Set the system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.options.system_prompt = Some(prompt.into());
        self
    }

    /// Set the per-tool-call timeout
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.options.tool_timeout = timeout;
        self
    }

    /// Finish building. Fails when no backend was configured.
    pub fn build(self) -> Result<Agent, Error> {
        let backend = self
            .backend
            .ok_or_else(|| Error::Config("a backend is required".to_string()))?;

        let limiter = self.limiter.unwrap_or_else(|| {
            let tracker = Arc::new(UsageTracker::new(
                backend.model_id().to_string(),
                PricingTable::default(),
            ));
            Arc::new(UsageLimiter::new(LimiterConfig::default(), tracker))
        });

        Ok(Agent {
            backend,
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(ToolRegistry::new())),
            modes: self
                .modes
                .unwrap_or_else(|| Arc::new(ModeManager::starting_in(Mode::Working))),
            permissions: self
                .permissions
                .unwrap_or_else(|| Arc::new(PermissionGate::defaults_only())),
            limiter,
            counter: self.counter.unwrap_or_else(|| Arc::new(CharacterTokenizer)),
            context_config: self.context_config,
            retry: self.retry,
            options: self.options,
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
