//! The agent loop
//!
//! [`Agent`] is the master generation↔tool state machine. One `run` drives
//! the backend and the tools until the model stops asking for work, a
//! budget or usage limit is hit, or the caller cancels; progress surfaces
//! as a stream of [`crate::events::AgentEvent`].

mod builder;
mod run;
mod tools;

pub use builder::{AgentBuilder, AgentOptions};
pub use run::RunOutcome;

use std::sync::Arc;

use crate::backend::{Backend, RetryConfig};
use crate::context::ContextConfig;
use crate::mode::ModeManager;
use crate::permission::PermissionGate;
use crate::registry::ToolRegistry;
use crate::tokenizer::TokenCounter;
use crate::usage::{UsageLimiter, UsageTracker};

/// Orchestrates one model/tool dialogue at a time
///
/// Construct with the builder:
///
/// ```rust
/// use cadence_core::{Agent, test_utils::MockBackend};
///
/// let agent = Agent::builder()
///     .backend(MockBackend::new().with_text("hi"))
///     .with_system_prompt("You are a helpful assistant")
///     .build()
///     .unwrap();
/// ```
pub struct Agent {
    pub(super) backend: Arc<dyn Backend>,
    pub(super) registry: Arc<ToolRegistry>,
    pub(super) modes: Arc<ModeManager>,
    pub(super) permissions: Arc<PermissionGate>,
    pub(super) limiter: Arc<UsageLimiter>,
    pub(super) counter: Arc<dyn TokenCounter>,
    pub(super) context_config: ContextConfig,
    pub(super) retry: RetryConfig,
    pub(super) options: AgentOptions,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent").finish_non_exhaustive()
    }
}

impl Agent {
    /// Start building an agent
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// The model id of the configured backend
    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    /// The tool registry this agent reads its catalog from
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The mode manager gating the tool catalog
    pub fn modes(&self) -> &Arc<ModeManager> {
        &self.modes
    }

    /// The usage limiter (and, through it, the tracker) for this session
    pub fn limiter(&self) -> &Arc<UsageLimiter> {
        &self.limiter
    }

    /// The session usage tracker
    pub fn tracker(&self) -> &Arc<UsageTracker> {
        self.limiter.tracker()
    }
}
