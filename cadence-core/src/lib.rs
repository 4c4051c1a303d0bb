//! # Cadence
//!
//! A reusable orchestration engine for autonomous AI agents.
//!
//! Given a user goal and a text-completion backend, cadence repeatedly asks
//! the model what to do next, executes the tools it requests, feeds results
//! back, and terminates when the model is satisfied or an external limit is
//! reached. The engine keeps the dialogue correct, bounded, cancellable,
//! and composable; the backend and the concrete tools are injected.
//!
//! ## Quick start
//!
//! ```ignore
//! use cadence_core::{Agent, AgentEvent};
//! use futures::{pin_mut, StreamExt};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> cadence_core::Result<()> {
//!     let agent = Agent::builder()
//!         .backend(my_backend)
//!         .add_tool(ReadFileTool)
//!         .with_system_prompt("You are a careful engineer.")
//!         .build()?;
//!
//!     let events = agent.run("Find the flaky test", CancellationToken::new());
//!     pin_mut!(events);
//!     while let Some(event) = events.next().await {
//!         match event {
//!             AgentEvent::AssistantText { chunk } => print!("{chunk}"),
//!             AgentEvent::Finished { reason } => println!("\n[{reason}]"),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Components
//!
//! - [`agent`] - the generation↔tool loop, surfaced as an event stream
//! - [`context`] - history, compaction, goal reminders, cache breakpoints
//! - [`mode`] / [`permission`] - which tools the model sees and may run
//! - [`registry`] - the tool catalog, with atomic hot-reload snapshots
//! - [`subagent`] - bounded delegation to child agents
//! - [`plan`] - planner → executor → evaluator supervision with replans
//! - [`usage`] / [`webhook`] - token accounting, session caps, signed events
//! - [`mcp`] *(feature `mcp`)* - external plugin processes and their tools
//!
//! ## Feature flags
//!
//! - `mcp` - MCP plugin manager and client

pub mod agent;
pub mod backend;
pub mod context;
pub mod error;
pub mod events;
pub mod mode;
pub mod permission;
pub mod plan;
pub mod registry;
pub mod subagent;
pub mod tokenizer;
pub mod tool;
pub mod types;
pub mod usage;
pub mod webhook;

#[cfg(feature = "mcp")]
pub mod mcp;

pub mod test_utils;

pub use agent::{Agent, AgentBuilder, AgentOptions, RunOutcome};
pub use backend::{
    Backend, BackendError, ModelRequest, ModelResponse, RetryConfig, StreamEvent,
};
pub use context::{ContextConfig, ContextError, ContextManager};
pub use error::{Error, Result};
pub use events::{AgentEvent, ErrorKind, FinishReason, TokenUsage};
pub use mode::{InvalidModeTransition, Mode, ModeManager};
pub use permission::{
    ConfirmationRequest, Decision, GateDecision, HumanConfirmer, PermissionEvaluator,
    PermissionGate, PermissionRule,
};
pub use plan::{
    AgentPlanner, AgentStepExecutor, Evaluator, Orchestrator, Plan, PlanError, PlanEvent,
    PlanStep, Planner, StatusEvaluator, StepExecutor, StepResult, StepStatus, StepVerdict,
};
pub use registry::{ToolRegistry, ToolSnapshot};
pub use subagent::{
    AgentSpec, SubAgentError, SubAgentKind, SubAgentLimits, SubAgentScheduler, SubAgentTool,
};
pub use tokenizer::{CharacterTokenizer, TokenCounter};
pub use tool::{box_tool, DynTool, Tool, ToolError, ToolOutput};
pub use types::{
    ContentBlock, Message, Role, StopReason, ToolCategory, ToolDefinition, ToolResultBlock,
    ToolResultStatus, ToolUseBlock,
};
pub use usage::{
    LimitResult, LimitStatus, LimiterConfig, ModelRate, PricingTable, SessionUsage,
    UsageLimiter, UsageTracker,
};
pub use webhook::{WebhookEndpoint, WebhookEvent, WebhookEventType, WebhookSender};

#[cfg(feature = "mcp")]
pub use mcp::{PluginClient, PluginConfig, PluginManager, PluginState, PluginTransport};
