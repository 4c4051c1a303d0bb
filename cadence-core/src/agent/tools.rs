//! Tool dispatch for the agent loop

use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};

use super::Agent;
use crate::events::ErrorKind;
use crate::permission::GateDecision;
use crate::registry::ToolSnapshot;
use crate::tool::ToolError;
use crate::types::{ToolResultBlock, ToolUseBlock};

/// What happened to one tool call
pub(super) struct DispatchOutcome {
    pub name: String,
    pub block: ToolResultBlock,
    pub elapsed: Duration,
    /// Non-fatal error to surface as an `Error` event, if any
    pub error: Option<(ErrorKind, String)>,
}

impl Agent {
    /// Execute all tool calls of one turn.
    ///
    /// Calls run in parallel only when every call in the turn targets an
    /// idempotent tool; otherwise they run sequentially in call order.
    /// Either way, outcomes come back in model-issued order.
    pub(super) async fn dispatch_tool_calls(&self, calls: &[ToolUseBlock]) -> Vec<DispatchOutcome> {
        let snapshot = self.registry.snapshot();
        let parallel = calls.len() > 1
            && calls.iter().all(|c| {
                snapshot
                    .iter()
                    .find(|t| t.name() == c.name)
                    .map(|t| t.idempotent())
                    .unwrap_or(false)
            });

        if parallel {
            // `buffered` joins results in input order regardless of
            // completion order.
            let futures: Vec<_> = calls
                .iter()
                .map(|c| self.execute_tool_call(c, &snapshot))
                .collect();
            stream::iter(futures)
                .buffered(self.options.max_concurrent_tools)
                .collect()
                .await
        } else {
            let mut outcomes = Vec::with_capacity(calls.len());
            for call in calls {
                outcomes.push(self.execute_tool_call(call, &snapshot).await);
            }
            outcomes
        }
    }

    async fn execute_tool_call(
        &self,
        call: &ToolUseBlock,
        snapshot: &ToolSnapshot,
    ) -> DispatchOutcome {
        let started = Instant::now();

        if !call.input.is_object() {
            let message = format!("tool input must be a JSON object, got: {}", call.input);
            return DispatchOutcome {
                name: call.name.clone(),
                block: ToolResultBlock::error(&call.id, &message),
                elapsed: started.elapsed(),
                error: Some((ErrorKind::ToolFailure, message)),
            };
        }

        let Some(tool) = snapshot.iter().find(|t| t.name() == call.name) else {
            let message = format!("tool not found: {}", call.name);
            return DispatchOutcome {
                name: call.name.clone(),
                block: ToolResultBlock::error(&call.id, &message),
                elapsed: started.elapsed(),
                error: Some((ErrorKind::ToolFailure, message)),
            };
        };

        // The catalog shown to the model was mode-filtered, but the model
        // can still name a hidden tool.
        if !self.modes.current().allows(tool.category()) {
            let message = format!(
                "tool '{}' is not available in {} mode",
                call.name,
                self.modes.current()
            );
            return DispatchOutcome {
                name: call.name.clone(),
                block: ToolResultBlock::error(&call.id, &message),
                elapsed: started.elapsed(),
                error: Some((ErrorKind::ToolFailure, message)),
            };
        }

        match self
            .permissions
            .check(&call.name, tool.category(), &call.input)
            .await
        {
            GateDecision::Allowed => {}
            GateDecision::Denied { reason } => {
                return DispatchOutcome {
                    name: call.name.clone(),
                    block: ToolResultBlock::permission_denied(&call.id, &reason),
                    elapsed: started.elapsed(),
                    error: Some((ErrorKind::PermissionDenied, reason)),
                };
            }
        }

        // A timeout cancels this call only; the turn continues.
        let result = match tokio::time::timeout(
            self.options.tool_timeout,
            tool.execute_raw(call.input.clone()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(self.options.tool_timeout)),
        };

        let elapsed = started.elapsed();
        match result {
            Ok(output) => DispatchOutcome {
                name: call.name.clone(),
                block: ToolResultBlock::success(&call.id, output),
                elapsed,
                error: None,
            },
            Err(e) => {
                let kind = match &e {
                    ToolError::PluginUnavailable(_) => ErrorKind::PluginUnavailable,
                    _ => ErrorKind::ToolFailure,
                };
                let message = e.to_string();
                tracing::debug!(tool = %call.name, error = %message, "tool call failed");
                DispatchOutcome {
                    name: call.name.clone(),
                    block: ToolResultBlock::error(&call.id, format!("Error: {message}")),
                    elapsed,
                    error: Some((kind, message)),
                }
            }
        }
    }
}
