//! The agentic loop - core execution logic for Agent

use async_stream::stream;
use futures::{pin_mut, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::Agent;
use crate::backend::{retry_with_backoff, ModelRequest};
use crate::context::{ContextError, ContextManager};
use crate::events::{AgentEvent, ErrorKind, FinishReason};
use crate::types::{Message, ToolUseBlock};

/// Result of driving a run to its end
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The final assistant text (of the last turn)
    pub text: String,
    /// Why the run ended
    pub reason: FinishReason,
}

impl Agent {
    /// Run the agent on a user goal.
    ///
    /// Returns a stream of [`AgentEvent`]; the consumer drives progress by
    /// polling it. The stream always terminates with
    /// [`AgentEvent::Finished`]. The loop alternates generation and tool
    /// execution until the model returns a response with no tool calls, the
    /// turn budget is exhausted, the usage limiter says stop, or `cancel`
    /// fires.
    ///
    /// Tool-originating failures never end the run: permission denials and
    /// tool errors become tool results the model can react to. Only backend
    /// failures (after retries), oversized context, budget, usage and
    /// cancellation are terminal.
    pub fn run(
        &self,
        prompt: impl Into<String>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = AgentEvent> + Send + '_ {
        let prompt = prompt.into();
        stream! {
            let mut history = ContextManager::new(
                prompt.clone(),
                self.counter.clone(),
                self.context_config.clone(),
            );
            history.append(Message::user(prompt));

            let mut tool_turns: u32 = 0;

            loop {
                if cancel.is_cancelled() {
                    yield AgentEvent::Finished { reason: FinishReason::Cancelled };
                    return;
                }

                // Context preparation (may compact through the backend)
                let messages = match history.prepare(self.backend.as_ref()).await {
                    Ok(messages) => messages,
                    Err(ContextError::ContextTooLarge) => {
                        yield AgentEvent::Error {
                            kind: ErrorKind::ContextTooLarge,
                            message: "protected tail exceeds the context window".to_string(),
                        };
                        yield AgentEvent::Finished { reason: FinishReason::ContextTooLarge };
                        return;
                    }
                    Err(ContextError::Summarization(e)) => {
                        yield AgentEvent::Error {
                            kind: ErrorKind::BackendError,
                            message: format!("compaction failed: {e}"),
                        };
                        yield AgentEvent::Finished { reason: FinishReason::BackendError };
                        return;
                    }
                };

                let catalog = self.modes.filter_tools(&self.registry.definitions());
                let request = ModelRequest {
                    messages,
                    tools: catalog,
                    system: self.options.system_prompt.clone(),
                    temperature: self.options.temperature,
                    max_output_tokens: self.options.max_output_tokens,
                };

                let response = match retry_with_backoff(
                    || self.backend.generate(request.clone()),
                    &self.retry,
                )
                .await
                {
                    Ok(response) => response,
                    Err(e) => {
                        let kind = if e.is_transient() {
                            ErrorKind::Transient
                        } else {
                            ErrorKind::BackendError
                        };
                        yield AgentEvent::Error { kind, message: e.to_string() };
                        yield AgentEvent::Finished { reason: FinishReason::BackendError };
                        return;
                    }
                };

                if let Some(usage) = response.usage {
                    self.limiter.record(usage);
                    yield AgentEvent::TokenUsage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                    };
                }

                let text = response.message.text();
                if !text.is_empty() {
                    yield AgentEvent::AssistantText { chunk: text };
                }

                // Thinking content is kept in history only when the backend
                // requires it back on later turns.
                let stored = if self.backend.resend_thinking() {
                    response.message.clone()
                } else {
                    response.message.without_thinking()
                };
                history.append(stored);

                let calls: Vec<ToolUseBlock> = response
                    .message
                    .tool_calls()
                    .into_iter()
                    .cloned()
                    .collect();

                // Termination checks, in contract order: final answer, turn
                // budget, usage limit, cancellation.
                if calls.is_empty() {
                    yield AgentEvent::Finished { reason: FinishReason::Completed };
                    return;
                }
                if tool_turns >= self.options.max_tool_turns {
                    tracing::info!(
                        turns = tool_turns,
                        "tool-turn budget exhausted"
                    );
                    yield AgentEvent::Finished { reason: FinishReason::BudgetExceeded };
                    return;
                }
                if self.limiter.should_stop() {
                    yield AgentEvent::Finished { reason: FinishReason::UsageLimit };
                    return;
                }
                if cancel.is_cancelled() {
                    yield AgentEvent::Finished { reason: FinishReason::Cancelled };
                    return;
                }
                tool_turns += 1;

                for call in &calls {
                    yield AgentEvent::ToolCallRequested {
                        tool_use_id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.input.clone(),
                    };
                }

                // Cancellation lets an in-flight call finish; it is observed
                // again at the top of the loop.
                let outcomes = self.dispatch_tool_calls(&calls).await;

                let mut results = Vec::with_capacity(outcomes.len());
                for outcome in outcomes {
                    if let Some((kind, message)) = outcome.error {
                        yield AgentEvent::Error { kind, message };
                    }
                    yield AgentEvent::ToolCallCompleted {
                        tool_use_id: outcome.block.tool_use_id.clone(),
                        name: outcome.name,
                        result: outcome.block.content.clone(),
                        success: outcome.block.status == crate::types::ToolResultStatus::Success,
                        elapsed: outcome.elapsed,
                    };
                    results.push(outcome.block);
                }
                history.append(Message::tool_results(results));
            }
        }
    }

    /// Drive a run to its end, collecting the final assistant text.
    ///
    /// Used by the sub-agent scheduler and the plan executor, where only
    /// the outcome matters.
    pub async fn run_to_completion(
        &self,
        prompt: impl Into<String>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let stream = self.run(prompt, cancel);
        pin_mut!(stream);

        let mut text = String::new();
        let mut reset_on_next_text = false;

        while let Some(event) = stream.next().await {
            match event {
                AgentEvent::AssistantText { chunk } => {
                    if reset_on_next_text {
                        text.clear();
                        reset_on_next_text = false;
                    }
                    text.push_str(&chunk);
                }
                AgentEvent::ToolCallRequested { .. } => {
                    // The final answer is the text after the last tool turn
                    reset_on_next_text = true;
                }
                AgentEvent::Finished { reason } => {
                    return RunOutcome { text, reason };
                }
                _ => {}
            }
        }
        RunOutcome {
            text,
            reason: FinishReason::Completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{collect_events, finish_reason, MockBackend};
    use crate::tool::{Tool, ToolError, ToolOutput};
    use crate::types::{ContentBlock, ToolCategory};
    use crate::usage::{LimiterConfig, PricingTable, UsageLimiter, UsageTracker};
    use schemars::JsonSchema;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct EchoInput {
        message: String,
    }

    struct EchoTool;

    impl Tool for EchoTool {
        type Input = EchoInput;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the input back"
        }

        fn category(&self) -> ToolCategory {
            ToolCategory::Read
        }

        fn idempotent(&self) -> bool {
            true
        }

        async fn execute(&self, input: Self::Input) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(input.message))
        }
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct EmptyInput {}

    struct DangerousTool;

    impl Tool for DangerousTool {
        type Input = EmptyInput;

        fn name(&self) -> &str {
            "dangerous_tool"
        }

        fn description(&self) -> &str {
            "Needs permission"
        }

        fn category(&self) -> ToolCategory {
            ToolCategory::Bash
        }

        async fn execute(&self, _input: Self::Input) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text("ran anyway"))
        }
    }

    #[tokio::test]
    async fn test_simple_completion() {
        let agent = Agent::builder()
            .backend(MockBackend::new().with_text("hello there"))
            .build()
            .unwrap();

        let events = collect_events(agent.run("hi", CancellationToken::new())).await;
        assert!(matches!(
            &events[0],
            AgentEvent::AssistantText { chunk } if chunk == "hello there"
        ));
        assert_eq!(finish_reason(&events), FinishReason::Completed);
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let backend = MockBackend::new()
            .with_tool_use("echo", serde_json::json!({"message": "ping"}))
            .with_text("pong");
        let agent = Agent::builder()
            .backend(backend.clone())
            .add_tool(EchoTool)
            .build()
            .unwrap();

        let events = collect_events(agent.run("say ping", CancellationToken::new())).await;

        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::ToolCallRequested { name, .. } if name == "echo")));
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolCallCompleted { name, success: true, result, .. }
                if name == "echo" && result.as_text() == "ping"
        )));
        assert_eq!(finish_reason(&events), FinishReason::Completed);

        // The second request carries the tool result back to the model
        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        let has_result = requests[1].messages.iter().any(|m| {
            m.content.iter().any(|c| {
                matches!(c, ContentBlock::ToolResult(r) if r.content.as_text() == "ping")
            })
        });
        assert!(has_result);
    }

    #[tokio::test]
    async fn test_turn_budget_bounds_backend_calls() {
        // A backend that always asks for a tool: the run must terminate in
        // at most max_tool_turns + 1 generations.
        let backend = MockBackend::new()
            .with_tool_use("echo", serde_json::json!({"message": "again"}))
            .repeating_last();
        let agent = Agent::builder()
            .backend(backend.clone())
            .add_tool(EchoTool)
            .with_max_tool_turns(3)
            .build()
            .unwrap();

        let events = collect_events(agent.run("loop forever", CancellationToken::new())).await;
        assert_eq!(finish_reason(&events), FinishReason::BudgetExceeded);
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test]
    async fn test_permission_denial_continues_loop() {
        let backend = MockBackend::new()
            .with_tool_use("dangerous_tool", serde_json::json!({}))
            .with_text("understood, moving on");
        let agent = Agent::builder()
            .backend(backend.clone())
            .add_tool(DangerousTool)
            .build()
            .unwrap();

        let events = collect_events(agent.run("try it", CancellationToken::new())).await;

        // The denial surfaced as an event and as a failed tool result
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::Error { kind: ErrorKind::PermissionDenied, .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolCallCompleted { success: false, .. }
        )));
        // The next assistant response is surfaced unchanged
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::AssistantText { chunk } if chunk == "understood, moving on"
        )));
        assert_eq!(finish_reason(&events), FinishReason::Completed);

        // The model saw a permission-error result, and the tool never ran
        let requests = backend.requests();
        let denial = requests[1]
            .messages
            .iter()
            .flat_map(|m| m.content.iter())
            .find_map(|c| match c {
                ContentBlock::ToolResult(r) => Some(r),
                _ => None,
            })
            .expect("tool result present");
        assert!(denial.is_permission_error);
        assert!(!denial.content.as_text().contains("ran anyway"));
    }

    #[tokio::test]
    async fn test_cancellation_before_start() {
        let backend = MockBackend::new().with_text("never");
        let agent = Agent::builder().backend(backend.clone()).build().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let events = collect_events(agent.run("hi", cancel)).await;

        assert_eq!(finish_reason(&events), FinishReason::Cancelled);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_usage_limit_stops_run() {
        let tracker = Arc::new(UsageTracker::new("mock-backend", PricingTable::default()));
        let limiter = Arc::new(UsageLimiter::new(
            LimiterConfig {
                max_session_tokens: Some(1_000),
                ..Default::default()
            },
            tracker,
        ));

        let backend = MockBackend::new()
            .with_tool_use("echo", serde_json::json!({"message": "x"}))
            .with_usage(2_000, 100)
            .repeating_last();
        let agent = Agent::builder()
            .backend(backend.clone())
            .add_tool(EchoTool)
            .limiter(limiter)
            .build()
            .unwrap();

        let events = collect_events(agent.run("go", CancellationToken::new())).await;
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::TokenUsage { input_tokens: 2_000, .. }
        )));
        assert_eq!(finish_reason(&events), FinishReason::UsageLimit);
        // The limit tripped on the first response; no tool turn ran
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_backend_error_is_terminal() {
        // Empty script: the backend errors immediately with a
        // non-transient failure.
        let agent = Agent::builder().backend(MockBackend::new()).build().unwrap();

        let events = collect_events(agent.run("hi", CancellationToken::new())).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::Error { kind: ErrorKind::BackendError, .. })));
        assert_eq!(finish_reason(&events), FinishReason::BackendError);
    }

    #[tokio::test]
    async fn test_run_to_completion_returns_last_turn_text() {
        let backend = MockBackend::new()
            .with_response(crate::backend::ModelResponse {
                message: Message::assistant_with_content(vec![
                    ContentBlock::Text("let me check".to_string()),
                    ContentBlock::ToolUse(crate::types::ToolUseBlock {
                        id: "1".to_string(),
                        name: "echo".to_string(),
                        input: serde_json::json!({"message": "data"}),
                    }),
                ]),
                stop_reason: crate::types::StopReason::ToolUse,
                usage: None,
            })
            .with_text("final answer");
        let agent = Agent::builder()
            .backend(backend)
            .add_tool(EchoTool)
            .build()
            .unwrap();

        let outcome = agent
            .run_to_completion("question", CancellationToken::new())
            .await;
        assert_eq!(outcome.text, "final answer");
        assert_eq!(outcome.reason, FinishReason::Completed);
    }

    #[tokio::test]
    async fn test_usage_recorded_into_tracker() {
        let backend = MockBackend::new().with_text("ok").with_usage(120, 30);
        let agent = Agent::builder().backend(backend).build().unwrap();

        let _ = collect_events(agent.run("hi", CancellationToken::new())).await;
        let snap = agent.tracker().snapshot();
        assert_eq!(snap.input_tokens, 120);
        assert_eq!(snap.output_tokens, 30);
        assert_eq!(snap.request_count, 1);
    }
}
