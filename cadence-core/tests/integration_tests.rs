//! End-to-end flows across the engine: plan orchestration over agent-backed
//! executors, and sub-agent delegation from inside a run.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use cadence_core::test_utils::{collect_events, finish_reason, MockBackend};
use cadence_core::{
    Agent, AgentEvent, AgentPlanner, AgentStepExecutor, Backend, FinishReason, LimiterConfig,
    Orchestrator, PermissionGate, PlanEvent, PricingTable, StatusEvaluator, SubAgentScheduler,
    SubAgentTool, Tool, ToolCategory, ToolError, ToolOutput, ToolRegistry, UsageLimiter,
    UsageTracker,
};
use schemars::JsonSchema;
use serde::Deserialize;

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

fn shared_limiter(model: &str) -> Arc<UsageLimiter> {
    let tracker = Arc::new(UsageTracker::new(model, PricingTable::default()));
    Arc::new(UsageLimiter::new(LimiterConfig::default(), tracker))
}

#[tokio::test]
async fn plan_flow_runs_each_step_through_an_agent() {
    // One scripted backend serves the planner and both step agents, in
    // order: plan JSON, step 1 answer, step 2 answer.
    let backend = MockBackend::new()
        .with_text(
            r#"{"steps": [
                {"description": "inventory", "instruction": "List the project files"},
                {"description": "report", "instruction": "Write a summary", "dependsOn": [0]}
            ]}"#,
        )
        .with_text("12 files found")
        .with_text("summary written");
    let backend: Arc<dyn Backend> = Arc::new(backend);

    let limiter = shared_limiter("mock-backend");
    let planner = Arc::new(AgentPlanner::new(backend.clone()));
    let executor = Arc::new(AgentStepExecutor::new(
        backend.clone(),
        Arc::new(ToolRegistry::new()),
        Arc::new(PermissionGate::defaults_only()),
        limiter,
    ));

    let orchestrator = Orchestrator::new(planner, executor, Arc::new(StatusEvaluator));
    let events: Vec<PlanEvent> = orchestrator
        .execute("summarize the project", "", CancellationToken::new())
        .collect()
        .await;

    let step_outputs: Vec<(usize, String)> = events
        .iter()
        .filter_map(|e| match e {
            PlanEvent::StepCompleted { index, output, success } => {
                assert!(*success, "step {index} should succeed");
                Some((*index, output.clone()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        step_outputs,
        vec![
            (0, "12 files found".to_string()),
            (1, "summary written".to_string())
        ]
    );
    assert!(matches!(
        events.last().unwrap(),
        PlanEvent::PlanCompleted { summary } if summary == "2/2"
    ));
}

#[tokio::test]
async fn agent_delegates_to_sub_agent_and_aggregates_usage() {
    // Script: parent asks to spawn a child; the child answers; the parent
    // wraps up with the child's findings.
    let backend = MockBackend::new()
        .with_tool_use(
            "spawn_agent",
            serde_json::json!({"kind": "general", "goal": "inspect the config"}),
        )
        .with_usage(100, 20)
        .with_text("config looks fine")
        .with_usage(50, 10)
        .with_text("done: the child found the config to be fine")
        .with_usage(30, 5);
    let backend: Arc<dyn Backend> = Arc::new(backend);

    let registry = Arc::new(ToolRegistry::new());
    registry.register(EchoTool);

    let permissions = Arc::new(PermissionGate::defaults_only());
    let limiter = shared_limiter("mock-backend");

    let scheduler = Arc::new(SubAgentScheduler::new(
        backend.clone(),
        registry.clone(),
        permissions.clone(),
        limiter.clone(),
    ));
    registry.register(SubAgentTool::new(
        scheduler,
        Arc::new(AtomicUsize::new(0)),
        25,
        CancellationToken::new(),
    ));

    let agent = Agent::builder()
        .backend_arc(backend)
        .registry(registry)
        .permissions_arc(permissions)
        .limiter(limiter.clone())
        .build()
        .unwrap();

    let events = collect_events(agent.run("check the config", CancellationToken::new())).await;

    // The spawn tool returned the child's final text to the parent
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::ToolCallCompleted { name, success: true, result, .. }
            if name == "spawn_agent" && result.as_text() == "config looks fine"
    )));
    assert_eq!(finish_reason(&events), FinishReason::Completed);

    // Parent and child usage aggregate into the shared tracker
    let snapshot = limiter.tracker().snapshot();
    assert_eq!(snapshot.input_tokens, 180);
    assert_eq!(snapshot.output_tokens, 35);
    assert_eq!(snapshot.request_count, 3);
}

#[tokio::test]
async fn explore_sub_agent_cannot_recurse() {
    // An explore child gets a catalog without the spawn tool; if the model
    // tries anyway, the call fails as a tool error and the child recovers.
    let backend = MockBackend::new()
        .with_tool_use("spawn_agent", serde_json::json!({"kind": "explore", "goal": "go deeper"}))
        .with_text("stopping here");
    let backend: Arc<dyn Backend> = Arc::new(backend);

    let registry = Arc::new(ToolRegistry::new());
    let permissions = Arc::new(PermissionGate::defaults_only());
    let limiter = shared_limiter("mock-backend");

    let scheduler = Arc::new(SubAgentScheduler::new(
        backend.clone(),
        registry.clone(),
        permissions,
        limiter,
    ));
    registry.register(SubAgentTool::new(
        scheduler.clone(),
        Arc::new(AtomicUsize::new(0)),
        25,
        CancellationToken::new(),
    ));

    let text = scheduler
        .spawn(
            cadence_core::SubAgentKind::Explore,
            "investigate",
            0,
            25,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(text, "stopping here");
}
