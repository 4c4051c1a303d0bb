//! Backend- and agent-backed implementations of the planning traits
//!
//! [`AgentPlanner`] asks the backend for a JSON plan; [`AgentStepExecutor`]
//! runs each step through a fresh agent loop so steps stay clean,
//! single-purpose runs; [`StatusEvaluator`] is the minimal verdict policy.
//! All three are interchangeable with hand-written implementations.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{
    Evaluator, Plan, PlanError, PlanStep, Planner, StepExecutor, StepResult, StepVerdict,
};
use crate::agent::{Agent, AgentOptions};
use crate::backend::{Backend, ModelRequest};
use crate::events::FinishReason;
use crate::permission::PermissionGate;
use crate::registry::ToolRegistry;
use crate::types::Message;
use crate::usage::UsageLimiter;

const PLANNER_PROMPT: &str = "You are a task planner. Decompose the user's goal into a short \
     sequence of steps. Respond with JSON only, no prose, in this shape:\n\
     {\"steps\": [{\"description\": \"...\", \"instruction\": \"...\", \"dependsOn\": [0]}]}\n\
     Each instruction must be complete and self-contained. Use dependsOn to reference earlier \
     steps (0-based) whose results a step needs. Keep the plan as short as possible.";

/// Asks the backend for a plan and parses the JSON answer
pub struct AgentPlanner {
    backend: Arc<dyn Backend>,
    max_steps: usize,
}

impl AgentPlanner {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            max_steps: 10,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    async fn request_plan(&self, goal: &str, prompt: String) -> Result<Plan, PlanError> {
        let request = ModelRequest::new(vec![Message::user(prompt)]);
        let response = self.backend.generate(request).await?;
        let plan = parse_plan(goal, &response.message.text())?;
        if plan.steps.is_empty() {
            return Err(PlanError::Parse("plan has no steps".to_string()));
        }
        if plan.steps.len() > self.max_steps {
            return Err(PlanError::Parse(format!(
                "plan has {} steps, limit is {}",
                plan.steps.len(),
                self.max_steps
            )));
        }
        Ok(plan)
    }
}

#[async_trait]
impl Planner for AgentPlanner {
    async fn create_plan(&self, goal: &str, context: &str) -> Result<Plan, PlanError> {
        let mut prompt = format!("{PLANNER_PROMPT}\n\nGoal: {goal}");
        if !context.is_empty() {
            prompt.push_str(&format!("\n\nContext:\n{context}"));
        }
        self.request_plan(goal, prompt).await
    }

    async fn replan(&self, plan: &Plan, reason: &str) -> Result<Plan, PlanError> {
        let rendered: Vec<String> = plan
            .steps
            .iter()
            .map(|s| format!("{}. [{}] {}", s.index, status_name(s), s.description))
            .collect();
        let prompt = format!(
            "{PLANNER_PROMPT}\n\nGoal: {goal}\n\nThe previous plan went wrong: {reason}\n\
             Previous plan:\n{}\n\nProduce a corrected plan.",
            rendered.join("\n"),
            goal = plan.goal,
        );
        self.request_plan(&plan.goal, prompt).await
    }
}

fn status_name(step: &PlanStep) -> &'static str {
    match step.status {
        super::StepStatus::Pending => "pending",
        super::StepStatus::Running => "running",
        super::StepStatus::Completed => "completed",
        super::StepStatus::Failed => "failed",
        super::StepStatus::Skipped => "skipped",
    }
}

#[derive(Debug, Deserialize)]
struct StepSpec {
    description: String,
    #[serde(default)]
    instruction: Option<String>,
    #[serde(default, rename = "dependsOn")]
    depends_on: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct PlanSpec {
    steps: Vec<StepSpec>,
}

/// Parse a plan from model output, tolerating markdown code fences and
/// surrounding prose.
fn parse_plan(goal: &str, text: &str) -> Result<Plan, PlanError> {
    let json = extract_json(text)
        .ok_or_else(|| PlanError::Parse("no JSON object in planner output".to_string()))?;
    let spec: PlanSpec =
        serde_json::from_str(json).map_err(|e| PlanError::Parse(e.to_string()))?;

    let steps = spec
        .steps
        .into_iter()
        .enumerate()
        .map(|(index, s)| {
            let instruction = s.instruction.unwrap_or_else(|| s.description.clone());
            PlanStep::new(index, s.description, instruction).with_depends_on(s.depends_on)
        })
        .collect();
    Ok(Plan::new(goal, steps))
}

/// The outermost `{ ... }` span of the text, if any
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Runs each step through a fresh agent loop.
///
/// Every step gets its own conversation seeded with the plan goal and the
/// step instruction, keeping step executions independent of one another.
pub struct AgentStepExecutor {
    backend: Arc<dyn Backend>,
    registry: Arc<ToolRegistry>,
    permissions: Arc<PermissionGate>,
    limiter: Arc<UsageLimiter>,
    options: AgentOptions,
    cancel: CancellationToken,
}

impl AgentStepExecutor {
    pub fn new(
        backend: Arc<dyn Backend>,
        registry: Arc<ToolRegistry>,
        permissions: Arc<PermissionGate>,
        limiter: Arc<UsageLimiter>,
    ) -> Self {
        Self {
            backend,
            registry,
            permissions,
            limiter,
            options: AgentOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl StepExecutor for AgentStepExecutor {
    async fn execute_step(&self, plan: &Plan, step: &PlanStep) -> StepResult {
        let agent = match Agent::builder()
            .backend_arc(self.backend.clone())
            .registry(self.registry.clone())
            .permissions_arc(self.permissions.clone())
            .limiter(self.limiter.clone())
            .options(self.options.clone())
            .build()
        {
            Ok(agent) => agent,
            Err(e) => {
                return StepResult {
                    success: false,
                    output: format!("could not build step agent: {e}"),
                }
            }
        };

        let prompt = format!(
            "Overall goal: {}\n\nYour task (step {} of {}): {}",
            plan.goal,
            step.index + 1,
            plan.steps.len(),
            step.instruction
        );
        let outcome = agent.run_to_completion(prompt, self.cancel.clone()).await;

        match outcome.reason {
            FinishReason::Completed => StepResult {
                success: true,
                output: outcome.text,
            },
            reason => StepResult {
                success: false,
                output: format!("step stopped early ({reason}): {}", outcome.text),
            },
        }
    }
}

/// Continue on success, replan on failure
pub struct StatusEvaluator;

#[async_trait]
impl Evaluator for StatusEvaluator {
    async fn evaluate(&self, _plan: &Plan, step: &PlanStep, result: &StepResult) -> StepVerdict {
        if result.success {
            StepVerdict::Continue
        } else {
            StepVerdict::Replan(format!(
                "step {} ('{}') failed: {}",
                step.index, step.description, result.output
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockBackend;
    use crate::usage::{LimiterConfig, PricingTable, UsageTracker};

    #[test]
    fn test_extract_json_plain_and_fenced() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
        let fenced = "Here is the plan:\n```json\n{\"steps\": []}\n```";
        assert_eq!(extract_json(fenced), Some("{\"steps\": []}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_plan_with_dependencies() {
        let text = r#"{"steps": [
            {"description": "list files", "instruction": "List all files in src"},
            {"description": "summarize", "dependsOn": [0]}
        ]}"#;
        let plan = parse_plan("review", text).unwrap();
        assert_eq!(plan.goal, "review");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].instruction, "List all files in src");
        // instruction defaults to the description
        assert_eq!(plan.steps[1].instruction, "summarize");
        assert_eq!(plan.steps[1].depends_on, vec![0]);
    }

    #[tokio::test]
    async fn test_agent_planner_parses_backend_output() {
        let backend = MockBackend::new().with_text(
            "```json\n{\"steps\": [{\"description\": \"do it\", \"instruction\": \"just do it\"}]}\n```",
        );
        let planner = AgentPlanner::new(Arc::new(backend));
        let plan = planner.create_plan("small goal", "").await.unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].instruction, "just do it");
    }

    #[tokio::test]
    async fn test_agent_planner_rejects_empty_plan() {
        let backend = MockBackend::new().with_text(r#"{"steps": []}"#);
        let planner = AgentPlanner::new(Arc::new(backend));
        let err = planner.create_plan("goal", "").await.unwrap_err();
        assert!(matches!(err, PlanError::Parse(_)));
    }

    #[tokio::test]
    async fn test_agent_planner_enforces_step_cap() {
        let steps: Vec<String> = (0..4)
            .map(|i| format!("{{\"description\": \"step {i}\"}}"))
            .collect();
        let backend = MockBackend::new()
            .with_text(format!("{{\"steps\": [{}]}}", steps.join(",")));
        let planner = AgentPlanner::new(Arc::new(backend)).with_max_steps(3);
        let err = planner.create_plan("goal", "").await.unwrap_err();
        assert!(err.to_string().contains("limit is 3"));
    }

    fn executor_with(backend: MockBackend) -> AgentStepExecutor {
        let tracker = Arc::new(UsageTracker::new("mock-backend", PricingTable::default()));
        AgentStepExecutor::new(
            Arc::new(backend),
            Arc::new(ToolRegistry::new()),
            Arc::new(PermissionGate::defaults_only()),
            Arc::new(UsageLimiter::new(LimiterConfig::default(), tracker)),
        )
    }

    #[tokio::test]
    async fn test_agent_step_executor_success() {
        let executor = executor_with(MockBackend::new().with_text("step done"));
        let plan = Plan::new("goal", vec![PlanStep::new(0, "only", "do the thing")]);
        let result = executor.execute_step(&plan, &plan.steps[0]).await;
        assert!(result.success);
        assert_eq!(result.output, "step done");
    }

    #[tokio::test]
    async fn test_agent_step_executor_backend_failure() {
        // Empty script: the run ends with BackendError
        let executor = executor_with(MockBackend::new());
        let plan = Plan::new("goal", vec![PlanStep::new(0, "only", "do the thing")]);
        let result = executor.execute_step(&plan, &plan.steps[0]).await;
        assert!(!result.success);
        assert!(result.output.contains("backend_error"));
    }

    #[tokio::test]
    async fn test_status_evaluator() {
        let plan = Plan::new("goal", vec![PlanStep::new(0, "a", "do a")]);
        let ok = StepResult {
            success: true,
            output: "fine".to_string(),
        };
        let bad = StepResult {
            success: false,
            output: "broken".to_string(),
        };

        assert_eq!(
            StatusEvaluator.evaluate(&plan, &plan.steps[0], &ok).await,
            StepVerdict::Continue
        );
        assert!(matches!(
            StatusEvaluator.evaluate(&plan, &plan.steps[0], &bad).await,
            StepVerdict::Replan(reason) if reason.contains("broken")
        ));
    }
}
