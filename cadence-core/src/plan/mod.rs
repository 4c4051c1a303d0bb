//! Plan-and-execute orchestration
//!
//! A higher-level loop above the agent: a [`Planner`] decomposes the goal
//! into ordered steps, a [`StepExecutor`] runs them one at a time, and an
//! [`Evaluator`] judges each result, deciding whether to continue, replan,
//! or abort. Steps carry dependencies; a step whose dependency failed or
//! was skipped is skipped itself and never executed.

mod adapters;
mod orchestrator;

pub use adapters::{AgentPlanner, AgentStepExecutor, StatusEvaluator};
pub use orchestrator::Orchestrator;

use async_trait::async_trait;

/// Lifecycle of one plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// A dependency failed or was skipped; this step never ran
    Skipped,
}

/// One unit of work in a plan
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub index: usize,
    /// Human-readable summary
    pub description: String,
    /// Self-contained instruction for the executor
    pub instruction: String,
    /// Indices of steps that must complete before this one runs
    pub depends_on: Vec<usize>,
    pub status: StepStatus,
}

impl PlanStep {
    pub fn new(
        index: usize,
        description: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            index,
            description: description.into(),
            instruction: instruction.into(),
            depends_on: Vec::new(),
            status: StepStatus::Pending,
        }
    }

    pub fn with_depends_on(mut self, deps: Vec<usize>) -> Self {
        self.depends_on = deps;
        self
    }
}

/// An ordered plan toward a goal
#[derive(Debug, Clone)]
pub struct Plan {
    pub goal: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(goal: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            goal: goal.into(),
            steps,
        }
    }

    /// Number of steps that finished successfully
    pub fn completed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }
}

/// Events emitted by [`Orchestrator::execute`]
#[derive(Debug, Clone)]
pub enum PlanEvent {
    /// A plan was produced; always the first event on success
    PlanCreated { plan: Plan },
    /// A step entered Running; never emitted for skipped steps
    StepStarted { index: usize, description: String },
    /// A step finished (Completed or Failed)
    StepCompleted {
        index: usize,
        success: bool,
        output: String,
    },
    /// The planner produced a replacement plan; execution restarts at step 0
    Replan { attempt: u32, reason: String },
    /// All steps were visited; summary is "<completed>/<total>"
    PlanCompleted { summary: String },
    /// The run stopped early
    PlanAborted { reason: String },
}

/// Outcome of executing one step
#[derive(Debug, Clone)]
pub struct StepResult {
    pub success: bool,
    pub output: String,
}

/// The evaluator's opinion about a step result, independent of whether the
/// step itself reported success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepVerdict {
    /// Move on to the next step
    Continue,
    /// Ask the planner for a new plan and restart from step 0
    Replan(String),
    /// Stop the whole run
    Abort(String),
}

/// Errors from planning
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("planner failed: {0}")]
    Planner(String),

    #[error("could not parse plan: {0}")]
    Parse(String),

    #[error("backend error: {0}")]
    Backend(#[from] crate::backend::BackendError),
}

/// Produces and revises plans
#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(&self, goal: &str, context: &str) -> Result<Plan, PlanError>;

    /// Produce a replacement plan after a step went wrong
    async fn replan(&self, plan: &Plan, reason: &str) -> Result<Plan, PlanError>;
}

/// Runs one step
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute_step(&self, plan: &Plan, step: &PlanStep) -> StepResult;
}

/// Judges step results
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, plan: &Plan, step: &PlanStep, result: &StepResult) -> StepVerdict;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_completed_count() {
        let mut plan = Plan::new(
            "goal",
            vec![
                PlanStep::new(0, "a", "do a"),
                PlanStep::new(1, "b", "do b"),
                PlanStep::new(2, "c", "do c"),
            ],
        );
        assert_eq!(plan.completed_count(), 0);
        plan.steps[0].status = StepStatus::Completed;
        plan.steps[1].status = StepStatus::Failed;
        assert_eq!(plan.completed_count(), 1);
    }

    #[test]
    fn test_step_dependencies() {
        let step = PlanStep::new(2, "c", "do c").with_depends_on(vec![0, 1]);
        assert_eq!(step.depends_on, vec![0, 1]);
        assert_eq!(step.status, StepStatus::Pending);
    }
}
