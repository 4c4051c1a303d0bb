//! The planner → executor → evaluator loop

use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use super::{Evaluator, Plan, PlanEvent, Planner, StepExecutor, StepStatus, StepVerdict};

/// Default cap on replan attempts
pub const DEFAULT_MAX_REPLANS: u32 = 3;

/// Supervises plan execution above the agent loop.
///
/// Steps run in index order. A step whose dependency ended Failed or
/// Skipped is marked Skipped without invoking the executor and without
/// emitting execution events. The evaluator can demand a replan, which
/// restarts execution from step 0 of the replacement plan; replans are
/// capped.
pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    executor: Arc<dyn StepExecutor>,
    evaluator: Arc<dyn Evaluator>,
    max_replans: u32,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn Planner>,
        executor: Arc<dyn StepExecutor>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        Self {
            planner,
            executor,
            evaluator,
            max_replans: DEFAULT_MAX_REPLANS,
        }
    }

    pub fn with_max_replans(mut self, max_replans: u32) -> Self {
        self.max_replans = max_replans;
        self
    }

    /// Execute a goal, surfacing progress as a [`PlanEvent`] stream.
    ///
    /// The stream always terminates with either `PlanCompleted` or
    /// `PlanAborted`.
    pub fn execute(
        &self,
        goal: impl Into<String>,
        context: impl Into<String>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = PlanEvent> + Send + '_ {
        let goal = goal.into();
        let context = context.into();
        stream! {
            let mut plan = match self.planner.create_plan(&goal, &context).await {
                Ok(plan) => plan,
                Err(e) => {
                    yield PlanEvent::PlanAborted {
                        reason: format!("planning failed: {e}"),
                    };
                    return;
                }
            };
            yield PlanEvent::PlanCreated { plan: plan.clone() };

            let mut replans: u32 = 0;
            'plan: loop {
                let mut index = 0;
                while index < plan.steps.len() {
                    if cancel.is_cancelled() {
                        yield PlanEvent::PlanAborted {
                            reason: "cancelled".to_string(),
                        };
                        return;
                    }

                    // A step runs only when every dependency completed.
                    // Anything else (failed, skipped, or an unresolved
                    // forward reference) skips it, silently.
                    let blocked = plan.steps[index].depends_on.iter().any(|&dep| {
                        plan.steps
                            .get(dep)
                            .map(|s| s.status != StepStatus::Completed)
                            .unwrap_or(true)
                    });
                    if blocked {
                        tracing::debug!(step = index, "skipping step with unmet dependencies");
                        plan.steps[index].status = StepStatus::Skipped;
                        index += 1;
                        continue;
                    }

                    plan.steps[index].status = StepStatus::Running;
                    yield PlanEvent::StepStarted {
                        index,
                        description: plan.steps[index].description.clone(),
                    };

                    let result = self.executor.execute_step(&plan, &plan.steps[index]).await;
                    plan.steps[index].status = if result.success {
                        StepStatus::Completed
                    } else {
                        StepStatus::Failed
                    };
                    yield PlanEvent::StepCompleted {
                        index,
                        success: result.success,
                        output: result.output.clone(),
                    };

                    match self
                        .evaluator
                        .evaluate(&plan, &plan.steps[index], &result)
                        .await
                    {
                        StepVerdict::Continue => {
                            index += 1;
                        }
                        StepVerdict::Abort(reason) => {
                            yield PlanEvent::PlanAborted { reason };
                            return;
                        }
                        StepVerdict::Replan(reason) => {
                            replans += 1;
                            if replans > self.max_replans {
                                yield PlanEvent::PlanAborted {
                                    reason: "maximum replan attempts exceeded".to_string(),
                                };
                                return;
                            }
                            match self.planner.replan(&plan, &reason).await {
                                Ok(new_plan) => {
                                    tracing::debug!(attempt = replans, %reason, "replanning");
                                    plan = new_plan;
                                    yield PlanEvent::Replan {
                                        attempt: replans,
                                        reason,
                                    };
                                    continue 'plan;
                                }
                                Err(e) => {
                                    yield PlanEvent::PlanAborted {
                                        reason: format!("replanning failed: {e}"),
                                    };
                                    return;
                                }
                            }
                        }
                    }
                }

                yield PlanEvent::PlanCompleted {
                    summary: format!("{}/{}", plan.completed_count(), plan.steps.len()),
                };
                return;
            }
        }
    }
}
