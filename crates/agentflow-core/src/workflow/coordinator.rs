//! Step coordinator - the run state machine.
//!
//! ```text
//!  pending ──first step starts──► running ──last step ok──► completed
//!     │                              │
//!     └────────── step error / timeout ───────────────────► failed
//! ```
//!
//! Each delivered job `{instanceId, stepIndex}` is applied only when the run
//! is non-terminal and `stepIndex == currentStep`; anything else is a stale
//! or duplicate delivery and is dropped. Only one step per run is ever
//! scheduled, and no lock is held while the step handler runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{ServerError, StepError};
use crate::models::instance::{InstanceStatus, StepLogEntry, StepOutcome, WorkflowInstance};
use crate::models::template::StepSpec;
use crate::store::{InstanceStore, TemplateStore};
use crate::workflow::handler::{HandlerRegistry, StepContext};
use crate::workflow::queue::{JobHandler, JobOptions, StepJob, WorkQueue, STEP_JOB};

/// What handling a job did to the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Guard mismatch: run missing, terminal, or at another step. Nothing changed.
    Stale,
    /// The step succeeded and `next_step` was scheduled.
    Advanced { next_step: usize },
    /// The last step succeeded.
    Completed,
    /// The step failed or timed out; the run is now terminal.
    Failed { reason: String },
}

pub struct StepCoordinator {
    instances: InstanceStore,
    templates: TemplateStore,
    handlers: HandlerRegistry,
    queue: Arc<dyn WorkQueue>,
}

impl StepCoordinator {
    pub fn new(
        instances: InstanceStore,
        templates: TemplateStore,
        handlers: HandlerRegistry,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            instances,
            templates,
            handlers,
            queue,
        }
    }

    pub async fn handle_job(&self, job: StepJob) -> Result<JobOutcome, ServerError> {
        let Some(mut instance) = self.instances.get(&job.instance_id).await? else {
            return Ok(stale(&job, "instance no longer exists"));
        };
        if instance.status.is_terminal() || instance.current_step != job.step_index {
            return Ok(stale(&job, "guard mismatch"));
        }

        let Some(template) = self
            .templates
            .get_visible(&instance.template_id, &instance.tenant_id)
            .await?
        else {
            let reason = format!("Workflow template {} not found", instance.template_id);
            return self.fail(&job, None, reason).await;
        };
        let total_steps = template.steps.len();
        let Some(step) = template.steps.get(job.step_index).cloned() else {
            let reason = format!(
                "Step {} is out of range for template {} ({} steps)",
                job.step_index, template.id, total_steps
            );
            return self.fail(&job, None, reason).await;
        };

        if instance.status == InstanceStatus::Pending
            && !self.instances.mark_running(&instance.id, job.step_index).await?
        {
            // Someone else moved the run; re-check before doing any work.
            match self.instances.get(&instance.id).await? {
                Some(current)
                    if !current.status.is_terminal() && current.current_step == job.step_index =>
                {
                    instance = current;
                }
                _ => return Ok(stale(&job, "run moved before start")),
            }
        }

        let started_at = Utc::now();
        let result = self.run_step(&instance, job.step_index, &step).await;
        let finished_at = Utc::now();

        match result {
            Ok(()) => {
                let entry = StepLogEntry {
                    step_index: job.step_index,
                    step_name: step.name.clone(),
                    started_at,
                    finished_at,
                    outcome: StepOutcome::Success,
                    error: None,
                };
                let Some(updated) = self
                    .instances
                    .record_success(&instance.id, job.step_index, entry, total_steps)
                    .await?
                else {
                    return Ok(stale(&job, "run moved during step"));
                };

                if updated.status == InstanceStatus::Completed {
                    tracing::info!(
                        "Workflow instance {} completed ({} step(s))",
                        updated.id,
                        updated.current_step
                    );
                    return Ok(JobOutcome::Completed);
                }

                let next = StepJob::new(updated.id.clone(), updated.current_step);
                self.queue
                    .enqueue(STEP_JOB, next.clone(), JobOptions::for_job(&next))
                    .await?;
                tracing::debug!(
                    "Workflow instance {} advanced to step {}",
                    updated.id,
                    updated.current_step
                );
                Ok(JobOutcome::Advanced {
                    next_step: next.step_index,
                })
            }
            Err(err) => {
                let reason = err.to_string();
                let entry = StepLogEntry {
                    step_index: job.step_index,
                    step_name: step.name.clone(),
                    started_at,
                    finished_at,
                    outcome: StepOutcome::Failure,
                    error: Some(reason.clone()),
                };
                self.fail(&job, Some(entry), reason).await
            }
        }
    }

    /// Re-enqueue the current step of every non-terminal run. Used at startup
    /// to redeliver jobs the in-process queue lost; stale ones are dropped by
    /// the guard.
    pub async fn resume_active(&self) -> Result<usize, ServerError> {
        let active = self.instances.list_active().await?;
        for instance in &active {
            let job = StepJob::new(instance.id.clone(), instance.current_step);
            self.queue
                .enqueue(STEP_JOB, job.clone(), JobOptions::for_job(&job))
                .await?;
        }
        if !active.is_empty() {
            tracing::info!("Resumed {} active workflow instance(s)", active.len());
        }
        Ok(active.len())
    }

    /// Invoke the handler for `step`, bounded by its `timeout_ms`. The handler
    /// runs on its own task so a panic or overrun is contained and aborted.
    async fn run_step(
        &self,
        instance: &WorkflowInstance,
        step_index: usize,
        step: &StepSpec,
    ) -> Result<(), StepError> {
        let handler = self
            .handlers
            .get(step.step_type)
            .ok_or(StepError::MissingHandler(step.step_type))?;

        let ctx = StepContext {
            tenant_id: instance.tenant_id.clone(),
            instance_id: instance.id.clone(),
            template_id: instance.template_id.clone(),
            step_index,
            step: step.clone(),
            agent_ids: instance.input_data.agent_ids.clone(),
        };

        let mut task = tokio::spawn(async move { handler.run(&ctx).await });
        match tokio::time::timeout(Duration::from_millis(step.timeout_ms), &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(msg))) => Err(StepError::Handler(msg)),
            Ok(Err(join_err)) => Err(StepError::Handler(format!(
                "Step handler aborted: {}",
                join_err
            ))),
            Err(_) => {
                task.abort();
                Err(StepError::Timeout {
                    step: step.name.clone(),
                    timeout_ms: step.timeout_ms,
                })
            }
        }
    }

    async fn fail(
        &self,
        job: &StepJob,
        entry: Option<StepLogEntry>,
        reason: String,
    ) -> Result<JobOutcome, ServerError> {
        match self
            .instances
            .record_failure(&job.instance_id, job.step_index, entry, &reason)
            .await?
        {
            Some(_) => {
                tracing::info!(
                    "Workflow instance {} failed at step {}: {}",
                    job.instance_id,
                    job.step_index,
                    reason
                );
                Ok(JobOutcome::Failed { reason })
            }
            None => Ok(stale(job, "run moved before failure was recorded")),
        }
    }
}

#[async_trait]
impl JobHandler for StepCoordinator {
    async fn handle(&self, job: StepJob) -> Result<(), ServerError> {
        self.handle_job(job).await.map(|_| ())
    }
}

fn stale(job: &StepJob, why: &str) -> JobOutcome {
    tracing::debug!(
        "Dropping stale job for instance {} step {}: {}",
        job.instance_id,
        job.step_index,
        why
    );
    JobOutcome::Stale
}
