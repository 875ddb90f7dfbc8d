//! Trigger - validates a request against tenant-owned resources, creates the
//! run and schedules its first step.
//!
//! Validation happens before anything is written: an unknown template or an
//! agent outside the tenant leaves no run behind.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ServerError;
use crate::models::instance::{InputData, InstanceSummary, TriggerWorkflowInput, WorkflowInstance};
use crate::store::InstanceStore;
use crate::workflow::catalog::TemplateCatalog;
use crate::workflow::queue::{JobOptions, StepJob, WorkQueue, STEP_JOB};

/// Resolves which agents a tenant owns.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// The subset of `ids` owned by `tenant_id`.
    async fn find_owned(&self, tenant_id: &str, ids: &[String]) -> Result<Vec<String>, ServerError>;
}

#[derive(Clone)]
pub struct InstanceTrigger {
    catalog: TemplateCatalog,
    instances: InstanceStore,
    agents: Arc<dyn AgentDirectory>,
    queue: Arc<dyn WorkQueue>,
}

impl InstanceTrigger {
    pub fn new(
        catalog: TemplateCatalog,
        instances: InstanceStore,
        agents: Arc<dyn AgentDirectory>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            catalog,
            instances,
            agents,
            queue,
        }
    }

    pub async fn trigger_workflow(
        &self,
        template_id: &str,
        input: TriggerWorkflowInput,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<InstanceSummary, ServerError> {
        if tenant_id.trim().is_empty() {
            return Err(ServerError::BadRequest("tenantId is required".into()));
        }
        let agent_ids = normalize_agent_ids(input.agent_ids)?;

        let template = self.catalog.get_template(template_id, tenant_id).await?;
        if template.steps.is_empty() {
            return Err(ServerError::BadRequest(format!(
                "Workflow template {} has no steps",
                template.id
            )));
        }

        let owned: HashSet<String> = self
            .agents
            .find_owned(tenant_id, &agent_ids)
            .await?
            .into_iter()
            .collect();
        let foreign: Vec<&str> = agent_ids
            .iter()
            .filter(|id| !owned.contains(*id))
            .map(String::as_str)
            .collect();
        if !foreign.is_empty() {
            return Err(ServerError::BadRequest(format!(
                "Agents not found for this tenant: {}",
                foreign.join(", ")
            )));
        }

        let instance = WorkflowInstance::new(
            Uuid::new_v4().to_string(),
            template.id.clone(),
            tenant_id.to_string(),
            user_id.to_string(),
            InputData { agent_ids },
        );
        self.instances.create(&instance).await?;

        let job = StepJob::new(instance.id.clone(), 0);
        if let Err(e) = self
            .queue
            .enqueue(STEP_JOB, job.clone(), JobOptions::for_job(&job))
            .await
        {
            let reason = format!("Failed to schedule first step: {}", e);
            tracing::error!("Workflow instance {}: {}", instance.id, reason);
            self.instances
                .record_failure(&instance.id, 0, None, &reason)
                .await?;
            return Err(ServerError::Internal(reason));
        }

        tracing::info!(
            "Triggered workflow {} as instance {} for tenant {} ({} agent(s), by {})",
            template.id,
            instance.id,
            tenant_id,
            instance.input_data.agent_ids.len(),
            user_id
        );
        Ok(InstanceSummary::from(&instance))
    }
}

/// Reject empty or blank ids and collapse duplicates, keeping first-seen order.
fn normalize_agent_ids(ids: Vec<String>) -> Result<Vec<String>, ServerError> {
    if ids.is_empty() {
        return Err(ServerError::BadRequest("agentIds must not be empty".into()));
    }
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.trim().to_string();
        if id.is_empty() {
            return Err(ServerError::BadRequest("agentIds must not contain blank ids".into()));
        }
        if seen.insert(id.clone()) {
            out.push(id);
        }
    }
    Ok(out)
}
