//! `agentflow workflow` - Trigger and inspect workflow runs.

use std::time::Duration;

use agentflow_core::models::{
    InstanceStatus, ListInstancesQuery, TriggerWorkflowInput, WorkflowInstance,
};
use agentflow_core::AppState;

use super::print_as_json;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Trigger a run. With `wait`, block until the run is terminal and print the
/// final record; a failed run is reported as an error.
pub async fn trigger(
    state: &AppState,
    template_id: &str,
    agent_ids: Vec<String>,
    tenant_id: &str,
    user_id: &str,
    wait: bool,
) -> Result<(), String> {
    let summary = state
        .trigger
        .trigger_workflow(
            template_id,
            TriggerWorkflowInput { agent_ids },
            tenant_id,
            user_id,
        )
        .await
        .map_err(|e| e.to_string())?;

    if !wait {
        return print_as_json(&summary);
    }

    let instance = wait_for_terminal(state, &summary.id).await?;
    print_as_json(&instance)?;
    match instance.status {
        InstanceStatus::Failed => Err(format!(
            "Workflow run {} failed: {}",
            instance.id,
            instance.failure_reason.as_deref().unwrap_or("unknown reason")
        )),
        _ => Ok(()),
    }
}

pub async fn wait_for_terminal(
    state: &AppState,
    instance_id: &str,
) -> Result<WorkflowInstance, String> {
    loop {
        let instance = state
            .instance_store
            .get(instance_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Workflow run {} disappeared", instance_id))?;
        if instance.status.is_terminal() {
            return Ok(instance);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

pub async fn list(
    state: &AppState,
    tenant_id: &str,
    status: Option<&str>,
    limit: Option<usize>,
    cursor: Option<String>,
) -> Result<(), String> {
    let status = status
        .map(|s| InstanceStatus::from_str(s).ok_or_else(|| format!("Unknown status: {}", s)))
        .transpose()?;

    let page = state
        .query
        .get_instances(tenant_id, ListInstancesQuery { status, limit, cursor })
        .await
        .map_err(|e| e.to_string())?;
    print_as_json(&page)
}

pub async fn get(state: &AppState, id: &str, tenant_id: &str) -> Result<(), String> {
    let detail = state
        .query
        .get_instance_by_id(id, tenant_id)
        .await
        .map_err(|e| e.to_string())?;
    print_as_json(&detail)
}
