//! Workflow endpoints: template catalog, trigger, run listing and lookup.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use agentflow_core::models::{
    InstanceDetail, InstancePage, InstanceStatus, InstanceSummary, ListInstancesQuery,
    TriggerWorkflowInput, WorkflowTemplate,
};
use agentflow_core::{AppState, ServerError};

use super::tenant::TenantContext;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/templates", get(list_templates))
        .route("/templates/{template_id}/trigger", post(trigger_workflow))
        .route("/instances", get(list_instances))
        .route("/instances/{id}", get(get_instance))
}

async fn list_templates(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<Vec<WorkflowTemplate>>, ServerError> {
    let templates = state.catalog.get_templates(&tenant.tenant_id).await?;
    Ok(Json(templates))
}

async fn trigger_workflow(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(template_id): Path<String>,
    Json(body): Json<TriggerWorkflowInput>,
) -> Result<Json<InstanceSummary>, ServerError> {
    let summary = state
        .trigger
        .trigger_workflow(&template_id, body, &tenant.tenant_id, &tenant.user_id)
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct ListInstancesParams {
    status: Option<String>,
    limit: Option<usize>,
    cursor: Option<String>,
}

async fn list_instances(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(params): Query<ListInstancesParams>,
) -> Result<Json<InstancePage>, ServerError> {
    let status = match params.status.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => Some(
            InstanceStatus::from_str(s)
                .ok_or_else(|| ServerError::BadRequest(format!("Unknown status filter: {}", s)))?,
        ),
        None => None,
    };

    let page = state
        .query
        .get_instances(
            &tenant.tenant_id,
            ListInstancesQuery {
                status,
                limit: params.limit,
                cursor: params.cursor,
            },
        )
        .await?;
    Ok(Json(page))
}

async fn get_instance(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<String>,
) -> Result<Json<InstanceDetail>, ServerError> {
    let detail = state.query.get_instance_by_id(&id, &tenant.tenant_id).await?;
    Ok(Json(detail))
}
