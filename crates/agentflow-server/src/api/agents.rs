use axum::{extract::State, routing::get, Json, Router};
use serde::Deserialize;

use agentflow_core::models::Agent;
use agentflow_core::{AppState, ServerError};

use super::tenant::TenantContext;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_agents).post(create_agent))
}

async fn list_agents(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<serde_json::Value>, ServerError> {
    let agents = state.agent_store.list_by_tenant(&tenant.tenant_id).await?;
    Ok(Json(serde_json::json!({ "agents": agents })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAgentRequest {
    name: String,
    id: Option<String>,
}

async fn create_agent(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(body): Json<CreateAgentRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if body.name.trim().is_empty() {
        return Err(ServerError::BadRequest("Agent name must not be empty".into()));
    }
    let agent = Agent::new(
        body.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        tenant.tenant_id,
        body.name,
    );

    state.agent_store.save(&agent).await?;
    Ok(Json(serde_json::json!({ "agent": agent })))
}
