//! `agentflow agent` - Tenant agent registration.

use agentflow_core::models::Agent;
use agentflow_core::AppState;

use super::print_json;

pub async fn list(state: &AppState, tenant_id: &str) -> Result<(), String> {
    let agents = state
        .agent_store
        .list_by_tenant(tenant_id)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "agents": agents }));
    Ok(())
}

pub async fn create(
    state: &AppState,
    tenant_id: &str,
    name: &str,
    id: Option<&str>,
) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Agent name must not be empty".to_string());
    }
    let agent = Agent::new(
        id.map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        tenant_id.to_string(),
        name.to_string(),
    );
    state
        .agent_store
        .save(&agent)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "agent": agent }));
    Ok(())
}
