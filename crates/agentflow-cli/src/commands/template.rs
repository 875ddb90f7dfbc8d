//! `agentflow template` - Provision workflow templates from YAML.

use agentflow_core::models::TemplateDefinition;
use agentflow_core::AppState;

use super::{print_as_json, print_json};

/// Import (or re-publish) a template. Without a tenant the template is
/// system-wide and visible to every tenant.
pub async fn import(state: &AppState, file: &str, tenant_id: Option<&str>) -> Result<(), String> {
    let definition = TemplateDefinition::from_file(file).map_err(|e| e.to_string())?;
    let template = definition
        .into_template(tenant_id.map(String::from))
        .map_err(|e| e.to_string())?;

    state
        .template_store
        .save(&template)
        .await
        .map_err(|e| e.to_string())?;

    print_json(&serde_json::json!({
        "imported": template.id,
        "steps": template.steps.len(),
        "isSystem": template.is_system,
    }));
    Ok(())
}

pub async fn list(state: &AppState, tenant_id: &str) -> Result<(), String> {
    let templates = state
        .catalog
        .get_templates(tenant_id)
        .await
        .map_err(|e| e.to_string())?;
    print_as_json(&templates)
}
