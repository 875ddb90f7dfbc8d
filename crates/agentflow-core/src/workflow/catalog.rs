//! Read-only access to workflow templates, merged system + tenant scope.

use crate::error::ServerError;
use crate::models::template::WorkflowTemplate;
use crate::store::TemplateStore;

#[derive(Clone)]
pub struct TemplateCatalog {
    store: TemplateStore,
}

impl TemplateCatalog {
    pub fn new(store: TemplateStore) -> Self {
        Self { store }
    }

    /// Templates visible to `tenant_id`: system-wide plus its own.
    pub async fn get_templates(&self, tenant_id: &str) -> Result<Vec<WorkflowTemplate>, ServerError> {
        let mut templates = self.store.list_visible(tenant_id).await?;
        templates.retain(|t| t.is_visible_to(tenant_id));
        Ok(templates)
    }

    /// A single template, or NotFound when absent or owned by another tenant.
    pub async fn get_template(
        &self,
        template_id: &str,
        tenant_id: &str,
    ) -> Result<WorkflowTemplate, ServerError> {
        self.store
            .get_visible(template_id, tenant_id)
            .await?
            .filter(|t| t.is_visible_to(tenant_id))
            .ok_or_else(|| ServerError::NotFound(format!("Workflow template {} not found", template_id)))
    }
}
