//! Tenant-scoped reads of workflow runs.
//!
//! Reads do not coordinate with the step coordinator; a listing may observe
//! a run mid-transition.

use crate::config::EngineConfig;
use crate::error::ServerError;
use crate::models::instance::{InstanceDetail, InstancePage, ListInstancesQuery};
use crate::store::{InstanceStore, TemplateStore};
use crate::workflow::cursor::InstanceCursor;

#[derive(Clone)]
pub struct InstanceQuery {
    instances: InstanceStore,
    templates: TemplateStore,
    config: EngineConfig,
}

impl InstanceQuery {
    pub fn new(instances: InstanceStore, templates: TemplateStore, config: EngineConfig) -> Self {
        Self {
            instances,
            templates,
            config,
        }
    }

    /// Newest first, `id` as tiebreak. `next_cursor` is `None` exactly when
    /// nothing follows the returned page.
    pub async fn get_instances(
        &self,
        tenant_id: &str,
        query: ListInstancesQuery,
    ) -> Result<InstancePage, ServerError> {
        let limit = self.config.page_limit(query.limit);
        let after = query
            .cursor
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(InstanceCursor::decode)
            .transpose()?;

        let mut items = self
            .instances
            .list_page(tenant_id, query.status, after, limit + 1)
            .await?;
        items.retain(|i| i.tenant_id == tenant_id);

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|last| InstanceCursor::after(last).encode())
        } else {
            None
        };

        Ok(InstancePage { items, next_cursor })
    }

    /// A single run joined with its template's name, label and steps.
    pub async fn get_instance_by_id(
        &self,
        id: &str,
        tenant_id: &str,
    ) -> Result<InstanceDetail, ServerError> {
        let instance = self
            .instances
            .get_for_tenant(id, tenant_id)
            .await?
            .filter(|i| i.tenant_id == tenant_id)
            .ok_or_else(|| ServerError::NotFound(format!("Workflow instance {} not found", id)))?;

        let template = self
            .templates
            .get_visible(&instance.template_id, tenant_id)
            .await?
            .ok_or_else(|| {
                ServerError::NotFound(format!(
                    "Workflow template {} not found",
                    instance.template_id
                ))
            })?;

        Ok(InstanceDetail {
            instance,
            template_name: template.name,
            template_label: template.label,
            steps: template.steps,
        })
    }
}
