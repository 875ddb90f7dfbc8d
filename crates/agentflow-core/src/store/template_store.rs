use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::ServerError;
use crate::models::template::{StepSpec, WorkflowTemplate};

const TEMPLATE_COLUMNS: &str =
    "id, name, label, description, is_system, tenant_id, steps, created_at, updated_at";

/// Templates are read through the tenant visibility rule: a row is visible
/// when its `tenant_id` is NULL (system) or equal to the requesting tenant.
#[derive(Clone)]
pub struct TemplateStore {
    db: Database,
}

impl TemplateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Publish a template. Published definitions are immutable: runs read
    /// their steps by index for their whole life. Saving an identical
    /// definition again is a no-op; any other save of an existing id is a
    /// conflict.
    pub async fn save(&self, template: &WorkflowTemplate) -> Result<(), ServerError> {
        template.validate()?;
        let t = template.clone();
        let steps_json = serde_json::to_string(&t.steps)
            .map_err(|e| ServerError::Internal(format!("Failed to encode steps: {}", e)))?;

        let existing = self
            .db
            .with_conn_async(move |conn| {
                let sql = format!("SELECT {} FROM workflow_templates WHERE id = ?1", TEMPLATE_COLUMNS);
                let existing = conn
                    .query_row(&sql, rusqlite::params![t.id], |row| Ok(row_to_template(row)))
                    .optional()?;
                if existing.is_none() {
                    conn.execute(
                        "INSERT INTO workflow_templates (id, name, label, description, is_system, tenant_id, steps, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        rusqlite::params![
                            t.id,
                            t.name,
                            t.label,
                            t.description,
                            t.is_system as i64,
                            t.tenant_id,
                            steps_json,
                            t.created_at.timestamp_millis(),
                            t.updated_at.timestamp_millis(),
                        ],
                    )?;
                }
                Ok(existing)
            })
            .await?;

        match existing {
            None => Ok(()),
            Some(current) if current.tenant_id != template.tenant_id => Err(ServerError::Conflict(
                format!("Template {} already exists with a different owner", template.id),
            )),
            Some(current) if same_definition(&current, template) => {
                tracing::debug!("Template {} already published unchanged", template.id);
                Ok(())
            }
            Some(_) => Err(ServerError::Conflict(format!(
                "Template {} is already published and cannot be changed; publish it under a new id",
                template.id
            ))),
        }
    }

    /// Look up a template if it is visible to `tenant_id`.
    pub async fn get_visible(
        &self,
        template_id: &str,
        tenant_id: &str,
    ) -> Result<Option<WorkflowTemplate>, ServerError> {
        let id = template_id.to_string();
        let tenant_id = tenant_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let sql = format!(
                    "SELECT {} FROM workflow_templates
                     WHERE id = ?1 AND (tenant_id IS NULL OR tenant_id = ?2)",
                    TEMPLATE_COLUMNS
                );
                conn.query_row(&sql, rusqlite::params![id, tenant_id], |row| {
                    Ok(row_to_template(row))
                })
                .optional()
            })
            .await
    }

    /// All templates visible to `tenant_id`: system-wide ones plus its own.
    pub async fn list_visible(&self, tenant_id: &str) -> Result<Vec<WorkflowTemplate>, ServerError> {
        let tenant_id = tenant_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let sql = format!(
                    "SELECT {} FROM workflow_templates
                     WHERE tenant_id IS NULL OR tenant_id = ?1
                     ORDER BY is_system DESC, name ASC, id ASC",
                    TEMPLATE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params![tenant_id], |row| Ok(row_to_template(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

use rusqlite::Row;

fn same_definition(a: &WorkflowTemplate, b: &WorkflowTemplate) -> bool {
    a.name == b.name && a.label == b.label && a.description == b.description && a.steps == b.steps
}

fn row_to_template(row: &Row<'_>) -> WorkflowTemplate {
    let steps_str: String = row.get(6).unwrap_or_default();
    let steps: Vec<StepSpec> = serde_json::from_str(&steps_str).unwrap_or_default();
    let created_ms: i64 = row.get(7).unwrap_or(0);
    let updated_ms: i64 = row.get(8).unwrap_or(0);

    WorkflowTemplate {
        id: row.get(0).unwrap_or_default(),
        name: row.get(1).unwrap_or_default(),
        label: row.get(2).unwrap_or_default(),
        description: row.get(3).unwrap_or(None),
        is_system: row.get::<_, i64>(4).unwrap_or(0) != 0,
        tenant_id: row.get(5).unwrap_or(None),
        steps,
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms)
            .unwrap_or_else(Utc::now),
    }
}
