//! Persistence for workflow runs.
//!
//! Every state transition is a compare-and-set: the UPDATE only matches while
//! the row is still non-terminal and still at the step the caller observed.
//! A transition that loses that race touches zero rows and reports `None`,
//! so replaying a job can never apply the same transition twice.

use chrono::{TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::db::Database;
use crate::error::ServerError;
use crate::models::instance::{InputData, InstanceStatus, StepLogEntry, WorkflowInstance};
use crate::workflow::cursor::InstanceCursor;

const INSTANCE_COLUMNS: &str = "id, template_id, tenant_id, status, current_step, triggered_by, \
     input_data, step_logs, completed_at, failed_at, failure_reason, created_at, updated_at";

#[derive(Clone)]
pub struct InstanceStore {
    db: Database,
}

impl InstanceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, instance: &WorkflowInstance) -> Result<(), ServerError> {
        let i = instance.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO workflow_instances (id, template_id, tenant_id, status, current_step, \
                     triggered_by, input_data, step_logs, completed_at, failed_at, failure_reason, \
                     created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    rusqlite::params![
                        i.id,
                        i.template_id,
                        i.tenant_id,
                        i.status.as_str(),
                        i.current_step as i64,
                        i.triggered_by,
                        to_json(&i.input_data)?,
                        to_json(&i.step_logs)?,
                        i.completed_at.map(|t| t.timestamp_millis()),
                        i.failed_at.map(|t| t.timestamp_millis()),
                        i.failure_reason,
                        i.created_at.timestamp_millis(),
                        i.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<WorkflowInstance>, ServerError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| load_instance(conn, &id))
            .await
    }

    /// Look up a run only if it belongs to `tenant_id`.
    pub async fn get_for_tenant(
        &self,
        id: &str,
        tenant_id: &str,
    ) -> Result<Option<WorkflowInstance>, ServerError> {
        let id = id.to_string();
        let tenant_id = tenant_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let sql = format!(
                    "SELECT {} FROM workflow_instances WHERE id = ?1 AND tenant_id = ?2",
                    INSTANCE_COLUMNS
                );
                conn.query_row(&sql, rusqlite::params![id, tenant_id], |row| {
                    Ok(row_to_instance(row))
                })
                .optional()
            })
            .await
    }

    /// `pending → running` when the first step starts. Returns false if the
    /// row was not pending at `step_index`.
    pub async fn mark_running(&self, id: &str, step_index: usize) -> Result<bool, ServerError> {
        let id = id.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute(
                    "UPDATE workflow_instances SET status = 'running', updated_at = ?1 \
                     WHERE id = ?2 AND status = 'pending' AND current_step = ?3",
                    rusqlite::params![now, id, step_index as i64],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// Append a successful step log and advance `current_step`. When the
    /// advanced step equals `total_steps` the run becomes completed.
    ///
    /// Returns the updated run, or `None` when the guard no longer matched.
    pub async fn record_success(
        &self,
        id: &str,
        step_index: usize,
        entry: StepLogEntry,
        total_steps: usize,
    ) -> Result<Option<WorkflowInstance>, ServerError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let Some(current) = load_instance(&tx, &id)? else {
                    return Ok(None);
                };
                if !is_at_step(&current, step_index) {
                    return Ok(None);
                }

                let mut logs = current.step_logs;
                logs.push(entry);
                let next_step = step_index + 1;
                let now = Utc::now().timestamp_millis();
                let (status, completed_at) = if next_step >= total_steps {
                    (InstanceStatus::Completed, Some(now))
                } else {
                    (InstanceStatus::Running, None)
                };

                let n = tx.execute(
                    "UPDATE workflow_instances SET status = ?1, current_step = ?2, step_logs = ?3, \
                     completed_at = ?4, updated_at = ?5 \
                     WHERE id = ?6 AND current_step = ?7 AND status IN ('pending', 'running')",
                    rusqlite::params![
                        status.as_str(),
                        next_step as i64,
                        to_json(&logs)?,
                        completed_at,
                        now,
                        id,
                        step_index as i64,
                    ],
                )?;
                if n == 0 {
                    return Ok(None);
                }
                let updated = load_instance(&tx, &id)?;
                tx.commit()?;
                Ok(updated)
            })
            .await
    }

    /// Mark the run failed at `step_index`, optionally appending the failed
    /// step's log entry. `current_step` is left untouched.
    ///
    /// Returns the updated run, or `None` when the guard no longer matched.
    pub async fn record_failure(
        &self,
        id: &str,
        step_index: usize,
        entry: Option<StepLogEntry>,
        reason: &str,
    ) -> Result<Option<WorkflowInstance>, ServerError> {
        let id = id.to_string();
        let reason = reason.to_string();
        self.db
            .with_conn_async(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let Some(current) = load_instance(&tx, &id)? else {
                    return Ok(None);
                };
                if !is_at_step(&current, step_index) {
                    return Ok(None);
                }

                let mut logs = current.step_logs;
                if let Some(entry) = entry {
                    logs.push(entry);
                }
                let now = Utc::now().timestamp_millis();

                let n = tx.execute(
                    "UPDATE workflow_instances SET status = 'failed', step_logs = ?1, failed_at = ?2, \
                     failure_reason = ?3, updated_at = ?2 \
                     WHERE id = ?4 AND current_step = ?5 AND status IN ('pending', 'running')",
                    rusqlite::params![to_json(&logs)?, now, reason, id, step_index as i64],
                )?;
                if n == 0 {
                    return Ok(None);
                }
                let updated = load_instance(&tx, &id)?;
                tx.commit()?;
                Ok(updated)
            })
            .await
    }

    /// One page of a tenant's runs, newest first, strictly after `after`.
    pub async fn list_page(
        &self,
        tenant_id: &str,
        status: Option<InstanceStatus>,
        after: Option<InstanceCursor>,
        fetch: usize,
    ) -> Result<Vec<WorkflowInstance>, ServerError> {
        let tenant_id = tenant_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut sql = format!(
                    "SELECT {} FROM workflow_instances WHERE tenant_id = ?1",
                    INSTANCE_COLUMNS
                );
                let mut params: Vec<rusqlite::types::Value> = vec![tenant_id.into()];

                if let Some(status) = status {
                    params.push(status.as_str().to_string().into());
                    sql.push_str(&format!(" AND status = ?{}", params.len()));
                }
                if let Some(cursor) = after {
                    params.push(cursor.created_at_ms.into());
                    let ts = params.len();
                    params.push(cursor.id.into());
                    let id = params.len();
                    sql.push_str(&format!(
                        " AND (created_at < ?{ts} OR (created_at = ?{ts} AND id < ?{id}))"
                    ));
                }
                params.push((fetch as i64).into());
                sql.push_str(&format!(
                    " ORDER BY created_at DESC, id DESC LIMIT ?{}",
                    params.len()
                ));

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params), |row| {
                        Ok(row_to_instance(row))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Runs that have not reached a terminal state, oldest first.
    pub async fn list_active(&self) -> Result<Vec<WorkflowInstance>, ServerError> {
        self.db
            .with_conn_async(move |conn| {
                let sql = format!(
                    "SELECT {} FROM workflow_instances \
                     WHERE status IN ('pending', 'running') ORDER BY created_at ASC, id ASC",
                    INSTANCE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], |row| Ok(row_to_instance(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

fn is_at_step(instance: &WorkflowInstance, step_index: usize) -> bool {
    !instance.status.is_terminal()
        && instance.current_step == step_index
        && instance.step_logs.len() == step_index
}

fn load_instance(conn: &Connection, id: &str) -> rusqlite::Result<Option<WorkflowInstance>> {
    let sql = format!(
        "SELECT {} FROM workflow_instances WHERE id = ?1",
        INSTANCE_COLUMNS
    );
    conn.query_row(&sql, rusqlite::params![id], |row| Ok(row_to_instance(row)))
        .optional()
}

fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn row_to_instance(row: &Row<'_>) -> WorkflowInstance {
    let to_dt = |ms: Option<i64>| ms.and_then(|v| Utc.timestamp_millis_opt(v).single());

    let input_str: String = row.get(6).unwrap_or_default();
    let logs_str: String = row.get(7).unwrap_or_default();

    WorkflowInstance {
        id: row.get(0).unwrap_or_default(),
        template_id: row.get(1).unwrap_or_default(),
        tenant_id: row.get(2).unwrap_or_default(),
        status: InstanceStatus::from_str(&row.get::<_, String>(3).unwrap_or_default())
            .unwrap_or(InstanceStatus::Pending),
        current_step: row.get::<_, i64>(4).unwrap_or(0).max(0) as usize,
        triggered_by: row.get(5).unwrap_or_default(),
        input_data: serde_json::from_str::<InputData>(&input_str).unwrap_or_default(),
        step_logs: serde_json::from_str(&logs_str).unwrap_or_default(),
        completed_at: to_dt(row.get(8).unwrap_or(None)),
        failed_at: to_dt(row.get(9).unwrap_or(None)),
        failure_reason: row.get(10).unwrap_or(None),
        created_at: to_dt(row.get(11).ok()).unwrap_or_else(Utc::now),
        updated_at: to_dt(row.get(12).ok()).unwrap_or_else(Utc::now),
    }
}
