use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::ServerError;
use crate::models::agent::Agent;
use crate::workflow::AgentDirectory;

#[derive(Clone)]
pub struct AgentStore {
    db: Database,
}

impl AgentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, agent: &Agent) -> Result<(), ServerError> {
        let a = agent.clone();
        let existing = self.get(&a.id).await?;
        if let Some(current) = existing {
            if current.tenant_id != a.tenant_id {
                return Err(ServerError::Conflict(format!(
                    "Agent {} is registered to another tenant",
                    a.id
                )));
            }
        }
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO agents (id, tenant_id, name, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET
                       name = excluded.name,
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        a.id,
                        a.tenant_id,
                        a.name,
                        a.created_at.timestamp_millis(),
                        a.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, agent_id: &str) -> Result<Option<Agent>, ServerError> {
        let id = agent_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, tenant_id, name, created_at, updated_at
                     FROM agents WHERE id = ?1",
                )?;
                stmt.query_row(rusqlite::params![id], |row| Ok(row_to_agent(row)))
                    .optional()
            })
            .await
    }

    pub async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Agent>, ServerError> {
        let tenant_id = tenant_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, tenant_id, name, created_at, updated_at
                     FROM agents WHERE tenant_id = ?1 ORDER BY created_at DESC, id DESC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![tenant_id], |row| Ok(row_to_agent(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Return the subset of `ids` registered to `tenant_id`.
    pub async fn find_owned_ids(
        &self,
        tenant_id: &str,
        ids: &[String],
    ) -> Result<Vec<String>, ServerError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let tenant_id = tenant_id.to_string();
        let ids = ids.to_vec();
        self.db
            .with_conn_async(move |conn| {
                let placeholders = (0..ids.len())
                    .map(|i| format!("?{}", i + 2))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "SELECT id FROM agents WHERE tenant_id = ?1 AND id IN ({})",
                    placeholders
                );
                let params = rusqlite::params_from_iter(std::iter::once(&tenant_id).chain(ids.iter()));
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params, |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

#[async_trait]
impl AgentDirectory for AgentStore {
    async fn find_owned(&self, tenant_id: &str, ids: &[String]) -> Result<Vec<String>, ServerError> {
        self.find_owned_ids(tenant_id, ids).await
    }
}

use rusqlite::Row;

fn row_to_agent(row: &Row<'_>) -> Agent {
    let created_ms: i64 = row.get(3).unwrap_or(0);
    let updated_ms: i64 = row.get(4).unwrap_or(0);

    Agent {
        id: row.get(0).unwrap_or_default(),
        tenant_id: row.get(1).unwrap_or_default(),
        name: row.get(2).unwrap_or_default(),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms)
            .unwrap_or_else(Utc::now),
    }
}
