use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An agent registered to a tenant. Runs may only target agents their tenant owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(id: String, tenant_id: String, name: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            tenant_id,
            name,
            created_at: now,
            updated_at: now,
        }
    }
}
