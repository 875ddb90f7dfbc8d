//! Opaque pagination cursor for run listings.
//!
//! Runs are listed newest first with the id as tiebreak, so the position
//! after an item is fully described by `(created_at, id)`. The pair is
//! encoded as base64url(`"{createdAtMillis}:{id}"`).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::ServerError;
use crate::models::instance::WorkflowInstance;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceCursor {
    pub created_at_ms: i64,
    pub id: String,
}

impl InstanceCursor {
    /// Cursor pointing just past `instance`.
    pub fn after(instance: &WorkflowInstance) -> Self {
        Self {
            created_at_ms: instance.created_at.timestamp_millis(),
            id: instance.id.clone(),
        }
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.created_at_ms, self.id))
    }

    pub fn decode(token: &str) -> Result<Self, ServerError> {
        let invalid = || ServerError::BadRequest(format!("Invalid cursor: {}", token));

        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (ts, id) = raw.split_once(':').ok_or_else(invalid)?;
        let created_at_ms = ts.parse::<i64>().map_err(|_| invalid())?;
        if id.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            created_at_ms,
            id: id.to_string(),
        })
    }
}
