//! Core error types for the AgentFlow engine.
//!
//! `ServerError` is returned by every store and engine operation.
//! When the `axum` feature is enabled, it also implements `IntoResponse`
//! so it can be used directly as an axum handler error type.
//!
//! `StepError` describes why a single step did not succeed. It is folded
//! into the run record (failure reason + step log) and never returned to
//! a caller.

use crate::models::template::StepType;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome of a step that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("Step '{step}' timed out after {timeout_ms}ms")]
    Timeout { step: String, timeout_ms: u64 },

    #[error("{0}")]
    Handler(String),

    #[error("No handler registered for step type '{}'", .0.as_str())]
    MissingHandler(StepType),
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, message) = match &self {
            ServerError::Database(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            ServerError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServerError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ServerError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_messages() {
        let timeout = StepError::Timeout {
            step: "notify".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(timeout.to_string(), "Step 'notify' timed out after 250ms");

        let missing = StepError::MissingHandler(StepType::Skill);
        assert_eq!(
            missing.to_string(),
            "No handler registered for step type 'skill'"
        );

        assert_eq!(StepError::Handler("boom".into()).to_string(), "boom");
    }
}
