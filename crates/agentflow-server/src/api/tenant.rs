//! Caller identity supplied by the fronting gateway.
//!
//! Authentication happens upstream; the engine only needs to know which
//! tenant (and which user) a request acts for.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use agentflow_core::ServerError;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    /// Falls back to the tenant id when the gateway sends no user.
    pub user_id: String,
}

impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        let tenant_id = header(TENANT_HEADER)
            .ok_or_else(|| ServerError::BadRequest(format!("Missing {} header", TENANT_HEADER)))?;
        let user_id = header(USER_HEADER).unwrap_or_else(|| tenant_id.clone());

        Ok(Self { tenant_id, user_id })
    }
}
