pub mod agents;
pub mod tenant;
pub mod workflows;

use axum::Router;

use agentflow_core::AppState;

/// Build the complete API router with all sub-routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/api/agents", agents::router())
        .nest("/api/workflows", workflows::router())
}
