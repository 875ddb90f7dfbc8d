//! AgentFlow Server - workflow orchestration over HTTP.
//!
//! A thin axum adapter over `agentflow-core`, providing:
//! - RESTful JSON API for templates, workflow runs and tenant agents
//! - The in-process worker pool that executes workflow steps
//!
//! This crate can be used standalone (via `agentflow server`) or embedded
//! in another tokio application through [`start_server_with_state`].

pub mod api;

use std::net::SocketAddr;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use agentflow_core::workflow::HandlerRegistry;
use agentflow_core::{AppState, AppStateInner, Database, EngineConfig};

/// Configuration for the AgentFlow HTTP server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    /// Number of step jobs executed concurrently by the worker pool.
    pub worker_concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3210,
            db_path: "agentflow.db".to_string(),
            worker_concurrency: 4,
        }
    }
}

/// Open the database, start the workflow engine and resume any runs left
/// active by a previous process.
pub async fn create_app_state(config: &ServerConfig) -> Result<AppState, String> {
    let db = Database::open(&config.db_path)
        .map_err(|e| format!("Failed to open database: {}", e))?;

    let engine = EngineConfig {
        worker_concurrency: config.worker_concurrency.max(1),
        ..EngineConfig::default()
    };

    AppStateInner::start(db, HandlerRegistry::with_defaults(), engine)
        .await
        .map_err(|e| format!("Failed to start workflow engine: {}", e))
}

/// Start the AgentFlow HTTP server.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    // The CLI may already have installed a subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentflow_core=info,agentflow_server=info,tower_http=info".into()),
        )
        .try_init();

    tracing::info!(
        "Starting AgentFlow server on {}:{}",
        config.host,
        config.port
    );

    let state = create_app_state(&config).await?;

    start_server_with_state(config, state).await
}

/// Build the full application router over `state`.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::api_router())
        .route("/api/health", axum::routing::get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Start the HTTP server with a pre-built `AppState`.
///
/// This variant is useful when the engine is shared with other consumers
/// in the same process.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("AgentFlow server listening on {}", local_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "agentflow-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
