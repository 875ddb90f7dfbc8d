//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses
//! the agentflow-core domain logic through `AppState`.

pub mod agent;
pub mod server;
pub mod template;
pub mod workflow;

use std::sync::Arc;

use agentflow_core::workflow::{HandlerRegistry, JobOptions, StepJob, WorkQueue};
use agentflow_core::{AppState, AppStateInner, Database, EngineConfig, ServerError};
use async_trait::async_trait;

fn open_db(db_path: &str) -> Database {
    Database::open(db_path).unwrap_or_else(|e| {
        eprintln!("Failed to open database '{}': {}", db_path, e);
        std::process::exit(1);
    })
}

/// Queue for processes that do not run an engine. Jobs are not delivered
/// here: the run stays `pending` (or `running`) in the database and the next
/// engine to start picks it up through `resume_active`.
pub struct DeferredQueue;

#[async_trait]
impl WorkQueue for DeferredQueue {
    async fn enqueue(&self, _name: &str, job: StepJob, _options: JobOptions) -> Result<(), ServerError> {
        tracing::info!(
            "Step {} of run {} will execute when an engine (agentflow server, or trigger --wait) starts",
            job.step_index,
            job.instance_id
        );
        Ok(())
    }
}

/// Open the database for commands that do not execute steps.
///
/// No worker pool is started and no active run is resumed, so the process
/// can exit as soon as the command is done without cutting a step short.
pub fn init_state(db_path: &str) -> AppState {
    let db = open_db(db_path);
    Arc::new(AppStateInner::new(
        db,
        Arc::new(DeferredQueue),
        HandlerRegistry::with_defaults(),
        EngineConfig::default(),
    ))
}

/// Open the database and start the in-process workflow engine, resuming any
/// runs a previous process left active.
pub async fn init_engine(db_path: &str) -> AppState {
    let db = open_db(db_path);
    AppStateInner::start(db, HandlerRegistry::with_defaults(), EngineConfig::default())
        .await
        .unwrap_or_else(|e| {
            eprintln!("Failed to start workflow engine: {}", e);
            std::process::exit(1);
        })
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// Serialize `value` and pretty-print it.
pub fn print_as_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_value(value).map_err(|e| format!("Failed to serialize: {}", e))?;
    print_json(&json);
    Ok(())
}
