//! AgentFlow Core - transport-agnostic workflow orchestration for tenant agents.
//!
//! A tenant triggers a predefined multi-step workflow against a set of its
//! agents; the engine records the run, schedules its steps one at a time
//! through a work queue, enforces per-step deadlines and guarantees every run
//! ends in exactly one terminal state under at-least-once delivery.
//!
//! This crate has **no HTTP framework dependency** by default, making it
//! suitable for use in:
//!
//! - HTTP servers (via `agentflow-server`)
//! - CLI tools (via `agentflow-cli`)
//!
//! # Feature Flags
//!
//! - `axum` - Enables `IntoResponse` impl on `ServerError` for use in axum handlers.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod state;
pub mod store;
pub mod workflow;

// Convenience re-exports
pub use config::EngineConfig;
pub use db::Database;
pub use error::{ServerError, StepError};
pub use state::{AppState, AppStateInner};
