//! Step handlers - the external bodies the coordinator invokes.
//!
//! The coordinator only knows the contract: run the step, succeed or fail,
//! within `timeoutMs`. What a step actually does is up to the handler
//! registered for its [`StepType`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::template::{StepSpec, StepType};

/// Everything a handler gets to see about the step it runs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepContext {
    pub tenant_id: String,
    pub instance_id: String,
    pub template_id: String,
    pub step_index: usize,
    pub step: StepSpec,
    pub agent_ids: Vec<String>,
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Execute the step. An `Err` carries the failure reason recorded on the run.
    async fn run(&self, ctx: &StepContext) -> Result<(), String>;
}

/// Maps step types to their handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `webhook` and `wait` handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(StepType::Webhook, Arc::new(WebhookHandler::new()));
        registry.register(StepType::Wait, Arc::new(WaitHandler));
        registry
    }

    pub fn register(&mut self, step_type: StepType, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(step_type, handler);
    }

    pub fn get(&self, step_type: StepType) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&step_type).cloned()
    }
}

/// `wait` - sleeps for `config.durationMs` (default 0).
pub struct WaitHandler;

#[async_trait]
impl StepHandler for WaitHandler {
    async fn run(&self, ctx: &StepContext) -> Result<(), String> {
        let duration_ms = ctx
            .step
            .config
            .get("durationMs")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        Ok(())
    }
}

/// `webhook` - POSTs the step context as JSON to `config.url`.
pub struct WebhookHandler {
    client: reqwest::Client,
}

impl WebhookHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebhookHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepHandler for WebhookHandler {
    async fn run(&self, ctx: &StepContext) -> Result<(), String> {
        let url = ctx
            .step
            .config
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("Webhook step '{}' has no url configured", ctx.step.name))?;

        let resp = self
            .client
            .post(url)
            .json(ctx)
            .send()
            .await
            .map_err(|e| format!("Webhook request to {} failed: {}", url, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!(
                "Webhook {} returned {}: {}",
                url,
                status,
                body.chars().take(200).collect::<String>()
            ));
        }
        Ok(())
    }
}
