//! Workflow templates - reusable, ordered step definitions.
//!
//! Templates are provisioned out of band, usually from YAML:
//!
//! ```yaml
//! id: "agent-onboarding"
//! name: "agent-onboarding"
//! label: "Agent Onboarding"
//! description: "Provision and greet a fresh set of agents"
//! steps:
//!   - name: "provision"
//!     type: webhook
//!     timeoutMs: 300000
//!     config:
//!       url: "https://hooks.internal/provision"
//!   - name: "settle"
//!     type: wait
//!     timeoutMs: 10000
//!     config:
//!       durationMs: 2000
//! ```
//!
//! A template with a `tenantId` belongs to that tenant only; a template
//! without one is a system template visible to every tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Default step deadline (5 minutes).
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 300_000;

/// Kind of work a step performs. Step bodies live in external handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Webhook,
    Wait,
    Skill,
    Message,
    Config,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Wait => "wait",
            Self::Skill => "skill",
            Self::Message => "message",
            Self::Config => "config",
        }
    }
}

/// A single step of a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Handler-specific settings (e.g. webhook `url`, wait `durationMs`).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_STEP_TIMEOUT_MS
}

impl StepSpec {
    pub fn new(name: impl Into<String>, step_type: StepType, timeout_ms: u64) -> Self {
        Self {
            name: name.into(),
            step_type,
            timeout_ms,
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_system: bool,
    /// `None` means visible to all tenants.
    pub tenant_id: Option<String>,
    pub steps: Vec<StepSpec>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowTemplate {
    pub fn new(
        id: String,
        name: String,
        label: String,
        description: Option<String>,
        tenant_id: Option<String>,
        steps: Vec<StepSpec>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            label,
            description,
            is_system: tenant_id.is_none(),
            tenant_id,
            steps,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `tenant_id` may read or run this template.
    pub fn is_visible_to(&self, tenant_id: &str) -> bool {
        match &self.tenant_id {
            None => true,
            Some(owner) => owner == tenant_id,
        }
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.id.trim().is_empty() {
            return Err(ServerError::BadRequest("Template id must not be empty".into()));
        }
        if self.steps.is_empty() {
            return Err(ServerError::BadRequest(format!(
                "Template '{}' must define at least one step",
                self.id
            )));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(ServerError::BadRequest(format!(
                    "Step {} of template '{}' has an empty name",
                    i, self.id
                )));
            }
            if step.timeout_ms == 0 {
                return Err(ServerError::BadRequest(format!(
                    "Step '{}' of template '{}' must have a positive timeoutMs",
                    step.name, self.id
                )));
            }
        }
        Ok(())
    }
}

/// A template document as authored in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDefinition {
    pub id: String,
    pub name: String,
    /// Display label; falls back to `name`.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<StepSpec>,
}

impl TemplateDefinition {
    /// Parse a template definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ServerError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ServerError::BadRequest(format!("Failed to parse template YAML: {}", e)))
    }

    /// Load a template definition from a file path.
    pub fn from_file(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::BadRequest(format!("Failed to read template file '{}': {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    /// Build a validated template owned by `tenant_id` (or the system when `None`).
    pub fn into_template(self, tenant_id: Option<String>) -> Result<WorkflowTemplate, ServerError> {
        let label = self.label.unwrap_or_else(|| self.name.clone());
        let template = WorkflowTemplate::new(
            self.id,
            self.name,
            label,
            self.description,
            tenant_id,
            self.steps,
        );
        template.validate()?;
        Ok(template)
    }
}
