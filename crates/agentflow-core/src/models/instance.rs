use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::template::StepSpec;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Completed and failed runs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Success,
    Failure,
}

/// Audit record of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepLogEntry {
    pub step_index: usize,
    pub step_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload captured at trigger time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputData {
    pub agent_ids: Vec<String>,
}

/// One triggered run of a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: String,
    pub template_id: String,
    pub tenant_id: String,
    pub status: InstanceStatus,
    pub current_step: usize,
    pub triggered_by: String,
    pub input_data: InputData,
    pub step_logs: Vec<StepLogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(
        id: String,
        template_id: String,
        tenant_id: String,
        triggered_by: String,
        input_data: InputData,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            template_id,
            tenant_id,
            status: InstanceStatus::Pending,
            current_step: 0,
            triggered_by,
            input_data,
            step_logs: Vec::new(),
            completed_at: None,
            failed_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Response of a trigger call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub id: String,
    pub template_id: String,
    pub status: InstanceStatus,
    pub current_step: usize,
}

impl From<&WorkflowInstance> for InstanceSummary {
    fn from(instance: &WorkflowInstance) -> Self {
        Self {
            id: instance.id.clone(),
            template_id: instance.template_id.clone(),
            status: instance.status,
            current_step: instance.current_step,
        }
    }
}

/// A single run joined with its template at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDetail {
    #[serde(flatten)]
    pub instance: WorkflowInstance,
    pub template_name: String,
    pub template_label: String,
    pub steps: Vec<StepSpec>,
}

/// Body of a trigger request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerWorkflowInput {
    #[serde(default)]
    pub agent_ids: Vec<String>,
}

/// Listing filter for `getInstances`.
#[derive(Debug, Clone, Default)]
pub struct ListInstancesQuery {
    pub status: Option<InstanceStatus>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancePage {
    pub items: Vec<WorkflowInstance>,
    pub next_cursor: Option<String>,
}
