//! Messages exchanged with the coordinator.

use crate::actions::PendingAction;
use crate::error::FailureDetails;
use crate::history::{HistoryEvent, TaskId};
use serde::{Deserialize, Serialize};

/// Run one replay pass for an orchestration instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorRequest {
    pub instance_id: String,
    #[serde(default)]
    pub past_events: Vec<HistoryEvent>,
    #[serde(default)]
    pub new_events: Vec<HistoryEvent>,
}

/// Execute one activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRequest {
    pub name: String,
    pub task_id: TaskId,
    #[serde(default)]
    pub orchestration_instance_id: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorResponse {
    pub instance_id: String,
    pub actions: Vec<PendingAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<String>,
}

/// Outcome of an activity: exactly one of `result` and `failure_details` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResponse {
    pub instance_id: String,
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_details: Option<FailureDetails>,
}

impl ActivityResponse {
    pub fn completed(instance_id: impl Into<String>, task_id: TaskId, result: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            task_id,
            result: Some(result.into()),
            failure_details: None,
        }
    }

    pub fn failed(instance_id: impl Into<String>, task_id: TaskId, details: FailureDetails) -> Self {
        Self {
            instance_id: instance_id.into(),
            task_id,
            result: None,
            failure_details: Some(details),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure_details.is_none()
    }
}

/// A unit of work pulled from the coordinator stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkItem {
    Orchestrator(OrchestratorRequest),
    Activity(ActivityRequest),
}

impl WorkItem {
    pub fn kind_name(&self) -> &'static str {
        match self {
            WorkItem::Orchestrator(_) => "Orchestrator",
            WorkItem::Activity(_) => "Activity",
        }
    }
}
