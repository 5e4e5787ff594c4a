//! Pending actions produced by a replay pass for the coordinator to carry out.

use crate::error::FailureDetails;
use crate::history::{HistoryEvent, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Routing metadata directing an action at another application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRouter {
    pub target_app_id: String,
}

impl TaskRouter {
    /// Router for a non-empty app id.
    pub(crate) fn for_app(app_id: Option<&str>) -> Option<Self> {
        app_id.filter(|id| !id.trim().is_empty()).map(|id| Self {
            target_app_id: id.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestrationStatus {
    Completed,
    Failed,
    ContinuedAsNew,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteOrchestration {
    pub status: OrchestrationStatus,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_details: Option<FailureDetails>,
    #[serde(default)]
    pub carryover_events: Vec<HistoryEvent>,
}

impl CompleteOrchestration {
    pub fn completed(result: impl Into<String>) -> Self {
        Self {
            status: OrchestrationStatus::Completed,
            result: result.into(),
            failure_details: None,
            carryover_events: Vec::new(),
        }
    }

    pub fn failed(details: FailureDetails) -> Self {
        Self {
            status: OrchestrationStatus::Failed,
            result: String::new(),
            failure_details: Some(details),
            carryover_events: Vec::new(),
        }
    }

    pub fn continued_as_new(input: impl Into<String>, carryover_events: Vec<HistoryEvent>) -> Self {
        Self {
            status: OrchestrationStatus::ContinuedAsNew,
            result: input.into(),
            failure_details: None,
            carryover_events,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ActionKind {
    ScheduleTask {
        name: String,
        input: String,
    },
    CreateTimer {
        fire_at: DateTime<Utc>,
    },
    CreateSubOrchestration {
        name: String,
        instance_id: String,
        input: String,
    },
    SendEvent {
        instance_id: String,
        name: String,
        data: String,
    },
    CompleteOrchestration(CompleteOrchestration),
}

/// A side effect requested during a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    pub id: TaskId,
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<TaskRouter>,
}

impl PendingAction {
    pub fn new(id: TaskId, kind: ActionKind) -> Self {
        Self { id, kind, router: None }
    }

    pub fn with_router(mut self, router: Option<TaskRouter>) -> Self {
        self.router = router;
        self
    }

    pub fn as_completion(&self) -> Option<&CompleteOrchestration> {
        match &self.kind {
            ActionKind::CompleteOrchestration(complete) => Some(complete),
            _ => None,
        }
    }

    pub fn is_continue_as_new(&self) -> bool {
        self.as_completion()
            .is_some_and(|c| c.status == OrchestrationStatus::ContinuedAsNew)
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ActionKind::ScheduleTask { .. } => "ScheduleTask",
            ActionKind::CreateTimer { .. } => "CreateTimer",
            ActionKind::CreateSubOrchestration { .. } => "CreateSubOrchestration",
            ActionKind::SendEvent { .. } => "SendEvent",
            ActionKind::CompleteOrchestration(_) => "CompleteOrchestration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_ignores_blank_app_ids() {
        assert_eq!(TaskRouter::for_app(None), None);
        assert_eq!(TaskRouter::for_app(Some("  ")), None);
        assert_eq!(
            TaskRouter::for_app(Some("billing")),
            Some(TaskRouter {
                target_app_id: "billing".to_string()
            })
        );
    }

    #[test]
    fn continue_as_new_is_detected() {
        let can = PendingAction::new(3, ActionKind::CompleteOrchestration(CompleteOrchestration::continued_as_new("{}", vec![])));
        assert!(can.is_continue_as_new());
        assert_eq!(can.kind_name(), "CompleteOrchestration");

        let done = PendingAction::new(4, ActionKind::CompleteOrchestration(CompleteOrchestration::completed("1")));
        assert!(!done.is_continue_as_new());
    }
}
