//! History events delivered by the coordinator.
//!
//! Events are plain data. Completion events reference their scheduling event
//! through an optional task id; when it is absent the replay engine correlates
//! positionally.

use crate::error::FailureDetails;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequence number linking a scheduling event to its completion.
pub type TaskId = i32;

/// Kind of a correlated (id-bearing) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskKind {
    Activity,
    ChildWorkflow,
    Timer,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Activity => write!(f, "activity"),
            TaskKind::ChildWorkflow => write!(f, "child workflow"),
            TaskKind::Timer => write!(f, "timer"),
        }
    }
}

/// One immutable fact about an orchestration instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub event_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EventKind {
    ExecutionStarted {
        name: String,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        input: Option<String>,
    },
    TaskScheduled {
        name: String,
        #[serde(default)]
        input: Option<String>,
    },
    TaskCompleted {
        #[serde(default)]
        task_scheduled_id: Option<TaskId>,
        #[serde(default)]
        result: Option<String>,
    },
    TaskFailed {
        #[serde(default)]
        task_scheduled_id: Option<TaskId>,
        #[serde(default)]
        failure_details: Option<FailureDetails>,
    },
    TimerCreated {
        fire_at: DateTime<Utc>,
    },
    TimerFired {
        #[serde(default)]
        timer_id: Option<TaskId>,
        fire_at: DateTime<Utc>,
    },
    EventRaised {
        name: String,
        #[serde(default)]
        input: Option<String>,
    },
    EventSent {
        instance_id: String,
        name: String,
        #[serde(default)]
        input: Option<String>,
    },
    SubOrchestrationInstanceCreated {
        name: String,
        instance_id: String,
        #[serde(default)]
        input: Option<String>,
    },
    SubOrchestrationInstanceCompleted {
        #[serde(default)]
        task_scheduled_id: Option<TaskId>,
        #[serde(default)]
        result: Option<String>,
    },
    SubOrchestrationInstanceFailed {
        #[serde(default)]
        task_scheduled_id: Option<TaskId>,
        #[serde(default)]
        failure_details: Option<FailureDetails>,
    },
}

impl HistoryEvent {
    pub fn new(event_id: TaskId, kind: EventKind) -> Self {
        Self {
            event_id,
            timestamp: None,
            kind,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn execution_started(event_id: TaskId, name: impl Into<String>, input: Option<String>) -> Self {
        Self::new(
            event_id,
            EventKind::ExecutionStarted {
                name: name.into(),
                version: None,
                input,
            },
        )
    }

    pub fn task_scheduled(event_id: TaskId, name: impl Into<String>, input: Option<String>) -> Self {
        Self::new(event_id, EventKind::TaskScheduled { name: name.into(), input })
    }

    pub fn task_completed(event_id: TaskId, task_scheduled_id: Option<TaskId>, result: Option<String>) -> Self {
        Self::new(
            event_id,
            EventKind::TaskCompleted {
                task_scheduled_id,
                result,
            },
        )
    }

    pub fn task_failed(event_id: TaskId, task_scheduled_id: Option<TaskId>, details: FailureDetails) -> Self {
        Self::new(
            event_id,
            EventKind::TaskFailed {
                task_scheduled_id,
                failure_details: Some(details),
            },
        )
    }

    pub fn timer_created(event_id: TaskId, fire_at: DateTime<Utc>) -> Self {
        Self::new(event_id, EventKind::TimerCreated { fire_at })
    }

    pub fn timer_fired(event_id: TaskId, timer_id: Option<TaskId>, fire_at: DateTime<Utc>) -> Self {
        Self::new(event_id, EventKind::TimerFired { timer_id, fire_at })
    }

    pub fn event_raised(event_id: TaskId, name: impl Into<String>, input: Option<String>) -> Self {
        Self::new(event_id, EventKind::EventRaised { name: name.into(), input })
    }

    pub fn event_sent(
        event_id: TaskId,
        instance_id: impl Into<String>,
        name: impl Into<String>,
        input: Option<String>,
    ) -> Self {
        Self::new(
            event_id,
            EventKind::EventSent {
                instance_id: instance_id.into(),
                name: name.into(),
                input,
            },
        )
    }

    pub fn child_created(
        event_id: TaskId,
        name: impl Into<String>,
        instance_id: impl Into<String>,
        input: Option<String>,
    ) -> Self {
        Self::new(
            event_id,
            EventKind::SubOrchestrationInstanceCreated {
                name: name.into(),
                instance_id: instance_id.into(),
                input,
            },
        )
    }

    pub fn child_completed(event_id: TaskId, task_scheduled_id: Option<TaskId>, result: Option<String>) -> Self {
        Self::new(
            event_id,
            EventKind::SubOrchestrationInstanceCompleted {
                task_scheduled_id,
                result,
            },
        )
    }

    pub fn child_failed(event_id: TaskId, task_scheduled_id: Option<TaskId>, details: FailureDetails) -> Self {
        Self::new(
            event_id,
            EventKind::SubOrchestrationInstanceFailed {
                task_scheduled_id,
                failure_details: Some(details),
            },
        )
    }

    /// Task id referenced by a completion, failure or timer-fired event.
    pub fn task_scheduled_id(&self) -> Option<TaskId> {
        match &self.kind {
            EventKind::TaskCompleted { task_scheduled_id, .. }
            | EventKind::TaskFailed { task_scheduled_id, .. }
            | EventKind::SubOrchestrationInstanceCompleted { task_scheduled_id, .. }
            | EventKind::SubOrchestrationInstanceFailed { task_scheduled_id, .. } => *task_scheduled_id,
            EventKind::TimerFired { timer_id, .. } => *timer_id,
            _ => None,
        }
    }

    /// Kind of operation this event resolves, if it is a completion.
    pub fn completion_kind(&self) -> Option<TaskKind> {
        match &self.kind {
            EventKind::TaskCompleted { .. } | EventKind::TaskFailed { .. } => Some(TaskKind::Activity),
            EventKind::SubOrchestrationInstanceCompleted { .. } | EventKind::SubOrchestrationInstanceFailed { .. } => {
                Some(TaskKind::ChildWorkflow)
            }
            EventKind::TimerFired { .. } => Some(TaskKind::Timer),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            EventKind::ExecutionStarted { .. } => "ExecutionStarted",
            EventKind::TaskScheduled { .. } => "TaskScheduled",
            EventKind::TaskCompleted { .. } => "TaskCompleted",
            EventKind::TaskFailed { .. } => "TaskFailed",
            EventKind::TimerCreated { .. } => "TimerCreated",
            EventKind::TimerFired { .. } => "TimerFired",
            EventKind::EventRaised { .. } => "EventRaised",
            EventKind::EventSent { .. } => "EventSent",
            EventKind::SubOrchestrationInstanceCreated { .. } => "SubOrchestrationInstanceCreated",
            EventKind::SubOrchestrationInstanceCompleted { .. } => "SubOrchestrationInstanceCompleted",
            EventKind::SubOrchestrationInstanceFailed { .. } => "SubOrchestrationInstanceFailed",
        }
    }

    /// Name and payload when this is an `EventRaised`.
    pub fn as_event_raised(&self) -> Option<(&str, Option<&str>)> {
        match &self.kind {
            EventKind::EventRaised { name, input } => Some((name.as_str(), input.as_deref())),
            _ => None,
        }
    }

    /// Name and input when this is an `ExecutionStarted`.
    pub fn as_execution_started(&self) -> Option<(&str, Option<&str>)> {
        match &self.kind {
            EventKind::ExecutionStarted { name, input, .. } => Some((name.as_str(), input.as_deref())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_events_expose_scheduled_id() {
        let completed = HistoryEvent::task_completed(4, Some(1), Some("\"ok\"".into()));
        assert_eq!(completed.task_scheduled_id(), Some(1));
        assert_eq!(completed.completion_kind(), Some(TaskKind::Activity));

        let fired = HistoryEvent::timer_fired(5, Some(2), Utc::now());
        assert_eq!(fired.task_scheduled_id(), Some(2));
        assert_eq!(fired.completion_kind(), Some(TaskKind::Timer));

        let scheduled = HistoryEvent::task_scheduled(1, "DoWork", None);
        assert_eq!(scheduled.task_scheduled_id(), None);
        assert_eq!(scheduled.completion_kind(), None);
    }

    #[test]
    fn missing_payload_fields_deserialize_as_none() {
        let json = r#"{"eventId":3,"kind":{"type":"EventRaised","name":"Approve"}}"#;
        let event: HistoryEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.as_event_raised(), Some(("Approve", None)));

        let json = r#"{"eventId":3,"kind":{"type":"EventRaised","name":"Approve","input":null}}"#;
        let event: HistoryEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.as_event_raised(), Some(("Approve", None)));
    }

    #[test]
    fn json_shape_uses_camel_case_fields() {
        let event = HistoryEvent::child_created(7, "Child", "child-1", None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["type"], "SubOrchestrationInstanceCreated");
        assert_eq!(json["kind"]["instanceId"], "child-1");
        assert_eq!(json["eventId"], 7);
    }
}
