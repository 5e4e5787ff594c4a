#![allow(dead_code)]

pub mod tracing_capture;

use chrono::{DateTime, TimeZone, Utc};
use replayflow::runtime::{ActivityRegistry, ObservabilityConfig, WorkflowRegistry};
use replayflow::{
    ActionKind, CompleteOrchestration, HistoryEvent, InMemoryCoordinator, OrchestratorRequest, OrchestratorResponse,
    PendingAction, TaskRegistry, Worker, WorkerOptions,
};
use std::sync::Arc;

pub const INSTANCE: &str = "instance-1";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn at_secs(secs: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(secs)
}

/// `ExecutionStarted` stamped with [`t0`], so virtual time is stable across passes.
pub fn started(name: &str, input: Option<&str>) -> HistoryEvent {
    HistoryEvent::execution_started(-1, name, input.map(str::to_string)).with_timestamp(t0())
}

pub fn quiet_options() -> WorkerOptions {
    WorkerOptions {
        observability: ObservabilityConfig {
            log_level: "warn".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Worker over an in-memory coordinator nobody reads from.
pub fn worker(workflows: WorkflowRegistry, activities: ActivityRegistry) -> Worker {
    let (coordinator, _handle) = InMemoryCoordinator::new();
    Worker::new(coordinator, TaskRegistry::new(workflows, activities), quiet_options()).unwrap()
}

pub fn workflow_worker(workflows: WorkflowRegistry) -> Worker {
    worker(workflows, ActivityRegistry::default())
}

pub fn run_pass(worker: &Worker, past: Vec<HistoryEvent>, new: Vec<HistoryEvent>) -> OrchestratorResponse {
    worker.process_orchestrator(OrchestratorRequest {
        instance_id: INSTANCE.to_string(),
        past_events: past,
        new_events: new,
    })
}

pub fn completion(response: &OrchestratorResponse) -> Option<&CompleteOrchestration> {
    response.actions.iter().find_map(PendingAction::as_completion)
}

pub fn kinds(response: &OrchestratorResponse) -> Vec<&'static str> {
    response.actions.iter().map(PendingAction::kind_name).collect()
}

pub fn scheduled_names(response: &OrchestratorResponse) -> Vec<String> {
    response
        .actions
        .iter()
        .filter_map(|a| match &a.kind {
            ActionKind::ScheduleTask { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

pub fn shared(worker: Worker) -> Arc<Worker> {
    Arc::new(worker)
}
