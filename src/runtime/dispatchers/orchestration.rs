//! Orchestrator work items: locate the workflow, replay history, translate the outcome.

use crate::actions::{ActionKind, CompleteOrchestration, PendingAction};
use crate::context::OrchestrationContext;
use crate::history::{EventKind, HistoryEvent};
use crate::identity::{TaskIdentifier, WorkflowMetadata};
use crate::protocol::{OrchestratorRequest, OrchestratorResponse};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::super::Worker;
use super::super::replay_engine::{ReplayEngine, TurnResult, virtual_start_time};

/// Name, version and input of the first `ExecutionStarted`, searching past events first.
fn find_execution_started<'a>(
    past_events: &'a [HistoryEvent],
    new_events: &'a [HistoryEvent],
) -> Option<(&'a str, Option<&'a str>, Option<&'a str>)> {
    past_events.iter().chain(new_events).find_map(|event| match &event.kind {
        EventKind::ExecutionStarted { name, version, input } => {
            Some((name.as_str(), version.as_deref(), input.as_deref()))
        }
        _ => None,
    })
}

impl Worker {
    /// Run one replay pass and build the response for the coordinator.
    ///
    /// Unknown workflows produce an empty action list so the coordinator can
    /// retry once a worker that knows them is available.
    pub fn process_orchestrator(&self, request: OrchestratorRequest) -> OrchestratorResponse {
        let OrchestratorRequest {
            instance_id,
            past_events,
            new_events,
        } = request;
        let empty = |instance_id: String| OrchestratorResponse {
            instance_id,
            actions: Vec::new(),
            custom_status: None,
        };

        let Some((name, version, input)) = find_execution_started(&past_events, &new_events) else {
            warn!(
                target: "replayflow::worker",
                instance_id = %instance_id,
                past_events = past_events.len(),
                new_events = new_events.len(),
                "no ExecutionStarted in history"
            );
            self.metrics.record_orchestration_not_found();
            return empty(instance_id);
        };
        let identifier = match version {
            Some(v) => TaskIdentifier::with_version(name, v),
            None => TaskIdentifier::new(name),
        };
        let input = input.unwrap_or_default().to_string();

        let Some(handler) = self.registry.try_create_workflow(&identifier, self.services.as_ref()) else {
            warn!(
                target: "replayflow::worker",
                instance_id = %instance_id,
                workflow_name = %identifier.name,
                requested_version = identifier.version.as_deref().unwrap_or("latest"),
                "workflow not registered"
            );
            self.metrics.record_orchestration_not_found();
            return empty(instance_id);
        };

        let started = Instant::now();
        let ctx = OrchestrationContext::new(
            WorkflowMetadata::new(instance_id.clone(), identifier.clone()),
            virtual_start_time(&past_events, &new_events),
            self.serializer.clone(),
            self.log_sink.clone(),
        );
        let mut engine = ReplayEngine::new(ctx, handler, input);
        engine.process_events(&past_events, true);
        engine.process_events(&new_events, false);
        let outcome = engine.finish();

        let mut actions = outcome.actions;
        let label = match outcome.result {
            TurnResult::Continue => "suspended",
            TurnResult::ContinueAsNew => {
                self.metrics.record_continue_as_new();
                "continued_as_new"
            }
            TurnResult::Completed(result) => {
                self.metrics.record_orchestration_completion();
                actions.push(PendingAction::new(
                    outcome.completion_id,
                    ActionKind::CompleteOrchestration(CompleteOrchestration::completed(result)),
                ));
                "completed"
            }
            TurnResult::Failed(err) => {
                self.metrics.record_orchestration_failure();
                warn!(
                    target: "replayflow::orchestration",
                    instance_id = %instance_id,
                    workflow_name = %identifier,
                    error_type = %err.error_type(),
                    error = %err,
                    "workflow failed"
                );
                actions = vec![PendingAction::new(
                    outcome.completion_id,
                    ActionKind::CompleteOrchestration(CompleteOrchestration::failed(err.to_failure_details())),
                )];
                "failed"
            }
        };

        let duration_ms = super::duration_ms(started.elapsed());
        if label == "suspended" {
            debug!(
                target: "replayflow::orchestration",
                instance_id = %instance_id,
                workflow_name = %identifier,
                actions = actions.len(),
                duration_ms,
                "replay pass suspended"
            );
        } else {
            info!(
                target: "replayflow::orchestration",
                instance_id = %instance_id,
                workflow_name = %identifier,
                outcome = label,
                actions = actions.len(),
                duration_ms,
                "replay pass finished"
            );
        }

        OrchestratorResponse {
            instance_id,
            actions,
            custom_status: outcome.custom_status,
        }
    }
}
