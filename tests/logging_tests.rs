//! Replay-safe logging and worker log output.

mod common;

use common::tracing_capture::{events_for, install_tracing_capture};
use common::*;
use replayflow::runtime::{ActivityRegistry, WorkflowRegistry};
use replayflow::{ActivityContext, ActivityRequest, HistoryEvent, OrchestrationContext, WorkflowError, replay_info};

fn chatty_workflows() -> WorkflowRegistry {
    WorkflowRegistry::builder()
        .register("Chatty", |ctx: OrchestrationContext, _input: String| async move {
            replay_info!(ctx, step = "before", "before activity");
            let logger = ctx.create_replay_safe_logger("chatty");
            logger.info("logger before activity");
            let _: String = ctx.call_activity("A", &()).await?;
            replay_info!(ctx, step = "after", "after activity");
            logger.info("logger after activity");
            Ok::<_, WorkflowError>(String::new())
        })
        .build()
}

#[test]
fn replay_safe_logging_is_silent_while_replaying() {
    let worker = workflow_worker(chatty_workflows());
    let (captured, _guard) = install_tracing_capture();

    run_pass(
        &worker,
        vec![started("Chatty", None), HistoryEvent::task_scheduled(0, "A", None)],
        vec![HistoryEvent::task_completed(-1, Some(0), Some("\"a\"".into()))],
    );

    let messages: Vec<String> = events_for(&captured, "replayflow::orchestration")
        .into_iter()
        .filter(|e| e.message.contains("activity"))
        .map(|e| e.message)
        .collect();
    assert!(messages.iter().all(|m| !m.contains("before")), "{messages:?}");
    assert!(messages.iter().any(|m| m == "after activity"));
    assert!(messages.iter().any(|m| m.contains("logger after activity")));
}

#[test]
fn first_execution_logs_everything() {
    let worker = workflow_worker(chatty_workflows());
    let (captured, _guard) = install_tracing_capture();

    run_pass(&worker, vec![], vec![started("Chatty", None)]);

    let events = events_for(&captured, "replayflow::orchestration");
    let before = events
        .iter()
        .find(|e| e.message == "before activity")
        .expect("live pass logs");
    assert_eq!(before.field("instance_id").as_deref(), Some(INSTANCE));
    assert_eq!(before.field("step").as_deref(), Some("before"));
}

#[tokio::test]
async fn activity_outcomes_are_logged_with_context() {
    let activities = ActivityRegistry::builder()
        .register("Fail", |_ctx: ActivityContext, _input: String| async move {
            Err::<String, _>(WorkflowError::application("Validation", "bad"))
        })
        .build();
    let worker = worker(WorkflowRegistry::default(), activities);
    let (captured, _guard) = install_tracing_capture();

    worker
        .process_activity(ActivityRequest {
            name: "Fail".into(),
            task_id: 9,
            orchestration_instance_id: Some(INSTANCE.into()),
            input: None,
        })
        .await;

    let events = events_for(&captured, "replayflow::activity");
    let failed = events.iter().find(|e| e.message == "activity failed").expect("failure logged");
    assert_eq!(failed.field("activity_name").as_deref(), Some("Fail"));
    assert_eq!(failed.field("task_id").as_deref(), Some("9"));
    assert_eq!(failed.field("outcome").as_deref(), Some("app_error"));
}

#[test]
fn unregistered_workflow_is_logged_with_requested_version() {
    let worker = workflow_worker(chatty_workflows());
    let (captured, _guard) = install_tracing_capture();

    let response = run_pass(&worker, vec![], vec![started("Missing", None)]);
    assert!(response.actions.is_empty());

    let events = events_for(&captured, "replayflow::worker");
    let missing = events
        .iter()
        .find(|e| e.message == "workflow not registered")
        .expect("miss logged");
    assert_eq!(missing.field("workflow_name").as_deref(), Some("Missing"));
    assert_eq!(missing.field("requested_version").as_deref(), Some("latest"));
}
