use crate::actions::PendingAction;
use crate::context::OrchestrationContext;
use crate::error::WorkflowError;
use crate::history::{EventKind, HistoryEvent, TaskId};
use crate::runtime::{WorkflowHandler, panic_message};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::task::noop_waker_ref;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tracing::debug;

/// Result of driving a workflow body through one pass.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnResult {
    /// The body is suspended on something history has not resolved yet.
    Continue,
    /// The body returned this serialized result.
    Completed(String),
    /// The body returned an error or panicked.
    Failed(WorkflowError),
    /// The body returned after requesting continue-as-new.
    ContinueAsNew,
}

/// Everything a pass produced.
#[derive(Debug)]
pub struct ReplayOutcome {
    pub result: TurnResult,
    pub actions: Vec<PendingAction>,
    pub custom_status: Option<String>,
    /// Task id reserved for the completion action, if the body finished.
    pub completion_id: TaskId,
}

/// Virtual start time of a pass: the first timestamped event, else the wall clock.
pub fn virtual_start_time(past_events: &[HistoryEvent], new_events: &[HistoryEvent]) -> DateTime<Utc> {
    past_events
        .iter()
        .chain(new_events)
        .find_map(|e| e.timestamp)
        .unwrap_or_else(Utc::now)
}

/// Streams history into a context and polls the workflow body after every event.
///
/// The body starts at `ExecutionStarted` and never runs in the background: it
/// only advances inside [`ReplayEngine::process_events`] and [`ReplayEngine::finish`].
pub struct ReplayEngine {
    ctx: OrchestrationContext,
    handler: Arc<dyn WorkflowHandler>,
    input: String,
    body: Option<BoxFuture<'static, Result<String, WorkflowError>>>,
    result: Option<Result<String, WorkflowError>>,
}

impl ReplayEngine {
    pub fn new(ctx: OrchestrationContext, handler: Arc<dyn WorkflowHandler>, input: String) -> Self {
        Self {
            ctx,
            handler,
            input,
            body: None,
            result: None,
        }
    }

    pub fn context(&self) -> &OrchestrationContext {
        &self.ctx
    }

    /// Apply one batch of history in order.
    pub fn process_events(&mut self, events: &[HistoryEvent], is_replaying: bool) {
        self.ctx.set_replaying(is_replaying);
        for event in events {
            self.ctx.apply_event(event);
            if matches!(event.kind, EventKind::ExecutionStarted { .. }) {
                self.start_body();
            }
            self.poll_body();
        }
    }

    /// Poll once more with replay off and collect the outcome.
    pub fn finish(mut self) -> ReplayOutcome {
        self.ctx.set_replaying(false);
        self.start_body();
        self.poll_body();

        let result = match self.result.take() {
            None => TurnResult::Continue,
            Some(Err(err)) => TurnResult::Failed(err),
            Some(Ok(_)) if self.ctx.has_continue_as_new() => TurnResult::ContinueAsNew,
            Some(Ok(output)) => TurnResult::Completed(output),
        };
        let completion_id = self.ctx.next_task_id();
        let output = self.ctx.take_output();
        debug!(
            target: "replayflow::replay",
            instance_id = %self.ctx.instance_id(),
            actions = output.actions.len(),
            result = ?result,
            "replay pass finished"
        );
        ReplayOutcome {
            result,
            actions: output.actions,
            custom_status: output.custom_status,
            completion_id,
        }
    }

    fn start_body(&mut self) {
        if self.body.is_some() || self.result.is_some() {
            return;
        }
        let handler = self.handler.clone();
        let ctx = self.ctx.clone();
        let input = self.input.clone();
        self.body = Some(Box::pin(async move { handler.invoke(ctx, input).await }));
    }

    fn poll_body(&mut self) {
        let Some(body) = self.body.as_mut() else {
            return;
        };
        let mut cx = TaskContext::from_waker(noop_waker_ref());
        let polled = catch_unwind(AssertUnwindSafe(|| body.as_mut().poll(&mut cx)));
        let finished = match polled {
            Ok(Poll::Pending) => return,
            Ok(Poll::Ready(result)) => result,
            Err(payload) => Err(WorkflowError::application("Panic", panic_message(payload.as_ref()))),
        };
        self.body = None;
        self.result = Some(finished);
    }
}
