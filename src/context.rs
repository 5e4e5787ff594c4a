//! The orchestration context handed to workflow bodies.
//!
//! A context lives for exactly one replay pass. History is applied to it event
//! by event; every call the body makes either finds its outcome already in the
//! applied history or records a pending action for the coordinator.

use crate::actions::{ActionKind, CompleteOrchestration, PendingAction, TaskRouter};
use crate::cancellation::CancellationToken;
use crate::error::{FailureDetails, WorkflowError};
use crate::futures::{
    ExternalEventFuture, Outcome, Resolution, ResolutionKey, Slot, TaskFuture, TaskRequest, TimerFuture,
};
use crate::history::{EventKind, HistoryEvent, TaskId, TaskKind};
use crate::identity::WorkflowMetadata;
use crate::logging::{LogSink, ReplaySafeLogger};
use crate::retry::RetryPolicy;
use crate::runtime::correlation::{CorrelationTable, Delivery};
use crate::serializer::{self, WorkflowSerializer};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const GUID_NAMESPACE: Uuid = Uuid::from_u128(0x9e95_2958_5e33_4daf_827f_2fa1_2937_b875);

/// Options for [`OrchestrationContext::call_activity_with_options`].
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub retry_policy: Option<RetryPolicy>,
    /// Route the activity to another application.
    pub app_id: Option<String>,
}

impl TaskOptions {
    pub fn with_retry(policy: RetryPolicy) -> Self {
        Self {
            retry_policy: Some(policy),
            app_id: None,
        }
    }

    pub fn with_app_id(app_id: impl Into<String>) -> Self {
        Self {
            retry_policy: None,
            app_id: Some(app_id.into()),
        }
    }
}

/// Options for [`OrchestrationContext::call_child_workflow_with_options`].
#[derive(Debug, Clone, Default)]
pub struct ChildWorkflowOptions {
    /// Instance id of the child; a deterministic guid when unset.
    pub instance_id: Option<String>,
    pub retry_policy: Option<RetryPolicy>,
    pub app_id: Option<String>,
}

impl ChildWorkflowOptions {
    pub fn with_instance_id(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: Some(instance_id.into()),
            ..Self::default()
        }
    }
}

struct Waiter {
    slot: Slot,
    timeout_timer: Option<TaskId>,
}

struct BufferedEvent {
    event: HistoryEvent,
    key: ResolutionKey,
}

struct ContinueAsNewRequest {
    id: TaskId,
    input: String,
    preserve_unprocessed_events: bool,
}

/// Actions and status collected at the end of a pass.
pub(crate) struct PassOutput {
    pub(crate) actions: Vec<PendingAction>,
    pub(crate) custom_status: Option<String>,
}

pub(crate) struct ContextState {
    metadata: WorkflowMetadata,
    current_utc: DateTime<Utc>,
    is_replaying: bool,
    sequence: TaskId,
    guid_counter: u64,
    custom_status: Option<Value>,
    table: CorrelationTable,
    pending: BTreeMap<TaskId, PendingAction>,
    acknowledged: HashSet<TaskId>,
    /// Lowercased child instance id -> id of its creation event.
    children_created: HashMap<String, TaskId>,
    waiters: HashMap<String, VecDeque<Waiter>>,
    inbox: HashMap<String, VecDeque<BufferedEvent>>,
    /// Timeout timer id -> the wait it guards.
    timeout_timers: HashMap<TaskId, Slot>,
    continue_as_new: Option<ContinueAsNewRequest>,
    position: u64,
    ordinal: u64,
    serializer: Arc<dyn WorkflowSerializer>,
    log_sink: Arc<dyn LogSink>,
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

fn validate_name(what: &str, value: &str) -> Result<(), WorkflowError> {
    if value.trim().is_empty() {
        return Err(WorkflowError::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(())
}

impl ContextState {
    fn new(
        metadata: WorkflowMetadata,
        current_utc: DateTime<Utc>,
        serializer: Arc<dyn WorkflowSerializer>,
        log_sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            metadata,
            current_utc,
            is_replaying: true,
            sequence: 0,
            guid_counter: 0,
            custom_status: None,
            table: CorrelationTable::new(),
            pending: BTreeMap::new(),
            acknowledged: HashSet::new(),
            children_created: HashMap::new(),
            waiters: HashMap::new(),
            inbox: HashMap::new(),
            timeout_timers: HashMap::new(),
            continue_as_new: None,
            position: 0,
            ordinal: 0,
            serializer,
            log_sink,
        }
    }

    fn next_task_id(&mut self) -> TaskId {
        let id = self.sequence;
        self.sequence += 1;
        id
    }

    fn next_key(&mut self) -> ResolutionKey {
        self.ordinal += 1;
        ResolutionKey {
            position: self.position,
            ordinal: self.ordinal,
        }
    }

    fn new_guid(&mut self) -> Uuid {
        let counter = self.guid_counter;
        self.guid_counter += 1;
        let name = format!(
            "{}_{}_{}",
            self.metadata.instance_id,
            self.current_utc.to_rfc3339_opts(SecondsFormat::Millis, true),
            counter
        );
        Uuid::new_v5(&GUID_NAMESPACE, name.as_bytes())
    }

    // ----- history application -----

    fn apply(&mut self, event: &HistoryEvent) {
        self.position += 1;
        match &event.kind {
            EventKind::ExecutionStarted { .. } => {}
            EventKind::TaskScheduled { .. } | EventKind::TimerCreated { .. } | EventKind::EventSent { .. } => {
                self.acknowledge(event.event_id);
            }
            EventKind::SubOrchestrationInstanceCreated { instance_id, .. } => {
                self.on_child_created(event.event_id, instance_id);
            }
            EventKind::TaskCompleted {
                task_scheduled_id,
                result,
            } => {
                self.deliver(
                    TaskKind::Activity,
                    *task_scheduled_id,
                    Outcome::Completed(result.clone()),
                    event,
                );
            }
            EventKind::TaskFailed {
                task_scheduled_id,
                failure_details,
            } => {
                self.deliver(
                    TaskKind::Activity,
                    *task_scheduled_id,
                    Outcome::Failed(failure_or_unknown(failure_details.as_ref())),
                    event,
                );
            }
            EventKind::SubOrchestrationInstanceCompleted {
                task_scheduled_id,
                result,
            } => {
                self.deliver(
                    TaskKind::ChildWorkflow,
                    *task_scheduled_id,
                    Outcome::Completed(result.clone()),
                    event,
                );
            }
            EventKind::SubOrchestrationInstanceFailed {
                task_scheduled_id,
                failure_details,
            } => {
                self.deliver(
                    TaskKind::ChildWorkflow,
                    *task_scheduled_id,
                    Outcome::Failed(failure_or_unknown(failure_details.as_ref())),
                    event,
                );
            }
            EventKind::TimerFired { timer_id, .. } => {
                if let Delivery::Resolved(id) = self.deliver(TaskKind::Timer, *timer_id, Outcome::Completed(None), event) {
                    self.on_timer_fired(id);
                }
            }
            EventKind::EventRaised { .. } => self.on_event_raised(event),
        }
    }

    fn acknowledge(&mut self, id: TaskId) {
        self.acknowledged.insert(id);
        if self.pending.remove(&id).is_some() {
            debug!(target: "replayflow::replay", instance_id = %self.metadata.instance_id, task_id = id, "action acknowledged by history");
        }
    }

    fn on_child_created(&mut self, event_id: TaskId, instance_id: &str) {
        let folded = fold(instance_id);
        self.children_created.insert(folded.clone(), event_id);
        if self.pending.contains_key(&event_id) {
            self.acknowledge(event_id);
            return;
        }
        let matching = self.pending.iter().find_map(|(id, action)| match &action.kind {
            ActionKind::CreateSubOrchestration { instance_id, .. } if fold(instance_id) == folded => Some(*id),
            _ => None,
        });
        match matching {
            Some(task_id) => {
                self.acknowledge(task_id);
                self.table.link_alias(event_id, task_id);
            }
            None => self.acknowledge(event_id),
        }
    }

    fn deliver(&mut self, kind: TaskKind, task_id: Option<TaskId>, outcome: Outcome, event: &HistoryEvent) -> Delivery {
        let key = self.next_key();
        let delivery = self.table.deliver(
            kind,
            task_id,
            Resolution {
                outcome,
                key,
                at: event.timestamp,
            },
        );
        match delivery {
            Delivery::Duplicate => {
                warn!(
                    target: "replayflow::replay",
                    instance_id = %self.metadata.instance_id,
                    event_id = event.event_id,
                    task_id = ?task_id,
                    event = event.kind_name(),
                    "ignoring duplicate completion"
                );
            }
            Delivery::KindMismatch { expected, actual } => {
                warn!(
                    target: "replayflow::replay",
                    instance_id = %self.metadata.instance_id,
                    event_id = event.event_id,
                    task_id = ?task_id,
                    %expected,
                    %actual,
                    "completion kind does not match the scheduled task; dropped"
                );
            }
            Delivery::Resolved(_) | Delivery::Buffered | Delivery::Orphaned => {
                debug!(
                    target: "replayflow::replay",
                    instance_id = %self.metadata.instance_id,
                    event = event.kind_name(),
                    outcome = ?delivery,
                    "completion applied"
                );
            }
        }
        delivery
    }

    fn on_timer_fired(&mut self, timer_id: TaskId) {
        if let Some(waiter) = self.timeout_timers.remove(&timer_id) {
            let key = self.next_key();
            waiter.resolve(Resolution {
                outcome: Outcome::Canceled("timed out waiting for external event".to_string()),
                key,
                at: None,
            });
        }
    }

    fn pop_live_waiter(&mut self, name: &str) -> Option<Waiter> {
        let queue = self.waiters.get_mut(name)?;
        while let Some(waiter) = queue.pop_front() {
            if !waiter.slot.is_resolved() {
                return Some(waiter);
            }
        }
        None
    }

    fn on_event_raised(&mut self, event: &HistoryEvent) {
        let Some((name, input)) = event.as_event_raised() else {
            return;
        };
        let folded = fold(name);
        let payload = input.map(str::to_string);
        let key = self.next_key();
        match self.pop_live_waiter(&folded) {
            Some(waiter) => {
                waiter.slot.resolve(Resolution {
                    outcome: Outcome::Completed(payload),
                    key,
                    at: event.timestamp,
                });
                if let Some(timer) = waiter.timeout_timer {
                    self.timeout_timers.remove(&timer);
                    self.cancel_task(timer, "external event arrived".to_string());
                }
            }
            None => {
                debug!(target: "replayflow::replay", instance_id = %self.metadata.instance_id, event_name = name, "buffering external event");
                self.inbox.entry(folded).or_default().push_back(BufferedEvent {
                    event: event.clone(),
                    key,
                });
            }
        }
    }

    // ----- scheduling -----

    fn open_task(
        &mut self,
        id: TaskId,
        kind: TaskKind,
        action: ActionKind,
        router: Option<TaskRouter>,
        alias: Option<TaskId>,
    ) -> Slot {
        let slot = self.table.open(id, kind, alias);
        if alias.is_some() {
            self.acknowledged.insert(id);
        }
        if slot.is_resolved() || self.acknowledged.contains(&id) {
            debug!(target: "replayflow::replay", instance_id = %self.metadata.instance_id, task_id = id, %kind, "task known to history");
        } else {
            self.pending.insert(id, PendingAction::new(id, action).with_router(router));
        }
        slot
    }

    fn schedule_task(&mut self, request: &TaskRequest) -> Slot {
        match request {
            TaskRequest::Activity { name, input, app_id } => {
                let id = self.next_task_id();
                let action = ActionKind::ScheduleTask {
                    name: name.clone(),
                    input: input.clone(),
                };
                self.open_task(id, TaskKind::Activity, action, TaskRouter::for_app(app_id.as_deref()), None)
            }
            TaskRequest::ChildWorkflow {
                name,
                input,
                app_id,
                instance_id,
            } => {
                let child_instance_id = match instance_id {
                    Some(id) => id.clone(),
                    None => self.new_guid().to_string(),
                };
                let id = self.next_task_id();
                let alias = if self.acknowledged.contains(&id) {
                    None
                } else {
                    self.children_created
                        .get(&fold(&child_instance_id))
                        .copied()
                        .filter(|created| *created != id)
                };
                let action = ActionKind::CreateSubOrchestration {
                    name: name.clone(),
                    instance_id: child_instance_id,
                    input: input.clone(),
                };
                self.open_task(
                    id,
                    TaskKind::ChildWorkflow,
                    action,
                    TaskRouter::for_app(app_id.as_deref()),
                    alias,
                )
            }
        }
    }

    fn schedule_timer(&mut self, fire_at: DateTime<Utc>) -> (TaskId, Slot) {
        let id = self.next_task_id();
        let slot = self.open_task(id, TaskKind::Timer, ActionKind::CreateTimer { fire_at }, None, None);
        (id, slot)
    }

    /// Cancel an open task and drop its unacknowledged action.
    fn cancel_task(&mut self, id: TaskId, reason: String) -> bool {
        let key = self.next_key();
        let canceled = self.table.cancel(
            id,
            Resolution {
                outcome: Outcome::Canceled(reason),
                key,
                at: None,
            },
        );
        if self.pending.remove(&id).is_some() {
            debug!(target: "replayflow::replay", instance_id = %self.metadata.instance_id, task_id = id, "removed canceled action");
        }
        self.timeout_timers.remove(&id);
        canceled
    }

    fn cancel_waiter(&mut self, slot: &Slot, reason: String) {
        let key = self.next_key();
        let resolved = slot.resolve(Resolution {
            outcome: Outcome::Canceled(reason),
            key,
            at: None,
        });
        if !resolved {
            return;
        }
        let timer = self
            .waiters
            .values()
            .flatten()
            .find(|w| w.slot.same(slot))
            .and_then(|w| w.timeout_timer);
        if let Some(timer) = timer {
            self.cancel_task(timer, "wait canceled".to_string());
        }
    }

    fn wait_for_event(&mut self, name: &str, timeout_at: Option<DateTime<Utc>>) -> Slot {
        let folded = fold(name);
        let slot = Slot::new();
        let timer = timeout_at.map(|at| self.schedule_timer(at));
        let timer_key = timer.as_ref().and_then(|(_, t)| t.key());

        let event_first = self
            .inbox
            .get(&folded)
            .and_then(VecDeque::front)
            .is_some_and(|buffered| timer_key.is_none_or(|tk| buffered.key < tk));
        if event_first {
            if let Some(buffered) = self.inbox.get_mut(&folded).and_then(VecDeque::pop_front) {
                let payload = buffered
                    .event
                    .as_event_raised()
                    .and_then(|(_, input)| input)
                    .map(str::to_string);
                slot.resolve(Resolution {
                    outcome: Outcome::Completed(payload),
                    key: buffered.key,
                    at: buffered.event.timestamp,
                });
            }
            if let Some((timer_id, timer_slot)) = timer {
                if !timer_slot.is_resolved() {
                    self.cancel_task(timer_id, "external event arrived".to_string());
                }
            }
            return slot;
        }

        if let Some(key) = timer_key {
            slot.resolve(Resolution {
                outcome: Outcome::Canceled("timed out waiting for external event".to_string()),
                key,
                at: None,
            });
            return slot;
        }

        let timeout_timer = timer.map(|(id, _)| id);
        if let Some(id) = timeout_timer {
            self.timeout_timers.insert(id, slot.clone());
        }
        self.waiters.entry(folded).or_default().push_back(Waiter {
            slot: slot.clone(),
            timeout_timer,
        });
        slot
    }

    fn take_output(&mut self) -> PassOutput {
        if let Some(request) = self.continue_as_new.take() {
            let carryover = if request.preserve_unprocessed_events {
                let mut buffered: Vec<&BufferedEvent> = self.inbox.values().flatten().collect();
                buffered.sort_by_key(|b| b.key);
                buffered.into_iter().map(|b| b.event.clone()).collect()
            } else {
                Vec::new()
            };
            self.pending.insert(
                request.id,
                PendingAction::new(
                    request.id,
                    ActionKind::CompleteOrchestration(CompleteOrchestration::continued_as_new(request.input, carryover)),
                ),
            );
        }

        let custom_status = match &self.custom_status {
            Some(value) => match self.serializer.serialize_value(value) {
                Ok(s) if !s.is_empty() => Some(s),
                Ok(_) => None,
                Err(err) => {
                    warn!(target: "replayflow::replay", instance_id = %self.metadata.instance_id, error = %err, "custom status could not be serialized");
                    None
                }
            },
            None => None,
        };

        PassOutput {
            actions: std::mem::take(&mut self.pending).into_values().collect(),
            custom_status,
        }
    }
}

fn failure_or_unknown(details: Option<&FailureDetails>) -> FailureDetails {
    details
        .cloned()
        .unwrap_or_else(|| FailureDetails::new("Exception", "Unknown error", ""))
}

/// Handle to the state of one replay pass. Cheap to clone.
#[derive(Clone)]
pub struct OrchestrationContext {
    inner: Arc<Mutex<ContextState>>,
}

impl std::fmt::Debug for OrchestrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("OrchestrationContext")
            .field("instance_id", &state.metadata.instance_id)
            .field("name", &state.metadata.identifier.name)
            .field("is_replaying", &state.is_replaying)
            .finish_non_exhaustive()
    }
}

impl OrchestrationContext {
    pub(crate) fn new(
        metadata: WorkflowMetadata,
        current_utc: DateTime<Utc>,
        serializer: Arc<dyn WorkflowSerializer>,
        log_sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ContextState::new(metadata, current_utc, serializer, log_sink))),
        }
    }

    pub fn name(&self) -> String {
        self.inner.lock().metadata.identifier.name.clone()
    }

    pub fn version(&self) -> Option<String> {
        self.inner.lock().metadata.identifier.version.clone()
    }

    pub fn instance_id(&self) -> String {
        self.inner.lock().metadata.instance_id.clone()
    }

    /// Virtual time: the first history timestamp, stable across replays.
    pub fn current_utc_date_time(&self) -> DateTime<Utc> {
        self.inner.lock().current_utc
    }

    pub fn is_replaying(&self) -> bool {
        self.inner.lock().is_replaying
    }

    /// Whether side-effect logging should run right now.
    pub fn is_logging_enabled(&self) -> bool {
        !self.is_replaying()
    }

    // ----- activities and child workflows -----

    pub fn call_activity<T, I>(&self, name: &str, input: &I) -> TaskFuture<T>
    where
        I: Serialize + ?Sized,
    {
        self.call_activity_with_options(name, input, TaskOptions::default())
    }

    /// Schedule an activity. Validation and input encoding errors fail the
    /// returned future without scheduling anything.
    pub fn call_activity_with_options<T, I>(&self, name: &str, input: &I, options: TaskOptions) -> TaskFuture<T>
    where
        I: Serialize + ?Sized,
    {
        let serializer = self.serializer();
        if let Err(err) = validate_name("activity name", name) {
            return TaskFuture::failed(TaskKind::Activity, name, err, serializer);
        }
        let input = match serializer::encode(serializer.as_ref(), input) {
            Ok(input) => input,
            Err(err) => return TaskFuture::failed(TaskKind::Activity, name, err, serializer),
        };
        let request = TaskRequest::Activity {
            name: name.to_string(),
            input,
            app_id: options.app_id,
        };
        let slot = self.schedule_task(&request);
        match options.retry_policy {
            Some(policy) => TaskFuture::retrying(self.clone(), request, policy, slot, serializer),
            None => TaskFuture::pending(TaskKind::Activity, name, slot, serializer),
        }
    }

    pub fn call_child_workflow<T, I>(&self, name: &str, input: &I) -> TaskFuture<T>
    where
        I: Serialize + ?Sized,
    {
        self.call_child_workflow_with_options(name, input, ChildWorkflowOptions::default())
    }

    pub fn call_child_workflow_with_options<T, I>(
        &self,
        name: &str,
        input: &I,
        options: ChildWorkflowOptions,
    ) -> TaskFuture<T>
    where
        I: Serialize + ?Sized,
    {
        let serializer = self.serializer();
        if let Err(err) = validate_name("workflow name", name) {
            return TaskFuture::failed(TaskKind::ChildWorkflow, name, err, serializer);
        }
        let input = match serializer::encode(serializer.as_ref(), input) {
            Ok(input) => input,
            Err(err) => return TaskFuture::failed(TaskKind::ChildWorkflow, name, err, serializer),
        };
        // Fix the instance id once so retries reuse it.
        let instance_id = match options.instance_id {
            Some(id) => id,
            None => self.new_guid().to_string(),
        };
        let request = TaskRequest::ChildWorkflow {
            name: name.to_string(),
            input,
            app_id: options.app_id,
            instance_id: Some(instance_id),
        };
        let slot = self.schedule_task(&request);
        match options.retry_policy {
            Some(policy) => TaskFuture::retrying(self.clone(), request, policy, slot, serializer),
            None => TaskFuture::pending(TaskKind::ChildWorkflow, name, slot, serializer),
        }
    }

    // ----- timers -----

    pub fn create_timer(&self, fire_at: DateTime<Utc>) -> TimerFuture {
        let (_, slot) = self.inner.lock().schedule_timer(fire_at);
        TimerFuture::new(slot)
    }

    /// Timer that resolves as canceled once `token` fires, dropping its
    /// action if history has not acknowledged it.
    pub fn create_timer_with_token(&self, fire_at: DateTime<Utc>, token: &CancellationToken) -> TimerFuture {
        let (id, slot) = self.inner.lock().schedule_timer(fire_at);
        let state = Arc::downgrade(&self.inner);
        token.on_cancel(move || {
            if let Some(state) = state.upgrade() {
                state.lock().cancel_task(id, "timer canceled".to_string());
            }
        });
        TimerFuture::new(slot)
    }

    pub fn create_timer_after(&self, delay: Duration) -> TimerFuture {
        let fire_at = self.fire_at_after(delay);
        self.create_timer(fire_at)
    }

    fn fire_at_after(&self, delay: Duration) -> DateTime<Utc> {
        let now = self.current_utc_date_time();
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    // ----- external events -----

    pub fn wait_for_external_event<T>(&self, name: &str) -> ExternalEventFuture<T> {
        self.wait_for_event_inner(name, None, None)
    }

    pub fn wait_for_external_event_with_token<T>(&self, name: &str, token: &CancellationToken) -> ExternalEventFuture<T> {
        self.wait_for_event_inner(name, None, Some(token))
    }

    /// Race the event against a durable timer; the timer winning fails the
    /// wait with [`WorkflowError::Canceled`].
    pub fn wait_for_external_event_with_timeout<T>(&self, name: &str, timeout: Duration) -> ExternalEventFuture<T> {
        let timeout_at = self.fire_at_after(timeout);
        self.wait_for_event_inner(name, Some(timeout_at), None)
    }

    fn wait_for_event_inner<T>(
        &self,
        name: &str,
        timeout_at: Option<DateTime<Utc>>,
        token: Option<&CancellationToken>,
    ) -> ExternalEventFuture<T> {
        let serializer = self.serializer();
        if let Err(err) = validate_name("event name", name) {
            return ExternalEventFuture::rejected(name, err, serializer);
        }
        let slot = self.inner.lock().wait_for_event(name, timeout_at);
        if let Some(token) = token {
            let state: Weak<Mutex<ContextState>> = Arc::downgrade(&self.inner);
            let waiter = slot.clone();
            token.on_cancel(move || {
                if let Some(state) = state.upgrade() {
                    state.lock().cancel_waiter(&waiter, "wait canceled".to_string());
                }
            });
        }
        ExternalEventFuture::new(name, slot, serializer)
    }

    /// Raise an event on another orchestration instance.
    pub fn send_event<P>(&self, instance_id: &str, name: &str, payload: &P) -> Result<(), WorkflowError>
    where
        P: Serialize + ?Sized,
    {
        validate_name("instance id", instance_id)?;
        validate_name("event name", name)?;
        let serializer = self.serializer();
        let data = serializer::encode(serializer.as_ref(), payload)?;
        let mut state = self.inner.lock();
        let id = state.next_task_id();
        if !state.acknowledged.contains(&id) {
            let action = ActionKind::SendEvent {
                instance_id: instance_id.to_string(),
                name: name.to_string(),
                data,
            };
            state.pending.insert(id, PendingAction::new(id, action));
        }
        Ok(())
    }

    // ----- status and lifecycle -----

    /// Replace the custom status. A value serializing to `null` clears it.
    pub fn set_custom_status<S>(&self, status: &S) -> Result<(), WorkflowError>
    where
        S: Serialize + ?Sized,
    {
        let value = serde_json::to_value(status)?;
        self.inner.lock().custom_status = if value.is_null() { None } else { Some(value) };
        Ok(())
    }

    pub fn clear_custom_status(&self) {
        self.inner.lock().custom_status = None;
    }

    /// Finish this execution and restart with `new_input`. Takes effect when
    /// the body returns; a second request in the same pass is ignored.
    pub fn continue_as_new<I>(&self, new_input: &I, preserve_unprocessed_events: bool) -> Result<(), WorkflowError>
    where
        I: Serialize + ?Sized,
    {
        let serializer = self.serializer();
        let input = serializer::encode(serializer.as_ref(), new_input)?;
        let mut state = self.inner.lock();
        if state.continue_as_new.is_some() {
            warn!(target: "replayflow::orchestration", instance_id = %state.metadata.instance_id, "continue_as_new already requested; ignoring");
            return Ok(());
        }
        let id = state.next_task_id();
        state.continue_as_new = Some(ContinueAsNewRequest {
            id,
            input,
            preserve_unprocessed_events,
        });
        Ok(())
    }

    /// Deterministic guid: identical sequence on every replay of this instance.
    pub fn new_guid(&self) -> Uuid {
        self.inner.lock().new_guid()
    }

    pub fn create_replay_safe_logger(&self, category: impl Into<String>) -> ReplaySafeLogger {
        let sink = self.inner.lock().log_sink.clone();
        ReplaySafeLogger::new(category, sink, self.clone())
    }

    // ----- engine hooks -----

    pub(crate) fn serializer(&self) -> Arc<dyn WorkflowSerializer> {
        self.inner.lock().serializer.clone()
    }

    pub(crate) fn schedule_task(&self, request: &TaskRequest) -> Slot {
        self.inner.lock().schedule_task(request)
    }

    pub(crate) fn schedule_retry_timer(&self, base: DateTime<Utc>, delay: Duration) -> Result<Slot, WorkflowError> {
        let fire_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| base.checked_add_signed(d))
            .ok_or_else(|| WorkflowError::InvalidArgument("retry delay is out of range".to_string()))?;
        Ok(self.inner.lock().schedule_timer(fire_at).1)
    }

    pub(crate) fn set_replaying(&self, replaying: bool) {
        self.inner.lock().is_replaying = replaying;
    }

    pub(crate) fn apply_event(&self, event: &HistoryEvent) {
        self.inner.lock().apply(event);
    }

    pub(crate) fn has_continue_as_new(&self) -> bool {
        self.inner.lock().continue_as_new.is_some()
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        self.inner.lock().next_task_id()
    }

    pub(crate) fn take_output(&self) -> PassOutput {
        self.inner.lock().take_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TaskIdentifier;
    use crate::logging::TracingSink;
    use crate::serializer::JsonSerializer;
    use chrono::TimeZone;
    use futures::FutureExt;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn ctx() -> OrchestrationContext {
        OrchestrationContext::new(
            WorkflowMetadata::new("inst-1", TaskIdentifier::new("Flow")),
            start(),
            Arc::new(JsonSerializer),
            Arc::new(TracingSink),
        )
    }

    fn live(ctx: &OrchestrationContext) {
        ctx.set_replaying(false);
    }

    #[test]
    fn activity_call_emits_schedule_task() {
        let ctx = ctx();
        let _fut: TaskFuture<String> = ctx.call_activity("DoWork", &serde_json::json!({"value": 3}));
        let out = ctx.take_output();
        assert_eq!(out.actions.len(), 1);
        match &out.actions[0].kind {
            ActionKind::ScheduleTask { name, input } => {
                assert_eq!(name, "DoWork");
                assert!(input.contains("\"value\":3"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn blank_activity_name_fails_without_side_effects() {
        let ctx = ctx();
        let fut: TaskFuture<String> = ctx.call_activity("  ", &());
        assert!(matches!(fut.now_or_never(), Some(Err(WorkflowError::InvalidArgument(_)))));
        assert!(ctx.take_output().actions.is_empty());
        assert_eq!(ctx.next_task_id(), 0);
    }

    #[test]
    fn completion_in_history_resolves_without_action() {
        let ctx = ctx();
        ctx.apply_event(&HistoryEvent::task_scheduled(0, "DoWork", None));
        ctx.apply_event(&HistoryEvent::task_completed(1, Some(0), Some("\"hello\"".into())));
        let fut: TaskFuture<String> = ctx.call_activity("DoWork", &());
        assert_eq!(fut.now_or_never(), Some(Ok("hello".to_string())));
        assert!(ctx.take_output().actions.is_empty());
    }

    #[test]
    fn scheduled_but_incomplete_task_stays_pending_without_action() {
        let ctx = ctx();
        ctx.apply_event(&HistoryEvent::task_scheduled(0, "DoWork", None));
        let fut: TaskFuture<String> = ctx.call_activity("DoWork", &());
        assert!(fut.now_or_never().is_none());
        assert!(ctx.take_output().actions.is_empty());
    }

    #[test]
    fn acknowledgement_after_call_drops_pending_action() {
        let ctx = ctx();
        let _fut: TaskFuture<String> = ctx.call_activity("DoWork", &());
        ctx.apply_event(&HistoryEvent::task_scheduled(0, "DoWork", None));
        assert!(ctx.take_output().actions.is_empty());
    }

    #[test]
    fn timer_canceled_by_token_removes_action() {
        let ctx = ctx();
        live(&ctx);
        let token = CancellationToken::new();
        let timer = ctx.create_timer_with_token(start() + chrono::Duration::minutes(5), &token);
        token.cancel();
        assert!(matches!(timer.now_or_never(), Some(Err(WorkflowError::Canceled(_)))));
        assert!(ctx.take_output().actions.is_empty());
    }

    #[test]
    fn buffered_event_resolves_wait_case_insensitively() {
        let ctx = ctx();
        ctx.apply_event(&HistoryEvent::event_raised(3, "Approval", Some("true".into())));
        let fut: ExternalEventFuture<bool> = ctx.wait_for_external_event("APPROVAL");
        assert_eq!(fut.now_or_never(), Some(Ok(true)));
    }

    #[test]
    fn waiter_registered_first_gets_later_event() {
        let ctx = ctx();
        let mut fut: ExternalEventFuture<String> = ctx.wait_for_external_event("go");
        assert!((&mut fut).now_or_never().is_none());
        ctx.apply_event(&HistoryEvent::event_raised(1, "Go", Some("\"now\"".into())));
        assert_eq!(fut.now_or_never(), Some(Ok("now".to_string())));
    }

    #[test]
    fn event_wait_with_timeout_cancels_timer_when_event_wins() {
        let ctx = ctx();
        live(&ctx);
        let mut fut: ExternalEventFuture<u32> = ctx.wait_for_external_event_with_timeout("go", Duration::from_secs(30));
        assert!((&mut fut).now_or_never().is_none());
        ctx.apply_event(&HistoryEvent::event_raised(1, "go", Some("7".into())));
        assert_eq!(fut.now_or_never(), Some(Ok(7)));
        assert!(ctx.take_output().actions.is_empty());
    }

    #[test]
    fn event_wait_times_out_when_timer_fires_first() {
        let ctx = ctx();
        ctx.apply_event(&HistoryEvent::timer_created(0, start()));
        ctx.apply_event(&HistoryEvent::timer_fired(1, Some(0), start()));
        ctx.apply_event(&HistoryEvent::event_raised(2, "go", None));
        let fut: ExternalEventFuture<u32> = ctx.wait_for_external_event_with_timeout("go", Duration::from_secs(30));
        assert!(matches!(fut.now_or_never(), Some(Err(WorkflowError::Canceled(_)))));
    }

    #[test]
    fn child_instance_id_match_links_creation_event() {
        let ctx = ctx();
        let options = ChildWorkflowOptions::with_instance_id("Child-A");
        ctx.apply_event(&HistoryEvent::child_created(5, "Child", "child-a", None));
        ctx.apply_event(&HistoryEvent::child_completed(6, Some(5), Some("42".into())));
        let fut: TaskFuture<u32> = ctx.call_child_workflow_with_options("Child", &(), options);
        assert_eq!(fut.now_or_never(), Some(Ok(42)));
        assert!(ctx.take_output().actions.is_empty());
    }

    #[test]
    fn guids_are_deterministic() {
        let a = ctx();
        let b = ctx();
        let first = (a.new_guid(), a.new_guid());
        let second = (b.new_guid(), b.new_guid());
        assert_eq!(first, second);
        assert_ne!(first.0, first.1);
    }

    #[test]
    fn continue_as_new_carries_unconsumed_events_in_order() {
        let ctx = ctx();
        ctx.apply_event(&HistoryEvent::event_raised(1, "b", Some("1".into())));
        ctx.apply_event(&HistoryEvent::event_raised(2, "a", Some("2".into())));
        ctx.continue_as_new(&5, true).unwrap();
        ctx.continue_as_new(&6, true).unwrap();
        let out = ctx.take_output();
        assert_eq!(out.actions.len(), 1);
        let done = out.actions[0].as_completion().unwrap();
        assert_eq!(done.result, "5");
        let ids: Vec<_> = done.carryover_events.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn custom_status_null_clears() {
        let ctx = ctx();
        ctx.set_custom_status("working").unwrap();
        assert_eq!(ctx.take_output().custom_status.as_deref(), Some("\"working\""));
        ctx.set_custom_status(&Option::<String>::None).unwrap();
        assert_eq!(ctx.take_output().custom_status, None);
    }
}
