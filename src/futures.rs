//! Durable awaitables.
//!
//! Every awaitable is backed by a [`Slot`] owned by the correlation table. A
//! slot is resolved at most once, by a history event or by cancellation, and
//! records a [`ResolutionKey`] giving its position in history. Polling never
//! waits: a slot is either resolved by the supplied history or stays pending
//! for the rest of the pass.
//!
//! Combinators ([`when_any`], [`race`]) pick winners by resolution key, so the
//! observed completion order is the history order on every replay.

use crate::context::OrchestrationContext;
use crate::error::{FailureDetails, WorkflowError};
use crate::history::TaskKind;
use crate::retry::RetryPolicy;
use crate::serializer::{self, WorkflowSerializer};
use chrono::{DateTime, Utc};
pub use futures::future::Either;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Position at which an awaitable resolved: the history event index, then a
/// tie-breaking ordinal for resolutions that happen within the same event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResolutionKey {
    pub(crate) position: u64,
    pub(crate) ordinal: u64,
}

impl ResolutionKey {
    /// Key for futures that fail before anything is scheduled.
    pub(crate) const IMMEDIATE: ResolutionKey = ResolutionKey {
        position: 0,
        ordinal: 0,
    };
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Completed(Option<String>),
    Failed(FailureDetails),
    Canceled(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Resolution {
    pub(crate) outcome: Outcome,
    pub(crate) key: ResolutionKey,
    /// Timestamp of the resolving event, when it had one.
    pub(crate) at: Option<DateTime<Utc>>,
}

/// Shared completion cell for one awaitable.
#[derive(Debug, Clone, Default)]
pub(crate) struct Slot(Arc<Mutex<Option<Resolution>>>);

impl Slot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// First resolution wins; later ones are ignored.
    pub(crate) fn resolve(&self, resolution: Resolution) -> bool {
        let mut inner = self.0.lock();
        if inner.is_some() {
            return false;
        }
        *inner = Some(resolution);
        true
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.0.lock().is_some()
    }

    pub(crate) fn resolution(&self) -> Option<Resolution> {
        self.0.lock().clone()
    }

    pub(crate) fn key(&self) -> Option<ResolutionKey> {
        self.0.lock().as_ref().map(|r| r.key)
    }

    pub(crate) fn same(&self, other: &Slot) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Awaitable that knows where in history it resolved.
pub trait DurableFuture: Future + Unpin {
    /// Advance internal bookkeeping and report the resolution key once the
    /// output is available, without consuming it.
    fn resolution_key(&mut self) -> Option<ResolutionKey>;
}

/// What to schedule again when a retried attempt fails.
#[derive(Debug, Clone)]
pub(crate) enum TaskRequest {
    Activity {
        name: String,
        input: String,
        app_id: Option<String>,
    },
    ChildWorkflow {
        name: String,
        input: String,
        app_id: Option<String>,
        instance_id: Option<String>,
    },
}

impl TaskRequest {
    fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::Activity { .. } => TaskKind::Activity,
            TaskRequest::ChildWorkflow { .. } => TaskKind::ChildWorkflow,
        }
    }
}

enum RetryPhase {
    Attempt(Slot),
    Backoff(Slot),
    Finished(Resolution),
}

struct RetryDriver {
    ctx: OrchestrationContext,
    request: TaskRequest,
    policy: RetryPolicy,
    attempt: u32,
    backoff_spent: Duration,
    phase: RetryPhase,
}

impl RetryDriver {
    /// Step through attempts and backoff timers as far as history allows.
    fn advance(&mut self) -> Option<&Resolution> {
        loop {
            let next = match &self.phase {
                RetryPhase::Finished(_) => break,
                RetryPhase::Attempt(slot) => {
                    let resolution = slot.resolution()?;
                    match &resolution.outcome {
                        Outcome::Failed(_) if self.policy.allows_retry(self.attempt, self.backoff_spent) => {
                            let delay = self.policy.next_delay(self.attempt);
                            self.backoff_spent += delay;
                            let base = resolution.at.unwrap_or_else(|| self.ctx.current_utc_date_time());
                            match self.ctx.schedule_retry_timer(base, delay) {
                                Ok(timer) => RetryPhase::Backoff(timer),
                                Err(err) => RetryPhase::Finished(Resolution {
                                    outcome: Outcome::Failed(err.to_failure_details()),
                                    key: resolution.key,
                                    at: resolution.at,
                                }),
                            }
                        }
                        _ => RetryPhase::Finished(resolution),
                    }
                }
                RetryPhase::Backoff(timer) => {
                    let resolution = timer.resolution()?;
                    match resolution.outcome {
                        Outcome::Canceled(_) => RetryPhase::Finished(resolution),
                        _ => {
                            self.attempt += 1;
                            RetryPhase::Attempt(self.ctx.schedule_task(&self.request))
                        }
                    }
                }
            };
            self.phase = next;
        }
        match &self.phase {
            RetryPhase::Finished(resolution) => Some(resolution),
            _ => None,
        }
    }
}

enum TaskInner {
    Failed(Option<WorkflowError>),
    Pending(Slot),
    Retrying(Box<RetryDriver>),
}

/// Result of an activity or child workflow call, decoded as `T`.
pub struct TaskFuture<T> {
    inner: TaskInner,
    kind: TaskKind,
    name: String,
    serializer: Arc<dyn WorkflowSerializer>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TaskFuture<T> {
    pub(crate) fn pending(kind: TaskKind, name: &str, slot: Slot, serializer: Arc<dyn WorkflowSerializer>) -> Self {
        Self {
            inner: TaskInner::Pending(slot),
            kind,
            name: name.to_string(),
            serializer,
            _marker: PhantomData,
        }
    }

    pub(crate) fn failed(kind: TaskKind, name: &str, err: WorkflowError, serializer: Arc<dyn WorkflowSerializer>) -> Self {
        Self {
            inner: TaskInner::Failed(Some(err)),
            kind,
            name: name.to_string(),
            serializer,
            _marker: PhantomData,
        }
    }

    pub(crate) fn retrying(
        ctx: OrchestrationContext,
        request: TaskRequest,
        policy: RetryPolicy,
        first_attempt: Slot,
        serializer: Arc<dyn WorkflowSerializer>,
    ) -> Self {
        let (kind, name) = match &request {
            TaskRequest::Activity { name, .. } | TaskRequest::ChildWorkflow { name, .. } => (request.kind(), name.clone()),
        };
        Self {
            inner: TaskInner::Retrying(Box::new(RetryDriver {
                ctx,
                request,
                policy,
                attempt: 1,
                backoff_spent: Duration::ZERO,
                phase: RetryPhase::Attempt(first_attempt),
            })),
            kind,
            name,
            serializer,
            _marker: PhantomData,
        }
    }

    fn current(&mut self) -> Option<Resolution> {
        match &mut self.inner {
            TaskInner::Failed(_) => None,
            TaskInner::Pending(slot) => slot.resolution(),
            TaskInner::Retrying(driver) => driver.advance().cloned(),
        }
    }
}

impl<T: DeserializeOwned> Future for TaskFuture<T> {
    type Output = Result<T, WorkflowError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let TaskInner::Failed(err) = &mut this.inner {
            return match err.take() {
                Some(err) => Poll::Ready(Err(err)),
                None => Poll::Pending,
            };
        }
        let Some(resolution) = this.current() else {
            return Poll::Pending;
        };
        Poll::Ready(match resolution.outcome {
            Outcome::Completed(payload) => serializer::decode(this.serializer.as_ref(), payload.as_deref()),
            Outcome::Failed(details) => Err(WorkflowError::TaskFailed {
                kind: this.kind,
                name: this.name.clone(),
                details,
            }),
            Outcome::Canceled(reason) => Err(WorkflowError::Canceled(reason)),
        })
    }
}

impl<T: DeserializeOwned> DurableFuture for TaskFuture<T> {
    fn resolution_key(&mut self) -> Option<ResolutionKey> {
        if matches!(self.inner, TaskInner::Failed(Some(_))) {
            return Some(ResolutionKey::IMMEDIATE);
        }
        self.current().map(|r| r.key)
    }
}

/// Durable timer. Resolves with `Err(Canceled)` when its token fires first.
pub struct TimerFuture {
    slot: Slot,
}

impl TimerFuture {
    pub(crate) fn new(slot: Slot) -> Self {
        Self { slot }
    }
}

impl Future for TimerFuture {
    type Output = Result<(), WorkflowError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.slot.resolution() {
            None => Poll::Pending,
            Some(resolution) => Poll::Ready(match resolution.outcome {
                Outcome::Completed(_) => Ok(()),
                Outcome::Canceled(reason) => Err(WorkflowError::Canceled(reason)),
                Outcome::Failed(details) => Err(WorkflowError::TaskFailed {
                    kind: TaskKind::Timer,
                    name: "timer".to_string(),
                    details,
                }),
            }),
        }
    }
}

impl DurableFuture for TimerFuture {
    fn resolution_key(&mut self) -> Option<ResolutionKey> {
        self.slot.key()
    }
}

/// Wait for a named external event. An absent payload yields `T::default()`.
pub struct ExternalEventFuture<T> {
    slot: Slot,
    rejected: Option<WorkflowError>,
    name: String,
    serializer: Arc<dyn WorkflowSerializer>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ExternalEventFuture<T> {
    pub(crate) fn new(name: &str, slot: Slot, serializer: Arc<dyn WorkflowSerializer>) -> Self {
        Self {
            slot,
            rejected: None,
            name: name.to_string(),
            serializer,
            _marker: PhantomData,
        }
    }

    pub(crate) fn rejected(name: &str, err: WorkflowError, serializer: Arc<dyn WorkflowSerializer>) -> Self {
        Self {
            slot: Slot::new(),
            rejected: Some(err),
            name: name.to_string(),
            serializer,
            _marker: PhantomData,
        }
    }

    pub fn event_name(&self) -> &str {
        &self.name
    }
}

impl<T: DeserializeOwned + Default> Future for ExternalEventFuture<T> {
    type Output = Result<T, WorkflowError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(err) = self.rejected.take() {
            return Poll::Ready(Err(err));
        }
        let Some(resolution) = self.slot.resolution() else {
            return Poll::Pending;
        };
        Poll::Ready(match resolution.outcome {
            Outcome::Completed(None) => Ok(T::default()),
            Outcome::Completed(Some(payload)) if payload.is_empty() => Ok(T::default()),
            Outcome::Completed(Some(payload)) => serializer::decode(self.serializer.as_ref(), Some(&payload)),
            Outcome::Canceled(reason) => Err(WorkflowError::Canceled(reason)),
            Outcome::Failed(details) => Err(WorkflowError::application(details.error_type, details.error_message)),
        })
    }
}

impl<T: DeserializeOwned + Default> DurableFuture for ExternalEventFuture<T> {
    fn resolution_key(&mut self) -> Option<ResolutionKey> {
        if self.rejected.is_some() {
            return Some(ResolutionKey::IMMEDIATE);
        }
        self.slot.key()
    }
}

/// Wait for every future; outputs are returned in input order.
///
/// Every unfinished future is polled on each poll. Durable futures never
/// wake their task, so a wake-driven join would stall on large fan-outs.
pub fn when_all<F: Future + Unpin>(futures: Vec<F>) -> WhenAll<F> {
    WhenAll {
        entries: futures.into_iter().map(WhenAllEntry::Pending).collect(),
    }
}

enum WhenAllEntry<F: Future> {
    Pending(F),
    Done(Option<F::Output>),
}

pub struct WhenAll<F: Future> {
    entries: Vec<WhenAllEntry<F>>,
}

// Entries are only pinned through `Pin::new`, and outputs are never pinned.
impl<F: Future> Unpin for WhenAll<F> {}

impl<F: Future + Unpin> Future for WhenAll<F> {
    type Output = Vec<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut all_done = true;
        for entry in this.entries.iter_mut() {
            if let WhenAllEntry::Pending(fut) = entry {
                match Pin::new(fut).poll(cx) {
                    Poll::Ready(output) => *entry = WhenAllEntry::Done(Some(output)),
                    Poll::Pending => all_done = false,
                }
            }
        }
        if !all_done {
            return Poll::Pending;
        }
        let outputs = this
            .entries
            .iter_mut()
            .filter_map(|entry| match entry {
                WhenAllEntry::Done(output) => output.take(),
                WhenAllEntry::Pending(_) => None,
            })
            .collect();
        Poll::Ready(outputs)
    }
}

/// Wait for the first future to resolve in history order.
///
/// Yields the winner's index, its output and the remaining futures in their
/// original relative order.
pub fn when_any<F: DurableFuture>(futures: Vec<F>) -> WhenAny<F> {
    WhenAny {
        futures: Some(futures),
    }
}

pub struct WhenAny<F> {
    futures: Option<Vec<F>>,
}

impl<F: DurableFuture> Future for WhenAny<F> {
    type Output = (usize, F::Output, Vec<F>);

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(futures) = self.futures.as_mut() else {
            return Poll::Pending;
        };
        let winner = futures
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, f)| f.resolution_key().map(|key| (key, idx)))
            .min();
        let Some((_, idx)) = winner else {
            return Poll::Pending;
        };
        match Pin::new(&mut futures[idx]).poll(cx) {
            Poll::Ready(output) => {
                let mut remaining = self.futures.take().unwrap_or_default();
                remaining.remove(idx);
                Poll::Ready((idx, output, remaining))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Race two differently-typed durable futures, e.g. an activity against a timer.
pub fn race<A: DurableFuture, B: DurableFuture>(a: A, b: B) -> Race<A, B> {
    Race { a, b }
}

pub struct Race<A, B> {
    a: A,
    b: B,
}

impl<A: DurableFuture, B: DurableFuture> Future for Race<A, B> {
    type Output = Either<A::Output, B::Output>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let a_key = this.a.resolution_key();
        let b_key = this.b.resolution_key();
        match (a_key, b_key) {
            (Some(a), Some(b)) if b < a => Pin::new(&mut this.b).poll(cx).map(Either::Right),
            (Some(_), _) => Pin::new(&mut this.a).poll(cx).map(Either::Left),
            (None, Some(_)) => Pin::new(&mut this.b).poll(cx).map(Either::Right),
            (None, None) => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JsonSerializer;
    use futures::FutureExt;

    fn key(position: u64) -> ResolutionKey {
        ResolutionKey { position, ordinal: position }
    }

    fn completed(payload: &str, position: u64) -> Resolution {
        Resolution {
            outcome: Outcome::Completed(Some(payload.to_string())),
            key: key(position),
            at: None,
        }
    }

    fn task(slot: &Slot) -> TaskFuture<String> {
        TaskFuture::pending(TaskKind::Activity, "Echo", slot.clone(), Arc::new(JsonSerializer))
    }

    #[test]
    fn slot_resolves_once() {
        let slot = Slot::new();
        assert!(slot.resolve(completed("\"a\"", 1)));
        assert!(!slot.resolve(completed("\"b\"", 2)));
        assert_eq!(slot.key(), Some(key(1)));
    }

    #[test]
    fn task_future_decodes_and_reports_failures() {
        let ok = Slot::new();
        ok.resolve(completed("\"hello\"", 1));
        assert_eq!(task(&ok).now_or_never(), Some(Ok("hello".to_string())));

        let failed = Slot::new();
        failed.resolve(Resolution {
            outcome: Outcome::Failed(FailureDetails::new("Boom", "bad", "")),
            key: key(2),
            at: None,
        });
        match task(&failed).now_or_never() {
            Some(Err(WorkflowError::TaskFailed { kind, name, details })) => {
                assert_eq!(kind, TaskKind::Activity);
                assert_eq!(name, "Echo");
                assert_eq!(details.error_type, "Boom");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(task(&Slot::new()).now_or_never().is_none());
    }

    #[test]
    fn when_any_prefers_earlier_history_position() {
        let first = Slot::new();
        let second = Slot::new();
        second.resolve(completed("\"second\"", 3));
        first.resolve(completed("\"first\"", 7));

        let (idx, out, rest) = when_any(vec![task(&first), task(&second)]).now_or_never().unwrap();
        assert_eq!(idx, 1);
        assert_eq!(out.unwrap(), "second");
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn when_any_stays_pending_until_something_resolves() {
        let a = Slot::new();
        let b = Slot::new();
        let mut fut = when_any(vec![task(&a), task(&b)]);
        assert!((&mut fut).now_or_never().is_none());
        b.resolve(completed("\"b\"", 1));
        let (idx, _, _) = fut.now_or_never().unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn when_all_repolls_without_wakeups() {
        let slots: Vec<Slot> = (0..40).map(|_| Slot::new()).collect();
        let mut fut = when_all(slots.iter().map(task).collect());
        assert!((&mut fut).now_or_never().is_none());
        for (i, slot) in slots.iter().enumerate().rev() {
            slot.resolve(completed(&format!("\"{i}\""), i as u64));
        }
        let outputs = fut.now_or_never().unwrap();
        assert_eq!(outputs.len(), 40);
        assert_eq!(outputs[39], Ok("39".to_string()));
    }

    #[test]
    fn when_all_accepts_outputs_that_are_not_unpin() {
        let pinned = || futures::future::ready(std::marker::PhantomPinned);
        let outputs = when_all(vec![pinned(), pinned(), pinned()]).now_or_never().unwrap();
        assert_eq!(outputs.len(), 3);
    }

    #[test]
    fn external_event_defaults_on_missing_payload() {
        let slot = Slot::new();
        slot.resolve(Resolution {
            outcome: Outcome::Completed(None),
            key: key(1),
            at: None,
        });
        let fut: ExternalEventFuture<u32> = ExternalEventFuture::new("Go", slot, Arc::new(JsonSerializer));
        assert_eq!(fut.now_or_never(), Some(Ok(0)));
    }

    #[test]
    fn race_picks_earlier_key() {
        let timer = Slot::new();
        let work = Slot::new();
        timer.resolve(Resolution {
            outcome: Outcome::Completed(None),
            key: key(2),
            at: None,
        });
        work.resolve(completed("\"done\"", 5));
        let out = race(task(&work), TimerFuture::new(timer)).now_or_never().unwrap();
        assert!(matches!(out, Either::Right(Ok(()))));
    }
}
