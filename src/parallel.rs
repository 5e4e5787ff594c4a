//! Bounded fan-out over durable futures.

use crate::error::WorkflowError;
use crate::futures::{DurableFuture, ResolutionKey, when_any};
use crate::runtime::limits::DEFAULT_PARALLELISM;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A future tagged with the position of the input that produced it.
struct Indexed<F> {
    index: usize,
    inner: F,
}

impl<F: DurableFuture> Future for Indexed<F> {
    type Output = (usize, F::Output);

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let index = self.index;
        Pin::new(&mut self.inner).poll(cx).map(|output| (index, output))
    }
}

impl<F: DurableFuture> DurableFuture for Indexed<F> {
    fn resolution_key(&mut self) -> Option<ResolutionKey> {
        self.inner.resolution_key()
    }
}

/// Run `factory` over `inputs` with at most `max_concurrency` tasks outstanding.
///
/// A new task is started each time one resolves, in history order, so the
/// set of scheduled actions is identical on every replay. Results are
/// returned in input order.
///
/// # Errors
///
/// `InvalidArgument` when `max_concurrency` is zero. Otherwise, once every
/// task has finished, all failures are returned together as `Aggregate`.
pub async fn process_in_parallel<I, T, F, Fut>(
    inputs: impl IntoIterator<Item = I>,
    max_concurrency: usize,
    mut factory: F,
) -> Result<Vec<T>, WorkflowError>
where
    F: FnMut(I) -> Fut,
    Fut: DurableFuture<Output = Result<T, WorkflowError>>,
{
    if max_concurrency == 0 {
        return Err(WorkflowError::InvalidArgument(
            "max_concurrency must be greater than zero".to_string(),
        ));
    }
    let inputs: Vec<I> = inputs.into_iter().collect();
    let total = inputs.len();
    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut errors = Vec::new();
    let mut pending = inputs.into_iter().enumerate();
    let mut in_flight: Vec<Indexed<Fut>> = Vec::with_capacity(max_concurrency.min(total));

    for (index, input) in pending.by_ref().take(max_concurrency) {
        in_flight.push(Indexed {
            index,
            inner: factory(input),
        });
    }

    while !in_flight.is_empty() {
        let (_, (index, output), remaining) = when_any(in_flight).await;
        in_flight = remaining;
        match output {
            Ok(value) => results[index] = Some(value),
            Err(err) => errors.push(err),
        }
        if let Some((index, input)) = pending.next() {
            in_flight.push(Indexed {
                index,
                inner: factory(input),
            });
        }
    }

    if !errors.is_empty() {
        return Err(WorkflowError::Aggregate(errors));
    }
    Ok(results.into_iter().flatten().collect())
}

/// [`process_in_parallel`] with the default limit of five outstanding tasks.
pub async fn process_with_default_parallelism<I, T, F, Fut>(
    inputs: impl IntoIterator<Item = I>,
    factory: F,
) -> Result<Vec<T>, WorkflowError>
where
    F: FnMut(I) -> Fut,
    Fut: DurableFuture<Output = Result<T, WorkflowError>>,
{
    process_in_parallel(inputs, DEFAULT_PARALLELISM, factory).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionKind;
    use crate::context::OrchestrationContext;
    use crate::error::FailureDetails;
    use crate::futures::TaskFuture;
    use crate::history::HistoryEvent;
    use crate::identity::{TaskIdentifier, WorkflowMetadata};
    use crate::logging::TracingSink;
    use crate::serializer::JsonSerializer;
    use chrono::Utc;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use std::sync::Arc;

    fn ctx() -> OrchestrationContext {
        let ctx = OrchestrationContext::new(
            WorkflowMetadata::new("fan-out", TaskIdentifier::new("Flow")),
            Utc::now(),
            Arc::new(JsonSerializer),
            Arc::new(TracingSink),
        );
        ctx.set_replaying(false);
        ctx
    }

    fn fan_out(ctx: &OrchestrationContext, inputs: Vec<i32>, limit: usize) -> BoxFuture<'static, Result<Vec<i32>, WorkflowError>> {
        let ctx = ctx.clone();
        async move {
            process_in_parallel(inputs, limit, |n: i32| -> TaskFuture<i32> { ctx.call_activity("Double", &n) }).await
        }
        .boxed()
    }

    fn scheduled_ids(ctx: &OrchestrationContext) -> Vec<i32> {
        ctx.take_output()
            .actions
            .into_iter()
            .filter(|a| matches!(a.kind, ActionKind::ScheduleTask { .. }))
            .map(|a| a.id)
            .collect()
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let ctx = ctx();
        let result = fan_out(&ctx, vec![1], 0).now_or_never();
        assert!(matches!(result, Some(Err(WorkflowError::InvalidArgument(_)))));
        assert!(scheduled_ids(&ctx).is_empty());
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let ctx = ctx();
        assert_eq!(fan_out(&ctx, vec![], 3).now_or_never(), Some(Ok(vec![])));
    }

    #[test]
    fn limit_bounds_outstanding_tasks_and_results_keep_input_order() {
        let ctx = ctx();
        let mut fut = fan_out(&ctx, vec![1, 2, 3], 2);
        assert!((&mut fut).now_or_never().is_none());
        assert_eq!(scheduled_ids(&ctx), vec![0, 1]);

        // Second task finishes first; the third input starts in its place.
        ctx.apply_event(&HistoryEvent::task_completed(10, Some(1), Some("4".into())));
        assert!((&mut fut).now_or_never().is_none());
        assert_eq!(scheduled_ids(&ctx), vec![2]);

        ctx.apply_event(&HistoryEvent::task_completed(11, Some(2), Some("6".into())));
        ctx.apply_event(&HistoryEvent::task_completed(12, Some(0), Some("2".into())));
        assert_eq!(fut.now_or_never(), Some(Ok(vec![2, 4, 6])));
    }

    #[test]
    fn failures_are_aggregated_after_all_tasks_finish() {
        let ctx = ctx();
        let mut fut = fan_out(&ctx, vec![1, 2], 2);
        assert!((&mut fut).now_or_never().is_none());
        ctx.apply_event(&HistoryEvent::task_failed(5, Some(0), FailureDetails::new("E", "bad", "")));
        assert!((&mut fut).now_or_never().is_none());
        ctx.apply_event(&HistoryEvent::task_completed(6, Some(1), Some("4".into())));
        match fut.now_or_never() {
            Some(Err(WorkflowError::Aggregate(errors))) => assert_eq!(errors.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }
}
