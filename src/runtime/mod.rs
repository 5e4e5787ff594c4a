//! Worker runtime: handler traits, registries, the replay engine and the
//! loop that pulls work items from a coordinator.

use crate::context::OrchestrationContext;
use crate::coordinator::{ChannelError, CoordinatorChannel};
use crate::error::WorkflowError;
use crate::logging::{LogSink, TracingSink};
use crate::protocol::WorkItem;
use crate::serializer::{JsonSerializer, WorkflowSerializer};
use async_trait::async_trait;
use futures::StreamExt;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub mod activity;
pub(crate) mod correlation;
mod dispatchers;
pub mod limits;
pub mod observability;
pub mod registry;
pub mod replay_engine;

pub use activity::ActivityContext;
pub use observability::{LogFormat, MetricsProvider, MetricsSnapshot, ObservabilityConfig, init_logging};
pub use registry::{
    ActivityRegistry, ActivityRegistryBuilder, ConstructionError, FromServices, ServiceProvider, Services,
    TaskRegistry, VersionPolicy, WorkflowRegistry, WorkflowRegistryBuilder, parse_version,
};
pub use replay_engine::{ReplayEngine, ReplayOutcome, TurnResult};

/// Trait implemented by workflow bodies.
#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    async fn invoke(&self, ctx: OrchestrationContext, input: String) -> Result<String, WorkflowError>;
}

/// Function wrapper that implements `WorkflowHandler`.
pub struct FnWorkflow<F, Fut>(pub F)
where
    F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, WorkflowError>> + Send + 'static;

#[async_trait]
impl<F, Fut> WorkflowHandler for FnWorkflow<F, Fut>
where
    F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, WorkflowError>> + Send + 'static,
{
    async fn invoke(&self, ctx: OrchestrationContext, input: String) -> Result<String, WorkflowError> {
        (self.0)(ctx, input).await
    }
}

/// Trait implemented by activities.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn invoke(&self, ctx: ActivityContext, input: String) -> Result<String, WorkflowError>;
}

pub struct FnActivity<F, Fut>(pub F)
where
    F: Fn(ActivityContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, WorkflowError>> + Send + 'static;

#[async_trait]
impl<F, Fut> ActivityHandler for FnActivity<F, Fut>
where
    F: Fn(ActivityContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, WorkflowError>> + Send + 'static,
{
    async fn invoke(&self, ctx: ActivityContext, input: String) -> Result<String, WorkflowError> {
        (self.0)(ctx, input).await
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    }
}

/// Configuration options for the Worker.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Orchestrator work items processed concurrently.
    /// Default: 100
    pub max_concurrent_workflows: usize,
    /// Activity work items executed concurrently.
    /// Default: 100
    pub max_concurrent_activities: usize,
    pub observability: ObservabilityConfig,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: limits::DEFAULT_MAX_CONCURRENT_WORKFLOWS,
            max_concurrent_activities: limits::DEFAULT_MAX_CONCURRENT_ACTIVITIES,
            observability: ObservabilityConfig::default(),
        }
    }
}

impl WorkerOptions {
    /// # Errors
    ///
    /// Both concurrency limits must be positive.
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.max_concurrent_workflows == 0 {
            return Err(WorkerError::InvalidOptions(
                "max_concurrent_workflows must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_activities == 0 {
            return Err(WorkerError::InvalidOptions(
                "max_concurrent_activities must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid worker options: {0}")]
    InvalidOptions(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Pulls work items from a coordinator and dispatches them to registered handlers.
pub struct Worker {
    channel: Arc<dyn CoordinatorChannel>,
    registry: TaskRegistry,
    services: Arc<dyn ServiceProvider>,
    serializer: Arc<dyn WorkflowSerializer>,
    log_sink: Arc<dyn LogSink>,
    metrics: Arc<MetricsProvider>,
    options: WorkerOptions,
}

impl Worker {
    /// Create a worker with JSON payloads, an empty service map and `tracing` logging.
    ///
    /// Installs the configured log subscriber unless one is already set.
    pub fn new(
        channel: Arc<dyn CoordinatorChannel>,
        registry: TaskRegistry,
        options: WorkerOptions,
    ) -> Result<Self, WorkerError> {
        options.validate()?;
        if let Err(err) = init_logging(&options.observability) {
            debug!(target: "replayflow::worker", error = %err, "logging already initialized");
        }
        Ok(Self {
            channel,
            registry,
            services: Arc::new(Services::new()),
            serializer: Arc::new(JsonSerializer),
            log_sink: Arc::new(TracingSink),
            metrics: Arc::new(MetricsProvider::new(&options.observability)),
            options,
        })
    }

    pub fn with_services(mut self, services: Arc<dyn ServiceProvider>) -> Self {
        self.services = services;
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn WorkflowSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run until `stop` becomes true or the coordinator closes the stream.
    ///
    /// Items already running finish and send their responses before this
    /// returns. Items still waiting for a concurrency permit are released
    /// without a response so the coordinator can hand them out again.
    ///
    /// # Errors
    ///
    /// Stream failures other than a cancellation during shutdown.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let mut stream = match self.channel.get_work_items().await {
            Ok(stream) => stream,
            Err(err) if err.is_canceled() && *stop.borrow() => return Ok(()),
            Err(err) => {
                error!(target: "replayflow::worker", error = %err, "failed to open work item stream");
                return Err(err.into());
            }
        };

        let workflow_permits = Arc::new(Semaphore::new(self.options.max_concurrent_workflows));
        let activity_permits = Arc::new(Semaphore::new(self.options.max_concurrent_activities));
        let mut in_flight = JoinSet::new();
        info!(
            target: "replayflow::worker",
            max_concurrent_workflows = self.options.max_concurrent_workflows,
            max_concurrent_activities = self.options.max_concurrent_activities,
            "worker started"
        );

        let mut outcome = Ok(());
        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        error!(target: "replayflow::worker", error = %err, "work item task aborted");
                    }
                }
                next = stream.next() => match next {
                    None => {
                        info!(target: "replayflow::worker", "work item stream ended");
                        break;
                    }
                    Some(Err(err)) if err.is_canceled() && *stop.borrow() => break,
                    Some(Err(err)) => {
                        error!(target: "replayflow::worker", error = %err, "work item stream failed");
                        outcome = Err(err.into());
                        break;
                    }
                    Some(Ok(item)) => {
                        let permits = match &item {
                            WorkItem::Orchestrator(_) => workflow_permits.clone(),
                            WorkItem::Activity(_) => activity_permits.clone(),
                        };
                        let worker = self.clone();
                        let mut stopping = stop.clone();
                        // A full pool parks only this task, never the pull loop.
                        in_flight.spawn(async move {
                            let permit = tokio::select! {
                                biased;
                                _ = stopping.wait_for(|stop| *stop) => None,
                                permit = permits.acquire_owned() => permit.ok(),
                            };
                            let Some(_permit) = permit else {
                                debug!(target: "replayflow::worker", "work item released unstarted at shutdown");
                                return;
                            };
                            worker.dispatch(item).await;
                        });
                    }
                },
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                error!(target: "replayflow::worker", error = %err, "work item task aborted");
            }
        }
        info!(target: "replayflow::worker", "worker stopped");
        outcome
    }

    async fn dispatch(&self, item: WorkItem) {
        match item {
            WorkItem::Orchestrator(request) => {
                let response = self.process_orchestrator(request);
                if let Err(err) = self.channel.complete_orchestrator_task(response).await {
                    warn!(target: "replayflow::worker", error = %err, retryable = err.is_retryable(), "failed to send orchestrator response");
                }
            }
            WorkItem::Activity(request) => {
                let response = self.process_activity(request).await;
                if let Err(err) = self.channel.complete_activity_task(response).await {
                    warn!(target: "replayflow::worker", error = %err, retryable = err.is_retryable(), "failed to send activity response");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_reject_zero_limits() {
        assert!(WorkerOptions::default().validate().is_ok());
        let bad = WorkerOptions {
            max_concurrent_activities: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(WorkerError::InvalidOptions(_))));
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
