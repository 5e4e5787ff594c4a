//! # replayflow
//!
//! A deterministic workflow replay engine and worker for durable-task coordinators.
//!
//! Workflow code is ordinary async Rust written against an
//! [`OrchestrationContext`]. Each time the coordinator sends an orchestrator
//! work item, the worker rebuilds the context from history, runs the workflow
//! body from the start and returns the side effects the body asked for that
//! history has not recorded yet. Activities are plain async functions executed
//! once per activity work item.
//!
//! ```ignore
//! use replayflow::{OrchestrationContext, WorkflowError};
//!
//! async fn greet(ctx: OrchestrationContext, name: String) -> Result<String, WorkflowError> {
//!     let greeting: String = ctx.call_activity("Greet", &name).await?;
//!     ctx.create_timer_after(std::time::Duration::from_secs(60)).await?;
//!     Ok(greeting)
//! }
//! ```
//!
//! Determinism rules for workflow bodies:
//! - use [`OrchestrationContext::current_utc_date_time`] and
//!   [`OrchestrationContext::new_guid`] instead of the system clock or random ids
//! - perform I/O only in activities
//! - log through [`replay_info!`] and friends, or a [`ReplaySafeLogger`], so
//!   replayed passes stay quiet

pub mod actions;
pub mod cancellation;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod futures;
pub mod history;
pub mod identity;
pub mod logging;
pub mod parallel;
pub mod protocol;
pub mod retry;
pub mod runtime;
pub mod serializer;

pub use actions::{ActionKind, CompleteOrchestration, OrchestrationStatus, PendingAction, TaskRouter};
pub use cancellation::CancellationToken;
pub use context::{ChildWorkflowOptions, OrchestrationContext, TaskOptions};
pub use coordinator::{ChannelError, CoordinatorChannel, CoordinatorHandle, InMemoryCoordinator};
pub use error::{FailureDetails, WorkflowError};
pub use crate::futures::{
    DurableFuture, Either, ExternalEventFuture, TaskFuture, TimerFuture, race, when_all, when_any,
};
pub use history::{EventKind, HistoryEvent, TaskId, TaskKind};
pub use identity::{TaskIdentifier, WorkflowMetadata};
pub use logging::{LogSink, ReplaySafeLogger, TracingSink};
pub use parallel::{process_in_parallel, process_with_default_parallelism};
pub use protocol::{ActivityRequest, ActivityResponse, OrchestratorRequest, OrchestratorResponse, WorkItem};
pub use retry::RetryPolicy;
pub use runtime::{
    ActivityContext, ActivityHandler, ActivityRegistry, FnActivity, FnWorkflow, ServiceProvider, Services,
    TaskRegistry, VersionPolicy, Worker, WorkerError, WorkerOptions, WorkflowHandler, WorkflowRegistry,
};
pub use serializer::{JsonSerializer, WorkflowSerializer};
