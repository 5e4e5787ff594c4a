//! The coordinator boundary: where work items come from and responses go.

use crate::protocol::{ActivityResponse, OrchestratorResponse, WorkItem};
use async_trait::async_trait;
use futures::stream::BoxStream;

mod error;
pub mod in_memory;

pub use error::ChannelError;
pub use in_memory::{CoordinatorHandle, InMemoryCoordinator};

pub type WorkItemStream = BoxStream<'static, Result<WorkItem, ChannelError>>;

/// Bidirectional channel to the coordinator.
///
/// `get_work_items` opens a stream that ends when the coordinator closes it.
/// A stream error with [`ChannelError::Canceled`] while the worker is
/// stopping is expected and ignored.
#[async_trait]
pub trait CoordinatorChannel: Send + Sync {
    async fn get_work_items(&self) -> Result<WorkItemStream, ChannelError>;

    async fn complete_orchestrator_task(&self, response: OrchestratorResponse) -> Result<(), ChannelError>;

    async fn complete_activity_task(&self, response: ActivityResponse) -> Result<(), ChannelError>;
}
