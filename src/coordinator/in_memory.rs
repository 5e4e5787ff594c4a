//! In-process coordinator backed by tokio channels, for tests and embedding.

use super::{ChannelError, CoordinatorChannel, WorkItemStream};
use crate::protocol::{ActivityResponse, OrchestratorResponse, WorkItem};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Coordinator side given to the worker.
pub struct InMemoryCoordinator {
    work_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<WorkItem, ChannelError>>>>,
    orchestrator_tx: mpsc::UnboundedSender<OrchestratorResponse>,
    activity_tx: mpsc::UnboundedSender<ActivityResponse>,
}

/// Driver side: submit work and collect responses.
pub struct CoordinatorHandle {
    work_tx: Option<mpsc::UnboundedSender<Result<WorkItem, ChannelError>>>,
    orchestrator_rx: mpsc::UnboundedReceiver<OrchestratorResponse>,
    activity_rx: mpsc::UnboundedReceiver<ActivityResponse>,
}

impl InMemoryCoordinator {
    pub fn new() -> (Arc<Self>, CoordinatorHandle) {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let (orchestrator_tx, orchestrator_rx) = mpsc::unbounded_channel();
        let (activity_tx, activity_rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(Self {
            work_rx: Mutex::new(Some(work_rx)),
            orchestrator_tx,
            activity_tx,
        });
        let handle = CoordinatorHandle {
            work_tx: Some(work_tx),
            orchestrator_rx,
            activity_rx,
        };
        (coordinator, handle)
    }
}

#[async_trait]
impl CoordinatorChannel for InMemoryCoordinator {
    async fn get_work_items(&self) -> Result<WorkItemStream, ChannelError> {
        let rx = self
            .work_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ChannelError::permanent("get_work_items", "work item stream already opened"))?;
        let stream = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
        Ok(stream.boxed())
    }

    async fn complete_orchestrator_task(&self, response: OrchestratorResponse) -> Result<(), ChannelError> {
        self.orchestrator_tx
            .send(response)
            .map_err(|_| ChannelError::permanent("complete_orchestrator_task", "handle dropped"))
    }

    async fn complete_activity_task(&self, response: ActivityResponse) -> Result<(), ChannelError> {
        self.activity_tx
            .send(response)
            .map_err(|_| ChannelError::permanent("complete_activity_task", "handle dropped"))
    }
}

impl CoordinatorHandle {
    pub fn submit(&self, item: WorkItem) -> Result<(), ChannelError> {
        self.push(Ok(item))
    }

    /// Deliver a stream error to the worker.
    pub fn fail_stream(&self, err: ChannelError) -> Result<(), ChannelError> {
        self.push(Err(err))
    }

    /// End the work item stream after the items already submitted.
    pub fn close(&mut self) {
        self.work_tx = None;
    }

    pub async fn next_orchestrator_response(&mut self) -> Option<OrchestratorResponse> {
        self.orchestrator_rx.recv().await
    }

    pub async fn next_activity_response(&mut self) -> Option<ActivityResponse> {
        self.activity_rx.recv().await
    }

    fn push(&self, item: Result<WorkItem, ChannelError>) -> Result<(), ChannelError> {
        let tx = self
            .work_tx
            .as_ref()
            .ok_or_else(|| ChannelError::permanent("submit", "stream closed"))?;
        tx.send(item)
            .map_err(|_| ChannelError::permanent("submit", "worker dropped the stream"))
    }
}
