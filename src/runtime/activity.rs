use crate::error::WorkflowError;
use crate::history::TaskId;
use crate::identity::TaskIdentifier;
use crate::serializer::{self, WorkflowSerializer};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Context handed to an activity invocation. Activities never produce actions.
#[derive(Clone)]
pub struct ActivityContext {
    identifier: TaskIdentifier,
    instance_id: String,
    task_id: TaskId,
    serializer: Arc<dyn WorkflowSerializer>,
}

impl ActivityContext {
    pub(crate) fn new(
        identifier: TaskIdentifier,
        instance_id: impl Into<String>,
        task_id: TaskId,
        serializer: Arc<dyn WorkflowSerializer>,
    ) -> Self {
        Self {
            identifier,
            instance_id: instance_id.into(),
            task_id,
            serializer,
        }
    }

    pub fn identifier(&self) -> &TaskIdentifier {
        &self.identifier
    }

    pub fn name(&self) -> &str {
        &self.identifier.name
    }

    /// Instance id of the orchestration that scheduled this activity, or "".
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub(crate) fn serializer(&self) -> Arc<dyn WorkflowSerializer> {
        self.serializer.clone()
    }

    /// Decode a payload with the worker's serializer. "" decodes from `null`.
    pub fn decode<T: DeserializeOwned>(&self, input: &str) -> Result<T, WorkflowError> {
        serializer::decode(self.serializer.as_ref(), Some(input))
    }
}

impl std::fmt::Debug for ActivityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityContext")
            .field("identifier", &self.identifier)
            .field("instance_id", &self.instance_id)
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}
