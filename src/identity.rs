use serde::{Deserialize, Serialize};
use std::fmt;

/// Name and optional version of a workflow or activity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskIdentifier {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl TaskIdentifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn with_version(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
        }
    }
}

impl fmt::Display for TaskIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}@{}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Identity of the orchestration instance a pass runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowMetadata {
    pub instance_id: String,
    pub identifier: TaskIdentifier,
}

impl WorkflowMetadata {
    pub fn new(instance_id: impl Into<String>, identifier: TaskIdentifier) -> Self {
        Self {
            instance_id: instance_id.into(),
            identifier,
        }
    }
}
