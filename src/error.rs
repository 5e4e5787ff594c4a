//! Error taxonomy for workflow code and the worker boundary.
//!
//! Workflow bodies see [`WorkflowError`] from every awaitable. Remote failures
//! (an activity or child workflow that failed on the coordinator side) carry a
//! structured [`FailureDetails`] so callers can tell them apart from local errors.

use crate::history::TaskKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured failure information exchanged with the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetails {
    pub error_type: String,
    pub error_message: String,
    #[serde(default)]
    pub stack_trace: String,
}

impl FailureDetails {
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>, stack_trace: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
            stack_trace: stack_trace.into(),
        }
    }

    /// Whether the failure was raised by an error of the given type.
    ///
    /// Matches either the full type name or its last `::`/`.` separated segment,
    /// so `is_caused_by("InvalidOperationException")` matches
    /// `System.InvalidOperationException`.
    pub fn is_caused_by(&self, error_type: &str) -> bool {
        if self.error_type == error_type {
            return true;
        }
        self.error_type
            .rsplit(|c: char| c == '.' || c == ':')
            .next()
            .is_some_and(|short| short == error_type)
    }
}

/// Errors surfaced to workflow code and converted into failure details at the worker.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    /// Invalid arguments, rejected before any action is recorded.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A remote activity, child workflow or timer reported failure.
    #[error("{kind} '{name}' failed: {}", .details.error_message)]
    TaskFailed {
        kind: TaskKind,
        name: String,
        details: FailureDetails,
    },

    /// A wait was canceled through a token or a timeout.
    #[error("canceled: {0}")]
    Canceled(String),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Error raised by user code.
    #[error("{error_type}: {message}")]
    Application { error_type: String, message: String },

    /// Several parallel tasks failed.
    #[error("{} task(s) failed: {}", .0.len(), .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Aggregate(Vec<WorkflowError>),
}

impl WorkflowError {
    pub fn application(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Application {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an application error without a specific type.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::application("Error", message)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }

    /// Remote failure details, when this error came from a failed task.
    pub fn failure_details(&self) -> Option<&FailureDetails> {
        match self {
            Self::TaskFailed { details, .. } => Some(details),
            _ => None,
        }
    }

    /// Type name reported to the coordinator when this error fails an orchestration.
    pub fn error_type(&self) -> &str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::TaskFailed { .. } => "TaskFailed",
            Self::Canceled(_) => "Canceled",
            Self::Serialization(_) => "Serialization",
            Self::Application { error_type, .. } => error_type.as_str(),
            Self::Aggregate(_) => "Aggregate",
        }
    }

    /// Convert into the structured shape carried by a failed completion.
    pub fn to_failure_details(&self) -> FailureDetails {
        let (message, stack) = match self {
            Self::Application { message, .. } => (message.clone(), String::new()),
            Self::TaskFailed { details, .. } => (self.to_string(), details.stack_trace.clone()),
            other => (other.to_string(), String::new()),
        };
        FailureDetails::new(self.error_type(), message, stack)
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
