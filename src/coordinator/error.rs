use thiserror::Error;

/// Failure talking to the coordinator, classified for retry.
///
/// **Retryable**: dropped connections, timeouts, a busy coordinator.
/// **Permanent**: malformed messages, unknown instances, protocol violations.
/// **Canceled**: the stream was torn down because the worker is stopping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("{operation}: {message}")]
    Failed {
        /// Operation that failed, e.g. "get_work_items" or "complete_activity_task"
        operation: String,
        message: String,
        retryable: bool,
    },
    #[error("{0}: canceled")]
    Canceled(String),
}

impl ChannelError {
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn canceled(operation: impl Into<String>) -> Self {
        Self::Canceled(operation.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { retryable: true, .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }

    pub fn operation(&self) -> &str {
        match self {
            Self::Failed { operation, .. } | Self::Canceled(operation) => operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let busy = ChannelError::retryable("get_work_items", "coordinator busy");
        assert!(busy.is_retryable());
        assert!(!busy.is_canceled());
        assert_eq!(busy.to_string(), "get_work_items: coordinator busy");

        let bad = ChannelError::permanent("complete_activity_task", "unknown instance");
        assert!(!bad.is_retryable());

        let stop = ChannelError::canceled("get_work_items");
        assert!(stop.is_canceled());
        assert!(!stop.is_retryable());
        assert_eq!(stop.operation(), "get_work_items");
    }
}
