//! Error types for task waiting.

use thiserror::Error;

use crate::handle::RemoteTaskHandle;

/// Error type for remote task waits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    /// A task reached the error state
    #[error("Task {task} failed: {message}")]
    TaskFailed {
        task: RemoteTaskHandle,
        message: String,
    },

    /// The deadline passed with tasks still outstanding
    #[error("Timed out waiting for tasks: {}", .pending.join(", "))]
    Timeout { pending: Vec<String> },

    /// The wait was cancelled by the caller
    #[error("Wait cancelled")]
    Cancelled,

    /// The change-notification service failed
    #[error("Property collector error: {0}")]
    Collector(String),
}

impl WaitError {
    /// Creates a task failure.
    pub fn task_failed(task: RemoteTaskHandle, message: impl Into<String>) -> Self {
        WaitError::TaskFailed {
            task,
            message: message.into(),
        }
    }

    /// Creates a collector error.
    pub fn collector(message: impl Into<String>) -> Self {
        WaitError::Collector(message.into())
    }

    /// Returns the failed task, if this error is attributable to one.
    pub fn failed_task(&self) -> Option<&RemoteTaskHandle> {
        match self {
            WaitError::TaskFailed { task, .. } => Some(task),
            _ => None,
        }
    }
}

/// Result type for task waits.
pub type WaitResult<T> = Result<T, WaitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = WaitError::Timeout {
            pending: vec!["task-a".to_string(), "task-b".to_string()],
        };
        assert_eq!(err.to_string(), "Timed out waiting for tasks: task-a, task-b");
    }

    #[test]
    fn test_failed_task() {
        let task = RemoteTaskHandle::new("task-1");
        let err = WaitError::task_failed(task.clone(), "port group exists");
        assert_eq!(err.failed_task(), Some(&task));
        assert_eq!(err.to_string(), "Task task-1 failed: port group exists");
        assert_eq!(WaitError::Cancelled.failed_task(), None);
    }
}
