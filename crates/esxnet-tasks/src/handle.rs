//! Task identity and state types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of an in-flight remote mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteTaskHandle(String);

impl RemoteTaskHandle {
    /// Wraps an identifier issued by the remote side.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Issues a fresh random identifier.
    pub fn generate() -> Self {
        Self(format!("task-{}", uuid::Uuid::new_v4()))
    }

    /// Returns the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteTaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a remote task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Accepted, not started
    Queued,
    /// In progress
    Running,
    /// Completed successfully
    Success,
    /// Completed with an error
    Error,
}

impl TaskState {
    /// Returns true for `Success` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Error)
    }

    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Success => "success",
            TaskState::Error => "error",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full task information as reported by the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Task identifier
    pub task: RemoteTaskHandle,
    /// Human readable description of the mutation
    pub description: String,
    /// Current state
    pub state: TaskState,
    /// Error text, set when `state` is `Error`
    pub error: Option<String>,
}

impl TaskInfo {
    /// Creates a queued task record.
    pub fn queued(task: RemoteTaskHandle, description: impl Into<String>) -> Self {
        Self {
            task,
            description: description.into(),
            state: TaskState::Queued,
            error: None,
        }
    }
}
