//! Change-notification collector abstraction.
//!
//! A collector serves batched property changes for the objects selected by
//! a filter. Callers pass back the version of the last batch they saw; the
//! first call uses the empty version and receives the current state of every
//! filtered object.

use async_trait::async_trait;
use std::fmt;

use crate::error::WaitResult;
use crate::handle::{RemoteTaskHandle, TaskInfo, TaskState};

/// Property path carrying the whole task info.
pub const INFO_PROPERTY: &str = "info";

/// Property path carrying only the task state.
pub const INFO_STATE_PROPERTY: &str = "info.state";

/// Identifier of a filter created on a collector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterId(pub String);

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Version token returned with each update batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateVersion(pub String);

impl UpdateVersion {
    /// The empty token used for the first poll.
    pub fn initial() -> Self {
        Self(String::new())
    }

    /// Returns true for the empty token.
    pub fn is_initial(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UpdateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value of a changed property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeValue {
    /// Whole task info
    Info(TaskInfo),
    /// Task state only
    State(TaskState),
    /// Any other property, rendered as text
    Other(String),
}

/// One changed property of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange {
    /// Property path (e.g. "info", "info.state", "info.progress")
    pub name: String,
    /// New value
    pub value: ChangeValue,
}

impl PropertyChange {
    /// An `info` change.
    pub fn info(info: TaskInfo) -> Self {
        Self {
            name: INFO_PROPERTY.to_string(),
            value: ChangeValue::Info(info),
        }
    }

    /// An `info.state` change.
    pub fn state(state: TaskState) -> Self {
        Self {
            name: INFO_STATE_PROPERTY.to_string(),
            value: ChangeValue::State(state),
        }
    }

    /// A change to some other property.
    pub fn other(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ChangeValue::Other(value.into()),
        }
    }
}

/// Changes for one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUpdate {
    /// The task the changes belong to
    pub task: RemoteTaskHandle,
    /// Changed properties in order
    pub changes: Vec<PropertyChange>,
}

/// One batch returned by [`PropertyCollector::wait_for_updates`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSet {
    /// Version to pass to the next call
    pub version: UpdateVersion,
    /// Changed objects
    pub objects: Vec<ObjectUpdate>,
}

/// Change-notification service for remote tasks.
#[async_trait]
pub trait PropertyCollector: Send + Sync {
    /// Creates a filter watching the given tasks.
    async fn create_filter(&self, tasks: &[RemoteTaskHandle]) -> WaitResult<FilterId>;

    /// Returns the next batch of changes newer than `version`.
    ///
    /// Suspends until at least one change is available.
    async fn wait_for_updates(
        &self,
        filter: &FilterId,
        version: &UpdateVersion,
    ) -> WaitResult<UpdateSet>;

    /// Fetches the current info of a task.
    async fn task_info(&self, task: &RemoteTaskHandle) -> WaitResult<TaskInfo>;

    /// Destroys a filter.
    async fn destroy_filter(&self, filter: FilterId) -> WaitResult<()>;
}
