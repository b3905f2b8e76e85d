//! In-process property collector.
//!
//! Tracks tasks whose work runs inside this process (for instance remote
//! shell commands spawned on the tokio runtime) and serves their state
//! changes through the same long-poll protocol a management endpoint uses.
//!
//! Finished tasks are forgotten once the last filter watching them is
//! destroyed.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::collector::{
    FilterId, ObjectUpdate, PropertyChange, PropertyCollector, UpdateSet, UpdateVersion,
};
use crate::error::{WaitError, WaitResult};
use crate::handle::{RemoteTaskHandle, TaskInfo, TaskState};

#[derive(Debug)]
struct TaskRecord {
    info: TaskInfo,
    /// Collector version at which `info` last changed
    changed_at: u64,
}

#[derive(Debug, Default)]
struct Inner {
    version: u64,
    next_filter: u64,
    tasks: HashMap<RemoteTaskHandle, TaskRecord>,
    filters: HashMap<FilterId, HashSet<RemoteTaskHandle>>,
}

/// Collector for tasks executed in this process.
#[derive(Debug, Default)]
pub struct LocalTaskCollector {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl LocalTaskCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new queued task and returns its handle.
    pub fn register(&self, description: impl Into<String>) -> RemoteTaskHandle {
        let task = RemoteTaskHandle::generate();
        let mut inner = self.inner.lock();
        inner.version += 1;
        let changed_at = inner.version;
        inner.tasks.insert(
            task.clone(),
            TaskRecord {
                info: TaskInfo::queued(task.clone(), description),
                changed_at,
            },
        );
        drop(inner);
        self.notify.notify_waiters();
        task
    }

    /// Marks a task as running.
    pub fn start(&self, task: &RemoteTaskHandle) {
        self.transition(task, TaskState::Running, None);
    }

    /// Marks a task as successfully completed.
    pub fn complete(&self, task: &RemoteTaskHandle) {
        self.transition(task, TaskState::Success, None);
    }

    /// Marks a task as failed.
    pub fn fail(&self, task: &RemoteTaskHandle, message: impl Into<String>) {
        self.transition(task, TaskState::Error, Some(message.into()));
    }

    /// Registers a task and runs `work` for it on the tokio runtime.
    ///
    /// The task moves to `Running` when the work starts and to `Success`
    /// or `Error` when it finishes. Work that panics or is aborted ends the
    /// task in `Error`.
    pub fn spawn<F>(self: &Arc<Self>, description: impl Into<String>, work: F) -> RemoteTaskHandle
    where
        F: Future<Output = Result<(), String>> + Send + 'static,
    {
        let task = self.register(description);
        let collector = Arc::clone(self);
        let handle = task.clone();
        tokio::spawn(async move {
            collector.start(&handle);
            match tokio::spawn(work).await {
                Ok(Ok(())) => collector.complete(&handle),
                Ok(Err(message)) => collector.fail(&handle, message),
                Err(e) => {
                    let message = if e.is_panic() {
                        "task panicked"
                    } else {
                        "task aborted"
                    };
                    warn!(task = %handle, error = %e, "Task work did not finish");
                    collector.fail(&handle, message);
                }
            }
        });
        task
    }

    /// Returns the current state of a task.
    pub fn state(&self, task: &RemoteTaskHandle) -> Option<TaskState> {
        self.inner.lock().tasks.get(task).map(|r| r.info.state)
    }

    /// Returns the number of live filters.
    pub fn active_filters(&self) -> usize {
        self.inner.lock().filters.len()
    }

    /// Returns the number of tracked tasks.
    pub fn tracked_tasks(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    fn transition(&self, task: &RemoteTaskHandle, state: TaskState, error: Option<String>) {
        let mut inner = self.inner.lock();
        inner.version += 1;
        let version = inner.version;
        match inner.tasks.get_mut(task) {
            Some(record) if !record.info.state.is_terminal() => {
                record.info.state = state;
                record.info.error = error;
                record.changed_at = version;
                trace!(task = %task, state = %state, version, "Task state changed");
            }
            Some(record) => {
                debug!(task = %task, state = %record.info.state, "Ignoring change to finished task");
                return;
            }
            None => {
                debug!(task = %task, "Ignoring change to unknown task");
                return;
            }
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    fn parse_version(version: &UpdateVersion) -> WaitResult<Option<u64>> {
        if version.is_initial() {
            return Ok(None);
        }
        version
            .0
            .parse()
            .map(Some)
            .map_err(|_| WaitError::collector(format!("invalid version token '{}'", version)))
    }

    fn collect_changes(&self, filter: &FilterId, since: Option<u64>) -> WaitResult<Option<UpdateSet>> {
        let inner = self.inner.lock();
        let watched = inner
            .filters
            .get(filter)
            .ok_or_else(|| WaitError::collector(format!("unknown filter {}", filter)))?;

        let mut changed: Vec<&TaskRecord> = watched
            .iter()
            .filter_map(|task| inner.tasks.get(task))
            .filter(|record| match since {
                None => true,
                Some(v) => record.changed_at > v,
            })
            .collect();

        if changed.is_empty() {
            return Ok(None);
        }
        changed.sort_by_key(|record| record.changed_at);

        Ok(Some(UpdateSet {
            version: UpdateVersion(inner.version.to_string()),
            objects: changed
                .into_iter()
                .map(|record| ObjectUpdate {
                    task: record.info.task.clone(),
                    changes: vec![PropertyChange::info(record.info.clone())],
                })
                .collect(),
        }))
    }
}

#[async_trait]
impl PropertyCollector for LocalTaskCollector {
    async fn create_filter(&self, tasks: &[RemoteTaskHandle]) -> WaitResult<FilterId> {
        let mut inner = self.inner.lock();
        if let Some(unknown) = tasks.iter().find(|t| !inner.tasks.contains_key(*t)) {
            return Err(WaitError::collector(format!("unknown task {}", unknown)));
        }
        inner.next_filter += 1;
        let filter = FilterId(format!("filter-{}", inner.next_filter));
        inner
            .filters
            .insert(filter.clone(), tasks.iter().cloned().collect());
        debug!(filter = %filter, tasks = tasks.len(), "Created filter");
        Ok(filter)
    }

    async fn wait_for_updates(
        &self,
        filter: &FilterId,
        version: &UpdateVersion,
    ) -> WaitResult<UpdateSet> {
        let since = Self::parse_version(version)?;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so a change between the
            // check and the await is not lost.
            notified.as_mut().enable();

            if let Some(update) = self.collect_changes(filter, since)? {
                return Ok(update);
            }
            notified.await;
        }
    }

    async fn task_info(&self, task: &RemoteTaskHandle) -> WaitResult<TaskInfo> {
        self.inner
            .lock()
            .tasks
            .get(task)
            .map(|r| r.info.clone())
            .ok_or_else(|| WaitError::collector(format!("unknown task {}", task)))
    }

    async fn destroy_filter(&self, filter: FilterId) -> WaitResult<()> {
        let mut inner = self.inner.lock();
        let watched = inner
            .filters
            .remove(&filter)
            .ok_or_else(|| WaitError::collector(format!("unknown filter {}", filter)))?;

        let Inner { tasks, filters, .. } = &mut *inner;
        let before = tasks.len();
        for task in &watched {
            let finished = tasks.get(task).is_some_and(|r| r.info.state.is_terminal());
            if finished && !filters.values().any(|w| w.contains(task)) {
                tasks.remove(task);
            }
        }
        debug!(
            filter = %filter,
            pruned = before - tasks.len(),
            "Destroyed filter"
        );
        Ok(())
    }
}
