//! Task completion waiter.
//!
//! Waits for a set of remote tasks by long-polling a [`PropertyCollector`]
//! filter scoped to exactly those tasks:
//!
//! 1. Create a filter over the task set
//! 2. Request the next batch of changes, starting with the empty version
//! 3. Drop tasks that reached `Success`; fail on the first `Error`
//! 4. Repeat with the version of the last batch until nothing is pending
//! 5. Destroy the filter, whatever the outcome
//!
//! A wait whose future is dropped part way still releases its filter: the
//! release is handed to the runtime from `Drop`.
//!
//! An optional deadline and a cancellation token bound the wait.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::collector::{
    ChangeValue, FilterId, PropertyCollector, UpdateVersion, INFO_PROPERTY, INFO_STATE_PROPERTY,
};
use crate::error::{WaitError, WaitResult};
use crate::handle::{RemoteTaskHandle, TaskState};

/// Why a wait stopped before the task set finished.
enum Interrupt {
    Cancelled,
    DeadlinePassed,
}

/// Filter owned by one wait. Destroyed exactly once, explicitly through
/// [`release`](Self::release) or from `Drop` when the wait was abandoned.
struct FilterGuard {
    collector: Arc<dyn PropertyCollector>,
    filter: Option<FilterId>,
}

impl FilterGuard {
    fn new(collector: Arc<dyn PropertyCollector>, filter: FilterId) -> Self {
        Self {
            collector,
            filter: Some(filter),
        }
    }

    async fn release(mut self) {
        if let Some(filter) = self.filter.take() {
            destroy(self.collector.as_ref(), filter).await;
        }
    }
}

impl Drop for FilterGuard {
    fn drop(&mut self) {
        let Some(filter) = self.filter.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(filter = %filter, "Wait abandoned, releasing filter");
                let collector = Arc::clone(&self.collector);
                runtime.spawn(async move { destroy(collector.as_ref(), filter).await });
            }
            Err(_) => warn!(filter = %filter, "No runtime to release abandoned filter"),
        }
    }
}

async fn destroy(collector: &dyn PropertyCollector, filter: FilterId) {
    if let Err(e) = collector.destroy_filter(filter.clone()).await {
        warn!(filter = %filter, error = %e, "Failed to destroy filter");
    }
}

/// Blocks until submitted remote tasks reach a terminal state.
#[derive(Clone)]
pub struct TaskWaiter {
    collector: Arc<dyn PropertyCollector>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl TaskWaiter {
    /// Creates a waiter without a deadline.
    pub fn new(collector: Arc<dyn PropertyCollector>) -> Self {
        Self {
            collector,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the deadline applied to each [`await_all`](Self::await_all) call.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Uses the given token to cancel waits.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the token that cancels waits of this waiter.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns the configured deadline.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Waits until every task succeeded, or fails on the first task error.
    ///
    /// Tasks may finish in any order. The filter created for the wait is
    /// destroyed exactly once on every exit path, including the future being
    /// dropped before it completes.
    #[instrument(skip(self, tasks), fields(tasks = tasks.len()))]
    pub async fn await_all(&self, tasks: &[RemoteTaskHandle]) -> WaitResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let mut pending: HashSet<RemoteTaskHandle> = tasks.iter().cloned().collect();
        let filter = self.collector.create_filter(tasks).await?;
        debug!(filter = %filter, "Waiting for remote tasks");
        let guard = FilterGuard::new(Arc::clone(&self.collector), filter.clone());

        let outcome = self.drive(&filter, &mut pending).await;
        guard.release().await;

        outcome
    }

    async fn drive(
        &self,
        filter: &FilterId,
        pending: &mut HashSet<RemoteTaskHandle>,
    ) -> WaitResult<()> {
        let interrupt = {
            let poll = self.poll_until_done(filter, pending);
            let deadline = async {
                match self.timeout {
                    Some(timeout) => tokio::time::sleep(timeout).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Interrupt::Cancelled,
                result = poll => return result,
                _ = deadline => Interrupt::DeadlinePassed,
            }
        };

        match interrupt {
            Interrupt::Cancelled => {
                warn!(pending = pending.len(), "Wait cancelled");
                Err(WaitError::Cancelled)
            }
            Interrupt::DeadlinePassed => {
                let mut remaining: Vec<String> =
                    pending.iter().map(|t| t.as_str().to_string()).collect();
                remaining.sort();
                warn!(pending = ?remaining, "Deadline passed waiting for tasks");
                Err(WaitError::Timeout { pending: remaining })
            }
        }
    }

    async fn poll_until_done(
        &self,
        filter: &FilterId,
        pending: &mut HashSet<RemoteTaskHandle>,
    ) -> WaitResult<()> {
        let mut version = UpdateVersion::initial();

        while !pending.is_empty() {
            let update = self.collector.wait_for_updates(filter, &version).await?;

            for object in &update.objects {
                for change in &object.changes {
                    let (state, error) = match (change.name.as_str(), &change.value) {
                        (INFO_PROPERTY, ChangeValue::Info(info)) => (info.state, info.error.clone()),
                        (INFO_STATE_PROPERTY, ChangeValue::State(state)) => (*state, None),
                        _ => continue,
                    };

                    if !pending.contains(&object.task) {
                        continue;
                    }

                    match state {
                        TaskState::Success => {
                            pending.remove(&object.task);
                            trace!(task = %object.task, remaining = pending.len(), "Task succeeded");
                        }
                        TaskState::Error => {
                            let message = match error {
                                Some(message) => message,
                                None => self
                                    .collector
                                    .task_info(&object.task)
                                    .await?
                                    .error
                                    .unwrap_or_else(|| "task reported error".to_string()),
                            };
                            warn!(task = %object.task, error = %message, "Task failed");
                            return Err(WaitError::task_failed(object.task.clone(), message));
                        }
                        TaskState::Queued | TaskState::Running => {}
                    }
                }
            }

            version = update.version;
        }

        Ok(())
    }
}

impl std::fmt::Debug for TaskWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWaiter")
            .field("timeout", &self.timeout)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{ObjectUpdate, PropertyChange, UpdateSet};
    use crate::handle::TaskInfo;
    use crate::local::LocalTaskCollector;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Collector replaying scripted batches; pends forever once exhausted.
    #[derive(Default)]
    struct ScriptedCollector {
        batches: Mutex<VecDeque<WaitResult<Vec<ObjectUpdate>>>>,
        infos: Mutex<Vec<TaskInfo>>,
        versions_seen: Mutex<Vec<UpdateVersion>>,
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    impl ScriptedCollector {
        fn with_batches(batches: Vec<WaitResult<Vec<ObjectUpdate>>>) -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(batches.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl PropertyCollector for ScriptedCollector {
        async fn create_filter(&self, _tasks: &[RemoteTaskHandle]) -> WaitResult<FilterId> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(FilterId("filter-1".to_string()))
        }

        async fn wait_for_updates(
            &self,
            _filter: &FilterId,
            version: &UpdateVersion,
        ) -> WaitResult<UpdateSet> {
            let next = {
                let mut seen = self.versions_seen.lock();
                seen.push(version.clone());
                let n = seen.len();
                self.batches.lock().pop_front().map(|b| (n, b))
            };
            match next {
                Some((n, batch)) => batch.map(|objects| UpdateSet {
                    version: UpdateVersion(n.to_string()),
                    objects,
                }),
                None => std::future::pending().await,
            }
        }

        async fn task_info(&self, task: &RemoteTaskHandle) -> WaitResult<TaskInfo> {
            self.infos
                .lock()
                .iter()
                .find(|i| &i.task == task)
                .cloned()
                .ok_or_else(|| WaitError::collector("no info"))
        }

        async fn destroy_filter(&self, _filter: FilterId) -> WaitResult<()> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn crashing_work() -> Result<(), String> {
        panic!("shell crashed")
    }

    fn task(id: &str) -> RemoteTaskHandle {
        RemoteTaskHandle::new(id)
    }

    fn state_change(id: &str, state: TaskState) -> ObjectUpdate {
        ObjectUpdate {
            task: task(id),
            changes: vec![PropertyChange::state(state)],
        }
    }

    fn info_change(id: &str, state: TaskState, error: Option<&str>) -> ObjectUpdate {
        ObjectUpdate {
            task: task(id),
            changes: vec![PropertyChange::info(TaskInfo {
                task: task(id),
                description: format!("op {}", id),
                state,
                error: error.map(str::to_string),
            })],
        }
    }

    #[tokio::test]
    async fn test_waits_for_all_tasks_in_any_order() {
        let collector = ScriptedCollector::with_batches(vec![
            Ok(vec![state_change("c", TaskState::Running)]),
            Ok(vec![state_change("c", TaskState::Success)]),
            Ok(vec![
                info_change("a", TaskState::Success, None),
                state_change("b", TaskState::Success),
            ]),
        ]);
        let waiter = TaskWaiter::new(collector.clone());

        waiter.await_all(&[task("a"), task("b"), task("c")]).await.unwrap();

        assert_eq!(
            *collector.versions_seen.lock(),
            vec![
                UpdateVersion::initial(),
                UpdateVersion("1".to_string()),
                UpdateVersion("2".to_string()),
            ]
        );
        assert_eq!(collector.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fails_fast_on_first_error() {
        // "b" errors while "a" and "c" are still pending; the script then
        // pends forever, so returning at all proves the wait did not
        // continue for the others.
        let collector = ScriptedCollector::with_batches(vec![
            Ok(vec![state_change("a", TaskState::Running)]),
            Ok(vec![info_change("b", TaskState::Error, Some("vlan in use"))]),
        ]);
        let waiter = TaskWaiter::new(collector.clone());

        let err = waiter
            .await_all(&[task("a"), task("b"), task("c")])
            .await
            .unwrap_err();

        assert_eq!(err, WaitError::task_failed(task("b"), "vlan in use"));
        assert_eq!(collector.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_in_same_batch_after_success() {
        let collector = ScriptedCollector::with_batches(vec![Ok(vec![
            info_change("a", TaskState::Success, None),
            info_change("c", TaskState::Error, Some("switch busy")),
            info_change("b", TaskState::Success, None),
        ])]);
        let waiter = TaskWaiter::new(collector.clone());

        let err = waiter
            .await_all(&[task("a"), task("b"), task("c")])
            .await
            .unwrap_err();
        assert_eq!(err.failed_task(), Some(&task("c")));
        assert_eq!(collector.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_state_only_error_fetches_task_info() {
        let collector = ScriptedCollector::with_batches(vec![Ok(vec![state_change(
            "a",
            TaskState::Error,
        )])]);
        collector.infos.lock().push(TaskInfo {
            task: task("a"),
            description: "destroy bond".to_string(),
            state: TaskState::Error,
            error: Some("bond not found".to_string()),
        });
        let waiter = TaskWaiter::new(collector.clone());

        let err = waiter.await_all(&[task("a")]).await.unwrap_err();
        assert_eq!(err, WaitError::task_failed(task("a"), "bond not found"));
    }

    #[tokio::test]
    async fn test_ignores_other_properties_and_unknown_tasks() {
        let collector = ScriptedCollector::with_batches(vec![
            Ok(vec![
                ObjectUpdate {
                    task: task("a"),
                    changes: vec![PropertyChange::other("info.progress", "50")],
                },
                info_change("stranger", TaskState::Error, Some("not ours")),
            ]),
            Ok(vec![info_change("a", TaskState::Success, None)]),
        ]);
        let waiter = TaskWaiter::new(collector.clone());

        waiter.await_all(&[task("a")]).await.unwrap();
    }

    #[tokio::test]
    async fn test_collector_error_releases_filter() {
        let collector =
            ScriptedCollector::with_batches(vec![Err(WaitError::collector("session expired"))]);
        let waiter = TaskWaiter::new(collector.clone());

        let err = waiter.await_all(&[task("a")]).await.unwrap_err();
        assert_eq!(err, WaitError::collector("session expired"));
        assert_eq!(collector.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_names_pending_tasks() {
        let collector = ScriptedCollector::with_batches(vec![Ok(vec![info_change(
            "a",
            TaskState::Success,
            None,
        )])]);
        let waiter =
            TaskWaiter::new(collector.clone()).with_timeout(Some(Duration::from_millis(20)));

        let err = waiter.await_all(&[task("a"), task("b")]).await.unwrap_err();
        assert_eq!(
            err,
            WaitError::Timeout {
                pending: vec!["b".to_string()]
            }
        );
        assert_eq!(collector.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_releases_filter() {
        let collector = ScriptedCollector::with_batches(vec![]);
        let waiter = TaskWaiter::new(collector.clone());
        let token = waiter.cancellation_token();

        let wait = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.await_all(&[task("a")]).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let err = wait.await.unwrap().unwrap_err();
        assert_eq!(err, WaitError::Cancelled);
        assert_eq!(collector.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_hang_wait() {
        let collector = Arc::new(LocalTaskCollector::new());
        let task = collector.spawn("destroy bond0", crashing_work());
        let waiter = TaskWaiter::new(collector.clone());

        let err = tokio::time::timeout(Duration::from_secs(1), waiter.await_all(&[task.clone()]))
            .await
            .expect("wait did not finish")
            .unwrap_err();
        assert_eq!(err, WaitError::task_failed(task, "task panicked"));
        assert_eq!(collector.active_filters(), 0);
    }

    #[tokio::test]
    async fn test_dropped_wait_releases_filter() {
        let collector = ScriptedCollector::with_batches(vec![]);
        let waiter = TaskWaiter::new(collector.clone());

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), waiter.await_all(&[task("a")])).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(collector.created.load(Ordering::SeqCst), 1);
        assert_eq!(collector.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_wait_releases_local_filter() {
        let collector = Arc::new(LocalTaskCollector::new());
        let stuck = collector.spawn("remove vswitch_prod", std::future::pending());
        let waiter = TaskWaiter::new(collector.clone());

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), waiter.await_all(&[stuck])).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(collector.active_filters(), 0);
    }

    #[tokio::test]
    async fn test_empty_task_set_needs_no_filter() {
        let collector = ScriptedCollector::with_batches(vec![]);
        let waiter = TaskWaiter::new(collector.clone());

        waiter.await_all(&[]).await.unwrap();
        assert_eq!(collector.created.load(Ordering::SeqCst), 0);
        assert_eq!(collector.destroyed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_with_local_collector() {
        let collector = Arc::new(LocalTaskCollector::new());
        let ok = collector.spawn("create port group net-a", async { Ok(()) });
        let slow = collector.spawn("create port group net-b", async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        });
        let waiter = TaskWaiter::new(collector.clone());

        waiter.await_all(&[ok.clone(), slow.clone()]).await.unwrap();
        assert_eq!(collector.active_filters(), 0);
        assert_eq!(collector.tracked_tasks(), 0);

        let bad = collector.spawn("create port group net-c", async {
            Err("vlan 30 already used".to_string())
        });
        let err = waiter.await_all(&[bad.clone()]).await.unwrap_err();
        assert_eq!(err, WaitError::task_failed(bad, "vlan 30 already used"));
        assert_eq!(collector.active_filters(), 0);
    }
}
