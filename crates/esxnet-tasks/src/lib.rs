//! Remote task tracking for host mutations.
//!
//! Every mutation submitted to a host gateway returns a
//! [`RemoteTaskHandle`]. Completion is observed through a
//! [`PropertyCollector`], a change-notification service that is long-polled
//! with a monotonically advancing version token:
//!
//! - [`RemoteTaskHandle`], [`TaskState`], [`TaskInfo`]: task identity and state
//! - [`PropertyCollector`]: filter/subscription based change feed
//! - [`LocalTaskCollector`]: in-process collector for locally executed tasks
//! - [`TaskWaiter`]: blocks until a task set reaches terminal states
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use esxnet_tasks::{LocalTaskCollector, TaskWaiter};
//!
//! let collector = Arc::new(LocalTaskCollector::new());
//! let task = collector.spawn("remove vswitch_prod", async { Ok(()) });
//! TaskWaiter::new(collector).await_all(&[task]).await?;
//! ```

mod collector;
mod error;
mod handle;
mod local;
mod waiter;

pub use collector::{
    ChangeValue, FilterId, ObjectUpdate, PropertyChange, PropertyCollector, UpdateSet,
    UpdateVersion, INFO_PROPERTY, INFO_STATE_PROPERTY,
};
pub use error::{WaitError, WaitResult};
pub use handle::{RemoteTaskHandle, TaskInfo, TaskState};
pub use local::LocalTaskCollector;
pub use waiter::TaskWaiter;
