//! Error types for esxnetcfg

use thiserror::Error;

use esxnet_common::NetCfgError;
use esxnet_tasks::WaitError;

use crate::report::MigrationReport;

/// Failure of a single migration operation
#[derive(Debug, Error)]
pub enum StepError {
    /// The gateway refused the mutation
    #[error("submit failed: {0}")]
    Submit(#[source] NetCfgError),

    /// The submitted task did not complete successfully
    #[error("task failed: {0}")]
    Task(#[source] WaitError),
}

/// Failure that stops a migration run
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The management endpoint or host could not be reached
    #[error("Connection failed: {0}")]
    Connection(#[source] NetCfgError),

    /// The initial audit could not capture facts
    #[error("Audit failed: {0}")]
    Audit(#[source] NetCfgError),

    /// The verifying audit could not capture facts
    #[error("Verification audit failed: {0}")]
    Verify(#[source] NetCfgError),

    /// The run was cancelled while waiting on a task
    #[error("Migration cancelled after {} operations", .report.operations().len())]
    Cancelled { report: MigrationReport },
}

impl MigrationError {
    /// Operations attempted before the run stopped
    pub fn report(&self) -> Option<&MigrationReport> {
        match self {
            MigrationError::Cancelled { report } => Some(report),
            _ => None,
        }
    }
}

/// Result type for migration runs
pub type MigrationResult<T> = Result<T, MigrationError>;
