//! Migration run report

use serde_json::{json, Value};

use esxnet_tasks::RemoteTaskHandle;

use crate::error::StepError;
use crate::plan::MigrationState;

/// Result of one attempted operation
#[derive(Debug)]
pub struct OperationRecord {
    /// Operation identifier (e.g. "destroy bond bond0")
    pub operation: String,
    /// Phase the operation belongs to
    pub phase: MigrationState,
    /// Task handle, if the gateway accepted the submission
    pub task: Option<RemoteTaskHandle>,
    /// Outcome
    pub result: Result<(), StepError>,
}

impl OperationRecord {
    /// Returns true if the operation succeeded
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// Error text, if the operation failed
    pub fn error(&self) -> Option<String> {
        self.result.as_ref().err().map(|e| e.to_string())
    }
}

/// States visited and operations attempted by a migration run
#[derive(Debug)]
pub struct MigrationReport {
    states: Vec<MigrationState>,
    operations: Vec<OperationRecord>,
}

impl Default for MigrationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationReport {
    /// Creates a report positioned at `Start`
    pub fn new() -> Self {
        Self {
            states: vec![MigrationState::Start],
            operations: Vec::new(),
        }
    }

    /// Records a state transition
    pub fn enter(&mut self, state: MigrationState) {
        self.states.push(state);
    }

    /// Records an attempted operation
    pub fn record(&mut self, record: OperationRecord) {
        self.operations.push(record);
    }

    /// States visited, starting with `Start`
    pub fn states(&self) -> &[MigrationState] {
        &self.states
    }

    /// Current state
    pub fn state(&self) -> MigrationState {
        self.states
            .last()
            .copied()
            .unwrap_or(MigrationState::Start)
    }

    /// All attempted operations in order
    pub fn operations(&self) -> &[OperationRecord] {
        &self.operations
    }

    /// Failed operations in order
    pub fn failures(&self) -> impl Iterator<Item = &OperationRecord> {
        self.operations.iter().filter(|op| !op.succeeded())
    }

    /// Returns true if every attempted operation succeeded
    pub fn all_succeeded(&self) -> bool {
        self.operations.iter().all(OperationRecord::succeeded)
    }

    /// JSON rendering for machine readable output
    pub fn to_json(&self) -> Value {
        let states: Vec<&str> = self.states.iter().map(MigrationState::as_str).collect();
        let operations: Vec<Value> = self
            .operations
            .iter()
            .map(|op| {
                json!({
                    "operation": op.operation,
                    "phase": op.phase.as_str(),
                    "task": op.task.as_ref().map(RemoteTaskHandle::as_str),
                    "ok": op.succeeded(),
                    "error": op.error(),
                })
            })
            .collect();

        json!({
            "states": states,
            "operations": operations,
        })
    }
}
