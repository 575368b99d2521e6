//! Errors - one `thiserror` enum per concern.
//!
//! # Classification
//! - `ValidationError` / `SubmitError`: surfaced synchronously to the submitter.
//! - `ExecutionError`: pool-level rejection, never reported to external callers.
//! - `EngineError`: a plugin failure, recorded on the task as FAILURE.
//! - `StoreError` / `CoordinationError`: infrastructure, retried or logged.
//! - `FailoverError`: logged, the task is left for the next sweep.

use thiserror::Error;

use super::ids::{CommandId, HostId, TaskId};
use super::state::ExecutionStatus;

/// A submission was rejected before anything was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("source connector parameter must not be empty")]
    MissingSourceConnector,

    #[error("connector `{0}` is not supported")]
    UnsupportedConnector(String),

    #[error("engine `{engine}` does not support connector `{connector}`")]
    IncompatibleConnector { engine: String, connector: String },

    #[error("metric `{0}` is not supported")]
    UnsupportedMetric(String),

    #[error("invalid metric config: {0}")]
    InvalidMetricConfig(String),

    #[error("engine `{0}` is not supported")]
    UnsupportedEngine(String),
}

/// Illegal lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("task is terminal ({from}), cannot move to {to}")]
    Terminal {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("illegal transition {from} -> {to}")]
    Illegal {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("command not found: {0}")]
    CommandNotFound(CommandId),

    #[error("duplicate task: {0}")]
    DuplicateTask(TaskId),

    #[error("duplicate command: {0}")]
    DuplicateCommand(CommandId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("execution pool is full (capacity {capacity})")]
    CapacityExceeded { capacity: usize },

    #[error("execution manager is not accepting submissions")]
    NotAccepting,

    #[error("task {0} is already running on this instance")]
    AlreadyRunning(TaskId),

    #[error("no engine registered for `{0}`")]
    EngineNotFound(String),

    #[error("task {0} is not dispatched to this host")]
    NotDispatched(TaskId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure reported by an engine plugin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine failed: {0}")]
    Failed(String),

    #[error("invalid engine parameter: {0}")]
    InvalidParameter(String),

    #[error("engine panicked: {0}")]
    Panicked(String),
}

/// Registry (membership service) failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinationError {
    #[error("registry unreachable: {0}")]
    Unreachable(String),

    #[error("host {0} is not registered")]
    NotRegistered(HostId),

    #[error("lock `{name}` is held by {holder}")]
    LockHeld { name: String, holder: HostId },

    #[error("lock `{0}` is not held by this host")]
    LockNotHeld(String),
}

#[derive(Debug, Error)]
pub enum FailoverError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),
}
