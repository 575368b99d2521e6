//! State - タスクの実行ステータスと状態遷移

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution status of a task.
///
/// State transitions:
/// - SubmittedSuccess -> Dispatched -> RunningExecution -> Success | Failure | Killed
/// - RunningExecution -> SubmittedSuccess (failover: owning host declared dead)
/// - Dispatched -> SubmittedSuccess (the pool rejected the submission, dispatch undone)
/// - Dispatched -> Failure (execution could not be started)
/// - SubmittedSuccess | Dispatched -> Killed (STOP processed before the task ran)
///
/// Terminal states are absorbing.
///
/// Serialized as SCREAMING_SNAKE_CASE: `SUBMITTED_SUCCESS`, `RUNNING_EXECUTION`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Persisted and waiting for a START command to be dispatched.
    SubmittedSuccess,

    /// Claimed by a coordinator instance, handed to its execution manager.
    Dispatched,

    /// An engine is executing the task on `execute_host`.
    RunningExecution,

    Success,

    Failure,

    Killed,
}

impl ExecutionStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failure | ExecutionStatus::Killed
        )
    }

    /// Does a task in this state have an `execute_host`?
    pub fn is_owned(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Dispatched | ExecutionStatus::RunningExecution
        )
    }

    /// Is `self -> next` an edge of the lifecycle?
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (SubmittedSuccess, Dispatched) | (SubmittedSuccess, Killed) => true,
            (Dispatched, RunningExecution)
            | (Dispatched, SubmittedSuccess)
            | (Dispatched, Failure)
            | (Dispatched, Killed) => true,
            (RunningExecution, Success)
            | (RunningExecution, Failure)
            | (RunningExecution, Killed)
            | (RunningExecution, SubmittedSuccess) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::SubmittedSuccess => "SUBMITTED_SUCCESS",
            ExecutionStatus::Dispatched => "DISPATCHED",
            ExecutionStatus::RunningExecution => "RUNNING_EXECUTION",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failure => "FAILURE",
            ExecutionStatus::Killed => "KILLED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
