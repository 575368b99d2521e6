//! Status - 実行ステータスごとのタスク件数

use serde::{Deserialize, Serialize};

use crate::domain::{ExecutionStatus, StoreError, Task};
use crate::ports::TaskStore;

const ALL_STATUSES: [ExecutionStatus; 6] = [
    ExecutionStatus::SubmittedSuccess,
    ExecutionStatus::Dispatched,
    ExecutionStatus::RunningExecution,
    ExecutionStatus::Success,
    ExecutionStatus::Failure,
    ExecutionStatus::Killed,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub submitted: usize,
    pub dispatched: usize,
    pub running: usize,
    pub success: usize,
    pub failure: usize,
    pub killed: usize,
}

impl StatusCounts {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            *counts.slot(task.status) += 1;
        }
        counts
    }

    pub async fn collect(store: &dyn TaskStore) -> Result<Self, StoreError> {
        let mut counts = Self::default();
        for status in ALL_STATUSES {
            *counts.slot(status) = store.list_tasks_by_status(status).await?.len();
        }
        Ok(counts)
    }

    /// Tasks not yet in a terminal state.
    pub fn active(&self) -> usize {
        self.submitted + self.dispatched + self.running
    }

    pub fn total(&self) -> usize {
        self.active() + self.success + self.failure + self.killed
    }

    fn slot(&mut self, status: ExecutionStatus) -> &mut usize {
        match status {
            ExecutionStatus::SubmittedSuccess => &mut self.submitted,
            ExecutionStatus::Dispatched => &mut self.dispatched,
            ExecutionStatus::RunningExecution => &mut self.running,
            ExecutionStatus::Success => &mut self.success,
            ExecutionStatus::Failure => &mut self.failure,
            ExecutionStatus::Killed => &mut self.killed,
        }
    }
}
