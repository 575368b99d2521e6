//! TaskFailover - returns tasks owned by a dead instance to the queue.
//!
//! For each RUNNING_EXECUTION task of the dead host, one atomic store call moves it
//! back to SUBMITTED_SUCCESS (host cleared, `failover_count + 1`) and
//! inserts a HIGH START command. The update is guarded on the dead host, so
//! running failover twice, or on two instances at once, requeues a task
//! at most once.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::{
    Command, CommandType, ExecutionStatus, FailoverError, HostId, Priority, Task, TaskGuard,
    TaskId, TaskTransition,
};
use crate::ports::{Clock, IdGenerator, TaskStore};

pub const FAILOVER_LIMIT_CAUSE: &str = "exceeded failover limit";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailoverReport {
    /// Back in the queue with a HIGH START.
    pub requeued: Vec<TaskId>,

    /// Finished as FAILURE, failover limit reached.
    pub abandoned: Vec<TaskId>,

    /// Already moved by someone else, or hit a store error.
    pub skipped: Vec<TaskId>,
}

impl FailoverReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.abandoned.is_empty() && self.skipped.is_empty()
    }

    fn merge(&mut self, other: FailoverReport) {
        self.requeued.extend(other.requeued);
        self.abandoned.extend(other.abandoned);
        self.skipped.extend(other.skipped);
    }
}

enum Reclaimed {
    Requeued,
    Abandoned,
    Moved,
}

pub struct TaskFailover {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    max_failovers: u32,
}

impl TaskFailover {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        max_failovers: u32,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            max_failovers,
        }
    }

    /// Requeue every RUNNING_EXECUTION task of `host`.
    pub async fn failover(&self, host: &HostId) -> Result<FailoverReport, FailoverError> {
        let mut report = FailoverReport::default();
        let running = self
            .store
            .list_tasks_by_host(host, ExecutionStatus::RunningExecution)
            .await?;
        for task in running {
            let task_id = task.id;
            match self.reclaim(host, task).await {
                Ok(Reclaimed::Requeued) => report.requeued.push(task_id),
                Ok(Reclaimed::Abandoned) => report.abandoned.push(task_id),
                Ok(Reclaimed::Moved) => report.skipped.push(task_id),
                Err(e) => {
                    // left in place for the next sweep
                    error!(task_id = %task_id, host = %host, error = %e, "failover of task failed");
                    report.skipped.push(task_id);
                }
            }
        }
        if !report.is_empty() {
            info!(
                host = %host,
                requeued = report.requeued.len(),
                abandoned = report.abandoned.len(),
                skipped = report.skipped.len(),
                "failover complete"
            );
        }
        Ok(report)
    }

    /// Fail over every RUNNING_EXECUTION task whose host is not in `live_hosts`.
    pub async fn sweep(&self, live_hosts: &HashSet<HostId>) -> Result<FailoverReport, FailoverError> {
        let mut dead: Vec<HostId> = Vec::new();
        let running = self
            .store
            .list_tasks_by_status(ExecutionStatus::RunningExecution)
            .await?;
        for task in running {
            if let Some(host) = task.execute_host
                && !live_hosts.contains(&host)
                && !dead.contains(&host)
            {
                dead.push(host);
            }
        }

        let mut report = FailoverReport::default();
        for host in &dead {
            warn!(host = %host, "orphaned tasks found for dead host");
            report.merge(self.failover(host).await?);
        }
        Ok(report)
    }

    async fn reclaim(&self, host: &HostId, task: Task) -> Result<Reclaimed, FailoverError> {
        let guard = TaskGuard::owned_by(ExecutionStatus::RunningExecution, host.clone());
        let now = self.clock.now();

        if task.failover_count >= self.max_failovers {
            let abandoned = self
                .store
                .transition(task.id, guard, TaskTransition::failure(now, FAILOVER_LIMIT_CAUSE))
                .await?;
            if abandoned.is_some() {
                warn!(task_id = %task.id, failovers = task.failover_count, "task abandoned after repeated failover");
                return Ok(Reclaimed::Abandoned);
            }
            return Ok(Reclaimed::Moved);
        }

        let start = Command::new(
            self.ids.generate_command_id(),
            CommandType::Start,
            Priority::High,
            task.id,
            now,
        );
        let requeued = self
            .store
            .transition_with_command(task.id, guard, TaskTransition::Requeue, start)
            .await?;
        Ok(match requeued {
            Some(_) => Reclaimed::Requeued,
            None => Reclaimed::Moved,
        })
    }
}
