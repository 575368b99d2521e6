//! TaskStore port - 共有・永続化された唯一の正
//!
//! クラスタ内のすべてのコーディネータが同じ store を見る。プロセス間ロックは
//! 持たず、正しさは下記の条件付き更新で担保する。バックエンドはこれらを
//! アトミックに実行しなければならない（単一の `UPDATE ... WHERE status = ?`
//! またはトランザクション）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Command, CommandId, CommandOutcome, ExecutionStatus, HostId, StoreError, Task, TaskGuard,
    TaskId, TaskTransition,
};

/// TaskStore holds Task and Command records.
///
/// # Design
/// - `insert_task` persists a task together with its START command, so a
///   task never exists without one.
/// - `transition` is compare-and-set: `Ok(None)` when the guard does not
///   hold (someone else moved the task), `Ok(Some(task))` with the updated
///   record otherwise.
/// - Commands are claimed, released and resolved, never deleted.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task and its first command atomically.
    async fn insert_task(&self, task: Task, command: Command) -> Result<(), StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Guarded status transition.
    async fn transition(
        &self,
        id: TaskId,
        guard: TaskGuard,
        transition: TaskTransition,
    ) -> Result<Option<Task>, StoreError>;

    /// Guarded status transition plus a command insert, in one atomic unit.
    /// The command is only inserted when the transition applies.
    async fn transition_with_command(
        &self,
        id: TaskId,
        guard: TaskGuard,
        transition: TaskTransition,
        command: Command,
    ) -> Result<Option<Task>, StoreError>;

    async fn list_tasks_by_status(&self, status: ExecutionStatus)
    -> Result<Vec<Task>, StoreError>;

    async fn list_tasks_by_host(
        &self,
        host: &HostId,
        status: ExecutionStatus,
    ) -> Result<Vec<Task>, StoreError>;

    async fn list_tasks_by_data_source(&self, data_source_id: u64)
    -> Result<Vec<Task>, StoreError>;

    async fn insert_command(&self, command: Command) -> Result<(), StoreError>;

    async fn get_command(&self, id: CommandId) -> Result<Option<Command>, StoreError>;

    /// Up to `limit` unclaimed commands, in dispatch order.
    async fn unclaimed_commands(&self, limit: usize) -> Result<Vec<Command>, StoreError>;

    async fn commands_for_task(&self, task_id: TaskId) -> Result<Vec<Command>, StoreError>;

    /// `Unclaimed -> Claimed(host)`. `false` if the command was not unclaimed.
    async fn claim_command(
        &self,
        id: CommandId,
        host: &HostId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// `Claimed(host) -> Unclaimed`. `false` if `host` does not hold the claim.
    async fn release_command(&self, id: CommandId, host: &HostId) -> Result<bool, StoreError>;

    /// `Claimed(host) -> Completed(outcome)`.
    async fn complete_command(
        &self,
        id: CommandId,
        host: &HostId,
        outcome: CommandOutcome,
    ) -> Result<bool, StoreError>;

    /// `Claimed(host) -> Failed(reason)`.
    async fn fail_command(
        &self,
        id: CommandId,
        host: &HostId,
        reason: String,
    ) -> Result<bool, StoreError>;
}
