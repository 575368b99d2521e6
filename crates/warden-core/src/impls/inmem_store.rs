//! InMemoryTaskStore - in-process TaskStore.
//!
//! One mutex guards all tasks and commands, so every trait method is
//! trivially atomic. Share one instance (behind an `Arc`) between several
//! coordinators to simulate a cluster on a single database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    sort_for_dispatch, Command, CommandId, CommandOutcome, CommandState, ExecutionStatus, HostId,
    StoreError, Task, TaskGuard, TaskId, TaskTransition,
};
use crate::ports::TaskStore;

#[derive(Default)]
struct StoreState {
    tasks: HashMap<TaskId, Task>,
    commands: HashMap<CommandId, Command>,
}

impl StoreState {
    fn insert_command(&mut self, command: Command) -> Result<(), StoreError> {
        if self.commands.contains_key(&command.id) {
            return Err(StoreError::DuplicateCommand(command.id));
        }
        self.commands.insert(command.id, command);
        Ok(())
    }

    fn transition(
        &mut self,
        id: TaskId,
        guard: &TaskGuard,
        transition: TaskTransition,
    ) -> Result<Option<Task>, StoreError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(StoreError::TaskNotFound(id))?;
        if !task.matches(guard) {
            return Ok(None);
        }
        // apply on a copy so a rejected transition leaves the row untouched
        let mut next = task.clone();
        next.apply(transition)?;
        *task = next.clone();
        Ok(Some(next))
    }

    /// Move a claimed command to `next` if `host` holds the claim.
    fn resolve_claim(
        &mut self,
        id: CommandId,
        host: &HostId,
        next: CommandState,
    ) -> Result<bool, StoreError> {
        let command = self
            .commands
            .get_mut(&id)
            .ok_or(StoreError::CommandNotFound(id))?;
        if command.claimed_by() != Some(host) {
            return Ok(false);
        }
        command.state = next;
        Ok(true)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every task (test and CLI output helper).
    pub async fn all_tasks(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Snapshot of every command, in creation order.
    pub async fn all_commands(&self) -> Vec<Command> {
        let state = self.state.lock().await;
        let mut commands: Vec<Command> = state.commands.values().cloned().collect();
        commands.sort_by_key(|c| (c.created_at, c.id));
        commands
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_task(&self, task: Task, command: Command) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&task.id) {
            return Err(StoreError::DuplicateTask(task.id));
        }
        if state.commands.contains_key(&command.id) {
            return Err(StoreError::DuplicateCommand(command.id));
        }
        state.tasks.insert(task.id, task);
        state.commands.insert(command.id, command);
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.state.lock().await.tasks.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: TaskId,
        guard: TaskGuard,
        transition: TaskTransition,
    ) -> Result<Option<Task>, StoreError> {
        self.state.lock().await.transition(id, &guard, transition)
    }

    async fn transition_with_command(
        &self,
        id: TaskId,
        guard: TaskGuard,
        transition: TaskTransition,
        command: Command,
    ) -> Result<Option<Task>, StoreError> {
        let mut state = self.state.lock().await;
        if state.commands.contains_key(&command.id) {
            return Err(StoreError::DuplicateCommand(command.id));
        }
        let updated = state.transition(id, &guard, transition)?;
        if updated.is_some() {
            state.insert_command(command)?;
        }
        Ok(updated)
    }

    async fn list_tasks_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<Task>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn list_tasks_by_host(
        &self,
        host: &HostId,
        status: ExecutionStatus,
    ) -> Result<Vec<Task>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.status == status && t.execute_host.as_ref() == Some(host))
            .cloned()
            .collect())
    }

    async fn list_tasks_by_data_source(
        &self,
        data_source_id: u64,
    ) -> Result<Vec<Task>, StoreError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.data_source_id == data_source_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.submit_time);
        Ok(tasks)
    }

    async fn insert_command(&self, command: Command) -> Result<(), StoreError> {
        self.state.lock().await.insert_command(command)
    }

    async fn get_command(&self, id: CommandId) -> Result<Option<Command>, StoreError> {
        Ok(self.state.lock().await.commands.get(&id).cloned())
    }

    async fn unclaimed_commands(&self, limit: usize) -> Result<Vec<Command>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<Command> = state
            .commands
            .values()
            .filter(|c| c.is_unclaimed())
            .cloned()
            .collect();
        sort_for_dispatch(&mut pending);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn commands_for_task(&self, task_id: TaskId) -> Result<Vec<Command>, StoreError> {
        let state = self.state.lock().await;
        let mut commands: Vec<Command> = state
            .commands
            .values()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect();
        commands.sort_by_key(|c| (c.created_at, c.id));
        Ok(commands)
    }

    async fn claim_command(
        &self,
        id: CommandId,
        host: &HostId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let command = state
            .commands
            .get_mut(&id)
            .ok_or(StoreError::CommandNotFound(id))?;
        if !command.is_unclaimed() {
            return Ok(false);
        }
        command.state = CommandState::Claimed {
            host: host.clone(),
            at,
        };
        Ok(true)
    }

    async fn release_command(&self, id: CommandId, host: &HostId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let released = state.resolve_claim(id, host, CommandState::Unclaimed)?;
        if released && let Some(command) = state.commands.get_mut(&id) {
            command.releases += 1;
        }
        Ok(released)
    }

    async fn complete_command(
        &self,
        id: CommandId,
        host: &HostId,
        outcome: CommandOutcome,
    ) -> Result<bool, StoreError> {
        self.state
            .lock()
            .await
            .resolve_claim(id, host, CommandState::Completed { outcome })
    }

    async fn fail_command(
        &self,
        id: CommandId,
        host: &HostId,
        reason: String,
    ) -> Result<bool, StoreError> {
        self.state
            .lock()
            .await
            .resolve_claim(id, host, CommandState::Failed { reason })
    }
}
