//! Command record: START/STOP requests queued for dispatch.

use std::cmp::{Ordering, Reverse};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CommandId, HostId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    Start,
    Stop,
}

/// Dispatch priority. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// How a claimed command was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandOutcome {
    /// START dispatched, or STOP confirmed.
    Applied,

    /// The command had nothing to do (task already running elsewhere, already started, ...).
    NoOp,

    /// STOP against a task that had already finished.
    AlreadyTerminal,
}

/// Claim state of a command.
///
/// Commands are never deleted: `Unclaimed -> Claimed` is the atomic claim,
/// `Claimed -> Unclaimed` a release (backpressure, foreign STOP), and
/// `Completed` / `Failed` are final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandState {
    Unclaimed,
    Claimed { host: HostId, at: DateTime<Utc> },
    Completed { outcome: CommandOutcome },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: CommandId,
    pub command_type: CommandType,
    pub priority: Priority,
    pub task_id: TaskId,
    pub created_at: DateTime<Utc>,
    pub state: CommandState,

    /// How many times a claim on this command was released.
    pub releases: u32,
}

impl Command {
    pub fn new(
        id: CommandId,
        command_type: CommandType,
        priority: Priority,
        task_id: TaskId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            command_type,
            priority,
            task_id,
            created_at,
            state: CommandState::Unclaimed,
            releases: 0,
        }
    }

    pub fn is_unclaimed(&self) -> bool {
        matches!(self.state, CommandState::Unclaimed)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(
            self.state,
            CommandState::Completed { .. } | CommandState::Failed { .. }
        )
    }

    /// Host currently holding the claim, if any.
    pub fn claimed_by(&self) -> Option<&HostId> {
        match &self.state {
            CommandState::Claimed { host, .. } => Some(host),
            _ => None,
        }
    }

    /// Sort key: priority descending, then creation time, then id (FIFO in a band).
    pub fn dispatch_key(&self) -> (Reverse<Priority>, DateTime<Utc>, CommandId) {
        (Reverse(self.priority), self.created_at, self.id)
    }

    pub fn dispatch_order(a: &Command, b: &Command) -> Ordering {
        a.dispatch_key().cmp(&b.dispatch_key())
    }
}

/// Sort commands in the order the scheduler must process them.
pub fn sort_for_dispatch(commands: &mut [Command]) {
    commands.sort_by(Command::dispatch_order);
}
