//! JobScheduler - polls the command queue and drives dispatch.
//!
//! # Tick
//! 1. Fetch up to `batch_size` unclaimed commands in dispatch order
//!    (priority desc, created_at asc, id asc).
//! 2. Claim each one; a lost claim is skipped.
//! 3. Handle START / STOP, then complete, fail or release the claim.
//!
//! Ticks never overlap: the loop awaits one tick before waiting for the
//! next interval. While the dispatch gate is closed a tick does nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::execution::{CancelAck, ExecutionManager};
use crate::app::gate::DispatchGate;
use crate::config::SchedulerConfig;
use crate::domain::{
    Command, CommandId, CommandOutcome, CommandType, ExecutionError, ExecutionStatus, HostId,
    StoreError, Task, TaskGuard, TaskTransition,
};
use crate::ports::{Clock, TaskStore};

const NOT_CONFIRMED: &str = "cancellation not confirmed";
const TASK_NOT_FOUND: &str = "task not found";

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub started: usize,
    pub stopped: usize,
    pub released: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        *self == TickReport::default()
    }

    fn record(&mut self, step: Step) {
        match step {
            Step::Started => self.started += 1,
            Step::Stopped => self.stopped += 1,
            Step::Released => self.released += 1,
            Step::Skipped => self.skipped += 1,
            Step::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Started,
    Stopped,
    Released,
    Skipped,
    Failed,
}

pub struct JobScheduler {
    host: HostId,
    store: Arc<dyn TaskStore>,
    executor: Arc<ExecutionManager>,
    clock: Arc<dyn Clock>,
    gate: DispatchGate,
    config: SchedulerConfig,
}

impl JobScheduler {
    pub fn new(
        host: HostId,
        store: Arc<dyn TaskStore>,
        executor: Arc<ExecutionManager>,
        clock: Arc<dyn Clock>,
        gate: DispatchGate,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            host,
            store,
            executor,
            clock,
            gate,
            config,
        }
    }

    /// Poll until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(host = %self.host, poll_interval_ms = self.config.poll_interval_ms, "scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            match self.tick().await {
                Ok(report) if !report.is_empty() => debug!(?report, "scheduler tick"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "scheduler tick failed"),
            }
        }
        info!(host = %self.host, "scheduler stopped");
    }

    pub async fn tick(&self) -> Result<TickReport, StoreError> {
        let mut report = TickReport::default();
        if !self.gate.is_open() {
            return Ok(report);
        }

        let commands = self.store.unclaimed_commands(self.config.batch_size).await?;
        for command in commands {
            if !self.gate.is_open() {
                break;
            }
            if !self
                .store
                .claim_command(command.id, &self.host, self.clock.now())
                .await?
            {
                report.skipped += 1;
                continue;
            }

            let handled = match command.command_type {
                CommandType::Start => self.handle_start(&command).await,
                CommandType::Stop => self.handle_stop(&command).await,
            };
            match handled {
                Ok(step) => report.record(step),
                Err(e) => {
                    error!(command_id = %command.id, task_id = %command.task_id, error = %e, "command handling failed");
                    if let Err(e) = self.store.release_command(command.id, &self.host).await {
                        warn!(command_id = %command.id, error = %e, "failed to release claim");
                    }
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn handle_start(&self, command: &Command) -> Result<Step, StoreError> {
        let Some(task) = self.store.get_task(command.task_id).await? else {
            self.fail(command.id, TASK_NOT_FOUND).await?;
            return Ok(Step::Failed);
        };
        if task.status != ExecutionStatus::SubmittedSuccess {
            debug!(task_id = %task.id, status = %task.status, "start ignored, task already past submission");
            self.complete(command.id, CommandOutcome::NoOp).await?;
            return Ok(Step::Skipped);
        }
        if !self.executor.has_capacity() {
            self.release(command.id).await?;
            return Ok(Step::Released);
        }

        let dispatch = TaskTransition::Dispatch {
            host: self.host.clone(),
        };
        let guard = TaskGuard::status(ExecutionStatus::SubmittedSuccess);
        let Some(dispatched) = self.store.transition(task.id, guard, dispatch).await? else {
            // lost the race to another instance or a STOP
            self.complete(command.id, CommandOutcome::NoOp).await?;
            return Ok(Step::Skipped);
        };

        match self.executor.submit(dispatched).await {
            Ok(_) => {
                self.complete(command.id, CommandOutcome::Applied).await?;
                Ok(Step::Started)
            }
            Err(ExecutionError::CapacityExceeded { .. }) | Err(ExecutionError::NotAccepting) => {
                self.undo_dispatch(&task).await?;
                self.release(command.id).await?;
                Ok(Step::Released)
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "execution could not be started");
                let reason = e.to_string();
                let guard = TaskGuard::owned_by(ExecutionStatus::Dispatched, self.host.clone());
                self.store
                    .transition(task.id, guard, TaskTransition::failure(self.clock.now(), reason.clone()))
                    .await?;
                self.fail(command.id, &reason).await?;
                Ok(Step::Failed)
            }
        }
    }

    async fn undo_dispatch(&self, task: &Task) -> Result<(), StoreError> {
        let guard = TaskGuard::owned_by(ExecutionStatus::Dispatched, self.host.clone());
        if self
            .store
            .transition(task.id, guard, TaskTransition::Undispatch)
            .await?
            .is_none()
        {
            warn!(task_id = %task.id, "dispatch could not be undone, task moved");
        }
        Ok(())
    }

    async fn handle_stop(&self, command: &Command) -> Result<Step, StoreError> {
        let Some(task) = self.store.get_task(command.task_id).await? else {
            self.fail(command.id, TASK_NOT_FOUND).await?;
            return Ok(Step::Failed);
        };
        if task.status.is_terminal() {
            self.complete(command.id, CommandOutcome::AlreadyTerminal).await?;
            return Ok(Step::Skipped);
        }

        if self.executor.is_running(task.id).await && self.stop_deadline_passed(command) {
            // a kill now could not be confirmed in time
            warn!(task_id = %task.id, command_id = %command.id, "stop arrived past its deadline, not signalled");
            self.fail(command.id, NOT_CONFIRMED).await?;
            return Ok(Step::Failed);
        }
        if let Some(ack) = self.executor.cancel(task.id).await {
            self.await_ack(command, ack);
            return Ok(Step::Stopped);
        }

        let owned_here = task.execute_host.as_ref() == Some(&self.host);
        if task.status == ExecutionStatus::SubmittedSuccess || owned_here {
            // not executing anywhere yet, or left behind by this host
            let guard = TaskGuard {
                status: task.status,
                host: task.execute_host.clone(),
            };
            let killed = TaskTransition::killed(self.clock.now(), "stopped before execution");
            if self.store.transition(task.id, guard, killed).await?.is_some() {
                info!(task_id = %task.id, "task stopped");
                self.complete(command.id, CommandOutcome::Applied).await?;
                return Ok(Step::Stopped);
            }
            self.release(command.id).await?;
            return Ok(Step::Released);
        }

        // owned by another instance
        if self.stop_deadline_passed(command) {
            warn!(task_id = %task.id, command_id = %command.id, "stop not confirmed by owning host");
            self.fail(command.id, NOT_CONFIRMED).await?;
            return Ok(Step::Failed);
        }
        self.release(command.id).await?;
        Ok(Step::Released)
    }

    fn stop_deadline_passed(&self, command: &Command) -> bool {
        let elapsed = self.clock.now() - command.created_at;
        elapsed.to_std().unwrap_or(Duration::ZERO) >= self.config.stop_timeout()
    }

    /// Resolve the STOP command once the execution settles, off the tick.
    fn await_ack(&self, command: &Command, ack: CancelAck) {
        let elapsed = (self.clock.now() - command.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = self.config.stop_timeout().saturating_sub(elapsed);
        let store = Arc::clone(&self.store);
        let host = self.host.clone();
        let command_id = command.id;

        tokio::spawn(async move {
            let task_id = ack.task_id();
            let resolved = match ack.wait(remaining).await {
                Some(ExecutionStatus::Killed) => {
                    info!(task_id = %task_id, "task stopped");
                    store
                        .complete_command(command_id, &host, CommandOutcome::Applied)
                        .await
                }
                Some(status) => {
                    debug!(task_id = %task_id, status = %status, "task finished before cancellation");
                    store
                        .complete_command(command_id, &host, CommandOutcome::AlreadyTerminal)
                        .await
                }
                None => {
                    warn!(task_id = %task_id, "cancellation not confirmed in time");
                    store
                        .fail_command(command_id, &host, NOT_CONFIRMED.to_string())
                        .await
                }
            };
            if let Err(e) = resolved {
                error!(command_id = %command_id, error = %e, "failed to resolve stop command");
            }
        });
    }

    async fn complete(&self, id: CommandId, outcome: CommandOutcome) -> Result<(), StoreError> {
        self.store.complete_command(id, &self.host, outcome).await?;
        Ok(())
    }

    async fn fail(&self, id: CommandId, reason: &str) -> Result<(), StoreError> {
        self.store.fail_command(id, &self.host, reason.to_string()).await?;
        Ok(())
    }

    async fn release(&self, id: CommandId) -> Result<(), StoreError> {
        self.store.release_command(id, &self.host).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::fixtures::{t0, task};
    use crate::domain::{CommandState, EngineError, Priority};
    use crate::impls::InMemoryTaskStore;
    use crate::plugin::{Engine, EngineContext, EngineOutput, PluginCatalog};
    use crate::ports::FixedClock;
    use async_trait::async_trait;
    use serde_json::json;
    use ulid::Ulid;

    struct SleepEngine;

    #[async_trait]
    impl Engine for SleepEngine {
        fn engine_type(&self) -> &str {
            "local"
        }
        async fn execute(&self, ctx: EngineContext) -> Result<EngineOutput, EngineError> {
            let ms = ctx.engine_parameter.get("durationMs").and_then(|v| v.as_u64()).unwrap_or(10);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(EngineOutput::new(json!({"ok": true})))
        }
    }

    struct Fixture {
        store: InMemoryTaskStore,
        clock: FixedClock,
        gate: DispatchGate,
        executor: Arc<ExecutionManager>,
        scheduler: JobScheduler,
    }

    fn host() -> HostId {
        HostId::new("a")
    }

    fn fixture(pool_size: usize) -> Fixture {
        let mut catalog = PluginCatalog::new();
        catalog.register_engine(Arc::new(SleepEngine)).unwrap();
        let store = InMemoryTaskStore::new();
        let clock = FixedClock::new(t0());
        let gate = DispatchGate::new();
        let executor = Arc::new(ExecutionManager::new(
            host(),
            pool_size,
            Arc::new(store.clone()),
            Arc::new(catalog),
            Arc::new(clock.clone()),
        ));
        executor.start();
        let scheduler = JobScheduler::new(
            host(),
            Arc::new(store.clone()),
            Arc::clone(&executor),
            Arc::new(clock.clone()),
            gate.clone(),
            SchedulerConfig::default(),
        );
        Fixture {
            store,
            clock,
            gate,
            executor,
            scheduler,
        }
    }

    fn command(task: &Task, kind: CommandType, priority: Priority) -> Command {
        Command::new(CommandId::from_ulid(Ulid::new()), kind, priority, task.id, t0())
    }

    async fn submitted(store: &InMemoryTaskStore, priority: Priority, duration_ms: u64) -> (Task, Command) {
        let mut t = task("local");
        t.engine_parameter.insert("durationMs".to_string(), json!(duration_ms));
        let start = command(&t, CommandType::Start, priority);
        store.insert_task(t.clone(), start.clone()).await.unwrap();
        (t, start)
    }

    async fn stop(store: &InMemoryTaskStore, task: &Task) -> Command {
        let c = command(task, CommandType::Stop, Priority::Medium);
        store.insert_command(c.clone()).await.unwrap();
        c
    }

    async fn state_of(store: &InMemoryTaskStore, id: CommandId) -> CommandState {
        store.get_command(id).await.unwrap().unwrap().state
    }

    async fn status_of(store: &InMemoryTaskStore, task: &Task) -> ExecutionStatus {
        store.get_task(task.id).await.unwrap().unwrap().status
    }

    #[tokio::test(start_paused = true)]
    async fn start_dispatches_and_completes_command() {
        let f = fixture(2);
        let (t, start) = submitted(&f.store, Priority::Medium, 10).await;

        let report = f.scheduler.tick().await.unwrap();

        assert_eq!(report.started, 1);
        assert_eq!(
            state_of(&f.store, start.id).await,
            CommandState::Completed { outcome: CommandOutcome::Applied }
        );
        assert_eq!(status_of(&f.store, &t).await, ExecutionStatus::RunningExecution);

        f.executor.wait_idle().await;
        assert_eq!(status_of(&f.store, &t).await, ExecutionStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn full_pool_releases_lower_priority_start() {
        let f = fixture(1);
        let (low, low_start) = submitted(&f.store, Priority::Low, 1_000).await;
        let (high, _) = submitted(&f.store, Priority::High, 1_000).await;

        let report = f.scheduler.tick().await.unwrap();

        assert_eq!(report, TickReport { started: 1, released: 1, ..Default::default() });
        assert_eq!(status_of(&f.store, &high).await, ExecutionStatus::RunningExecution);
        assert_eq!(status_of(&f.store, &low).await, ExecutionStatus::SubmittedSuccess);
        let back = f.store.get_command(low_start.id).await.unwrap().unwrap();
        assert!(back.is_unclaimed());
        assert_eq!(back.releases, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_start_is_a_noop() {
        let f = fixture(2);
        let (t, _) = submitted(&f.store, Priority::Medium, 1_000).await;
        f.scheduler.tick().await.unwrap();
        let again = command(&t, CommandType::Start, Priority::High);
        f.store.insert_command(again.clone()).await.unwrap();

        let report = f.scheduler.tick().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(
            state_of(&f.store, again.id).await,
            CommandState::Completed { outcome: CommandOutcome::NoOp }
        );
        assert_eq!(f.executor.running_tasks().await, vec![t.id]);
    }

    #[tokio::test]
    async fn start_for_missing_task_fails_command() {
        let f = fixture(1);
        let ghost = task("local");
        let start = command(&ghost, CommandType::Start, Priority::Medium);
        f.store.insert_command(start.clone()).await.unwrap();

        let report = f.scheduler.tick().await.unwrap();

        assert_eq!(report.failed, 1);
        assert!(matches!(state_of(&f.store, start.id).await, CommandState::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_dispatch_kills_directly() {
        let f = fixture(1);
        let (t, _) = submitted(&f.store, Priority::Low, 10).await;
        let stop = command(&t, CommandType::Stop, Priority::High);
        f.store.insert_command(stop.clone()).await.unwrap();

        let report = f.scheduler.tick().await.unwrap();

        assert_eq!(report.stopped, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(status_of(&f.store, &t).await, ExecutionStatus::Killed);
        assert_eq!(
            state_of(&f.store, stop.id).await,
            CommandState::Completed { outcome: CommandOutcome::Applied }
        );
        assert!(f.executor.running_tasks().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_running_task_waits_for_kill() {
        let f = fixture(1);
        let (t, _) = submitted(&f.store, Priority::Medium, 60_000).await;
        f.scheduler.tick().await.unwrap();
        let stop = stop(&f.store, &t).await;

        let report = f.scheduler.tick().await.unwrap();
        assert_eq!(report.stopped, 1);

        f.executor.wait_idle().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(status_of(&f.store, &t).await, ExecutionStatus::Killed);
        assert_eq!(
            state_of(&f.store, stop.id).await,
            CommandState::Completed { outcome: CommandOutcome::Applied }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn late_stop_fails_without_killing() {
        let f = fixture(1);
        let (t, _) = submitted(&f.store, Priority::Medium, 60_000).await;
        f.scheduler.tick().await.unwrap();
        let stop = stop(&f.store, &t).await;

        // released by other instances until the stop timeout ran out
        f.clock.advance(chrono::Duration::seconds(31));
        let report = f.scheduler.tick().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(
            state_of(&f.store, stop.id).await,
            CommandState::Failed { reason: NOT_CONFIRMED.to_string() }
        );
        assert!(f.executor.is_running(t.id).await);
        assert_eq!(status_of(&f.store, &t).await, ExecutionStatus::RunningExecution);
    }

    #[tokio::test]
    async fn stop_terminal_task_completes_as_already_terminal() {
        let f = fixture(1);
        let (t, start) = submitted(&f.store, Priority::Medium, 10).await;
        f.store
            .transition(
                t.id,
                TaskGuard::status(ExecutionStatus::SubmittedSuccess),
                TaskTransition::killed(t0(), "earlier stop"),
            )
            .await
            .unwrap();
        f.store.claim_command(start.id, &host(), t0()).await.unwrap();
        let stop = stop(&f.store, &t).await;

        f.scheduler.tick().await.unwrap();

        assert_eq!(
            state_of(&f.store, stop.id).await,
            CommandState::Completed { outcome: CommandOutcome::AlreadyTerminal }
        );
    }

    #[tokio::test]
    async fn foreign_stop_is_released_until_timeout() {
        let f = fixture(1);
        let (t, start) = submitted(&f.store, Priority::Medium, 10).await;
        f.store.claim_command(start.id, &HostId::new("b"), t0()).await.unwrap();
        f.store
            .transition(
                t.id,
                TaskGuard::status(ExecutionStatus::SubmittedSuccess),
                TaskTransition::Dispatch { host: HostId::new("b") },
            )
            .await
            .unwrap();
        let stop = stop(&f.store, &t).await;

        let report = f.scheduler.tick().await.unwrap();
        assert_eq!(report.released, 1);
        assert!(f.store.get_command(stop.id).await.unwrap().unwrap().is_unclaimed());

        f.clock.advance(chrono::Duration::seconds(31));
        let report = f.scheduler.tick().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(
            state_of(&f.store, stop.id).await,
            CommandState::Failed { reason: NOT_CONFIRMED.to_string() }
        );
        assert_eq!(status_of(&f.store, &t).await, ExecutionStatus::Dispatched);
    }

    #[tokio::test]
    async fn closed_gate_dispatches_nothing() {
        let f = fixture(1);
        let (t, start) = submitted(&f.store, Priority::Medium, 10).await;
        f.gate.suspend();

        let report = f.scheduler.tick().await.unwrap();

        assert!(report.is_empty());
        assert_eq!(status_of(&f.store, &t).await, ExecutionStatus::SubmittedSuccess);
        assert!(f.store.get_command(start.id).await.unwrap().unwrap().is_unclaimed());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_exits_on_shutdown() {
        let f = fixture(1);
        let (t, _) = submitted(&f.store, Priority::Medium, 10).await;
        let shutdown = CancellationToken::new();
        let scheduler = Arc::new(f.scheduler);

        let loop_handle = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            let shutdown = shutdown.clone();
            async move { scheduler.run(shutdown).await }
        });
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        shutdown.cancel();
        loop_handle.await.unwrap();

        f.executor.wait_idle().await;
        assert_eq!(status_of(&f.store, &t).await, ExecutionStatus::Success);
    }
}
