//! ExecutionManager - bounded pool running engines for dispatched tasks.
//!
//! # Lifecycle of one execution
//! 1. `submit`: take a slot (owned semaphore permit), CAS
//!    DISPATCHED -> RUNNING_EXECUTION, register the handle, spawn the worker.
//! 2. The worker runs the engine on its own tokio task, so a panicking
//!    engine only fails its task.
//! 3. On completion the terminal status is persisted and the handle removed
//!    under the handle-map lock, then the slot is released.
//!
//! The terminal CAS is guarded on `RUNNING_EXECUTION` and
//! `execute_host == self`: if the task was failed over in the meantime the
//! local result is discarded.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{
    EngineError, ExecutionError, ExecutionStatus, HostId, StoreError, Task, TaskGuard, TaskId,
    TaskTransition,
};
use crate::plugin::{Engine, EngineContext, EngineOutput, PluginCatalog};
use crate::ports::{Clock, TaskStore};

pub const SHUTDOWN_CAUSE: &str = "coordinator shutdown";
const KILLED_CAUSE: &str = "stopped by request";

/// Outcome of [`ExecutionManager::close`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Finished on their own within the grace period.
    pub drained: Vec<TaskId>,

    /// Aborted and recorded as FAILURE.
    pub forced: Vec<TaskId>,
}

/// Waits for a cancelled execution to settle.
#[derive(Debug)]
pub struct CancelAck {
    task_id: TaskId,
    done: watch::Receiver<Option<ExecutionStatus>>,
}

impl CancelAck {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Persisted final status, or `None` if the execution did not settle
    /// within `timeout` or its result could not be recorded.
    pub async fn wait(mut self, timeout: Duration) -> Option<ExecutionStatus> {
        match tokio::time::timeout(timeout, self.done.wait_for(Option::is_some)).await {
            Ok(Ok(status)) => *status,
            _ => None,
        }
    }
}

struct ExecutionHandle {
    kill: CancellationToken,
    done: watch::Receiver<Option<ExecutionStatus>>,
}

enum Ended {
    Returned(Result<Result<EngineOutput, EngineError>, JoinError>),
    Killed,
    Forced,
    Abandoned,
}

struct Shared {
    host: HostId,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    running: Mutex<HashMap<TaskId, ExecutionHandle>>,
    idle: Notify,
    force: CancellationToken,
    abandon: CancellationToken,
}

impl Shared {
    async fn finalize(
        &self,
        task_id: TaskId,
        transition: TaskTransition,
        done: watch::Sender<Option<ExecutionStatus>>,
    ) {
        let status = transition.target();
        let mut running = self.running.lock().await;
        let guard = TaskGuard::owned_by(ExecutionStatus::RunningExecution, self.host.clone());
        let persisted = match self.store.transition(task_id, guard, transition).await {
            Ok(Some(_)) => {
                info!(task_id = %task_id, status = %status, "execution finished");
                true
            }
            Ok(None) => {
                warn!(task_id = %task_id, status = %status, "task no longer owned by this host, result discarded");
                false
            }
            Err(e) => {
                error!(task_id = %task_id, status = %status, error = %e, "failed to record execution result");
                false
            }
        };
        running.remove(&task_id);
        drop(running);
        self.idle.notify_waiters();
        if persisted {
            // receivers may already be gone
            let _ = done.send(Some(status));
        }
    }

    async fn forget(&self, task_id: TaskId) {
        self.running.lock().await.remove(&task_id);
        self.idle.notify_waiters();
    }
}

pub struct ExecutionManager {
    shared: Arc<Shared>,
    catalog: Arc<PluginCatalog>,
    permits: Arc<Semaphore>,
    capacity: usize,
    accepting: AtomicBool,
}

impl ExecutionManager {
    pub fn new(
        host: HostId,
        pool_size: usize,
        store: Arc<dyn TaskStore>,
        catalog: Arc<PluginCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                host,
                store,
                clock,
                running: Mutex::new(HashMap::new()),
                idle: Notify::new(),
                force: CancellationToken::new(),
                abandon: CancellationToken::new(),
            }),
            catalog,
            permits: Arc::new(Semaphore::new(pool_size)),
            capacity: pool_size,
            accepting: AtomicBool::new(false),
        }
    }

    /// Open the pool. No-op once closed.
    pub fn start(&self) {
        if self.shared.force.is_cancelled() || self.shared.abandon.is_cancelled() {
            return;
        }
        self.accepting.store(true, Ordering::SeqCst);
        info!(host = %self.shared.host, pool_size = self.capacity, "execution manager started");
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn has_capacity(&self) -> bool {
        self.available_slots() > 0
    }

    pub async fn is_running(&self, task_id: TaskId) -> bool {
        self.shared.running.lock().await.contains_key(&task_id)
    }

    pub async fn running_tasks(&self) -> Vec<TaskId> {
        self.shared.running.lock().await.keys().copied().collect()
    }

    /// Start executing a task this host has dispatched.
    ///
    /// Returns the task as recorded after the RUNNING_EXECUTION transition.
    pub async fn submit(&self, task: Task) -> Result<Task, ExecutionError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ExecutionError::NotAccepting);
        }
        let engine = self
            .catalog
            .engine(&task.engine_type)
            .ok_or_else(|| ExecutionError::EngineNotFound(task.engine_type.clone()))?;
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| ExecutionError::CapacityExceeded {
                capacity: self.capacity,
            })?;

        let mut running = self.shared.running.lock().await;
        if running.contains_key(&task.id) {
            return Err(ExecutionError::AlreadyRunning(task.id));
        }
        let guard = TaskGuard::owned_by(ExecutionStatus::Dispatched, self.shared.host.clone());
        let started = self
            .shared
            .store
            .transition(task.id, guard, TaskTransition::Start { at: self.shared.clock.now() })
            .await?
            .ok_or(ExecutionError::NotDispatched(task.id))?;

        let kill = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        running.insert(
            started.id,
            ExecutionHandle {
                kill: kill.clone(),
                done: done_rx,
            },
        );
        drop(running);

        info!(task_id = %started.id, engine = %started.engine_type, "execution started");
        tokio::spawn(run_execution(
            Arc::clone(&self.shared),
            started.clone(),
            engine,
            kill,
            permit,
            done_tx,
        ));
        Ok(started)
    }

    /// Signal cancellation. `None` if the task is not executing here.
    pub async fn cancel(&self, task_id: TaskId) -> Option<CancelAck> {
        let running = self.shared.running.lock().await;
        let handle = running.get(&task_id)?;
        handle.kill.cancel();
        debug!(task_id = %task_id, "cancellation signalled");
        Some(CancelAck {
            task_id,
            done: handle.done.clone(),
        })
    }

    /// Signal cancellation to every execution whose task is no longer
    /// RUNNING_EXECUTION on this host in the store. Their results would be
    /// discarded anyway. Returns the cancelled task ids.
    pub async fn cancel_lost(&self) -> Result<Vec<TaskId>, StoreError> {
        let guard = TaskGuard::owned_by(ExecutionStatus::RunningExecution, self.shared.host.clone());
        let mut lost = Vec::new();
        for task_id in self.running_tasks().await {
            let owned = self
                .shared
                .store
                .get_task(task_id)
                .await?
                .is_some_and(|t| t.matches(&guard));
            if !owned && self.cancel(task_id).await.is_some() {
                lost.push(task_id);
            }
        }
        Ok(lost)
    }

    /// Wait until no execution is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.shared.running.lock().await.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting, let in-flight executions finish for up to `grace`,
    /// then abort the rest and record them as FAILURE.
    pub async fn close(&self, grace: Duration) -> DrainReport {
        self.accepting.store(false, Ordering::SeqCst);
        let in_flight = self.running_tasks().await;
        info!(in_flight = in_flight.len(), grace_ms = grace.as_millis() as u64, "closing execution manager");

        let mut forced = Vec::new();
        if tokio::time::timeout(grace, self.wait_idle()).await.is_err() {
            forced = self.running_tasks().await;
            warn!(forced = forced.len(), "grace period elapsed, aborting executions");
        }
        // also stops anything that slips in from here on
        self.shared.force.cancel();
        self.wait_idle().await;

        let drained = in_flight
            .into_iter()
            .filter(|id| !forced.contains(id))
            .collect();
        DrainReport { drained, forced }
    }

    /// Drop every execution without recording anything, as a crashed
    /// process would. Returns the tasks left behind in the store.
    pub async fn abandon(&self) -> Vec<TaskId> {
        self.accepting.store(false, Ordering::SeqCst);
        let left = self.running_tasks().await;
        warn!(abandoned = left.len(), "abandoning executions");
        self.shared.abandon.cancel();
        self.wait_idle().await;
        left
    }
}

async fn run_execution(
    shared: Arc<Shared>,
    task: Task,
    engine: Arc<dyn Engine>,
    kill: CancellationToken,
    permit: OwnedSemaphorePermit,
    done: watch::Sender<Option<ExecutionStatus>>,
) {
    let task_id = task.id;
    let cooperative = engine.supports_cancellation();
    let ctx = EngineContext {
        task_id,
        engine_type: task.engine_type,
        parameter: task.parameter,
        engine_parameter: task.engine_parameter,
        execute_platform_parameter: task.execute_platform_parameter,
        cancel: kill.clone(),
    };
    let mut run = tokio::spawn(async move { engine.execute(ctx).await });

    let ended = tokio::select! {
        biased;
        _ = shared.abandon.cancelled() => Ended::Abandoned,
        _ = shared.force.cancelled() => Ended::Forced,
        _ = kill.cancelled(), if cooperative => Ended::Killed,
        joined = &mut run => Ended::Returned(joined),
    };
    if !matches!(ended, Ended::Returned(_)) {
        run.abort();
    }

    let at = shared.clock.now();
    let transition = match ended {
        Ended::Abandoned => {
            shared.forget(task_id).await;
            drop(permit);
            return;
        }
        Ended::Forced => TaskTransition::failure(at, SHUTDOWN_CAUSE),
        Ended::Killed => TaskTransition::killed(at, KILLED_CAUSE),
        // non-cooperative engine returned after a STOP
        Ended::Returned(_) if kill.is_cancelled() => TaskTransition::killed(at, KILLED_CAUSE),
        Ended::Returned(Ok(Ok(output))) => TaskTransition::success(at, output.data),
        Ended::Returned(Ok(Err(e))) => TaskTransition::failure(at, e.to_string()),
        Ended::Returned(Err(join)) => {
            let e = EngineError::Panicked(join_message(join));
            error!(task_id = %task_id, error = %e, "engine crashed");
            TaskTransition::failure(at, e.to_string())
        }
    };
    shared.finalize(task_id, transition, done).await;
    drop(permit);
}

fn join_message(join: JoinError) -> String {
    if !join.is_panic() {
        return join.to_string();
    }
    panic_message(join.into_panic())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
