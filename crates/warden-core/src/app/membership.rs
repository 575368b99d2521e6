//! MembershipCoordinator - keeps this instance registered and reacts to
//! peers leaving.
//!
//! # Tasks spawned by `start`
//! - **failover worker**: drains membership events from an unbounded
//!   channel in order. The registry callback only enqueues, so a slow
//!   failover never blocks the registry's notification thread.
//! - **keep-alive**: renews the registration. While renewals keep failing
//!   for `isolation_timeout`, the dispatch gate stays closed.
//!
//! Self-removal is never handled as a failover: the keep-alive loop
//! re-registers instead.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::backoff::BackoffPolicy;
use crate::app::execution::ExecutionManager;
use crate::app::failover::{FailoverReport, TaskFailover};
use crate::app::gate::DispatchGate;
use crate::config::MembershipConfig;
use crate::domain::{CoordinationError, HostId};
use crate::ports::{MembershipEvent, Registry, SubscriptionId};

pub struct MembershipCoordinator {
    host: HostId,
    registry: Arc<dyn Registry>,
    failover: Arc<TaskFailover>,
    executor: Arc<ExecutionManager>,
    gate: DispatchGate,
    config: MembershipConfig,
    backoff: BackoffPolicy,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl MembershipCoordinator {
    pub fn new(
        host: HostId,
        registry: Arc<dyn Registry>,
        failover: Arc<TaskFailover>,
        executor: Arc<ExecutionManager>,
        gate: DispatchGate,
        config: MembershipConfig,
    ) -> Self {
        let backoff = BackoffPolicy::from_config(&config);
        Self {
            host,
            registry,
            failover,
            executor,
            gate,
            config,
            backoff,
            subscription: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &HostId {
        &self.host
    }

    /// Register, subscribe, spawn the worker and keep-alive loops, then run
    /// the startup sweep. Returns the spawned loops; both end on `shutdown`.
    pub async fn start(
        self: Arc<Self>,
        shutdown: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, CoordinationError> {
        self.register_with_retry().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.registry.subscribe(Box::new(move |event| {
            // the worker is gone once shutdown has begun
            let _ = tx.send(event);
        }));
        *self.subscription.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);

        let worker = tokio::spawn(Arc::clone(&self).run_failover_worker(rx, shutdown.clone()));
        let keep_alive = tokio::spawn(Arc::clone(&self).run_keep_alive(shutdown));

        self.startup_sweep().await;
        Ok(vec![worker, keep_alive])
    }

    /// Unsubscribe and unregister. The loops stop with the shutdown token.
    pub async fn stop(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(id) = subscription {
            self.registry.unsubscribe(id);
        }
        match self.registry.unregister(&self.host).await {
            Ok(()) => info!(host = %self.host, "unregistered"),
            Err(e) => warn!(host = %self.host, error = %e, "unregister failed"),
        }
    }

    async fn register_with_retry(&self) -> Result<(), CoordinationError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.registry.register(&self.host).await {
                Ok(()) => {
                    info!(host = %self.host, "registered");
                    return Ok(());
                }
                Err(e) if attempts >= self.config.register_attempts => {
                    error!(host = %self.host, attempts, error = %e, "registration failed");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.backoff.next_delay(attempts);
                    warn!(host = %self.host, attempts, error = %e, retry_in_ms = delay.as_millis() as u64, "registration failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn run_failover_worker(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<MembershipEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                MembershipEvent::MemberAdded(host) => debug!(host = %host, "member joined"),
                MembershipEvent::MemberRemoved(host) if host == self.host => {
                    warn!(host = %host, "own registration removed");
                }
                MembershipEvent::MemberRemoved(host) => {
                    info!(host = %host, "member left, failing over its tasks");
                    if let Err(e) = self.failover.failover(&host).await {
                        error!(host = %host, error = %e, "failover failed");
                    }
                }
            }
        }
        debug!("failover worker stopped");
    }

    async fn run_keep_alive(self: Arc<Self>, shutdown: CancellationToken) {
        let renew_interval = self.config.renew_interval();
        let isolation_timeout = self.config.isolation_timeout();
        let mut last_renewed = Instant::now();
        let mut failures: u32 = 0;

        loop {
            let delay = if failures == 0 {
                renew_interval
            } else {
                self.backoff.next_delay(failures).min(renew_interval)
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.renew().await {
                Ok(()) => {
                    failures = 0;
                    last_renewed = Instant::now();
                    if self.gate.resume() {
                        self.drop_lost_executions().await;
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(host = %self.host, failures, error = %e, "registration renewal failed");
                    if last_renewed.elapsed() >= isolation_timeout && self.gate.suspend() {
                        error!(host = %self.host, "isolated from registry, dispatch suspended");
                    }
                }
            }
        }
        debug!("keep-alive stopped");
    }

    /// Peers may have failed over our tasks while we were away. Stop the
    /// local runs of those so they give their slots back.
    async fn drop_lost_executions(&self) {
        match self.executor.cancel_lost().await {
            Ok(lost) if !lost.is_empty() => {
                warn!(host = %self.host, lost = lost.len(), "cancelled executions of tasks taken over by peers");
            }
            Ok(_) => {}
            Err(e) => error!(host = %self.host, error = %e, "could not check execution ownership"),
        }
    }

    /// Renew, re-registering if the session was lost.
    async fn renew(&self) -> Result<(), CoordinationError> {
        match self.registry.renew(&self.host).await {
            Err(CoordinationError::NotRegistered(_)) => {
                // peers may be failing over our tasks: stop dispatching until back
                self.gate.suspend();
                warn!(host = %self.host, "session lost, re-registering");
                self.registry.register(&self.host).await
            }
            other => other,
        }
    }

    /// Fail over tasks of hosts that died while no instance was watching.
    /// Skipped if another instance holds the sweep lock past the timeout.
    async fn startup_sweep(&self) -> Option<FailoverReport> {
        let lock = self.config.sweep_lock.as_str();
        let deadline = Instant::now() + self.config.sweep_lock_timeout();
        let mut attempts = 0;
        loop {
            match self.registry.try_lock(lock, &self.host).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => warn!(lock, error = %e, "sweep lock attempt failed"),
            }
            attempts += 1;
            let delay = self.backoff.next_delay(attempts);
            if Instant::now() + delay > deadline {
                info!(lock, "sweep lock busy, skipping startup sweep");
                return None;
            }
            tokio::time::sleep(delay).await;
        }

        let report = match self.registry.list_members().await {
            Ok(mut members) => {
                // a fresh process runs nothing yet: anything still RUNNING
                // under this id is left over from a previous run
                members.remove(&self.host);
                match self.failover.sweep(&members).await {
                    Ok(report) => Some(report),
                    Err(e) => {
                        error!(error = %e, "startup sweep failed");
                        None
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "could not list members for startup sweep");
                None
            }
        };
        if let Err(e) = self.registry.unlock(lock, &self.host).await {
            warn!(lock, error = %e, "failed to release sweep lock");
        }
        report
    }
}
