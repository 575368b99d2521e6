//! Coordinator - 1 インスタンス分のコンポーネントを配線する
//!
//! # Fail-fast 構築
//! `CoordinatorBuilder::build` はタスクに触れる前に検査できるものをすべて検査する:
//! 設定の妥当性、必須 port の有無、（`expect_engines` 指定時は）期待する
//! エンジンごとにプラグインが登録されていること。
//!
//! ```ignore
//! let coordinator = Coordinator::builder(config)
//!     .store(store)
//!     .registry(registry)
//!     .catalog(catalog)
//!     .expect_engines(&["jdbc", "spark"])
//!     .build()?;
//! coordinator.start().await?;
//! ```
//!
//! # Shutdown order
//! stop signal -> scheduler and membership loops joined -> execution
//! manager closed -> host unregistered.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::execution::{DrainReport, ExecutionManager};
use crate::app::failover::TaskFailover;
use crate::app::gate::DispatchGate;
use crate::app::membership::MembershipCoordinator;
use crate::app::scheduler::JobScheduler;
use crate::app::status::StatusCounts;
use crate::app::submission::{EngineDefaults, TaskSubmissionService};
use crate::config::{ConfigError, CoordinatorConfig};
use crate::domain::{CoordinationError, HostId, StoreError, SubmitError, SubmitTask, Task, TaskId};
use crate::plugin::PluginCatalog;
use crate::ports::{Clock, IdGenerator, Registry, SystemClock, TaskStore, UlidGenerator};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no task store configured")]
    MissingStore,

    #[error("no registry configured")]
    MissingRegistry,

    #[error("no plugin catalog configured")]
    MissingCatalog,

    #[error("missing engines: {0:?}. These engines were expected but not registered.")]
    MissingEngines(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    store: Option<Arc<dyn TaskStore>>,
    registry: Option<Arc<dyn Registry>>,
    catalog: Option<Arc<PluginCatalog>>,
    clock: Arc<dyn Clock>,
    expected_engines: Option<Vec<String>>,
}

impl CoordinatorBuilder {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            store: None,
            registry: None,
            catalog: None,
            clock: Arc::new(SystemClock),
            expected_engines: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn catalog(mut self, catalog: Arc<PluginCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Engines that must be registered for `build` to succeed.
    pub fn expect_engines(mut self, engine_types: &[&str]) -> Self {
        self.expected_engines = Some(engine_types.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Coordinator, BuildError> {
        self.config.validate()?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let registry = self.registry.ok_or(BuildError::MissingRegistry)?;
        let catalog = self.catalog.ok_or(BuildError::MissingCatalog)?;

        if let Some(expected) = &self.expected_engines {
            let registered = catalog.supported_engines();
            let missing: Vec<String> = expected
                .iter()
                .filter(|e| !registered.contains(*e))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingEngines(missing));
            }
        }

        let config = self.config;
        let host = config.host.clone();
        let clock = self.clock;
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        let gate = DispatchGate::new();

        let submission = TaskSubmissionService::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            Arc::clone(&clock),
            Arc::clone(&ids),
            EngineDefaults::with_configured(&config.engine_defaults),
        );
        let executor = Arc::new(ExecutionManager::new(
            host.clone(),
            config.execution.pool_size,
            Arc::clone(&store),
            Arc::clone(&catalog),
            Arc::clone(&clock),
        ));
        let scheduler = Arc::new(JobScheduler::new(
            host.clone(),
            Arc::clone(&store),
            Arc::clone(&executor),
            Arc::clone(&clock),
            gate.clone(),
            config.scheduler.clone(),
        ));
        let failover = Arc::new(TaskFailover::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            ids,
            config.failover.max_failovers,
        ));
        let membership = Arc::new(MembershipCoordinator::new(
            host.clone(),
            registry,
            failover,
            Arc::clone(&executor),
            gate.clone(),
            config.membership.clone(),
        ));

        Ok(Coordinator {
            host,
            config,
            store,
            submission,
            executor,
            scheduler,
            membership,
            gate,
            shutdown: CancellationToken::new(),
            loops: Mutex::new(Vec::new()),
        })
    }
}

pub struct Coordinator {
    host: HostId,
    config: CoordinatorConfig,
    store: Arc<dyn TaskStore>,
    submission: TaskSubmissionService,
    executor: Arc<ExecutionManager>,
    scheduler: Arc<JobScheduler>,
    membership: Arc<MembershipCoordinator>,
    gate: DispatchGate,
    shutdown: CancellationToken,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn builder(config: CoordinatorConfig) -> CoordinatorBuilder {
        CoordinatorBuilder::new(config)
    }

    pub fn host(&self) -> &HostId {
        &self.host
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Open the pool, join the cluster, then start polling.
    pub async fn start(&self) -> Result<(), CoordinationError> {
        self.executor.start();
        let mut handles = Arc::clone(&self.membership)
            .start(self.shutdown.clone())
            .await?;

        let scheduler = Arc::clone(&self.scheduler);
        let shutdown = self.shutdown.clone();
        handles.push(tokio::spawn(async move { scheduler.run(shutdown).await }));

        self.loops.lock().await.extend(handles);
        info!(host = %self.host, "coordinator started");
        Ok(())
    }

    /// Stop dispatching, drain or force in-flight executions, leave the cluster.
    pub async fn shutdown(&self) -> DrainReport {
        info!(host = %self.host, "coordinator shutting down");
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.loops.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(host = %self.host, error = %e, "background loop ended abnormally");
            }
        }

        let report = self
            .executor
            .close(self.config.execution.shutdown_grace())
            .await;
        self.membership.stop().await;
        info!(
            host = %self.host,
            drained = report.drained.len(),
            forced = report.forced.len(),
            "coordinator stopped"
        );
        report
    }

    /// Stop every loop and drop in-flight executions without recording
    /// results or leaving the registry, the way a killed process would.
    /// Peers learn about it only once the registry drops the session.
    pub async fn halt(&self) -> Vec<TaskId> {
        warn!(host = %self.host, "coordinator halting");
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.loops.lock().await.drain(..).collect();
        for handle in handles {
            handle.abort();
        }
        self.executor.abandon().await
    }

    pub async fn submit(&self, request: SubmitTask) -> Result<TaskId, SubmitError> {
        self.submission.submit(request).await
    }

    pub async fn cancel(&self, task_id: TaskId) -> Result<TaskId, SubmitError> {
        self.submission.cancel(task_id).await
    }

    pub async fn task(&self, task_id: TaskId) -> Result<Task, SubmitError> {
        self.submission.task(task_id).await
    }

    pub async fn tasks_for_data_source(&self, data_source_id: u64) -> Result<Vec<Task>, SubmitError> {
        self.submission.tasks_for_data_source(data_source_id).await
    }

    pub async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        StatusCounts::collect(self.store.as_ref()).await
    }

    /// Tasks currently executing on this instance.
    pub async fn running_tasks(&self) -> Vec<TaskId> {
        self.executor.running_tasks().await
    }

    /// `false` while isolated from the registry.
    pub fn is_dispatching(&self) -> bool {
        self.gate.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::fixtures::request;
    use crate::domain::{EngineError, ExecutionStatus};
    use crate::impls::{InMemoryRegistry, InMemoryTaskStore};
    use crate::plugin::{CheckResult, ConnectorFactory, Engine, EngineContext, EngineOutput, SqlMetric};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Pg;

    impl ConnectorFactory for Pg {
        fn name(&self) -> &str {
            "postgresql"
        }
        fn category(&self) -> &str {
            "jdbc"
        }
    }

    struct NotNull;

    impl SqlMetric for NotNull {
        fn name(&self) -> &str {
            "not_null"
        }
        fn validate_config(&self, _params: &serde_json::Value) -> CheckResult {
            CheckResult::ok()
        }
    }

    struct Jdbc;

    #[async_trait]
    impl Engine for Jdbc {
        fn engine_type(&self) -> &str {
            "jdbc"
        }
        async fn execute(&self, _ctx: EngineContext) -> Result<EngineOutput, EngineError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(EngineOutput::new(serde_json::json!({"nulls": 0})))
        }
    }

    fn catalog() -> Arc<PluginCatalog> {
        let mut catalog = PluginCatalog::new();
        catalog.register_connector(Arc::new(Pg)).unwrap();
        catalog.register_metric(Arc::new(NotNull)).unwrap();
        catalog.register_engine(Arc::new(Jdbc)).unwrap();
        Arc::new(catalog)
    }

    fn config() -> CoordinatorConfig {
        let mut config = CoordinatorConfig::default();
        config.host = HostId::new("node-1");
        config.scheduler.poll_interval_ms = 50;
        config
    }

    #[test]
    fn build_requires_ports() {
        let err = Coordinator::builder(config()).build().err().unwrap();
        assert!(matches!(err, BuildError::MissingStore));

        let err = Coordinator::builder(config())
            .store(Arc::new(InMemoryTaskStore::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::MissingRegistry));
    }

    #[test]
    fn build_reports_missing_engines() {
        let err = Coordinator::builder(config())
            .store(Arc::new(InMemoryTaskStore::new()))
            .registry(Arc::new(InMemoryRegistry::new()))
            .catalog(catalog())
            .expect_engines(&["jdbc", "spark"])
            .build()
            .err()
            .unwrap();

        match err {
            BuildError::MissingEngines(missing) => assert_eq!(missing, vec!["spark".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn build_rejects_invalid_config() {
        let mut bad = config();
        bad.execution.pool_size = 0;

        let err = Coordinator::builder(bad).build().err().unwrap();
        assert!(matches!(err, BuildError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn submitted_task_runs_to_success() {
        let registry = InMemoryRegistry::new();
        let coordinator = Coordinator::builder(config())
            .store(Arc::new(InMemoryTaskStore::new()))
            .registry(Arc::new(registry.clone()))
            .catalog(catalog())
            .expect_engines(&["jdbc"])
            .build()
            .unwrap();
        coordinator.start().await.unwrap();

        let id = coordinator
            .submit(request("jdbc", "postgresql", "not_null"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let task = coordinator.task(id).await.unwrap();
        assert_eq!(task.status, ExecutionStatus::Success);
        assert_eq!(coordinator.status_counts().await.unwrap().success, 1);

        let report = coordinator.shutdown().await;
        assert!(report.forced.is_empty());
        assert!(registry.list_members().await.unwrap().is_empty());
    }
}
