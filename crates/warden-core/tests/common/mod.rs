//! Shared harness: fake plugins and a cluster of coordinators over one
//! in-memory store and registry.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use warden_core::domain::{
    ConnectorParameter, EngineError, ExecutionStatus, HostId, ParameterMap, SubmitTask, Task,
    TaskId, TaskParameter,
};
use warden_core::impls::{InMemoryRegistry, InMemoryTaskStore};
use warden_core::plugin::{
    CheckResult, ConnectorFactory, Engine, EngineContext, EngineOutput, PluginCatalog, SqlMetric,
};
use warden_core::ports::TaskStore;
use warden_core::{Coordinator, CoordinatorConfig};

pub const ENGINES: [&str; 2] = ["jdbc", "spark"];

struct Connector(&'static str, &'static str);

impl ConnectorFactory for Connector {
    fn name(&self) -> &str {
        self.0
    }

    fn category(&self) -> &str {
        self.1
    }
}

struct NotNull;

impl SqlMetric for NotNull {
    fn name(&self) -> &str {
        "not_null"
    }

    fn validate_config(&self, params: &serde_json::Value) -> CheckResult {
        match params.get("column") {
            Some(_) => CheckResult::ok(),
            None => CheckResult::fail("column is required"),
        }
    }
}

/// One engine invocation and the task record as the engine saw it.
#[derive(Debug, Clone)]
pub struct Run {
    pub task_id: TaskId,
    pub status: ExecutionStatus,
    pub host: Option<HostId>,
}

/// Every execution, in start order.
#[derive(Clone, Default)]
pub struct ExecutionLog(Arc<Mutex<Vec<Run>>>);

impl ExecutionLog {
    pub fn started(&self) -> Vec<TaskId> {
        self.0.lock().unwrap().iter().map(|r| r.task_id).collect()
    }

    pub fn runs(&self) -> Vec<Run> {
        self.0.lock().unwrap().clone()
    }

    pub fn runs_of(&self, id: TaskId) -> usize {
        self.0.lock().unwrap().iter().filter(|r| r.task_id == id).count()
    }

    /// Host recorded on the task when each of its runs began.
    pub fn hosts_of(&self, id: TaskId) -> Vec<Option<HostId>> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task_id == id)
            .map(|r| r.host.clone())
            .collect()
    }

    fn record(&self, run: Run) {
        self.0.lock().unwrap().push(run);
    }
}

/// Sleeps for `durationMs` (default 50). Honors cancellation only when
/// `cooperative`.
struct SleepEngine {
    name: &'static str,
    cooperative: bool,
    store: InMemoryTaskStore,
    log: ExecutionLog,
}

#[async_trait]
impl Engine for SleepEngine {
    fn engine_type(&self) -> &str {
        self.name
    }

    fn supports_cancellation(&self) -> bool {
        self.cooperative
    }

    async fn execute(&self, ctx: EngineContext) -> Result<EngineOutput, EngineError> {
        let task = self.store.get_task(ctx.task_id).await.unwrap().unwrap();
        self.log.record(Run {
            task_id: ctx.task_id,
            status: task.status,
            host: task.execute_host,
        });
        let ms = ctx
            .engine_parameter
            .get("durationMs")
            .and_then(|v| v.as_u64())
            .unwrap_or(50);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(EngineOutput::new(json!({"nulls": 0})))
    }
}

/// Connectors: postgresql (jdbc), hive (file). Metric: not_null.
/// Engines: jdbc (cooperative), spark (not cooperative).
pub fn catalog(store: &InMemoryTaskStore, log: &ExecutionLog) -> Arc<PluginCatalog> {
    let mut catalog = PluginCatalog::new();
    catalog
        .register_connector(Arc::new(Connector("postgresql", "jdbc")))
        .unwrap();
    catalog
        .register_connector(Arc::new(Connector("hive", "file")))
        .unwrap();
    catalog.register_metric(Arc::new(NotNull)).unwrap();
    for (name, cooperative) in [("jdbc", true), ("spark", false)] {
        catalog
            .register_engine(Arc::new(SleepEngine {
                name,
                cooperative,
                store: store.clone(),
                log: log.clone(),
            }))
            .unwrap();
    }
    Arc::new(catalog)
}

pub fn request(engine: &str, connector: &str) -> SubmitTask {
    SubmitTask {
        data_source_id: 1,
        engine_type: engine.to_string(),
        parameter: TaskParameter {
            src_connector_parameter: Some(ConnectorParameter {
                connector_type: connector.to_string(),
                parameters: json!({"table": "orders"}),
            }),
            metric_type: "not_null".to_string(),
            metric_parameter: json!({"column": "customer_id"}),
        },
        engine_parameter: None,
        execute_platform_parameter: json!({}),
    }
}

pub fn lasting(mut request: SubmitTask, ms: u64) -> SubmitTask {
    let mut params = request.engine_parameter.take().unwrap_or_default();
    params.insert("durationMs".to_string(), json!(ms));
    request.engine_parameter = Some(params);
    request
}

pub fn overrides(pairs: &[(&str, serde_json::Value)]) -> ParameterMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn config(host: &str, pool_size: usize) -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.host = HostId::new(host);
    config.scheduler.poll_interval_ms = 20;
    config.scheduler.stop_timeout_ms = 2_000;
    config.execution.pool_size = pool_size;
    config.execution.shutdown_grace_ms = 500;
    config.membership.renew_interval_ms = 50;
    config.membership.isolation_timeout_ms = 300;
    config.membership.sweep_lock_timeout_ms = 200;
    config
}

pub struct Cluster {
    pub store: InMemoryTaskStore,
    pub registry: InMemoryRegistry,
    pub log: ExecutionLog,
    pub nodes: Vec<Coordinator>,
}

impl Cluster {
    /// Build `size` coordinators named `node-0..` without starting them.
    pub fn new(size: usize, pool_size: usize) -> Self {
        Self::over(InMemoryTaskStore::new(), size, pool_size)
    }

    pub fn over(store: InMemoryTaskStore, size: usize, pool_size: usize) -> Self {
        let registry = InMemoryRegistry::new();
        let log = ExecutionLog::default();
        let catalog = catalog(&store, &log);
        let nodes = (0..size)
            .map(|i| {
                Coordinator::builder(config(&format!("node-{i}"), pool_size))
                    .store(Arc::new(store.clone()))
                    .registry(Arc::new(registry.clone()))
                    .catalog(Arc::clone(&catalog))
                    .expect_engines(&ENGINES)
                    .build()
                    .unwrap()
            })
            .collect();
        Self {
            store,
            registry,
            log,
            nodes,
        }
    }

    pub async fn start(&self) {
        for node in &self.nodes {
            node.start().await.unwrap();
        }
    }

    pub fn node(&self, i: usize) -> &Coordinator {
        &self.nodes[i]
    }

    pub async fn task(&self, id: TaskId) -> Task {
        self.store.get_task(id).await.unwrap().unwrap()
    }

    /// Poll until `pred` holds for the task, or panic after `timeout`.
    pub async fn wait_for(
        &self,
        id: TaskId,
        timeout: Duration,
        pred: impl Fn(&Task) -> bool,
    ) -> Task {
        let poll = async {
            loop {
                let task = self.task(id).await;
                if pred(&task) {
                    return task;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(task) => task,
            Err(_) => panic!("task {id} never reached the expected state: {:?}", self.task(id).await),
        }
    }

    pub async fn wait_for_status(&self, id: TaskId, status: ExecutionStatus) -> Task {
        self.wait_for(id, Duration::from_secs(10), |t| t.status == status)
            .await
    }

    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
    }
}
