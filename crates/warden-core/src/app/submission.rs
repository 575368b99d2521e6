//! TaskSubmissionService - validates requests and persists tasks with
//! their START command.
//!
//! # Validation order
//! 1. source connector present
//! 2. connector registered
//! 3. `jdbc` engine requires a `jdbc`-category connector
//! 4. metric registered
//! 5. metric config accepted by the metric
//! 6. engine registered
//!
//! The first failing check is returned and nothing is written.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use crate::domain::{
    Command, CommandType, ParameterMap, Priority, SubmitError, SubmitTask, Task, TaskId,
    ValidationError,
};
use crate::plugin::PluginCatalog;
use crate::ports::{Clock, IdGenerator, TaskStore};

const JDBC: &str = "jdbc";

/// Engine parameter defaults, per engine type.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineDefaults {
    by_engine: BTreeMap<String, ParameterMap>,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EngineDefaults {
    /// Built-in defaults: Spark on YARN, cluster mode.
    pub fn builtin() -> Self {
        let spark = json!({
            "programType": "JAVA",
            "deployMode": "cluster",
            "driverCores": 1,
            "driverMemory": "512M",
            "numExecutors": 2,
            "executorMemory": "2G",
            "executorCores": 2,
            "others": "--conf spark.yarn.maxAppAttempts=1",
        });
        let mut by_engine = BTreeMap::new();
        if let serde_json::Value::Object(map) = spark {
            by_engine.insert("spark".to_string(), map);
        }
        Self { by_engine }
    }

    /// Built-ins with `configured` tables layered on top, key by key.
    pub fn with_configured(configured: &BTreeMap<String, ParameterMap>) -> Self {
        let mut defaults = Self::builtin();
        for (engine, table) in configured {
            let entry = defaults.by_engine.entry(engine.clone()).or_default();
            for (k, v) in table {
                entry.insert(k.clone(), v.clone());
            }
        }
        defaults
    }

    pub fn for_engine(&self, engine_type: &str) -> Option<&ParameterMap> {
        self.by_engine.get(engine_type)
    }

    /// Defaults for `engine_type` with `overrides` applied (override wins).
    pub fn resolve(&self, engine_type: &str, overrides: Option<ParameterMap>) -> ParameterMap {
        let mut merged = self.for_engine(engine_type).cloned().unwrap_or_default();
        if let Some(overrides) = overrides {
            merged.extend(overrides);
        }
        merged
    }
}

pub struct TaskSubmissionService {
    store: Arc<dyn TaskStore>,
    catalog: Arc<PluginCatalog>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    defaults: EngineDefaults,
}

impl TaskSubmissionService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        catalog: Arc<PluginCatalog>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        defaults: EngineDefaults,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            ids,
            defaults,
        }
    }

    pub fn validate(&self, request: &SubmitTask) -> Result<(), ValidationError> {
        let src = request
            .parameter
            .src_connector_parameter
            .as_ref()
            .ok_or(ValidationError::MissingSourceConnector)?;

        let connector = self
            .catalog
            .connector(&src.connector_type)
            .ok_or_else(|| ValidationError::UnsupportedConnector(src.connector_type.clone()))?;

        if request.engine_type == JDBC && connector.category() != JDBC {
            return Err(ValidationError::IncompatibleConnector {
                engine: request.engine_type.clone(),
                connector: src.connector_type.clone(),
            });
        }

        let metric_type = &request.parameter.metric_type;
        let metric = self
            .catalog
            .metric(metric_type)
            .ok_or_else(|| ValidationError::UnsupportedMetric(metric_type.clone()))?;

        let check = metric.validate_config(&request.parameter.metric_parameter);
        if !check.success {
            return Err(ValidationError::InvalidMetricConfig(
                check
                    .message
                    .unwrap_or_else(|| format!("rejected by metric `{metric_type}`")),
            ));
        }

        if self.catalog.engine(&request.engine_type).is_none() {
            return Err(ValidationError::UnsupportedEngine(request.engine_type.clone()));
        }
        Ok(())
    }

    /// Validate, then persist the task and a MEDIUM START command atomically.
    pub async fn submit(&self, mut request: SubmitTask) -> Result<TaskId, SubmitError> {
        self.validate(&request)?;

        let now = self.clock.now();
        let task_id = self.ids.generate_task_id();
        let engine_parameter = self
            .defaults
            .resolve(&request.engine_type, request.engine_parameter.take());
        let task = Task::submitted(task_id, request, engine_parameter, now);
        let command = Command::new(
            self.ids.generate_command_id(),
            CommandType::Start,
            Priority::Medium,
            task_id,
            now,
        );
        let command_id = command.id;

        self.store.insert_task(task, command).await?;
        info!(task_id = %task_id, command_id = %command_id, "task submitted");
        Ok(task_id)
    }

    /// Queue a MEDIUM STOP command. The task itself is not touched here.
    pub async fn cancel(&self, task_id: TaskId) -> Result<TaskId, SubmitError> {
        if self.store.get_task(task_id).await?.is_none() {
            return Err(SubmitError::TaskNotFound(task_id));
        }
        let command = Command::new(
            self.ids.generate_command_id(),
            CommandType::Stop,
            Priority::Medium,
            task_id,
            self.clock.now(),
        );
        let command_id = command.id;
        self.store.insert_command(command).await?;
        info!(task_id = %task_id, command_id = %command_id, "stop requested");
        Ok(task_id)
    }

    pub async fn task(&self, task_id: TaskId) -> Result<Task, SubmitError> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or(SubmitError::TaskNotFound(task_id))
    }

    pub async fn tasks_for_data_source(&self, data_source_id: u64) -> Result<Vec<Task>, SubmitError> {
        let tasks = self.store.list_tasks_by_data_source(data_source_id).await?;
        debug!(data_source_id, count = tasks.len(), "listed tasks");
        Ok(tasks)
    }
}
