//! Plugin SPI - コーディネータが使う 3 種類のプラグイン
//!
//! 具体的なプラグイン（JDBC コネクタ, Spark エンジン, メトリクス SQL ビルダー）は
//! この crate の外にあり、コーディネータは名前で引くだけ。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::domain::{EngineError, ParameterMap, TaskId, TaskParameter};

/// Source connector capability.
pub trait ConnectorFactory: Send + Sync {
    /// Lookup key, e.g. `"postgresql"`.
    fn name(&self) -> &str;

    /// Connector family, e.g. `"jdbc"`. The `jdbc` engine only accepts `jdbc` connectors.
    fn category(&self) -> &str;
}

/// Result of a metric config check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub success: bool,
    pub message: Option<String>,
}

impl CheckResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Metric capability.
pub trait SqlMetric: Send + Sync {
    /// Lookup key, e.g. `"column_null"`.
    fn name(&self) -> &str;

    fn validate_config(&self, params: &serde_json::Value) -> CheckResult;
}

/// Everything an engine gets to run one task.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub task_id: TaskId,
    pub engine_type: String,
    pub parameter: TaskParameter,
    pub engine_parameter: ParameterMap,
    pub execute_platform_parameter: serde_json::Value,

    /// Cancelled on STOP or forced shutdown. Engines that report
    /// `supports_cancellation() == false` may ignore it.
    pub cancel: CancellationToken,
}

/// Result data of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineOutput {
    #[serde(default)]
    pub data: serde_json::Value,
}

impl EngineOutput {
    pub fn new(data: serde_json::Value) -> Self {
        Self { data }
    }
}

/// Execution engine capability.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Lookup key, the task's `engine_type`.
    fn engine_type(&self) -> &str;

    /// Can a running execution be interrupted at an await point?
    ///
    /// When `false`, a cancelled execution keeps its pool slot until it
    /// returns on its own.
    fn supports_cancellation(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: EngineContext) -> Result<EngineOutput, EngineError>;
}
