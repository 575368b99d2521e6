//! Demo plugins for `warden run`.
//!
//! Engines do no real work: they sleep for `durationMs` (from the resolved
//! engine parameters) and fail when `failWith` is set, which is enough to
//! watch dispatch, cancellation and failover end to end.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use warden_core::domain::EngineError;
use warden_core::plugin::{
    CheckResult, ConnectorFactory, Engine, EngineContext, EngineOutput, PluginCatalog, SqlMetric,
};

pub const ENGINES: [&str; 3] = ["jdbc", "spark", "local"];

struct Connector {
    name: &'static str,
    category: &'static str,
}

impl ConnectorFactory for Connector {
    fn name(&self) -> &str {
        self.name
    }

    fn category(&self) -> &str {
        self.category
    }
}

/// Column-level metrics need a `column`; table-level ones take anything.
struct Metric {
    name: &'static str,
    needs_column: bool,
}

impl SqlMetric for Metric {
    fn name(&self) -> &str {
        self.name
    }

    fn validate_config(&self, params: &serde_json::Value) -> CheckResult {
        if !self.needs_column {
            return CheckResult::ok();
        }
        match params.get("column").and_then(|c| c.as_str()) {
            Some(c) if !c.trim().is_empty() => CheckResult::ok(),
            _ => CheckResult::fail(format!("metric `{}` requires a non-empty `column`", self.name)),
        }
    }
}

struct SimulatedEngine {
    engine_type: &'static str,
    default_duration: Duration,
    cooperative: bool,
}

#[async_trait]
impl Engine for SimulatedEngine {
    fn engine_type(&self) -> &str {
        self.engine_type
    }

    fn supports_cancellation(&self) -> bool {
        self.cooperative
    }

    async fn execute(&self, ctx: EngineContext) -> Result<EngineOutput, EngineError> {
        let duration = match ctx.engine_parameter.get("durationMs") {
            None => self.default_duration,
            Some(v) => v
                .as_u64()
                .map(Duration::from_millis)
                .ok_or_else(|| EngineError::InvalidParameter(format!("durationMs: {v}")))?,
        };
        let started = Instant::now();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = ctx.cancel.cancelled(), if self.cooperative => {
                return Err(EngineError::Failed("interrupted".to_string()));
            }
        }

        if let Some(reason) = ctx.engine_parameter.get("failWith").and_then(|v| v.as_str()) {
            return Err(EngineError::Failed(reason.to_string()));
        }
        Ok(EngineOutput::new(json!({
            "engine": self.engine_type,
            "metric": ctx.parameter.metric_type,
            "elapsedMs": started.elapsed().as_millis() as u64,
        })))
    }
}

pub fn demo_catalog() -> Result<PluginCatalog> {
    let mut catalog = PluginCatalog::new();

    for (name, category) in [("postgresql", "jdbc"), ("mysql", "jdbc"), ("hive", "file")] {
        catalog.register_connector(Arc::new(Connector { name, category }))?;
    }
    for (name, needs_column) in [
        ("column_null", true),
        ("column_unique", true),
        ("table_row_count", false),
    ] {
        catalog.register_metric(Arc::new(Metric { name, needs_column }))?;
    }
    // spark jobs cannot be interrupted once submitted to the cluster
    for (engine_type, ms, cooperative) in [("jdbc", 300, true), ("spark", 1_500, false), ("local", 100, true)] {
        catalog.register_engine(Arc::new(SimulatedEngine {
            engine_type,
            default_duration: Duration::from_millis(ms),
            cooperative,
        }))?;
    }
    Ok(catalog)
}
