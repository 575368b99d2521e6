//! PluginCatalog - 名前をキーにしたケイパビリティの集合（起動時に登録）
//!
//! - 初期化中に組み立て（mutable）、実行時は `Arc` 越しに読み取り専用で共有するのでロック不要
//! - 同じ名前の二重登録はエラー（後勝ちにはしない）
//! - 文字列キーで引き、見つからなければ `None`。呼び出し側が明示的なエラーに変換する

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::spi::{ConnectorFactory, Engine, SqlMetric};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("{kind} plugin `{name}` is already registered")]
    AlreadyRegistered { kind: &'static str, name: String },
}

#[derive(Default)]
pub struct PluginCatalog {
    connectors: HashMap<String, Arc<dyn ConnectorFactory>>,
    metrics: HashMap<String, Arc<dyn SqlMetric>>,
    engines: HashMap<String, Arc<dyn Engine>>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_connector(
        &mut self,
        connector: Arc<dyn ConnectorFactory>,
    ) -> Result<(), CatalogError> {
        insert_unique(&mut self.connectors, "connector", connector.name().to_string(), connector)
    }

    pub fn register_metric(&mut self, metric: Arc<dyn SqlMetric>) -> Result<(), CatalogError> {
        insert_unique(&mut self.metrics, "metric", metric.name().to_string(), metric)
    }

    pub fn register_engine(&mut self, engine: Arc<dyn Engine>) -> Result<(), CatalogError> {
        insert_unique(&mut self.engines, "engine", engine.engine_type().to_string(), engine)
    }

    pub fn connector(&self, name: &str) -> Option<Arc<dyn ConnectorFactory>> {
        self.connectors.get(name).cloned()
    }

    pub fn metric(&self, name: &str) -> Option<Arc<dyn SqlMetric>> {
        self.metrics.get(name).cloned()
    }

    pub fn engine(&self, engine_type: &str) -> Option<Arc<dyn Engine>> {
        self.engines.get(engine_type).cloned()
    }

    /// Sorted for stable log output.
    pub fn supported_connectors(&self) -> BTreeSet<String> {
        self.connectors.keys().cloned().collect()
    }

    pub fn supported_metrics(&self) -> BTreeSet<String> {
        self.metrics.keys().cloned().collect()
    }

    pub fn supported_engines(&self) -> BTreeSet<String> {
        self.engines.keys().cloned().collect()
    }
}

fn insert_unique<V>(
    map: &mut HashMap<String, V>,
    kind: &'static str,
    name: String,
    value: V,
) -> Result<(), CatalogError> {
    if map.contains_key(&name) {
        return Err(CatalogError::AlreadyRegistered { kind, name });
    }
    map.insert(name, value);
    Ok(())
}
