//! Plugin - SPI とケイパビリティカタログ

pub mod catalog;
pub mod spi;

pub use self::catalog::{CatalogError, PluginCatalog};
pub use self::spi::{CheckResult, ConnectorFactory, Engine, EngineContext, EngineOutput, SqlMetric};
