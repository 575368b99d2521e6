//! warden-core
//!
//! Warden データ品質ジョブコーディネータのコア。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（task, command, ids, 状態遷移, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Registry, Clock, IdGenerator）
//! - **plugin**: connector / metric / engine の SPI と PluginCatalog
//! - **app**: アプリケーションロジック（submission, scheduler, execution, membership, failover）
//! - **impls**: 実装（InMemoryTaskStore, InMemoryRegistry など開発用）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod plugin;
pub mod ports;

pub use crate::app::{Coordinator, CoordinatorBuilder};
pub use crate::config::CoordinatorConfig;
