//! Impls - ports のプロセス内実装
//!
//! # 含まれるもの
//! - **InMemoryTaskStore**: テストと CLI 用の共有 task / command store
//! - **InMemoryRegistry**: セッション, ロック, crash / partition フック付きのメンバーシップ
//!
//! 本番バックエンド（RDB の store, ZooKeeper / etcd の registry）はこの crate の外で
//! 同じ trait を実装する。

pub mod inmem_registry;
pub mod inmem_store;

pub use self::inmem_registry::InMemoryRegistry;
pub use self::inmem_store::InMemoryTaskStore;
