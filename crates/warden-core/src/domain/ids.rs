//! Domain identifiers (strongly-typed IDs).
//!
//! task と command の ID は ULID を Phantom type 付きの `Id<T>` で包んだもの。
//!
//! ## 依存している ULID の特性
//! - **時刻でソート可能**: timestamp が先頭にある
//! - **分散生成可能**: 各インスタンスが調整なしで生成でき、store 側の採番は不要
//! - **生成器ごとに単調増加**: `UlidGenerator` は同一ミリ秒内で小さい ID を返さない。
//!   これが command の FIFO タイブレークになる
//!
//! `HostId` は別物: コーディネータインスタンスの人が読める不透明な識別子で、
//! registry のキーと `execute_host` に使う。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each id kind.
///
/// Provides the prefix used by `Display` (`"task-"`, `"command-"`).
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic id type.
///
/// `T` only exists at compile time, so a `TaskId` can never be passed where a
/// `CommandId` is expected.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// Markers
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Command {}

impl IdMarker for Command {
    fn prefix() -> &'static str {
        "command-"
    }
}

/// Identifier of a Task (one data-quality validation job).
pub type TaskId = Id<Task>;

/// Identifier of a Command (START/STOP request queued for dispatch).
pub type CommandId = Id<Command>;

/// Identity of a coordinator instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(String);

impl HostId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// `$HOSTNAME:<pid>`, falling back to `localhost:<pid>`.
    pub fn local() -> Self {
        let name = std::env::var("HOSTNAME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        Self(format!("{}:{}", name, std::process::id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
