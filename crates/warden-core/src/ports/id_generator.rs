//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース。`Clock` から時刻を取る

use std::sync::Mutex;
use std::time::SystemTime;

use ulid::{Generator, Ulid};

use crate::domain::ids::{CommandId, TaskId};
use crate::ports::Clock;

/// IdGenerator は task と command の ID を生成する
///
/// # Thread Safety
/// - `Send + Sync`: submission と scheduler、failover で共有する
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_command_id(&self) -> CommandId;
}

/// ULID generator whose timestamp part comes from a `Clock`.
///
/// Ids are monotonic: two ids minted in the same millisecond (or under a
/// `FixedClock`) still sort in creation order. That ordering is what gives
/// commands their FIFO tie-break.
pub struct UlidGenerator<C> {
    clock: C,
    inner: Mutex<Generator>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            inner: Mutex::new(Generator::new()),
        }
    }

    fn next_ulid(&self) -> Ulid {
        let now = self.clock.now();
        let at = SystemTime::from(now);
        let mut generator = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match generator.generate_from_datetime(at) {
            Ok(ulid) => ulid,
            // random part overflowed within one millisecond
            Err(_) => Ulid::from_parts(now.timestamp_millis() as u64, rand::random()),
        }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }

    fn generate_command_id(&self) -> CommandId {
        CommandId::from(self.next_ulid())
    }
}
