//! Ports - 外部システムとの境界
//!
//! 各 trait はコーディネータが所有しない協調先を 1 つずつ隠す:
//! - `TaskStore`: 共有永続化層。task と command の唯一の正
//! - `Registry`: メンバーシップサービス（ephemeral 登録, watch, lock）
//! - `Clock` / `IdGenerator`: 時刻と ID 生成。テストで差し替え可能

pub mod clock;
pub mod id_generator;
pub mod registry;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::registry::{MembershipEvent, MembershipListener, Registry, SubscriptionId};
pub use self::task_store::TaskStore;
