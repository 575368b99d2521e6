//! App - ports の上に組み立てるコーディネータ本体
//!
//! # コンポーネント
//! - **TaskSubmissionService**: 検証、エンジン既定値のマージ、task と START の永続化
//! - **JobScheduler**: コマンドを claim して dispatch するポーリングループ
//! - **ExecutionManager**: エンジンを実行する上限付きプール
//! - **MembershipCoordinator**: 登録、keep-alive、メンバーシップイベント
//! - **TaskFailover**: 落ちたインスタンスのタスクを再投入
//! - **Coordinator**: 上記すべてを builder で検証して配線

pub mod backoff;
pub mod coordinator;
pub mod execution;
pub mod failover;
pub mod gate;
pub mod membership;
pub mod scheduler;
pub mod status;
pub mod submission;

pub use self::backoff::BackoffPolicy;
pub use self::coordinator::{BuildError, Coordinator, CoordinatorBuilder};
pub use self::execution::{CancelAck, DrainReport, ExecutionManager};
pub use self::failover::{FailoverReport, TaskFailover};
pub use self::gate::DispatchGate;
pub use self::membership::MembershipCoordinator;
pub use self::scheduler::{JobScheduler, TickReport};
pub use self::status::StatusCounts;
pub use self::submission::{EngineDefaults, TaskSubmissionService};
