//! Domain - ドメインモデル（ids, task / command レコード, 状態遷移, errors）
//!
//! ここは純粋なデータと検証のみ。I/O も async もなし。

pub mod command;
pub mod errors;
pub mod ids;
pub mod state;
pub mod task;

pub use self::command::{sort_for_dispatch, Command, CommandOutcome, CommandState, CommandType, Priority};
pub use self::errors::{
    CoordinationError, EngineError, ExecutionError, FailoverError, StoreError, SubmitError,
    TransitionError, ValidationError,
};
pub use self::ids::{CommandId, HostId, Id, IdMarker, TaskId};
pub use self::state::ExecutionStatus;
pub use self::task::{
    ConnectorParameter, ParameterMap, SubmitTask, Task, TaskGuard, TaskParameter, TaskTransition,
};
