//! Task record, submission payload and guarded transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::TransitionError;
use super::ids::{HostId, TaskId};
use super::state::ExecutionStatus;

/// JSON object used for engine parameters (key-by-key mergeable).
pub type ParameterMap = serde_json::Map<String, serde_json::Value>;

/// Source connector selection: plugin name + plugin-owned parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorParameter {
    #[serde(rename = "type")]
    pub connector_type: String,

    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Connector + metric part of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParameter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_connector_parameter: Option<ConnectorParameter>,

    pub metric_type: String,

    #[serde(default)]
    pub metric_parameter: serde_json::Value,
}

/// Submission input, as received from whatever API layer wraps the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTask {
    pub data_source_id: u64,

    pub engine_type: String,

    pub parameter: TaskParameter,

    /// Caller overrides, merged over the engine defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_parameter: Option<ParameterMap>,

    #[serde(default)]
    pub execute_platform_parameter: serde_json::Value,
}

/// Persisted task.
///
/// Invariant: `execute_host.is_some() == status.is_owned()`.
/// All status changes go through [`Task::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub data_source_id: u64,
    pub engine_type: String,
    pub parameter: TaskParameter,
    pub engine_parameter: ParameterMap,
    pub execute_platform_parameter: serde_json::Value,

    pub status: ExecutionStatus,
    pub execute_host: Option<HostId>,

    /// Number of times failover put this task back in the queue.
    pub failover_count: u32,

    pub submit_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    /// Engine result data (SUCCESS only).
    pub result: Option<serde_json::Value>,

    /// Failure or kill cause.
    pub error: Option<String>,
}

impl Task {
    /// Build a freshly submitted task from a request whose engine parameters
    /// were already resolved.
    pub fn submitted(
        id: TaskId,
        request: SubmitTask,
        engine_parameter: ParameterMap,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            data_source_id: request.data_source_id,
            engine_type: request.engine_type,
            parameter: request.parameter,
            engine_parameter,
            execute_platform_parameter: request.execute_platform_parameter,
            status: ExecutionStatus::SubmittedSuccess,
            execute_host: None,
            failover_count: 0,
            submit_time: now,
            start_time: None,
            end_time: None,
            result: None,
            error: None,
        }
    }

    /// Does `guard` hold for the current record?
    pub fn matches(&self, guard: &TaskGuard) -> bool {
        self.status == guard.status
            && guard
                .host
                .as_ref()
                .is_none_or(|h| self.execute_host.as_ref() == Some(h))
    }

    /// Apply one transition, validating it against the lifecycle.
    ///
    /// This is the only place a task's status changes, so the
    /// `execute_host` invariant is maintained here.
    pub fn apply(&mut self, transition: TaskTransition) -> Result<(), TransitionError> {
        let from = self.status;
        let to = transition.target();
        if from.is_terminal() {
            return Err(TransitionError::Terminal { from, to });
        }
        if !from.can_transition_to(to) {
            return Err(TransitionError::Illegal { from, to });
        }

        match transition {
            TaskTransition::Dispatch { host } => {
                self.execute_host = Some(host);
            }
            TaskTransition::Undispatch => {
                self.execute_host = None;
            }
            TaskTransition::Start { at } => {
                self.start_time = Some(at);
            }
            TaskTransition::Finish {
                at, result, error, ..
            } => {
                self.execute_host = None;
                self.end_time = Some(at);
                self.result = result;
                self.error = error;
            }
            TaskTransition::Requeue => {
                self.execute_host = None;
                self.start_time = None;
                self.failover_count += 1;
            }
        }
        self.status = to;
        Ok(())
    }
}

/// Compare-and-set precondition for a task update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGuard {
    pub status: ExecutionStatus,
    pub host: Option<HostId>,
}

impl TaskGuard {
    /// Status must match; host is not checked.
    pub fn status(status: ExecutionStatus) -> Self {
        Self { status, host: None }
    }

    /// Status and `execute_host` must both match.
    pub fn owned_by(status: ExecutionStatus, host: HostId) -> Self {
        Self {
            status,
            host: Some(host),
        }
    }
}

/// A single change to a task's lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskTransition {
    /// SubmittedSuccess -> Dispatched, assigns the host.
    Dispatch { host: HostId },

    /// Dispatched -> SubmittedSuccess, the pool rejected the task.
    Undispatch,

    /// Dispatched -> RunningExecution.
    Start { at: DateTime<Utc> },

    /// -> Success | Failure | Killed.
    Finish {
        status: ExecutionStatus,
        at: DateTime<Utc>,
        result: Option<serde_json::Value>,
        error: Option<String>,
    },

    /// RunningExecution -> SubmittedSuccess, the owning host is gone.
    Requeue,
}

impl TaskTransition {
    pub fn target(&self) -> ExecutionStatus {
        match self {
            TaskTransition::Dispatch { .. } => ExecutionStatus::Dispatched,
            TaskTransition::Undispatch | TaskTransition::Requeue => {
                ExecutionStatus::SubmittedSuccess
            }
            TaskTransition::Start { .. } => ExecutionStatus::RunningExecution,
            TaskTransition::Finish { status, .. } => *status,
        }
    }

    pub fn success(at: DateTime<Utc>, result: serde_json::Value) -> Self {
        TaskTransition::Finish {
            status: ExecutionStatus::Success,
            at,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(at: DateTime<Utc>, error: impl Into<String>) -> Self {
        TaskTransition::Finish {
            status: ExecutionStatus::Failure,
            at,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn killed(at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        TaskTransition::Finish {
            status: ExecutionStatus::Killed,
            at,
            result: None,
            error: Some(reason.into()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn host(s: &str) -> HostId {
        HostId::new(s)
    }

    #[test]
    fn submitted_task_has_no_host() {
        let t = task("jdbc");
        assert_eq!(t.status, ExecutionStatus::SubmittedSuccess);
        assert!(t.execute_host.is_none());
        assert_eq!(t.submit_time, t0());
    }

    #[test]
    fn full_lifecycle_keeps_host_invariant() {
        let mut t = task("jdbc");

        t.apply(TaskTransition::Dispatch { host: host("a") }).unwrap();
        assert_eq!(t.execute_host, Some(host("a")));

        t.apply(TaskTransition::Start { at: t0() }).unwrap();
        assert_eq!(t.status, ExecutionStatus::RunningExecution);
        assert_eq!(t.execute_host, Some(host("a")));

        t.apply(TaskTransition::success(t0(), serde_json::json!({"rows": 3})))
            .unwrap();
        assert_eq!(t.status, ExecutionStatus::Success);
        assert!(t.execute_host.is_none());
        assert_eq!(t.end_time, Some(t0()));
        assert_eq!(t.result, Some(serde_json::json!({"rows": 3})));
    }

    #[test]
    fn requeue_clears_host_and_counts_failovers() {
        let mut t = task("spark");
        t.apply(TaskTransition::Dispatch { host: host("a") }).unwrap();
        t.apply(TaskTransition::Start { at: t0() }).unwrap();

        t.apply(TaskTransition::Requeue).unwrap();

        assert_eq!(t.status, ExecutionStatus::SubmittedSuccess);
        assert!(t.execute_host.is_none());
        assert!(t.start_time.is_none());
        assert_eq!(t.failover_count, 1);
    }

    #[test]
    fn terminal_task_rejects_everything() {
        let mut t = task("jdbc");
        t.apply(TaskTransition::killed(t0(), "stopped")).unwrap();

        let err = t
            .apply(TaskTransition::Dispatch { host: host("a") })
            .unwrap_err();
        assert!(matches!(err, TransitionError::Terminal { .. }));
        assert_eq!(t.status, ExecutionStatus::Killed);
    }

    #[test]
    fn requeue_from_submitted_is_illegal() {
        let mut t = task("jdbc");
        let err = t.apply(TaskTransition::Requeue).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                from: ExecutionStatus::SubmittedSuccess,
                to: ExecutionStatus::SubmittedSuccess,
            }
        );
    }

    #[test]
    fn guard_checks_host_when_given() {
        let mut t = task("jdbc");
        t.apply(TaskTransition::Dispatch { host: host("a") }).unwrap();

        assert!(t.matches(&TaskGuard::status(ExecutionStatus::Dispatched)));
        assert!(t.matches(&TaskGuard::owned_by(ExecutionStatus::Dispatched, host("a"))));
        assert!(!t.matches(&TaskGuard::owned_by(ExecutionStatus::Dispatched, host("b"))));
        assert!(!t.matches(&TaskGuard::status(ExecutionStatus::RunningExecution)));
    }

    #[test]
    fn submit_task_accepts_camel_case_json() {
        let json = serde_json::json!({
            "dataSourceId": 1,
            "engineType": "spark",
            "parameter": {
                "srcConnectorParameter": {"type": "hive", "parameters": {"db": "x"}},
                "metricType": "column_null",
                "metricParameter": {"column": "c"}
            },
            "engineParameter": {"executorMemory": "4G"}
        });
        let req: SubmitTask = serde_json::from_value(json).unwrap();
        assert_eq!(req.engine_type, "spark");
        assert_eq!(
            req.parameter.src_connector_parameter.unwrap().connector_type,
            "hive"
        );
        assert_eq!(req.engine_parameter.unwrap()["executorMemory"], "4G");
    }
}
