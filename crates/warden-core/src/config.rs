//! Coordinator configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid config:
//!
//! ```toml
//! host = "dq-node-1:7070"
//!
//! [scheduler]
//! poll_interval_ms = 1000
//! batch_size = 32
//! stop_timeout_ms = 30000
//!
//! [execution]
//! pool_size = 8
//! shutdown_grace_ms = 10000
//!
//! [membership]
//! renew_interval_ms = 2000
//! isolation_timeout_ms = 10000
//!
//! [failover]
//! max_failovers = 3
//!
//! [engine_defaults.spark]
//! executorMemory = "4G"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{HostId, ParameterMap};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,

    /// How long a STOP may wait for confirmation, measured from the
    /// command's creation.
    pub stop_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_size: 32,
            stop_timeout_ms: 30_000,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    pub pool_size: usize,
    pub shutdown_grace_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl ExecutionConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MembershipConfig {
    pub renew_interval_ms: u64,

    /// No successful renewal for this long closes the dispatch gate.
    pub isolation_timeout_ms: u64,

    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_ms: u64,

    /// Attempts for the initial registration before `start` gives up.
    pub register_attempts: u32,

    pub sweep_lock: String,
    pub sweep_lock_timeout_ms: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            renew_interval_ms: 2_000,
            isolation_timeout_ms: 10_000,
            backoff_base_ms: 200,
            backoff_multiplier: 2.0,
            backoff_max_ms: 5_000,
            register_attempts: 5,
            sweep_lock: "warden/failover-sweep".to_string(),
            sweep_lock_timeout_ms: 5_000,
        }
    }
}

impl MembershipConfig {
    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }

    pub fn isolation_timeout(&self) -> Duration {
        Duration::from_millis(self.isolation_timeout_ms)
    }

    pub fn sweep_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.sweep_lock_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FailoverConfig {
    /// A task failed over this many times is finished as FAILURE.
    pub max_failovers: u32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self { max_failovers: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    pub host: HostId,
    pub scheduler: SchedulerConfig,
    pub execution: ExecutionConfig,
    pub membership: MembershipConfig,
    pub failover: FailoverConfig,

    /// Per-engine defaults merged under caller overrides at submission.
    pub engine_defaults: BTreeMap<String, ParameterMap>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: HostId::local(),
            scheduler: SchedulerConfig::default(),
            execution: ExecutionConfig::default(),
            membership: MembershipConfig::default(),
            failover: FailoverConfig::default(),
            engine_defaults: BTreeMap::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Parse and validate.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: CoordinatorConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.as_str().trim().is_empty() {
            return Err(invalid("host must not be empty"));
        }
        if self.execution.pool_size == 0 {
            return Err(invalid("[execution].pool_size must be >= 1 (got 0)"));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(invalid("[scheduler].poll_interval_ms must be >= 1 (got 0)"));
        }
        if self.scheduler.batch_size == 0 {
            return Err(invalid("[scheduler].batch_size must be >= 1 (got 0)"));
        }
        if self.membership.renew_interval_ms == 0 {
            return Err(invalid("[membership].renew_interval_ms must be >= 1 (got 0)"));
        }
        if self.membership.isolation_timeout_ms < self.membership.renew_interval_ms {
            return Err(invalid(
                "[membership].isolation_timeout_ms must not be shorter than renew_interval_ms",
            ));
        }
        if self.membership.backoff_multiplier < 1.0 {
            return Err(invalid("[membership].backoff_multiplier must be >= 1.0"));
        }
        if self.membership.register_attempts == 0 {
            return Err(invalid("[membership].register_attempts must be >= 1 (got 0)"));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}
