//! Supervisor configuration.

use crate::error::{SupervisorError, SupervisorResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Command used to start a worker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    /// Program to run
    pub program: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// How long a worker may keep running after its final report before
    /// it is killed
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,
}

fn default_exit_grace_ms() -> u64 {
    2_000
}

impl WorkerCommand {
    /// Create a command
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            exit_grace_ms: default_exit_grace_ms(),
        }
    }

    /// Append an argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the post-report exit grace
    #[must_use]
    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Post-report exit grace
    #[must_use]
    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self::new("bastion-worker")
    }
}

/// Supervisor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// A RUNNING job without a heartbeat for this long is failed
    pub heartbeat_timeout_ms: u64,
    /// Interval of the heartbeat sweep and dispatch poll
    pub monitor_interval_ms: u64,
    /// How long a RUNNING job may take to acknowledge cancellation
    pub cancel_grace_ms: u64,
    /// Bound on postflight evaluation
    pub policy_timeout_ms: u64,
    /// Attempts on a revision conflict before giving up
    pub conflict_retry_limit: u32,
    /// Maximum number of concurrently running jobs
    pub worker_slots: usize,
    /// Cadence of scheduled portfolio snapshots; `None` disables them
    pub snapshot_interval_ms: Option<u64>,
    /// Worker process command
    pub worker: WorkerCommand,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 30_000,
            monitor_interval_ms: 1_000,
            cancel_grace_ms: 10_000,
            policy_timeout_ms: 5_000,
            conflict_retry_limit: 5,
            worker_slots: 4,
            snapshot_interval_ms: Some(24 * 60 * 60 * 1_000),
            worker: WorkerCommand::default(),
        }
    }
}

impl SupervisorConfig {
    /// Create with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set heartbeat timeout
    #[must_use]
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set monitor interval
    #[must_use]
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval_ms = duration_ms(interval);
        self
    }

    /// Set cancel grace period
    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_ms = duration_ms(grace);
        self
    }

    /// Set policy timeout
    #[must_use]
    pub fn with_policy_timeout(mut self, timeout: Duration) -> Self {
        self.policy_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set worker slots
    #[must_use]
    pub fn with_worker_slots(mut self, slots: usize) -> Self {
        self.worker_slots = slots;
        self
    }

    /// Set snapshot cadence
    #[must_use]
    pub fn with_snapshot_interval(mut self, interval: Option<Duration>) -> Self {
        self.snapshot_interval_ms = interval.map(duration_ms);
        self
    }

    /// Set worker command
    #[must_use]
    pub fn with_worker(mut self, worker: WorkerCommand) -> Self {
        self.worker = worker;
        self
    }

    /// Heartbeat timeout
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Monitor interval
    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// Cancel grace period
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Policy timeout
    #[must_use]
    pub fn policy_timeout(&self) -> Duration {
        Duration::from_millis(self.policy_timeout_ms)
    }

    /// Check ranges
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::InvalidConfig`] naming the first bad field
    pub fn validate(&self) -> SupervisorResult<()> {
        let positive = [
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("monitor_interval_ms", self.monitor_interval_ms),
            ("cancel_grace_ms", self.cancel_grace_ms),
            ("policy_timeout_ms", self.policy_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(SupervisorError::InvalidConfig {
                    field,
                    reason: "must be positive".to_string(),
                });
            }
        }
        if self.worker_slots == 0 {
            return Err(SupervisorError::InvalidConfig {
                field: "worker_slots",
                reason: "at least one slot is required".to_string(),
            });
        }
        if self.conflict_retry_limit == 0 {
            return Err(SupervisorError::InvalidConfig {
                field: "conflict_retry_limit",
                reason: "at least one attempt is required".to_string(),
            });
        }
        if self.snapshot_interval_ms == Some(0) {
            return Err(SupervisorError::InvalidConfig {
                field: "snapshot_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.worker.program.is_empty() {
            return Err(SupervisorError::InvalidConfig {
                field: "worker.program",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
