//! Engine configuration file.
//!
//! One JSON document with a section per component. Every section and field
//! is optional; anything left out takes its default.

use bastion_governance::{AdmissionConfig, AdmissionController, KillSwitchConfig, LifecycleMachine};
use bastion_policy::{PolicyConfig, PolicyEngine};
use bastion_store::{Store, StoreConfig};
use bastion_supervisor::{GovernanceService, ProcessLauncher, Supervisor, SupervisorConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// File
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },
    /// The file is not a valid configuration document
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// File
        path: PathBuf,
        /// Cause
        source: serde_json::Error,
    },
    /// A value is out of range
    #[error("invalid {section} configuration: {reason}")]
    Invalid {
        /// Section holding the bad value
        section: &'static str,
        /// What is wrong
        reason: String,
    },
}

/// Aggregated configuration for every component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Database
    pub store: StoreConfig,
    /// Preflight and postflight checks
    pub policy: PolicyConfig,
    /// Portfolio admission rules
    pub admission: AdmissionConfig,
    /// Drawdown kill switch
    pub kill_switch: KillSwitchConfig,
    /// Dispatch, liveness and the worker command
    pub supervisor: SupervisorConfig,
}

impl EngineConfig {
    /// Load from `path`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or fails
    /// validation
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no configuration file, using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every section
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.admission
            .validate()
            .map_err(|e| invalid("admission", e))?;
        self.kill_switch
            .validate()
            .map_err(|e| invalid("kill_switch", e))?;
        self.supervisor
            .validate()
            .map_err(|e| invalid("supervisor", e))?;

        let policy = &self.policy;
        let positive = [
            ("max_params_bytes", policy.max_params_bytes as u64),
            ("memory_ceiling_mb", policy.memory_ceiling_mb),
            ("max_timeout_secs", policy.max_timeout_secs),
            ("max_outputs", policy.max_outputs as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    section: "policy",
                    reason: format!("{} must be positive", field),
                });
            }
        }
        if self.store.max_page_size == 0 {
            return Err(ConfigError::Invalid {
                section: "store",
                reason: "max_page_size must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Open the store and wire up the supervisor with a process launcher
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened
    pub fn open(&self) -> color_eyre::Result<Supervisor> {
        let store = Arc::new(Store::open(self.store.clone())?);
        let admission = AdmissionController::new(self.admission.clone(), self.kill_switch.clone());
        let governance = GovernanceService::new(
            Arc::clone(&store),
            admission.clone(),
            LifecycleMachine::new(self.kill_switch.clone()),
        )
        .with_retry_limit(self.supervisor.conflict_retry_limit);
        let policy = PolicyEngine::new(self.policy.clone(), admission);
        let launcher = Arc::new(ProcessLauncher::new(self.supervisor.worker.clone()));
        info!(
            store = %self.store.path.display(),
            artifact_root = %self.policy.artifact_root.display(),
            worker = %self.supervisor.worker.program,
            "engine configured"
        );
        Ok(Supervisor::new(
            store,
            policy,
            governance,
            launcher,
            self.supervisor.clone(),
        ))
    }
}

fn invalid(section: &'static str, err: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        section,
        reason: err.to_string(),
    }
}
