//! Supervisor errors.

use bastion_core::{JobId, StrategyKey};
use bastion_governance::GovernanceError;
use bastion_store::StoreError;

/// Supervisor result type
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Supervisor error
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Lifecycle request refused
    #[error(transparent)]
    Governance(#[from] GovernanceError),

    /// Worker could not be started or driven
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// Every worker slot is busy
    #[error("No free worker slot")]
    NoFreeSlot,

    /// Conflicting writers kept winning on a strategy record
    #[error("Gave up on {key} after {attempts} conflicting attempts")]
    RetriesExhausted {
        /// Strategy
        key: StrategyKey,
        /// Attempts made
        attempts: u32,
    },

    /// Conflicting writers kept winning on a job record
    #[error("Gave up on job {id} after {attempts} conflicting attempts")]
    JobRetriesExhausted {
        /// Job
        id: JobId,
        /// Attempts made
        attempts: u32,
    },

    /// Job parameters are not what the job type requires
    #[error("Invalid job {id}: {reason}")]
    InvalidJob {
        /// Job
        id: JobId,
        /// Why
        reason: String,
    },

    /// Configuration out of range
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Field
        field: &'static str,
        /// Why
        reason: String,
    },
}

impl SupervisorError {
    /// Whether this is a storage failure: the store itself failed, or
    /// conflicting writers outlasted every retry
    #[must_use]
    pub fn is_storage_failure(&self) -> bool {
        match self {
            Self::Store(err) => !err.is_conflict(),
            Self::RetriesExhausted { .. } | Self::JobRetriesExhausted { .. } => true,
            _ => false,
        }
    }
}

/// Worker errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    /// The worker could not be started
    #[error("Failed to launch worker: {0}")]
    Launch(String),

    /// I/O with the worker failed
    #[error("Worker I/O error: {0}")]
    Io(String),

    /// The worker sent something that is not a protocol message
    #[error("Worker protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for WorkerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::JobState;

    #[test]
    fn test_exhausted_retries_are_storage_failures() {
        let id = JobId::new();
        assert!(SupervisorError::JobRetriesExhausted { id, attempts: 5 }.is_storage_failure());
        let key = StrategyKey::new("trend", "v1").unwrap();
        assert!(SupervisorError::RetriesExhausted { key, attempts: 5 }.is_storage_failure());

        let conflict = StoreError::Conflict {
            id,
            expected: vec![JobState::Queued],
            actual: JobState::Running,
        };
        assert!(!SupervisorError::Store(conflict).is_storage_failure());
        assert!(!SupervisorError::JobNotFound(id).is_storage_failure());
    }
}
