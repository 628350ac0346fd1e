//! Store errors.

use bastion_core::{JobId, JobState, StrategyKey};

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Store error
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database could not be read or written; fatal to the operation
    #[error("Storage failure: {0}")]
    Storage(#[from] redb::Error),

    /// A stored record could not be encoded or decoded
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// Compare-and-swap mismatch; re-read and retry
    #[error("Conflict on {id}: expected one of {expected:?}, found {actual}")]
    Conflict {
        /// Job
        id: JobId,
        /// States the caller expected
        expected: Vec<JobState>,
        /// State actually found
        actual: JobState,
    },

    /// The job state table forbids the edge
    #[error("Illegal transition for {id}: {from} -> {to}")]
    IllegalTransition {
        /// Job
        id: JobId,
        /// Current state
        from: JobState,
        /// Requested state
        to: JobState,
    },

    /// Heartbeat for a job that is not RUNNING
    #[error("Job {id} is not running (state {state})")]
    NotRunning {
        /// Job
        id: JobId,
        /// Current state
        state: JobState,
    },

    /// Strategy not found
    #[error("Strategy not found: {0}")]
    StrategyNotFound(StrategyKey),

    /// Strategy already registered
    #[error("Strategy already registered: {0}")]
    StrategyExists(StrategyKey),

    /// Strategy revision mismatch; re-read and retry
    #[error("Revision conflict on {key}: expected {expected}, found {actual}")]
    RevisionConflict {
        /// Strategy
        key: StrategyKey,
        /// Revision the caller read
        expected: u64,
        /// Revision in the store
        actual: u64,
    },

    /// A write tried to change a field that is frozen
    #[error("Field {field} of {key} is immutable in its current state")]
    ImmutableField {
        /// Strategy
        key: StrategyKey,
        /// Field name
        field: &'static str,
    },

    /// Record rejected before write
    #[error("Invalid record: {reason}")]
    InvalidRecord {
        /// Why
        reason: String,
    },

    /// Cursor could not be decoded
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
}

impl StoreError {
    /// Whether re-reading state and retrying may succeed
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::RevisionConflict { .. })
    }
}

/// Funnel any redb error kind into [`StoreError::Storage`]
pub(crate) fn storage<E: Into<redb::Error>>(err: E) -> StoreError {
    StoreError::Storage(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_recoverable() {
        let err = StoreError::Conflict {
            id: JobId::new(),
            expected: vec![JobState::Running],
            actual: JobState::Failed,
        };
        assert!(err.is_conflict());
        assert!(err.to_string().contains("FAILED"));
    }

    #[test]
    fn test_illegal_transition_is_not_recoverable() {
        let err = StoreError::IllegalTransition {
            id: JobId::new(),
            from: JobState::Succeeded,
            to: JobState::Failed,
        };
        assert!(!err.is_conflict());
        assert!(err.to_string().contains("SUCCEEDED -> FAILED"));
    }
}
