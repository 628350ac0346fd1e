//! Governance errors.
//!
//! Admission rejections are values ([`crate::AdmissionDecision`]); errors
//! here are requests the lifecycle table refuses outright.

use bastion_core::{LifecycleState, StrategyKey, Transition};

/// Governance result type
pub type GovernanceResult<T> = Result<T, GovernanceError>;

/// Governance error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GovernanceError {
    /// The edge does not start at the strategy's current state
    #[error("{key}: {transition} is not allowed from {from}")]
    IllegalTransition {
        /// Strategy
        key: StrategyKey,
        /// Current state
        from: LifecycleState,
        /// Requested edge
        transition: Transition,
    },

    /// PAPER_TRADING -> LIVE only happens through an admission
    #[error("{key}: LIVE entry requires an admission")]
    AdmissionRequired {
        /// Strategy
        key: StrategyKey,
    },

    /// Candidate descriptor could not be resolved
    #[error("Invalid candidate: {reason}")]
    InvalidCandidate {
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
