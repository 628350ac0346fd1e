//! BASTION Core Types
//!
//! This crate contains pure types and logic with no I/O: identifiers,
//! content fingerprints, the job model, policy verdicts and the governed
//! strategy lifecycle model. All types are serializable with a stable encoding.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod id;
pub mod job;
pub mod portfolio;
pub mod strategy;
pub mod time;
pub mod verdict;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use hash::{Fingerprint, Hash, HashError, canonical_json};
pub use id::{JobId, SnapshotId, WorkerId};
pub use job::{
    AuditEntry, Failure, FailureCode, JobFilter, JobRecord, JobSpec, JobState, JobType,
    TransitionPayload,
};
pub use portfolio::{PortfolioSnapshot, SnapshotMember, SnapshotReason};
pub use strategy::{
    Directive, LifecycleState, LifecycleTransition, StrategyKey, StrategyRecord, Transition,
};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
pub use verdict::{PolicyCode, PolicyResult, PolicyStage, Verdict};
