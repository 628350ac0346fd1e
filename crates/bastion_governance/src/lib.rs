//! BASTION Governance
//!
//! Pure portfolio governance: the admission controller that gates entry into
//! LIVE exposure, the lifecycle machine with its drawdown kill switch, and the
//! portfolio statistics both rely on.
//!
//! Nothing here touches storage. Callers pass an explicit [`PortfolioState`]
//! so every decision can be replayed in dry runs and tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admission;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod portfolio;
pub mod stats;

pub use admission::{
    Admission, AdmissionController, AdmissionDecision, AdmissionRejection, Candidate, CandidateRef,
};
pub use config::{AdmissionConfig, KillSwitchConfig};
pub use error::{GovernanceError, GovernanceResult};
pub use lifecycle::{ExposureUpdate, KillSwitch, LifecycleMachine, LifecycleOutcome};
pub use portfolio::PortfolioState;
