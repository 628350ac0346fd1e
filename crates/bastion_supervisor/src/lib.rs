//! BASTION Supervisor
//!
//! Coordinates job execution around the store:
//!
//! - submission: preflight, then dedup-or-insert
//! - dispatch of QUEUED jobs to worker slots
//! - one monitor task per running job, fed by the worker's event channel
//! - a heartbeat sweep that fails stale jobs
//! - cancellation with a bounded grace period
//! - postflight before any success is accepted
//!
//! The store is the single source of truth. Every state change is a
//! compare-and-swap, so a late report from a stale worker can never
//! resurrect a job that has already been failed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod governance;
pub mod launcher;
pub mod process;
pub mod protocol;
pub mod supervisor;
pub mod task;

pub use config::{SupervisorConfig, WorkerCommand};
pub use error::{SupervisorError, SupervisorResult, WorkerError};
pub use governance::{AdmissionCommit, GovernanceService};
pub use launcher::{JobAssignment, WorkerControl, WorkerEvent, WorkerHandle, WorkerLauncher};
pub use process::ProcessLauncher;
pub use protocol::{ControlMessage, WorkerMessage};
pub use supervisor::{CancelOutcome, Supervisor};
pub use task::{JobContext, JobRunner, RunOutcome, TaskLauncher};
