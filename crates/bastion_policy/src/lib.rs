//! BASTION Policy Enforcement
//!
//! Two checkpoints guard every job:
//!
//! - **preflight** runs before a job may enter QUEUED
//! - **postflight** runs before a worker's declared success is accepted
//!
//! Both produce a [`bastion_core::PolicyResult`] and are deterministic in
//! their inputs. Rejections are values, never errors.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod boundary;
pub mod config;
pub mod engine;

pub use boundary::{ArtifactBoundary, BoundaryViolation};
pub use config::PolicyConfig;
pub use engine::PolicyEngine;
