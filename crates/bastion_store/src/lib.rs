//! BASTION Store
//!
//! Durable state for the governance engine, held in a single redb database:
//!
//! - the Job Store, with compare-and-swap transitions and fingerprint dedup
//! - governed strategy records, keyed by `id@version`
//! - the append-only portfolio snapshot log
//!
//! redb allows one write transaction at a time, which is what makes
//! dedup-or-insert and every transition atomic.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod jobs;
pub mod keys;
pub mod snapshots;
pub mod store;
pub mod strategies;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use jobs::{JobPage, PageRequest, Submission};
pub use keys::Cursor;
pub use store::Store;
