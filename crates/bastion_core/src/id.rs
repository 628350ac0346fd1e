//! Unique identifiers for BASTION entities.
//!
//! All IDs are UUIDs and are displayed with a short type prefix
//! (`job_`, `worker_`, `snap_`). Parsing accepts the prefixed form and the
//! bare UUID.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from UUID bytes
            #[must_use]
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// Create from the 128-bit integer form
            #[must_use]
            pub const fn from_u128(value: u128) -> Self {
                Self(Uuid::from_u128(value))
            }

            /// Get as UUID
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Get as bytes
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// Get the 128-bit integer form (used as a storage key)
            #[must_use]
            pub const fn as_u128(&self) -> u128 {
                self.0.as_u128()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s
                    .strip_prefix(concat!($prefix, "_"))
                    .unwrap_or(s);
                Uuid::parse_str(raw)
                    .map(Self)
                    .map_err(|e| CoreError::InvalidId {
                        reason: format!("{}: {}", s, e),
                    })
            }
        }
    };
}

uuid_id!(
    /// Job identifier - identifies a single submitted job
    JobId,
    "job"
);

uuid_id!(
    /// Worker identifier - identifies one worker slot occupancy
    WorkerId,
    "worker"
);

uuid_id!(
    /// Snapshot identifier - identifies a portfolio snapshot
    SnapshotId,
    "snap"
);
