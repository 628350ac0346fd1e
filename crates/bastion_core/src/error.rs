//! Core error types for BASTION.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Invalid encoding
    #[error("Invalid encoding: {reason}")]
    InvalidEncoding {
        /// Decoder message
        reason: String,
    },

    /// Invalid ID format
    #[error("Invalid ID: {reason}")]
    InvalidId {
        /// Why the id was rejected
        reason: String,
    },

    /// Invalid strategy key
    #[error("Invalid strategy key: {reason}")]
    InvalidStrategyKey {
        /// Why the key was rejected
        reason: String,
    },

    /// Unknown enumerated value
    #[error("Unknown {kind}: {value}")]
    UnknownVariant {
        /// Enumeration name
        kind: &'static str,
        /// Offending input
        value: String,
    },

    /// Validation error
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Failure reason
        reason: String,
    },
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidEncoding {
            reason: err.to_string(),
        }
    }
}
