//! Worker process wire protocol.
//!
//! Newline-delimited JSON in both directions. The supervisor writes the
//! job parameters as the first line on the worker's stdin, then control
//! messages. The worker writes [`WorkerMessage`]s on stdout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message from a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Still alive
    Heartbeat,
    /// Work finished; outputs are relative to the artifact directory
    Completed {
        /// Declared output paths
        #[serde(default)]
        outputs: Vec<String>,
    },
    /// Work failed
    Failed {
        /// Human message
        message: String,
        /// Structured context
        #[serde(default)]
        details: Value,
    },
    /// Cancellation acknowledged; the worker stopped
    Cancelled,
}

/// Message to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Stop and acknowledge
    Cancel,
}

impl WorkerMessage {
    /// Parse one line
    ///
    /// # Errors
    ///
    /// Returns error if the line is not a worker message
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}
