//! Worker launch abstraction.
//!
//! A launcher turns a job assignment into a running worker and hands back
//! two channels: events flowing from the worker to its monitor task, and
//! control messages flowing the other way.

use crate::error::WorkerError;
use async_trait::async_trait;
use bastion_core::{JobId, JobType, WorkerId};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Capacity of the per-worker event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the per-worker control channel
pub const CONTROL_CHANNEL_CAPACITY: usize = 8;

/// Work handed to a worker
#[derive(Debug, Clone, PartialEq)]
pub struct JobAssignment {
    /// Job
    pub job_id: JobId,
    /// Worker identity recorded on the job
    pub worker_id: WorkerId,
    /// Job type
    pub job_type: JobType,
    /// Declared parameters
    pub params: Value,
    /// Directory the worker writes its outputs into
    pub artifact_dir: PathBuf,
}

/// Event reported by a worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Liveness signal
    Heartbeat,
    /// Worker declares success
    Completed {
        /// Declared outputs, relative to the artifact directory
        outputs: Vec<String>,
    },
    /// Worker reports an error
    Failed {
        /// Human message
        message: String,
        /// Structured context
        details: Value,
    },
    /// Worker stopped after a cancel request
    CancelAcknowledged,
    /// Worker exited abnormally
    Crashed {
        /// What was observed
        reason: String,
    },
}

impl WorkerEvent {
    /// Whether the worker is done after this event
    #[must_use]
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Heartbeat)
    }
}

/// Instruction to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerControl {
    /// Ask the worker to stop and acknowledge
    Cancel,
    /// Stop the worker now
    Kill,
}

/// A running worker
#[derive(Debug)]
pub struct WorkerHandle {
    /// Worker identity
    pub worker_id: WorkerId,
    /// Events from the worker
    pub events: mpsc::Receiver<WorkerEvent>,
    /// Instructions to the worker
    pub control: mpsc::Sender<WorkerControl>,
}

impl WorkerHandle {
    /// Fresh channel pairs for a new worker: the handle for the supervisor
    /// and the ends the worker side drives
    #[must_use]
    pub fn channel(worker_id: WorkerId) -> (
        Self,
        mpsc::Sender<WorkerEvent>,
        mpsc::Receiver<WorkerControl>,
    ) {
        let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (control, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        (
            Self {
                worker_id,
                events,
                control,
            },
            event_tx,
            control_rx,
        )
    }
}

/// Starts workers
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Start a worker for one job
    ///
    /// # Errors
    ///
    /// Returns error if the worker could not be started
    async fn launch(&self, assignment: JobAssignment) -> Result<WorkerHandle, WorkerError>;
}
