//! In-process workers.
//!
//! [`TaskLauncher`] runs a [`JobRunner`] on the tokio runtime. A panic in
//! the runner is reported as a crash, the same way an abnormal process exit
//! is for [`crate::ProcessLauncher`].

use crate::error::WorkerError;
use crate::launcher::{JobAssignment, WorkerControl, WorkerEvent, WorkerHandle, WorkerLauncher};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How a runner finished
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Success with declared outputs
    Completed(Vec<String>),
    /// Reported failure
    Failed {
        /// Human message
        message: String,
        /// Structured context
        details: Value,
    },
    /// Stopped after observing cancellation
    Cancelled,
}

impl RunOutcome {
    /// Failure without details
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            details: Value::Null,
        }
    }
}

/// What a runner sees of its job
#[derive(Debug, Clone)]
pub struct JobContext {
    /// The assignment
    pub assignment: JobAssignment,
    events: mpsc::Sender<WorkerEvent>,
    cancel: CancellationToken,
}

impl JobContext {
    /// Send a heartbeat
    pub async fn heartbeat(&self) {
        // A closed channel means the monitor is gone; nothing to tell it.
        let _ = self.events.send(WorkerEvent::Heartbeat).await;
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Job body executed by a [`TaskLauncher`]
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    /// Run one job
    async fn run(&self, ctx: JobContext) -> RunOutcome;
}

/// Launcher running jobs as tokio tasks
#[derive(Clone)]
pub struct TaskLauncher {
    runner: Arc<dyn JobRunner>,
}

impl std::fmt::Debug for TaskLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLauncher").finish_non_exhaustive()
    }
}

impl TaskLauncher {
    /// Create a launcher
    #[must_use]
    pub fn new(runner: impl JobRunner) -> Self {
        Self {
            runner: Arc::new(runner),
        }
    }
}

#[async_trait]
impl WorkerLauncher for TaskLauncher {
    async fn launch(&self, assignment: JobAssignment) -> Result<WorkerHandle, WorkerError> {
        let (handle, event_tx, mut control_rx) = WorkerHandle::channel(assignment.worker_id);
        let cancel = CancellationToken::new();
        let job_id = assignment.job_id;
        let ctx = JobContext {
            assignment,
            events: event_tx.clone(),
            cancel: cancel.clone(),
        };
        let runner = Arc::clone(&self.runner);
        let mut task = tokio::spawn(async move { runner.run(ctx).await });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    joined = &mut task => {
                        let event = match joined {
                            Ok(RunOutcome::Completed(outputs)) => WorkerEvent::Completed { outputs },
                            Ok(RunOutcome::Failed { message, details }) => {
                                WorkerEvent::Failed { message, details }
                            }
                            Ok(RunOutcome::Cancelled) => WorkerEvent::CancelAcknowledged,
                            Err(err) if err.is_panic() => WorkerEvent::Crashed {
                                reason: "worker task panicked".to_string(),
                            },
                            Err(err) => WorkerEvent::Crashed {
                                reason: err.to_string(),
                            },
                        };
                        let _ = event_tx.send(event).await;
                        break;
                    }
                    control = control_rx.recv() => match control {
                        Some(WorkerControl::Cancel) => {
                            debug!(job_id = %job_id, "cancel delivered to task");
                            cancel.cancel();
                        }
                        Some(WorkerControl::Kill) | None => {
                            debug!(job_id = %job_id, "task aborted");
                            task.abort();
                            break;
                        }
                    },
                }
            }
        });

        Ok(handle)
    }
}
