//! Worker processes.
//!
//! One child process per job. The child receives its job through
//! environment variables and a parameters line on stdin, and reports over
//! stdout with the protocol in [`crate::protocol`]. An exit without a final
//! report, or with a failing status, is a crash.

use crate::config::WorkerCommand;
use crate::error::WorkerError;
use crate::launcher::{JobAssignment, WorkerControl, WorkerEvent, WorkerHandle, WorkerLauncher};
use crate::protocol::{ControlMessage, WorkerMessage};
use async_trait::async_trait;
use bastion_core::JobId;
use futures::StreamExt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

/// Longest stdout line accepted from a worker
const MAX_LINE_BYTES: usize = 1 << 20;

/// Environment variable carrying the job id
pub const ENV_JOB_ID: &str = "BASTION_JOB_ID";
/// Environment variable carrying the job type
pub const ENV_JOB_TYPE: &str = "BASTION_JOB_TYPE";
/// Environment variable carrying the artifact directory
pub const ENV_ARTIFACT_DIR: &str = "BASTION_ARTIFACT_DIR";

/// Launcher spawning one process per job
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: WorkerCommand,
}

impl ProcessLauncher {
    /// Create a launcher
    #[must_use]
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, assignment: JobAssignment) -> Result<WorkerHandle, WorkerError> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .env(ENV_JOB_ID, assignment.job_id.to_string())
            .env(ENV_JOB_TYPE, assignment.job_type.as_str())
            .env(ENV_ARTIFACT_DIR, &assignment.artifact_dir)
            .current_dir(&assignment.artifact_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::Launch(format!("{}: {e}", self.command.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Launch("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Launch("stdout not captured".to_string()))?;

        let mut line = serde_json::to_string(&assignment.params)
            .map_err(|e| WorkerError::Protocol(e.to_string()))?;
        line.push('\n');
        if let Err(err) = stdin.write_all(line.as_bytes()).await {
            // The child may legitimately exit before reading; its exit
            // status will tell.
            debug!(job_id = %assignment.job_id, error = %err, "could not write params");
        }

        let (handle, event_tx, control_rx) = WorkerHandle::channel(assignment.worker_id);
        debug!(
            job_id = %assignment.job_id,
            worker_id = %handle.worker_id,
            pid = child.id(),
            "worker process started"
        );
        let lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
        tokio::spawn(drive(
            assignment,
            child,
            stdin,
            lines,
            event_tx,
            control_rx,
            self.command.exit_grace(),
        ));
        Ok(handle)
    }
}

async fn drive(
    assignment: JobAssignment,
    mut child: Child,
    mut stdin: ChildStdin,
    mut lines: FramedRead<tokio::process::ChildStdout, LinesCodec>,
    events: mpsc::Sender<WorkerEvent>,
    mut control: mpsc::Receiver<WorkerControl>,
    exit_grace: Duration,
) {
    let job_id = assignment.job_id;
    let mut reported = false;
    let mut control_open = true;

    loop {
        tokio::select! {
            next = lines.next() => match next {
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => match WorkerMessage::parse(&line) {
                    Ok(message) => {
                        let event = event_for(message);
                        let is_final = event.is_final();
                        if events.send(event).await.is_err() {
                            break;
                        }
                        if is_final {
                            reported = true;
                            break;
                        }
                    }
                    Err(err) => warn!(job_id = %job_id, error = %err, "unreadable worker message"),
                },
                Some(Err(err)) => {
                    warn!(job_id = %job_id, error = %err, "worker stdout error");
                    break;
                }
                None => break,
            },
            instruction = control.recv(), if control_open => match instruction {
                Some(WorkerControl::Cancel) => {
                    if let Err(err) = send_control(&mut stdin, ControlMessage::Cancel).await {
                        debug!(job_id = %job_id, error = %err, "cancel not delivered");
                    }
                }
                Some(WorkerControl::Kill) => kill(&mut child, job_id),
                None => control_open = false,
            },
        }
    }
    drop(stdin);

    if reported {
        // The monitor has already released the slot
        let waited = tokio::time::timeout(exit_grace, child.wait()).await;
        if waited.is_err() {
            warn!(job_id = %job_id, "worker still running after its final report");
            kill(&mut child, job_id);
            if let Err(err) = child.wait().await {
                debug!(job_id = %job_id, error = %err, "could not reap worker");
            }
        }
        return;
    }

    let status = loop {
        let kill_requested = tokio::select! {
            status = child.wait() => break status,
            instruction = control.recv(), if control_open => match instruction {
                Some(WorkerControl::Kill) => true,
                Some(WorkerControl::Cancel) => false,
                None => {
                    control_open = false;
                    false
                }
            },
        };
        if kill_requested {
            kill(&mut child, job_id);
        }
    };
    let reason = match status {
        Ok(status) if status.success() => "exited without reporting a result".to_string(),
        Ok(status) => format!("exited abnormally: {status}"),
        Err(err) => format!("could not observe exit: {err}"),
    };
    if events.send(WorkerEvent::Crashed { reason }).await.is_err() {
        debug!(job_id = %job_id, "crash not delivered, monitor gone");
    }
}

fn kill(child: &mut Child, job_id: JobId) {
    debug!(job_id = %job_id, "killing worker process");
    if let Err(err) = child.start_kill() {
        debug!(job_id = %job_id, error = %err, "kill not delivered");
    }
}

fn event_for(message: WorkerMessage) -> WorkerEvent {
    match message {
        WorkerMessage::Heartbeat => WorkerEvent::Heartbeat,
        WorkerMessage::Completed { outputs } => WorkerEvent::Completed { outputs },
        WorkerMessage::Failed { message, details } => WorkerEvent::Failed { message, details },
        WorkerMessage::Cancelled => WorkerEvent::CancelAcknowledged,
    }
}

async fn send_control(stdin: &mut ChildStdin, message: ControlMessage) -> Result<(), WorkerError> {
    let mut line =
        serde_json::to_string(&message).map_err(|e| WorkerError::Protocol(e.to_string()))?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}
