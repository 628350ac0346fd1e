//! Job supervisor.

use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, SupervisorResult, WorkerError};
use crate::governance::{AdmissionCommit, GovernanceService};
use crate::launcher::{JobAssignment, WorkerControl, WorkerEvent, WorkerLauncher};
use bastion_core::{
    Clock, Failure, FailureCode, JobFilter, JobId, JobRecord, JobSpec, JobState, JobType,
    PolicyResult, PolicyStage, SnapshotReason, TransitionPayload, WorkerId,
};
use bastion_governance::PortfolioState;
use bastion_policy::PolicyEngine;
use bastion_store::{JobPage, PageRequest, Store, StoreError, Submission};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, RwLock, Semaphore, mpsc};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of a cancellation request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "job", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelOutcome {
    /// QUEUED job moved straight to CANCELLED
    Cancelled(Box<JobRecord>),
    /// RUNNING job's worker was asked to stop; the grace period applies
    Signalled(Box<JobRecord>),
    /// Nothing to cancel
    AlreadyTerminal(Box<JobRecord>),
    /// Unknown job
    NotFound,
}

/// Supervisor coordinating submission, dispatch and worker liveness
#[derive(Clone)]
pub struct Supervisor {
    store: Arc<Store>,
    policy: Arc<PolicyEngine>,
    governance: Arc<GovernanceService>,
    launcher: Arc<dyn WorkerLauncher>,
    clock: Arc<dyn Clock>,
    config: SupervisorConfig,
    slots: Arc<Semaphore>,
    /// Control channels of workers this process started
    active: Arc<RwLock<HashMap<JobId, mpsc::Sender<WorkerControl>>>>,
    wake: Arc<Notify>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("free_slots", &self.slots.available_permits())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor. Timestamps come from the governance service's
    /// clock.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        policy: PolicyEngine,
        governance: GovernanceService,
        launcher: Arc<dyn WorkerLauncher>,
        config: SupervisorConfig,
    ) -> Self {
        let clock = governance.clock();
        Self {
            store,
            policy: Arc::new(policy),
            governance: Arc::new(governance),
            launcher,
            clock,
            slots: Arc::new(Semaphore::new(config.worker_slots)),
            config,
            active: Arc::new(RwLock::new(HashMap::new())),
            wake: Arc::new(Notify::new()),
        }
    }

    /// The store
    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The governance service
    #[must_use]
    pub fn governance(&self) -> &GovernanceService {
        &self.governance
    }

    /// The policy engine
    #[must_use]
    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Worker slots currently free
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Submit a job: preflight, then dedup-or-insert.
    ///
    /// A preflight rejection is not an error: the returned record is
    /// REJECTED and carries the policy result. Never waits for a worker.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable
    pub fn submit(&self, spec: &JobSpec) -> SupervisorResult<Submission> {
        let portfolio = if spec.job_type == JobType::PortfolioAdmission {
            self.governance.portfolio()?
        } else {
            PortfolioState::new()
        };
        let preflight = self.policy.evaluate_preflight(spec, &portfolio);
        let submission = self.store.submit(spec, &preflight, self.clock.now())?;
        if !submission.deduplicated && submission.record.state == JobState::Queued {
            self.wake.notify_one();
        }
        Ok(submission)
    }

    /// Fetch a job
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable
    pub fn get(&self, id: JobId) -> SupervisorResult<Option<JobRecord>> {
        Ok(self.store.get(id)?)
    }

    /// List jobs in creation order
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable
    pub fn list(&self, filter: &JobFilter, page: &PageRequest) -> SupervisorResult<JobPage> {
        Ok(self.store.list(filter, page)?)
    }

    /// Fail every job left RUNNING by a previous supervisor lifetime
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable
    pub fn recover(&self) -> SupervisorResult<Vec<JobId>> {
        let mut recovered = Vec::new();
        for record in self.store.jobs_in_state(JobState::Running)? {
            let failure = Failure::new(
                FailureCode::WorkerCrash,
                "supervisor restarted while the job was running",
            )
            .with_details(json!({ "worker_id": record.worker_id }));
            if self
                .finish(record.id, JobState::Failed, TransitionPayload::new().with_failure(failure))?
                .is_some()
            {
                warn!(job_id = %record.id, "orphaned job failed on recovery");
                recovered.push(record.id);
            }
        }
        Ok(recovered)
    }

    /// Hand a QUEUED job to a free worker slot
    ///
    /// # Errors
    ///
    /// - [`SupervisorError::NoFreeSlot`] if every slot is busy
    /// - a store conflict if the job is no longer QUEUED
    pub async fn dispatch(&self, id: JobId) -> SupervisorResult<JobRecord> {
        let permit = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| SupervisorError::NoFreeSlot)?;
        self.dispatch_with(id, permit).await
    }

    /// Dispatch QUEUED jobs in creation order while slots are free
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable
    pub async fn dispatch_pending(&self) -> SupervisorResult<usize> {
        let queued = JobFilter::all().with_state(JobState::Queued);
        let mut dispatched = 0;
        loop {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                break;
            };
            let page = self.store.list(&queued, &PageRequest::first(1))?;
            let Some(next) = page.jobs.into_iter().next() else {
                break;
            };
            match self.dispatch_with(next.id, permit).await {
                Ok(_) => dispatched += 1,
                // cancelled or claimed in the meantime
                Err(SupervisorError::Store(err)) if err.is_conflict() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(dispatched)
    }

    async fn dispatch_with(
        &self,
        id: JobId,
        permit: OwnedSemaphorePermit,
    ) -> SupervisorResult<JobRecord> {
        let worker_id = WorkerId::new();
        let artifact_dir = self.policy.artifact_dir_for(id);
        let running = self.store.transition(
            id,
            &[JobState::Queued],
            JobState::Running,
            TransitionPayload::new()
                .with_worker(worker_id)
                .with_artifact_dir(artifact_dir.display().to_string()),
            self.clock.now(),
        )?;

        let assignment = JobAssignment {
            job_id: id,
            worker_id,
            job_type: running.job_type,
            params: running.declared_params.clone(),
            artifact_dir: artifact_dir.clone(),
        };
        let launched = match tokio::fs::create_dir_all(&artifact_dir).await {
            Ok(()) => self.launcher.launch(assignment).await,
            Err(err) => Err(WorkerError::from(err)),
        };
        let handle = match launched {
            Ok(handle) => handle,
            Err(err) => {
                error!(job_id = %id, error = %err, "worker launch failed");
                let failure = Failure::new(FailureCode::WorkerLaunchFailed, err.to_string());
                let failed = self
                    .finish(id, JobState::Failed, TransitionPayload::new().with_failure(failure))?;
                return Ok(failed.unwrap_or(running));
            }
        };

        info!(job_id = %id, worker_id = %worker_id, job_type = %running.job_type, "job dispatched");
        self.active.write().await.insert(id, handle.control.clone());
        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.monitor(id, handle.events, permit).await;
        });
        Ok(running)
    }

    /// Per-job monitor: applies worker events until the worker is done
    async fn monitor(
        self,
        id: JobId,
        mut events: mpsc::Receiver<WorkerEvent>,
        permit: OwnedSemaphorePermit,
    ) {
        let mut finished = false;
        while let Some(event) = events.recv().await {
            let is_final = event.is_final();
            match self.handle_event(id, event).await {
                Ok(true) => {}
                Ok(false) => {
                    finished = true;
                    break;
                }
                Err(err) => error!(job_id = %id, error = %err, "worker event not recorded"),
            }
            if is_final {
                finished = true;
                break;
            }
        }
        if !finished {
            let crashed = WorkerEvent::Crashed {
                reason: "worker went away without reporting".to_string(),
            };
            if let Err(err) = self.handle_event(id, crashed).await {
                error!(job_id = %id, error = %err, "worker event not recorded");
            }
        }

        self.active.write().await.remove(&id);
        drop(permit);
        self.wake.notify_one();
    }

    /// Apply one worker event. Returns whether to keep listening.
    async fn handle_event(&self, id: JobId, event: WorkerEvent) -> SupervisorResult<bool> {
        match event {
            WorkerEvent::Heartbeat => match self.store.heartbeat(id, self.clock.now()) {
                Ok(_) => Ok(true),
                Err(StoreError::NotRunning { state, .. }) => {
                    debug!(job_id = %id, state = %state, "heartbeat from finished job, stopping worker");
                    self.signal(id, WorkerControl::Kill).await;
                    Ok(false)
                }
                Err(err) => Err(err.into()),
            },
            WorkerEvent::Completed { outputs } => {
                self.complete(id, outputs).await?;
                Ok(false)
            }
            WorkerEvent::Failed { message, details } => {
                info!(job_id = %id, reason = %message, "worker reported failure");
                let failure = Failure::new(FailureCode::WorkerError, message).with_details(details);
                self.finish(id, JobState::Failed, TransitionPayload::new().with_failure(failure))?;
                Ok(false)
            }
            WorkerEvent::CancelAcknowledged => {
                let payload = TransitionPayload::new().with_note("worker acknowledged cancel");
                if self.finish(id, JobState::Cancelled, payload)?.is_some() {
                    info!(job_id = %id, "job cancelled");
                }
                Ok(false)
            }
            WorkerEvent::Crashed { reason } => {
                warn!(job_id = %id, %reason, "worker crashed");
                let failure = Failure::new(FailureCode::WorkerCrash, reason);
                self.finish(id, JobState::Failed, TransitionPayload::new().with_failure(failure))?;
                Ok(false)
            }
        }
    }

    /// Postflight, then accept or refuse the worker's success
    async fn complete(&self, id: JobId, outputs: Vec<String>) -> SupervisorResult<()> {
        let record = self.store.require(id)?;
        if record.state != JobState::Running {
            debug!(job_id = %id, state = %record.state, "completion from finished job ignored");
            return Ok(());
        }
        let payload = TransitionPayload::new().with_outputs(outputs.clone());

        let Some(postflight) = self.postflight(&record, outputs).await else {
            let mut failure = Failure::new(
                FailureCode::PolicyTimeout,
                format!(
                    "postflight did not finish within {}ms",
                    self.config.policy_timeout_ms
                ),
            );
            failure.stage = Some(PolicyStage::Postflight);
            self.finish(id, JobState::Failed, payload.with_failure(failure))?;
            return Ok(());
        };
        if !postflight.is_pass() {
            let failure = Failure::from_policy(&postflight);
            self.finish(
                id,
                JobState::Failed,
                payload.with_failure(failure).with_policy(postflight),
            )?;
            return Ok(());
        }

        if record.job_type == JobType::PortfolioAdmission {
            let refused = match self.governance.commit_admission(&record) {
                Ok(AdmissionCommit::Admitted { .. }) => None,
                Ok(AdmissionCommit::Superseded(result)) => Some((
                    Failure::new(FailureCode::AdmissionSuperseded, result.message.clone())
                        .with_details(result.details.clone()),
                    result,
                )),
                Err(err) => {
                    error!(job_id = %id, error = %err, "admission commit failed");
                    Some((
                        Failure::new(
                            FailureCode::AdmissionSuperseded,
                            format!("admission could not be committed: {err}"),
                        ),
                        postflight.clone(),
                    ))
                }
            };
            if let Some((failure, policy)) = refused {
                self.finish(
                    id,
                    JobState::Failed,
                    payload.with_failure(failure).with_policy(policy),
                )?;
                return Ok(());
            }
        }

        self.finish(id, JobState::Succeeded, payload.with_policy(postflight))?;
        Ok(())
    }

    /// Run postflight off the async threads, bounded by the policy timeout
    async fn postflight(&self, record: &JobRecord, outputs: Vec<String>) -> Option<PolicyResult> {
        let policy = Arc::clone(&self.policy);
        let record = record.clone();
        let id = record.id;
        let evaluation =
            tokio::task::spawn_blocking(move || policy.evaluate_postflight(&record, &outputs));
        match tokio::time::timeout(self.config.policy_timeout(), evaluation).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(err)) => {
                error!(job_id = %id, error = %err, "postflight evaluation aborted");
                None
            }
            Err(_) => {
                warn!(job_id = %id, timeout_ms = self.config.policy_timeout_ms, "postflight timed out");
                None
            }
        }
    }

    /// Compare-and-swap out of RUNNING. `None` means another writer already
    /// finished the job and this report is stale.
    fn finish(
        &self,
        id: JobId,
        to: JobState,
        payload: TransitionPayload,
    ) -> SupervisorResult<Option<JobRecord>> {
        match self
            .store
            .transition(id, &[JobState::Running], to, payload, self.clock.now())
        {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::Conflict { actual, .. }) => {
                debug!(job_id = %id, state = %actual, wanted = %to, "stale worker report ignored");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Fail RUNNING jobs whose worker went silent or ignored a cancel
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable
    pub async fn sweep(&self) -> SupervisorResult<Vec<JobId>> {
        let now = self.clock.now();
        let timeout = self.config.heartbeat_timeout();
        let grace = self.config.cancel_grace();
        let mut failed = Vec::new();

        for record in self.store.jobs_in_state(JobState::Running)? {
            let cancel_overdue = record
                .cancel_requested_at
                .is_some_and(|at| now.saturating_since(at) > grace);
            let last_seen = record
                .heartbeat_at
                .or(record.started_at)
                .unwrap_or(record.updated_at);
            let silence = now.saturating_since(last_seen);

            let failure = if cancel_overdue {
                Failure::new(
                    FailureCode::CancelTimeout,
                    format!("cancel not acknowledged within {}ms", self.config.cancel_grace_ms),
                )
            } else if silence > timeout {
                Failure::new(
                    FailureCode::WorkerTimeout,
                    format!("no heartbeat for {}ms", silence.as_millis()),
                )
                .with_details(json!({
                    "last_heartbeat_ms": last_seen.as_millis(),
                    "timeout_ms": self.config.heartbeat_timeout_ms,
                }))
            } else {
                continue;
            };

            let code = failure.code;
            let payload = TransitionPayload::new().with_failure(failure);
            if self.finish(record.id, JobState::Failed, payload)?.is_some() {
                warn!(job_id = %record.id, code = %code.as_str(), "job failed by monitor");
                self.signal(record.id, WorkerControl::Kill).await;
                failed.push(record.id);
            }
        }
        Ok(failed)
    }

    /// Request cancellation.
    ///
    /// QUEUED jobs are cancelled directly. RUNNING jobs have their worker
    /// signalled; if it does not acknowledge within the grace period the
    /// monitor fails the job with `CANCEL_TIMEOUT`.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable or conflicts persist
    pub async fn cancel(&self, id: JobId) -> SupervisorResult<CancelOutcome> {
        let attempts = self.config.conflict_retry_limit;
        for n in 1..=attempts {
            let Some(record) = self.store.get(id)? else {
                return Ok(CancelOutcome::NotFound);
            };
            if record.is_terminal() {
                return Ok(CancelOutcome::AlreadyTerminal(Box::new(record)));
            }
            let now = self.clock.now();
            if record.state == JobState::Queued {
                let payload = TransitionPayload::new().with_note("cancelled before dispatch");
                match self
                    .store
                    .transition(id, &[JobState::Queued], JobState::Cancelled, payload, now)
                {
                    Ok(record) => {
                        info!(job_id = %id, "queued job cancelled");
                        return Ok(CancelOutcome::Cancelled(Box::new(record)));
                    }
                    Err(err) if err.is_conflict() => {
                        debug!(job_id = %id, attempt = n, error = %err, "cancel lost a race");
                    }
                    Err(err) => return Err(err.into()),
                }
                continue;
            }

            let record = self.store.mark_cancel_requested(id, now)?;
            let delivered = self.signal(id, WorkerControl::Cancel).await;
            info!(job_id = %id, delivered, "cancel signalled to worker");
            return Ok(CancelOutcome::Signalled(Box::new(record)));
        }
        warn!(job_id = %id, attempts, "giving up on cancel after conflicts");
        Err(SupervisorError::JobRetriesExhausted { id, attempts })
    }

    /// Send a control message to a worker this process started
    async fn signal(&self, id: JobId, control: WorkerControl) -> bool {
        let sender = self.active.read().await.get(&id).cloned();
        match sender {
            Some(sender) => sender.send(control).await.is_ok(),
            None => false,
        }
    }

    /// Run until `shutdown` fires: recover, then dispatch on every wake-up
    /// and sweep on every monitor tick.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or recovery fails
    pub async fn run(&self, shutdown: CancellationToken) -> SupervisorResult<()> {
        self.config.validate()?;
        let recovered = self.recover()?;

        let mut ticker = tokio::time::interval(self.config.monitor_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut snapshots = self.config.snapshot_interval_ms.map(|ms| {
            let period = Duration::from_millis(ms);
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        info!(
            slots = self.config.worker_slots,
            recovered = recovered.len(),
            "supervisor running"
        );
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = self.wake.notified() => {}
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep().await {
                        error!(error = %err, "heartbeat sweep failed");
                    }
                }
                () = next_tick(&mut snapshots) => {
                    if let Err(err) = self.governance.take_snapshot(SnapshotReason::Scheduled) {
                        error!(error = %err, "scheduled snapshot failed");
                    }
                }
            }
            if let Err(err) = self.dispatch_pending().await {
                error!(error = %err, "dispatch failed");
            }
        }

        let running: Vec<JobId> = self.active.read().await.keys().copied().collect();
        for id in &running {
            self.signal(*id, WorkerControl::Kill).await;
        }
        info!(stopped_workers = running.len(), "supervisor stopped");
        Ok(())
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
