//! Governance service.
//!
//! Binds the pure admission controller and lifecycle machine to the store.
//! Every write is a revision compare-and-set on the strategy record;
//! conflicts are retried from a fresh read up to the configured limit.

use crate::error::{SupervisorError, SupervisorResult};
use bastion_core::{
    Clock, JobRecord, JobType, LifecycleState, PolicyCode, PolicyResult, PolicyStage,
    PortfolioSnapshot, SnapshotReason, StrategyKey, StrategyRecord, SystemClock, Transition,
};
use bastion_governance::{
    Admission, AdmissionController, AdmissionDecision, Candidate, CandidateRef, ExposureUpdate,
    LifecycleMachine, LifecycleOutcome, PortfolioState,
};
use bastion_store::Store;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of committing a PORTFOLIO_ADMISSION job
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionCommit {
    /// The candidate is now LIVE
    Admitted {
        /// Decision that was committed
        admission: Admission,
        /// Lifecycle step taken
        outcome: LifecycleOutcome,
    },
    /// The admission no longer holds against the current portfolio
    Superseded(PolicyResult),
}

/// Strategy lifecycle and admission over the store
pub struct GovernanceService {
    store: Arc<Store>,
    admission: AdmissionController,
    lifecycle: LifecycleMachine,
    clock: Arc<dyn Clock>,
    retry_limit: u32,
}

impl std::fmt::Debug for GovernanceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceService")
            .field("admission", &self.admission)
            .field("lifecycle", &self.lifecycle)
            .field("retry_limit", &self.retry_limit)
            .finish_non_exhaustive()
    }
}

impl GovernanceService {
    /// Create a service on the system clock
    #[must_use]
    pub fn new(store: Arc<Store>, admission: AdmissionController, lifecycle: LifecycleMachine) -> Self {
        Self {
            store,
            admission,
            lifecycle,
            clock: Arc::new(SystemClock),
            retry_limit: 5,
        }
    }

    /// Use another clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the conflict retry limit
    #[must_use]
    pub fn with_retry_limit(mut self, attempts: u32) -> Self {
        self.retry_limit = attempts.max(1);
        self
    }

    /// Clock used for every timestamp
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// The admission controller
    #[must_use]
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Current portfolio, read from the store
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable
    pub fn portfolio(&self) -> SupervisorResult<PortfolioState> {
        Ok(PortfolioState::from_records(self.store.strategies()?))
    }

    /// Register a strategy in INCUBATION
    ///
    /// # Errors
    ///
    /// Returns error if the identity is taken or the record is not in
    /// INCUBATION
    pub fn register(&self, record: &StrategyRecord) -> SupervisorResult<StrategyRecord> {
        Ok(self.store.register_strategy(record)?)
    }

    /// Fetch a strategy
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable
    pub fn strategy(&self, key: &StrategyKey) -> SupervisorResult<Option<StrategyRecord>> {
        Ok(self.store.strategy(key)?)
    }

    /// Every strategy
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable
    pub fn strategies(&self) -> SupervisorResult<Vec<StrategyRecord>> {
        Ok(self.store.strategies()?)
    }

    /// Operator-requested lifecycle transition. The kill switch runs first
    /// and wins.
    ///
    /// # Errors
    ///
    /// Returns error if the edge is illegal, LIVE entry is requested
    /// without an admission, or conflicts persist
    pub fn transition(
        &self,
        key: &StrategyKey,
        requested: Transition,
        reason: &str,
    ) -> SupervisorResult<LifecycleOutcome> {
        let now = self.clock.now();
        let outcome = self.with_retries(key, || {
            let current = self.store.require_strategy(key)?;
            let mut next = current.clone();
            let outcome = self.lifecycle.request(&mut next, requested, reason, now)?;
            if next != current {
                self.store.compare_and_set_strategy(current.revision, &next)?;
            }
            Ok(outcome)
        })?;
        self.record_event(&outcome);
        Ok(outcome)
    }

    /// Apply an exposure update and run the kill switch
    ///
    /// # Errors
    ///
    /// Returns error if the strategy is unknown or conflicts persist
    pub fn record_exposure(
        &self,
        key: &StrategyKey,
        update: &ExposureUpdate,
    ) -> SupervisorResult<LifecycleOutcome> {
        let now = self.clock.now();
        let outcome = self.with_retries(key, || {
            let current = self.store.require_strategy(key)?;
            let mut next = current.clone();
            let outcome = self.lifecycle.evaluate_exposure(&mut next, update, now);
            self.store.compare_and_set_strategy(current.revision, &next)?;
            Ok(outcome)
        })?;
        debug!(
            strategy = %key,
            drawdown = update.current_drawdown,
            state = %outcome.to,
            "exposure recorded"
        );
        self.record_event(&outcome);
        Ok(outcome)
    }

    /// Evaluate a candidate reference without committing anything
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable
    pub fn dry_run(&self, candidate: &CandidateRef) -> SupervisorResult<AdmissionDecision> {
        let portfolio = self.portfolio()?;
        Ok(self.admission.evaluate_ref(candidate, &portfolio))
    }

    /// Evaluate a fully described candidate without committing anything
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable
    pub fn dry_run_candidate(&self, candidate: &Candidate) -> SupervisorResult<AdmissionDecision> {
        let portfolio = self.portfolio()?;
        Ok(self.admission.evaluate(candidate, &portfolio))
    }

    /// Commit the admission carried by a PORTFOLIO_ADMISSION job.
    ///
    /// The decision is re-evaluated against the current portfolio and the
    /// kill switch is checked again; either may supersede the admission that
    /// passed preflight. A replaced LIVE member is retired in the same
    /// write.
    ///
    /// # Errors
    ///
    /// Returns error if the job is not an admission job or the store fails
    pub fn commit_admission(&self, job: &JobRecord) -> SupervisorResult<AdmissionCommit> {
        if job.job_type != JobType::PortfolioAdmission {
            return Err(SupervisorError::InvalidJob {
                id: job.id,
                reason: format!("{} is not a portfolio admission", job.job_type),
            });
        }
        let raw = job.declared_params.get("candidate").cloned().unwrap_or_default();
        let candidate = CandidateRef::from_value(&raw)?;
        let key = candidate.key()?;
        let now = self.clock.now();

        let commit = self.with_retries(&key, || {
            let portfolio = self.portfolio()?;
            let admission = match self.admission.evaluate_ref(&candidate, &portfolio) {
                AdmissionDecision::Admit(admission) => admission,
                decision @ AdmissionDecision::Reject(_) => {
                    return Ok(AdmissionCommit::Superseded(
                        decision.to_policy_result(PolicyStage::Postflight),
                    ));
                }
            };
            let current = self.store.require_strategy(&key)?;
            let mut next = current.clone();
            let outcome = self
                .lifecycle
                .resolve(&mut next, Transition::Admit, "admission granted", now)?;
            if next.state != LifecycleState::Live {
                if next != current {
                    self.store.compare_and_set_strategy(current.revision, &next)?;
                }
                let result = PolicyResult::reject(
                    PolicyStage::Postflight,
                    PolicyCode::KillSwitchActive,
                    format!("kill switch moved {} to {}", key, next.state),
                )
                .with_details(json!({ "outcome": outcome }));
                return Ok(AdmissionCommit::Superseded(result));
            }
            next.allocation = admission.allocation;

            let mut updates = vec![(current.revision, next)];
            if let Some(replaced_key) = &admission.replaces {
                let replaced = self.store.require_strategy(replaced_key)?;
                let mut retired = replaced.clone();
                self.lifecycle.apply(
                    &mut retired,
                    Transition::Retire,
                    &format!("superseded by {key}"),
                    now,
                )?;
                updates.push((replaced.revision, retired));
            }
            let batch: Vec<(u64, &StrategyRecord)> =
                updates.iter().map(|(rev, record)| (*rev, record)).collect();
            self.store.compare_and_set_strategies(&batch)?;
            Ok(AdmissionCommit::Admitted { admission, outcome })
        })?;

        match &commit {
            AdmissionCommit::Admitted { admission, outcome } => {
                info!(
                    job_id = %job.id,
                    strategy = %admission.key,
                    allocation = admission.allocation,
                    replaces = admission.replaces.as_ref().map(ToString::to_string),
                    "admission committed"
                );
                self.record_event(outcome);
            }
            AdmissionCommit::Superseded(result) => {
                warn!(
                    job_id = %job.id,
                    strategy = %key,
                    code = %result.code,
                    reason = %result.message,
                    "admission superseded at commit"
                );
            }
        }
        Ok(commit)
    }

    /// Append a portfolio snapshot
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable
    pub fn take_snapshot(&self, reason: SnapshotReason) -> SupervisorResult<PortfolioSnapshot> {
        let snapshot = self.portfolio()?.snapshot(reason, self.clock.now());
        let stored = self.store.append_snapshot(&snapshot)?;
        info!(
            seq = stored.seq,
            members = stored.members.len(),
            risk_used = stored.risk_used,
            "portfolio snapshot taken"
        );
        Ok(stored)
    }

    /// Most recent snapshot
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable
    pub fn latest_snapshot(&self) -> SupervisorResult<Option<PortfolioSnapshot>> {
        Ok(self.store.latest_snapshot()?)
    }

    /// Snapshot after a committed lifecycle change. The change stands even
    /// if the snapshot cannot be written.
    fn record_event(&self, outcome: &LifecycleOutcome) {
        if !(outcome.changed() && outcome.is_governance_event()) {
            return;
        }
        let description = format!("{} {} -> {}", outcome.key, outcome.from, outcome.to);
        if let Err(err) = self.take_snapshot(SnapshotReason::GovernanceEvent { description }) {
            warn!(
                strategy = %outcome.key,
                to = %outcome.to,
                error = %err,
                "governance event committed without a snapshot"
            );
        }
    }

    fn with_retries<T>(
        &self,
        key: &StrategyKey,
        mut attempt: impl FnMut() -> SupervisorResult<T>,
    ) -> SupervisorResult<T> {
        for n in 1..=self.retry_limit {
            match attempt() {
                Err(SupervisorError::Store(err)) if err.is_conflict() => {
                    debug!(strategy = %key, attempt = n, error = %err, "revision conflict");
                }
                other => return other,
            }
        }
        warn!(strategy = %key, attempts = self.retry_limit, "giving up after conflicts");
        Err(SupervisorError::RetriesExhausted {
            key: key.clone(),
            attempts: self.retry_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::{JobId, JobSpec, ManualClock, Timestamp};
    use bastion_governance::{AdmissionConfig, KillSwitchConfig};

    fn service() -> GovernanceService {
        let store = Arc::new(Store::in_memory().unwrap());
        GovernanceService::new(
            store,
            AdmissionController::new(AdmissionConfig::default(), KillSwitchConfig::default()),
            LifecycleMachine::new(KillSwitchConfig::default()),
        )
        .with_clock(Arc::new(ManualClock::new(Timestamp::from_millis(1_000))))
    }

    fn paper_trading(svc: &GovernanceService, id: &str, bucket: &str) -> StrategyKey {
        let key = StrategyKey::new(id, "v1").unwrap();
        let record = StrategyRecord::new(key.clone(), "p", bucket, Timestamp::EPOCH)
            .with_volatility(0.2)
            .with_historical_max_drawdown(0.2);
        svc.register(&record).unwrap();
        svc.transition(&key, Transition::Graduate, "validated").unwrap();
        svc.transition(&key, Transition::Promote, "promoted").unwrap();
        key
    }

    fn admission_job(candidate: serde_json::Value) -> JobRecord {
        let spec = JobSpec::new(JobType::PortfolioAdmission, json!({ "candidate": candidate }));
        JobRecord::from_submission(
            JobId::new(),
            &spec,
            &PolicyResult::pass(PolicyStage::Preflight),
            Timestamp::EPOCH,
        )
    }

    #[test]
    fn test_manual_admit_refused() {
        let svc = service();
        let key = paper_trading(&svc, "trend", "trend");
        assert!(matches!(
            svc.transition(&key, Transition::Admit, "operator"),
            Err(SupervisorError::Governance(_))
        ));
    }

    #[test]
    fn test_commit_admission_goes_live() {
        let svc = service();
        let key = paper_trading(&svc, "trend", "trend");
        let commit = svc
            .commit_admission(&admission_job(json!({"strategy": "trend@v1"})))
            .unwrap();
        assert!(matches!(commit, AdmissionCommit::Admitted { .. }));

        let record = svc.strategy(&key).unwrap().unwrap();
        assert_eq!(record.state, LifecycleState::Live);
        assert!((record.allocation - 0.5).abs() < 1e-12);
        let snapshot = svc.latest_snapshot().unwrap().unwrap();
        assert!(matches!(snapshot.reason, SnapshotReason::GovernanceEvent { .. }));
    }

    #[test]
    fn test_kill_switch_supersedes_admission() {
        let svc = service();
        let key = paper_trading(&svc, "trend", "trend");
        // drawdown beyond the historical maximum retires on the update itself
        let outcome = svc
            .record_exposure(&key, &ExposureUpdate::drawdown(0.3))
            .unwrap();
        assert_eq!(outcome.to, LifecycleState::Retired);

        let commit = svc
            .commit_admission(&admission_job(json!({"strategy": "trend@v1"})))
            .unwrap();
        let AdmissionCommit::Superseded(result) = commit else {
            panic!("expected superseded");
        };
        assert_eq!(result.code, PolicyCode::LifecycleIneligible);
    }

    #[test]
    fn test_replacement_retires_replaced_member() {
        let svc = service();
        let old = paper_trading(&svc, "old", "trend");
        svc.commit_admission(&admission_job(json!({"strategy": "old@v1"})))
            .unwrap();

        let new = paper_trading(&svc, "new", "trend");
        let commit = svc
            .commit_admission(&admission_job(
                json!({"strategy": "new@v1", "replaces": "old@v1"}),
            ))
            .unwrap();
        assert!(matches!(commit, AdmissionCommit::Admitted { .. }), "{commit:?}");
        assert_eq!(svc.strategy(&new).unwrap().unwrap().state, LifecycleState::Live);
        let retired = svc.strategy(&old).unwrap().unwrap();
        assert_eq!(retired.state, LifecycleState::Retired);
        assert_eq!(retired.allocation, 0.0);
    }

    #[test]
    fn test_commit_requires_admission_job() {
        let svc = service();
        let spec = JobSpec::new(JobType::BuildData, json!({"dataset": "spx"}));
        let job = JobRecord::from_submission(
            JobId::new(),
            &spec,
            &PolicyResult::pass(PolicyStage::Preflight),
            Timestamp::EPOCH,
        );
        assert!(matches!(
            svc.commit_admission(&job),
            Err(SupervisorError::InvalidJob { .. })
        ));
    }

    #[test]
    fn test_exposure_demotes_and_snapshots() {
        let svc = service();
        let key = paper_trading(&svc, "trend", "trend");
        svc.commit_admission(&admission_job(json!({"strategy": "trend@v1"})))
            .unwrap();
        let before = svc.latest_snapshot().unwrap().unwrap().seq;

        let outcome = svc
            .record_exposure(&key, &ExposureUpdate::drawdown(0.15))
            .unwrap();
        assert_eq!(outcome.to, LifecycleState::Probation);
        assert!(outcome.kill_switch);
        assert_eq!(svc.latest_snapshot().unwrap().unwrap().seq, before + 1);
    }

    #[test]
    fn test_clock_step_back_does_not_undo_commit() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(10_000)));
        let svc = service().with_clock(clock.clone());
        let key = paper_trading(&svc, "trend", "trend");
        svc.take_snapshot(SnapshotReason::Scheduled).unwrap();

        clock.set(Timestamp::from_millis(5_000));
        let commit = svc
            .commit_admission(&admission_job(json!({"strategy": "trend@v1"})))
            .unwrap();
        assert!(matches!(commit, AdmissionCommit::Admitted { .. }));
        assert_eq!(svc.strategy(&key).unwrap().unwrap().state, LifecycleState::Live);
        let snapshot = svc.latest_snapshot().unwrap().unwrap();
        assert!(matches!(snapshot.reason, SnapshotReason::GovernanceEvent { .. }));
        assert_eq!(snapshot.taken_at, Timestamp::from_millis(10_000));

        let outcome = svc
            .record_exposure(&key, &ExposureUpdate::drawdown(0.3))
            .unwrap();
        assert_eq!(outcome.to, LifecycleState::Retired);
    }
}
