//! Job model: specifications, records and the job state table.

use crate::error::CoreError;
use crate::hash::Fingerprint;
use crate::id::{JobId, WorkerId};
use crate::time::Timestamp;
use crate::verdict::{PolicyCode, PolicyResult, PolicyStage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kind of work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Research run of a strategy over a dataset
    ResearchRun,
    /// Build or refresh a dataset
    BuildData,
    /// Build a portfolio from member strategies
    PortfolioBuild,
    /// Admit a candidate strategy into LIVE exposure
    PortfolioAdmission,
    /// Walk-forward validation of a strategy
    WalkForward,
}

impl JobType {
    /// Every job type, in declaration order
    pub const ALL: [JobType; 5] = [
        Self::ResearchRun,
        Self::BuildData,
        Self::PortfolioBuild,
        Self::PortfolioAdmission,
        Self::WalkForward,
    ];

    /// Stable string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ResearchRun => "RESEARCH_RUN",
            Self::BuildData => "BUILD_DATA",
            Self::PortfolioBuild => "PORTFOLIO_BUILD",
            Self::PortfolioAdmission => "PORTFOLIO_ADMISSION",
            Self::WalkForward => "WALK_FORWARD",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = CoreError;

    /// Accepts `RESEARCH_RUN` as well as `research-run`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "job type",
                value: s.to_string(),
            })
    }
}

/// Job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Admitted by preflight, waiting for a worker slot
    Queued,
    /// Handed to a worker
    Running,
    /// Worker reported success and postflight passed
    Succeeded,
    /// Worker failure, timeout, crash or postflight rejection
    Failed,
    /// Preflight rejected the submission
    Rejected,
    /// Cancelled by a caller
    Cancelled,
}

impl JobState {
    /// Every job state, in declaration order
    pub const ALL: [JobState; 6] = [
        Self::Queued,
        Self::Running,
        Self::Succeeded,
        Self::Failed,
        Self::Rejected,
        Self::Cancelled,
    ];

    /// Terminal states never change again
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Rejected | Self::Cancelled
        )
    }

    /// States reachable from this one
    #[must_use]
    pub const fn successors(&self) -> &'static [JobState] {
        match self {
            Self::Queued => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Succeeded, Self::Failed, Self::Cancelled],
            Self::Succeeded | Self::Failed | Self::Rejected | Self::Cancelled => &[],
        }
    }

    /// Check the job state table
    #[must_use]
    pub fn can_transition_to(&self, to: JobState) -> bool {
        self.successors().contains(&to)
    }

    /// Stable string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "job state",
                value: s.to_string(),
            })
    }
}

/// Why a job ended in FAILED (or REJECTED)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// No heartbeat within the liveness timeout
    WorkerTimeout,
    /// Worker exited abnormally
    WorkerCrash,
    /// Worker reported an error
    WorkerError,
    /// Worker could not be started
    WorkerLaunchFailed,
    /// Worker did not acknowledge cancellation within the grace period
    CancelTimeout,
    /// Postflight evaluation did not complete in time
    PolicyTimeout,
    /// A kill-switch transition overrode the admission this job requested
    AdmissionSuperseded,
    /// A policy checkpoint rejected the job
    Policy(PolicyCode),
}

impl FailureCode {
    /// Stable string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WorkerTimeout => "WORKER_TIMEOUT",
            Self::WorkerCrash => "WORKER_CRASH",
            Self::WorkerError => "WORKER_ERROR",
            Self::WorkerLaunchFailed => "WORKER_LAUNCH_FAILED",
            Self::CancelTimeout => "CANCEL_TIMEOUT",
            Self::PolicyTimeout => "POLICY_TIMEOUT",
            Self::AdmissionSuperseded => "ADMISSION_SUPERSEDED",
            Self::Policy(code) => code.as_str(),
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job submission: type plus an immutable parameter snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Job type
    pub job_type: JobType,
    /// Declared parameters; the fingerprint is derived from these
    pub params: Value,
}

impl JobSpec {
    /// Create a new job spec
    #[must_use]
    pub fn new(job_type: JobType, params: Value) -> Self {
        Self { job_type, params }
    }

    /// Content fingerprint of this spec
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self.job_type, &self.params)
    }
}

/// One audit trail entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When it happened
    pub at: Timestamp,
    /// Short event name
    pub event: String,
    /// Optional free text
    pub detail: Option<String>,
}

impl AuditEntry {
    /// Create an audit entry
    #[must_use]
    pub fn new(at: Timestamp, event: impl Into<String>) -> Self {
        Self {
            at,
            event: event.into(),
            detail: None,
        }
    }

    /// Attach detail text
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Failure information carried by a transition into FAILED
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Failure code
    pub code: FailureCode,
    /// Human message
    pub message: String,
    /// Structured details
    pub details: Value,
    /// Policy checkpoint that caused the failure, if any
    pub stage: Option<PolicyStage>,
}

impl Failure {
    /// Create a failure without a policy stage
    #[must_use]
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Value::Null,
            stage: None,
        }
    }

    /// Build a failure from a rejecting policy result
    #[must_use]
    pub fn from_policy(result: &PolicyResult) -> Self {
        Self {
            code: FailureCode::Policy(result.code),
            message: result.message.clone(),
            details: result.details.clone(),
            stage: Some(result.stage),
        }
    }

    /// Attach structured details
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Fields a transition may set alongside the state change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionPayload {
    /// Worker taking the job (QUEUED -> RUNNING)
    pub worker_id: Option<WorkerId>,
    /// Artifact directory assigned at dispatch
    pub artifact_dir: Option<String>,
    /// Outputs declared by the worker
    pub declared_outputs: Option<Vec<String>>,
    /// Failure information
    pub failure: Option<Failure>,
    /// Policy result snapshot
    pub policy: Option<PolicyResult>,
    /// Audit note
    pub note: Option<String>,
}

impl TransitionPayload {
    /// Empty payload
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker
    #[must_use]
    pub fn with_worker(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    /// Set the artifact directory
    #[must_use]
    pub fn with_artifact_dir(mut self, dir: impl Into<String>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    /// Set declared outputs
    #[must_use]
    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.declared_outputs = Some(outputs);
        self
    }

    /// Set failure information
    #[must_use]
    pub fn with_failure(mut self, failure: Failure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Set the policy snapshot
    #[must_use]
    pub fn with_policy(mut self, policy: PolicyResult) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set an audit note
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Durable job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job ID
    pub id: JobId,
    /// Job type
    pub job_type: JobType,
    /// Immutable parameter snapshot
    pub declared_params: Value,
    /// Content fingerprint of type + params
    pub fingerprint: Fingerprint,
    /// Current state
    pub state: JobState,
    /// Monotonic revision, bumped on every write
    pub revision: u64,
    /// Creation time
    pub created_at: Timestamp,
    /// Last write time
    pub updated_at: Timestamp,
    /// Last worker heartbeat
    pub heartbeat_at: Option<Timestamp>,
    /// Dispatch time
    pub started_at: Option<Timestamp>,
    /// Time the job became terminal
    pub finished_at: Option<Timestamp>,
    /// Worker that ran the job
    pub worker_id: Option<WorkerId>,
    /// Per-job artifact directory
    pub artifact_dir: Option<String>,
    /// Outputs declared by the worker
    pub declared_outputs: Vec<String>,
    /// Failure code
    pub failure_code: Option<FailureCode>,
    /// Failure message
    pub failure_message: Option<String>,
    /// Structured failure details
    pub failure_details: Option<Value>,
    /// Checkpoint that produced the last failure
    pub policy_stage: Option<PolicyStage>,
    /// Snapshot of the last policy result
    pub policy: Option<PolicyResult>,
    /// When cancellation was requested
    pub cancel_requested_at: Option<Timestamp>,
    /// Audit trail
    pub audit: Vec<AuditEntry>,
}

impl JobRecord {
    /// Create the record for a submission that has been through preflight.
    ///
    /// A passing preflight yields QUEUED; a rejection yields REJECTED with
    /// the policy result recorded as the failure.
    #[must_use]
    pub fn from_submission(id: JobId, spec: &JobSpec, preflight: &PolicyResult, now: Timestamp) -> Self {
        let mut record = Self {
            id,
            job_type: spec.job_type,
            declared_params: spec.params.clone(),
            fingerprint: spec.fingerprint(),
            state: JobState::Queued,
            revision: 1,
            created_at: now,
            updated_at: now,
            heartbeat_at: None,
            started_at: None,
            finished_at: None,
            worker_id: None,
            artifact_dir: None,
            declared_outputs: Vec::new(),
            failure_code: None,
            failure_message: None,
            failure_details: None,
            policy_stage: None,
            policy: Some(preflight.clone()),
            cancel_requested_at: None,
            audit: Vec::new(),
        };

        if preflight.is_pass() {
            record.audit.push(AuditEntry::new(now, "queued"));
        } else {
            record.state = JobState::Rejected;
            record.finished_at = Some(now);
            record.set_failure(Failure::from_policy(preflight));
            record.audit.push(
                AuditEntry::new(now, "rejected").with_detail(preflight.code.as_str()),
            );
        }
        record
    }

    /// Check if the record is terminal
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply a state change. The caller has already validated the edge.
    pub fn apply(&mut self, to: JobState, payload: TransitionPayload, now: Timestamp) {
        let from = self.state;
        self.state = to;
        self.revision += 1;
        self.updated_at = now;

        if to == JobState::Running {
            self.started_at = Some(now);
            self.heartbeat_at = Some(now);
        }
        if to.is_terminal() {
            self.finished_at = Some(now);
        }
        if let Some(worker_id) = payload.worker_id {
            self.worker_id = Some(worker_id);
        }
        if let Some(dir) = payload.artifact_dir {
            self.artifact_dir = Some(dir);
        }
        if let Some(outputs) = payload.declared_outputs {
            self.declared_outputs = outputs;
        }
        if let Some(policy) = payload.policy {
            self.policy = Some(policy);
        }
        if let Some(failure) = payload.failure {
            self.set_failure(failure);
        }

        let mut entry = AuditEntry::new(now, format!("{} -> {}", from, to));
        if let Some(code) = self.failure_code.filter(|_| to == JobState::Failed) {
            entry = entry.with_detail(match payload.note {
                Some(note) => format!("{}: {}", code, note),
                None => code.to_string(),
            });
        } else if let Some(note) = payload.note {
            entry = entry.with_detail(note);
        }
        self.audit.push(entry);
    }

    /// Append audit metadata; allowed in every state
    pub fn push_audit(&mut self, entry: AuditEntry) {
        self.revision += 1;
        self.audit.push(entry);
    }

    fn set_failure(&mut self, failure: Failure) {
        self.failure_code = Some(failure.code);
        self.failure_message = Some(failure.message);
        self.failure_details = Some(failure.details);
        self.policy_stage = failure.stage;
    }
}

/// Filter for listing jobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Only jobs in this state
    pub state: Option<JobState>,
    /// Only jobs of this type
    pub job_type: Option<JobType>,
}

impl JobFilter {
    /// Match everything
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a state
    #[must_use]
    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    /// Restrict to a job type
    #[must_use]
    pub fn with_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    /// Check a record against the filter
    #[must_use]
    pub fn matches(&self, record: &JobRecord) -> bool {
        self.state.is_none_or(|s| s == record.state)
            && self.job_type.is_none_or(|t| t == record.job_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> JobSpec {
        JobSpec::new(JobType::ResearchRun, json!({"strategy_id": "mr-1", "dataset": "spx"}))
    }

    #[test]
    fn test_job_type_parse() {
        assert_eq!("research-run".parse::<JobType>().unwrap(), JobType::ResearchRun);
        assert_eq!(
            "PORTFOLIO_ADMISSION".parse::<JobType>().unwrap(),
            JobType::PortfolioAdmission
        );
        assert!("nonsense".parse::<JobType>().is_err());
    }

    #[test]
    fn test_job_state_table() {
        assert!(JobState::Queued.can_transition_to(JobState::Running));
        assert!(JobState::Queued.can_transition_to(JobState::Cancelled));
        assert!(JobState::Running.can_transition_to(JobState::Failed));
        assert!(!JobState::Queued.can_transition_to(JobState::Succeeded));
        for terminal in JobState::ALL.iter().filter(|s| s.is_terminal()) {
            for to in JobState::ALL {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_rejected_is_never_a_successor() {
        for from in JobState::ALL {
            assert!(!from.can_transition_to(JobState::Rejected));
        }
    }

    #[test]
    fn test_record_from_passing_submission() {
        let record = JobRecord::from_submission(
            JobId::new(),
            &spec(),
            &PolicyResult::pass(PolicyStage::Preflight),
            Timestamp::from_millis(10),
        );
        assert_eq!(record.state, JobState::Queued);
        assert_eq!(record.revision, 1);
        assert!(record.failure_code.is_none());
        assert_eq!(record.fingerprint, spec().fingerprint());
    }

    #[test]
    fn test_record_from_rejected_submission() {
        let verdict = PolicyResult::reject(
            PolicyStage::Preflight,
            PolicyCode::MissingRequiredField,
            "missing dataset",
        );
        let record =
            JobRecord::from_submission(JobId::new(), &spec(), &verdict, Timestamp::from_millis(10));
        assert_eq!(record.state, JobState::Rejected);
        assert_eq!(
            record.failure_code,
            Some(FailureCode::Policy(PolicyCode::MissingRequiredField))
        );
        assert_eq!(record.policy_stage, Some(PolicyStage::Preflight));
        assert_eq!(record.finished_at, Some(Timestamp::from_millis(10)));
    }

    #[test]
    fn test_apply_running_then_failed() {
        let mut record = JobRecord::from_submission(
            JobId::new(),
            &spec(),
            &PolicyResult::pass(PolicyStage::Preflight),
            Timestamp::from_millis(0),
        );
        let worker = WorkerId::new();
        record.apply(
            JobState::Running,
            TransitionPayload::new()
                .with_worker(worker)
                .with_artifact_dir("/tmp/a"),
            Timestamp::from_millis(5),
        );
        assert_eq!(record.heartbeat_at, Some(Timestamp::from_millis(5)));
        assert_eq!(record.worker_id, Some(worker));

        record.apply(
            JobState::Failed,
            TransitionPayload::new()
                .with_failure(Failure::new(FailureCode::WorkerTimeout, "no heartbeat")),
            Timestamp::from_millis(9),
        );
        assert_eq!(record.revision, 3);
        assert_eq!(record.failure_code, Some(FailureCode::WorkerTimeout));
        assert_eq!(record.policy_stage, None);
        assert_eq!(
            record.audit.last().and_then(|e| e.detail.clone()),
            Some("WORKER_TIMEOUT".to_string())
        );
    }

    #[test]
    fn test_failure_code_strings() {
        assert_eq!(FailureCode::WorkerCrash.as_str(), "WORKER_CRASH");
        assert_eq!(
            FailureCode::Policy(PolicyCode::PathEscape).to_string(),
            "PATH_ESCAPE"
        );
    }

    #[test]
    fn test_filter_matches() {
        let record = JobRecord::from_submission(
            JobId::new(),
            &spec(),
            &PolicyResult::pass(PolicyStage::Preflight),
            Timestamp::from_millis(0),
        );
        assert!(JobFilter::all().matches(&record));
        assert!(JobFilter::all().with_state(JobState::Queued).matches(&record));
        assert!(!JobFilter::all().with_type(JobType::BuildData).matches(&record));
    }
}
