//! Job Store operations.
//!
//! Every state change is a compare-and-swap against the caller's expected
//! prior states inside a single write transaction. A stale writer gets
//! [`StoreError::Conflict`] and must re-read.

use crate::error::{StoreError, StoreResult, storage};
use crate::keys::{Cursor, id_from_order_key, order_key, state_key, state_tag};
use crate::store::{FINGERPRINTS, JOB_ORDER, JOB_STATES, JOBS, Store, decode, encode};
use bastion_core::{
    AuditEntry, Fingerprint, JobFilter, JobId, JobRecord, JobSpec, JobState, PolicyResult,
    Timestamp, TransitionPayload,
};
use redb::{ReadableTable, Table, WriteTransaction};
use std::ops::Bound;
use tracing::{debug, info};

/// Result of a submission
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// The stored record (new, or the existing duplicate)
    pub record: JobRecord,
    /// True if an existing job with the same fingerprint was returned
    pub deduplicated: bool,
}

impl Submission {
    /// Job id
    #[must_use]
    pub fn id(&self) -> JobId {
        self.record.id
    }
}

/// One page request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Page size; the store default when `None`
    pub limit: Option<usize>,
    /// Continue after this position
    pub cursor: Option<Cursor>,
}

impl PageRequest {
    /// First page of at most `limit` records
    #[must_use]
    pub fn first(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            cursor: None,
        }
    }

    /// Continue after `cursor`
    #[must_use]
    pub fn after(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

/// One page of jobs
#[derive(Debug, Clone, PartialEq)]
pub struct JobPage {
    /// Jobs in creation order
    pub jobs: Vec<JobRecord>,
    /// Position to continue from, if more matching jobs exist
    pub next_cursor: Option<Cursor>,
}

fn load_job<T>(table: &T, id: JobId) -> StoreResult<Option<JobRecord>>
where
    T: ReadableTable<u128, &'static [u8]>,
{
    match table.get(id.as_u128()).map_err(storage)? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn put_job(table: &mut Table<'_, u128, &'static [u8]>, record: &JobRecord) -> StoreResult<()> {
    let bytes = encode(record)?;
    table
        .insert(record.id.as_u128(), bytes.as_slice())
        .map_err(storage)?;
    Ok(())
}

fn move_state_index(txn: &WriteTransaction, record: &JobRecord, previous: JobState) -> StoreResult<()> {
    let order = order_key(record);
    let mut index = txn.open_table(JOB_STATES).map_err(storage)?;
    index
        .remove(state_key(previous, &order).as_slice())
        .map_err(storage)?;
    index
        .insert(state_key(record.state, &order).as_slice(), ())
        .map_err(storage)?;
    Ok(())
}

/// Load a job inside a write transaction, apply `f`, write it back
fn update_job(
    txn: &WriteTransaction,
    id: JobId,
    f: impl FnOnce(&mut JobRecord) -> StoreResult<()>,
) -> StoreResult<JobRecord> {
    let mut jobs = txn.open_table(JOBS).map_err(storage)?;
    let mut record = load_job(&jobs, id)?.ok_or(StoreError::JobNotFound(id))?;
    f(&mut record)?;
    put_job(&mut jobs, &record)?;
    Ok(record)
}

impl Store {
    /// Insert a submission that has been through preflight, or return the
    /// existing job with the same fingerprint.
    ///
    /// A job is a dedup target while it is non-terminal or SUCCEEDED.
    /// REJECTED, FAILED and CANCELLED jobs leave room for a fresh attempt.
    /// The lookup and the insert share one write transaction, so concurrent
    /// identical submissions create exactly one row.
    ///
    /// # Errors
    ///
    /// Returns error if the database is unavailable
    pub fn submit(
        &self,
        spec: &JobSpec,
        preflight: &PolicyResult,
        now: Timestamp,
    ) -> StoreResult<Submission> {
        let fingerprint = spec.fingerprint();
        let submission = self.write(|txn| {
            let mut jobs = txn.open_table(JOBS).map_err(storage)?;
            let mut fingerprints = txn.open_table(FINGERPRINTS).map_err(storage)?;

            let existing_id = fingerprints
                .get(fingerprint.as_bytes().as_slice())
                .map_err(storage)?
                .map(|guard| JobId::from_u128(guard.value()));
            if let Some(existing_id) = existing_id {
                if let Some(existing) = load_job(&jobs, existing_id)? {
                    if !existing.is_terminal() || existing.state == JobState::Succeeded {
                        return Ok(Submission {
                            record: existing,
                            deduplicated: true,
                        });
                    }
                }
            }

            let record = JobRecord::from_submission(JobId::new(), spec, preflight, now);
            let order = order_key(&record);
            put_job(&mut jobs, &record)?;
            txn.open_table(JOB_ORDER)
                .map_err(storage)?
                .insert(order.as_slice(), record.id.as_u128())
                .map_err(storage)?;
            txn.open_table(JOB_STATES)
                .map_err(storage)?
                .insert(state_key(record.state, &order).as_slice(), ())
                .map_err(storage)?;
            fingerprints
                .insert(fingerprint.as_bytes().as_slice(), record.id.as_u128())
                .map_err(storage)?;
            Ok(Submission {
                record,
                deduplicated: false,
            })
        })?;

        if submission.deduplicated {
            debug!(job_id = %submission.id(), %fingerprint, "duplicate submission");
        } else {
            info!(
                job_id = %submission.id(),
                job_type = %spec.job_type,
                state = %submission.record.state,
                "job submitted"
            );
        }
        Ok(submission)
    }

    /// Newest job carrying `fingerprint`
    ///
    /// # Errors
    ///
    /// Returns error if the database is unavailable
    pub fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> StoreResult<Option<JobRecord>> {
        let txn = self.read()?;
        let fingerprints = txn.open_table(FINGERPRINTS).map_err(storage)?;
        let Some(id) = fingerprints
            .get(fingerprint.as_bytes().as_slice())
            .map_err(storage)?
            .map(|guard| JobId::from_u128(guard.value()))
        else {
            return Ok(None);
        };
        let jobs = txn.open_table(JOBS).map_err(storage)?;
        load_job(&jobs, id)
    }

    /// Compare-and-swap state transition.
    ///
    /// Succeeds only if the job's current state is one of `from` and the
    /// job state table allows `current -> to`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Conflict`] if the current state is not in `from`
    /// - [`StoreError::IllegalTransition`] if the table forbids the edge
    /// - [`StoreError::JobNotFound`] if the job does not exist
    pub fn transition(
        &self,
        id: JobId,
        from: &[JobState],
        to: JobState,
        payload: TransitionPayload,
        now: Timestamp,
    ) -> StoreResult<JobRecord> {
        let (record, previous) = self.write(|txn| {
            let mut previous = None;
            let record = update_job(txn, id, |record| {
                if !from.contains(&record.state) {
                    return Err(StoreError::Conflict {
                        id,
                        expected: from.to_vec(),
                        actual: record.state,
                    });
                }
                if !record.state.can_transition_to(to) {
                    return Err(StoreError::IllegalTransition {
                        id,
                        from: record.state,
                        to,
                    });
                }
                previous = Some(record.state);
                record.apply(to, payload, now);
                Ok(())
            })?;
            let previous = previous.unwrap_or(record.state);
            move_state_index(txn, &record, previous)?;
            Ok((record, previous))
        })?;

        info!(
            job_id = %id,
            from = %previous,
            to = %to,
            revision = record.revision,
            failure_code = record.failure_code.map(|c| c.as_str()),
            "job transition"
        );
        Ok(record)
    }

    /// Record a worker heartbeat. Heartbeats never move `heartbeat_at`
    /// backwards.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotRunning`] unless the job is RUNNING
    pub fn heartbeat(&self, id: JobId, at: Timestamp) -> StoreResult<JobRecord> {
        self.write(|txn| {
            update_job(txn, id, |record| {
                if record.state != JobState::Running {
                    return Err(StoreError::NotRunning {
                        id,
                        state: record.state,
                    });
                }
                let latest = record.heartbeat_at.map_or(at, |prev| prev.max(at));
                record.heartbeat_at = Some(latest);
                record.updated_at = record.updated_at.max(at);
                record.revision += 1;
                Ok(())
            })
        })
    }

    /// Note that cancellation was requested. Terminal jobs are returned
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns error if the job does not exist
    pub fn mark_cancel_requested(&self, id: JobId, now: Timestamp) -> StoreResult<JobRecord> {
        self.write(|txn| {
            update_job(txn, id, |record| {
                if !record.is_terminal() && record.cancel_requested_at.is_none() {
                    record.cancel_requested_at = Some(now);
                    record.updated_at = now;
                    record.push_audit(AuditEntry::new(now, "cancel requested"));
                }
                Ok(())
            })
        })
    }

    /// Append audit metadata; allowed on terminal jobs
    ///
    /// # Errors
    ///
    /// Returns error if the job does not exist
    pub fn append_audit(&self, id: JobId, entry: AuditEntry) -> StoreResult<JobRecord> {
        self.write(|txn| {
            update_job(txn, id, |record| {
                record.push_audit(entry);
                Ok(())
            })
        })
    }

    /// Fetch one job
    ///
    /// # Errors
    ///
    /// Returns error if the database is unavailable
    pub fn get(&self, id: JobId) -> StoreResult<Option<JobRecord>> {
        let txn = self.read()?;
        let jobs = txn.open_table(JOBS).map_err(storage)?;
        load_job(&jobs, id)
    }

    /// Fetch one job that must exist
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] if it does not
    pub fn require(&self, id: JobId) -> StoreResult<JobRecord> {
        self.get(id)?.ok_or(StoreError::JobNotFound(id))
    }

    /// List jobs in creation order, tie-broken by id
    ///
    /// # Errors
    ///
    /// Returns error if the database is unavailable
    pub fn list(&self, filter: &JobFilter, page: &PageRequest) -> StoreResult<JobPage> {
        let limit = self.config().page_size(page.limit);
        let txn = self.read()?;
        let jobs = txn.open_table(JOBS).map_err(storage)?;
        let mut collector = PageCollector::new(filter, limit);

        if let Some(state) = filter.state {
            let index = txn.open_table(JOB_STATES).map_err(storage)?;
            let lower = match page.cursor {
                Some(cursor) => state_key(state, cursor.order_key()).to_vec(),
                None => vec![state_tag(state)],
            };
            let upper = [state_tag(state) + 1];
            let lower_bound = if page.cursor.is_some() {
                Bound::Excluded(lower.as_slice())
            } else {
                Bound::Included(lower.as_slice())
            };
            let range = index
                .range::<&[u8]>((lower_bound, Bound::Excluded(upper.as_slice())))
                .map_err(storage)?;
            for entry in range {
                let (key, _) = entry.map_err(storage)?;
                let Some(id) = key.value().get(1..).and_then(id_from_order_key) else {
                    continue;
                };
                if collector.offer(load_job(&jobs, id)?) {
                    break;
                }
            }
        } else {
            let order = txn.open_table(JOB_ORDER).map_err(storage)?;
            let lower_bound = match &page.cursor {
                Some(cursor) => Bound::Excluded(cursor.order_key().as_slice()),
                None => Bound::Unbounded,
            };
            let range = order
                .range::<&[u8]>((lower_bound, Bound::Unbounded))
                .map_err(storage)?;
            for entry in range {
                let (_, id) = entry.map_err(storage)?;
                if collector.offer(load_job(&jobs, JobId::from_u128(id.value()))?) {
                    break;
                }
            }
        }
        Ok(collector.finish())
    }

    /// Every job in `state`, in creation order
    ///
    /// # Errors
    ///
    /// Returns error if the database is unavailable
    pub fn jobs_in_state(&self, state: JobState) -> StoreResult<Vec<JobRecord>> {
        let mut out = Vec::new();
        let mut page = PageRequest::first(self.config().max_page_size);
        loop {
            let batch = self.list(&JobFilter::all().with_state(state), &page)?;
            out.extend(batch.jobs);
            match batch.next_cursor {
                Some(cursor) => page = page.after(cursor),
                None => return Ok(out),
            }
        }
    }
}

struct PageCollector<'a> {
    filter: &'a JobFilter,
    limit: usize,
    jobs: Vec<JobRecord>,
    more: bool,
}

impl<'a> PageCollector<'a> {
    fn new(filter: &'a JobFilter, limit: usize) -> Self {
        Self {
            filter,
            limit,
            jobs: Vec::with_capacity(limit.min(256)),
            more: false,
        }
    }

    /// Offer a record; returns true once the page is full and another
    /// match has been seen
    fn offer(&mut self, record: Option<JobRecord>) -> bool {
        let Some(record) = record.filter(|r| self.filter.matches(r)) else {
            return false;
        };
        if self.jobs.len() == self.limit {
            self.more = true;
            return true;
        }
        self.jobs.push(record);
        false
    }

    fn finish(self) -> JobPage {
        let next_cursor = if self.more {
            self.jobs.last().map(Cursor::after)
        } else {
            None
        };
        JobPage {
            jobs: self.jobs,
            next_cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::{Failure, FailureCode, JobType, PolicyCode, PolicyStage, WorkerId};
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Arc;

    fn pass() -> PolicyResult {
        PolicyResult::pass(PolicyStage::Preflight)
    }

    fn spec(n: u64) -> JobSpec {
        JobSpec::new(JobType::ResearchRun, json!({"strategy_id": "s", "dataset": "d", "n": n}))
    }

    fn submit(store: &Store, n: u64, at: u64) -> JobRecord {
        store
            .submit(&spec(n), &pass(), Timestamp::from_millis(at))
            .unwrap()
            .record
    }

    fn run(store: &Store, id: JobId) -> JobRecord {
        store
            .transition(
                id,
                &[JobState::Queued],
                JobState::Running,
                TransitionPayload::new().with_worker(WorkerId::new()),
                Timestamp::from_millis(100),
            )
            .unwrap()
    }

    #[test]
    fn test_submit_is_idempotent() {
        let store = Store::in_memory().unwrap();
        let first = store.submit(&spec(1), &pass(), Timestamp::from_millis(1)).unwrap();
        let second = store.submit(&spec(1), &pass(), Timestamp::from_millis(2)).unwrap();
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.id(), second.id());
        assert_eq!(store.jobs_in_state(JobState::Queued).unwrap().len(), 1);
    }

    #[test]
    fn test_dedup_ignores_param_key_order() {
        let store = Store::in_memory().unwrap();
        let a = JobSpec::new(JobType::BuildData, json!({"dataset": "spx", "from": 2010}));
        let b = JobSpec::new(JobType::BuildData, json!({"from": 2010, "dataset": "spx"}));
        let first = store.submit(&a, &pass(), Timestamp::from_millis(1)).unwrap();
        let second = store.submit(&b, &pass(), Timestamp::from_millis(1)).unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn test_succeeded_job_is_dedup_target() {
        let store = Store::in_memory().unwrap();
        let job = submit(&store, 1, 1);
        run(&store, job.id);
        store
            .transition(
                job.id,
                &[JobState::Running],
                JobState::Succeeded,
                TransitionPayload::new(),
                Timestamp::from_millis(200),
            )
            .unwrap();
        let again = store.submit(&spec(1), &pass(), Timestamp::from_millis(300)).unwrap();
        assert!(again.deduplicated);
        assert_eq!(again.id(), job.id);
    }

    #[test]
    fn test_failed_job_allows_resubmission() {
        let store = Store::in_memory().unwrap();
        let job = submit(&store, 1, 1);
        run(&store, job.id);
        store
            .transition(
                job.id,
                &[JobState::Running],
                JobState::Failed,
                TransitionPayload::new()
                    .with_failure(Failure::new(FailureCode::WorkerCrash, "exit 137")),
                Timestamp::from_millis(200),
            )
            .unwrap();
        let again = store.submit(&spec(1), &pass(), Timestamp::from_millis(300)).unwrap();
        assert!(!again.deduplicated);
        assert_ne!(again.id(), job.id);
        assert_eq!(
            store.find_by_fingerprint(&spec(1).fingerprint()).unwrap().map(|r| r.id),
            Some(again.id())
        );
    }

    #[test]
    fn test_rejected_submission_is_recorded() {
        let store = Store::in_memory().unwrap();
        let verdict = PolicyResult::reject(
            PolicyStage::Preflight,
            PolicyCode::ThresholdExceeded,
            "memory_mb 9000 exceeds 6000",
        );
        let submission = store.submit(&spec(9), &verdict, Timestamp::from_millis(1)).unwrap();
        let record = store.require(submission.id()).unwrap();
        assert_eq!(record.state, JobState::Rejected);
        assert_eq!(record.policy_stage, Some(PolicyStage::Preflight));
        assert_eq!(
            record.failure_code,
            Some(FailureCode::Policy(PolicyCode::ThresholdExceeded))
        );
    }

    #[test]
    fn test_transition_conflict_on_stale_state() {
        let store = Store::in_memory().unwrap();
        let job = submit(&store, 1, 1);
        let err = store
            .transition(
                job.id,
                &[JobState::Running],
                JobState::Succeeded,
                TransitionPayload::new(),
                Timestamp::from_millis(2),
            )
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_terminal_state_is_immutable() {
        let store = Store::in_memory().unwrap();
        let job = submit(&store, 1, 1);
        store
            .transition(
                job.id,
                &[JobState::Queued],
                JobState::Cancelled,
                TransitionPayload::new(),
                Timestamp::from_millis(2),
            )
            .unwrap();
        let err = store
            .transition(
                job.id,
                &[JobState::Cancelled],
                JobState::Running,
                TransitionPayload::new(),
                Timestamp::from_millis(3),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
        assert_eq!(store.require(job.id).unwrap().state, JobState::Cancelled);
    }

    #[test]
    fn test_audit_allowed_on_terminal_job() {
        let store = Store::in_memory().unwrap();
        let job = submit(&store, 1, 1);
        store
            .transition(
                job.id,
                &[JobState::Queued],
                JobState::Cancelled,
                TransitionPayload::new(),
                Timestamp::from_millis(2),
            )
            .unwrap();
        let record = store
            .append_audit(job.id, AuditEntry::new(Timestamp::from_millis(3), "reviewed"))
            .unwrap();
        assert_eq!(record.state, JobState::Cancelled);
        assert_eq!(record.audit.last().map(|e| e.event.as_str()), Some("reviewed"));
    }

    #[test]
    fn test_heartbeat_requires_running() {
        let store = Store::in_memory().unwrap();
        let job = submit(&store, 1, 1);
        assert!(matches!(
            store.heartbeat(job.id, Timestamp::from_millis(5)),
            Err(StoreError::NotRunning { .. })
        ));
        run(&store, job.id);
        let record = store.heartbeat(job.id, Timestamp::from_millis(500)).unwrap();
        assert_eq!(record.heartbeat_at, Some(Timestamp::from_millis(500)));
        let record = store.heartbeat(job.id, Timestamp::from_millis(400)).unwrap();
        assert_eq!(record.heartbeat_at, Some(Timestamp::from_millis(500)));
    }

    #[test]
    fn test_list_pages_in_creation_order() {
        let store = Store::in_memory().unwrap();
        let ids: Vec<JobId> = (0..7).map(|n| submit(&store, n, 10 + n).id).collect();

        let mut seen = Vec::new();
        let mut page = PageRequest::first(3);
        loop {
            let batch = store.list(&JobFilter::all(), &page).unwrap();
            assert!(batch.jobs.len() <= 3);
            seen.extend(batch.jobs.iter().map(|j| j.id));
            match batch.next_cursor {
                Some(cursor) => page = page.after(cursor),
                None => break,
            }
        }
        assert_eq!(seen, ids);
    }

    #[test]
    fn test_list_by_state_uses_index() {
        let store = Store::in_memory().unwrap();
        let a = submit(&store, 1, 1);
        let b = submit(&store, 2, 2);
        let c = submit(&store, 3, 3);
        run(&store, b.id);

        let queued = store.jobs_in_state(JobState::Queued).unwrap();
        assert_eq!(queued.iter().map(|j| j.id).collect::<Vec<_>>(), vec![a.id, c.id]);
        let running = store
            .list(&JobFilter::all().with_state(JobState::Running), &PageRequest::default())
            .unwrap();
        assert_eq!(running.jobs.len(), 1);
        assert_eq!(running.jobs[0].id, b.id);
        assert!(running.next_cursor.is_none());
    }

    #[test]
    fn test_list_by_state_pages_with_cursor() {
        let store = Store::in_memory().unwrap();
        let ids: Vec<JobId> = (0..5).map(|n| submit(&store, n, 10 + n).id).collect();
        run(&store, ids[2]);

        let filter = JobFilter::all().with_state(JobState::Queued);
        let first = store.list(&filter, &PageRequest::first(2)).unwrap();
        assert_eq!(first.jobs.iter().map(|j| j.id).collect::<Vec<_>>(), vec![ids[0], ids[1]]);
        let cursor = first.next_cursor.unwrap();
        let second = store.list(&filter, &PageRequest::first(2).after(cursor)).unwrap();
        assert_eq!(second.jobs.iter().map(|j| j.id).collect::<Vec<_>>(), vec![ids[3], ids[4]]);
        assert!(second.next_cursor.is_none());
    }

    #[test]
    fn test_list_by_type() {
        let store = Store::in_memory().unwrap();
        submit(&store, 1, 1);
        store
            .submit(
                &JobSpec::new(JobType::BuildData, json!({"dataset": "x"})),
                &pass(),
                Timestamp::from_millis(2),
            )
            .unwrap();
        let page = store
            .list(&JobFilter::all().with_type(JobType::BuildData), &PageRequest::default())
            .unwrap();
        assert_eq!(page.jobs.len(), 1);
    }

    #[test]
    fn test_concurrent_identical_submissions_create_one_row() {
        let store = Arc::new(Store::in_memory().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .submit(&spec(42), &pass(), Timestamp::from_millis(1))
                        .unwrap()
                        .id()
                })
            })
            .collect();
        let ids: Vec<JobId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.jobs_in_state(JobState::Queued).unwrap().len(), 1);
    }

    #[test]
    fn test_cancel_request_marks_once() {
        let store = Store::in_memory().unwrap();
        let job = submit(&store, 1, 1);
        run(&store, job.id);
        let first = store.mark_cancel_requested(job.id, Timestamp::from_millis(5)).unwrap();
        let second = store.mark_cancel_requested(job.id, Timestamp::from_millis(9)).unwrap();
        assert_eq!(first.cancel_requested_at, Some(Timestamp::from_millis(5)));
        assert_eq!(second.cancel_requested_at, Some(Timestamp::from_millis(5)));
    }

    fn state_strategy() -> impl Strategy<Value = JobState> {
        proptest::sample::select(JobState::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_no_transition_leaves_a_terminal_state(
            steps in proptest::collection::vec((state_strategy(), state_strategy()), 1..12)
        ) {
            let store = Store::in_memory().unwrap();
            let job = submit(&store, 1, 1);
            let mut terminal: Option<JobState> = None;
            for (i, (from, to)) in steps.into_iter().enumerate() {
                let result = store.transition(
                    job.id,
                    &[from],
                    to,
                    TransitionPayload::new(),
                    Timestamp::from_millis(10 + i as u64),
                );
                if let Some(state) = terminal {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(store.require(job.id).unwrap().state, state);
                } else if let Ok(record) = result {
                    if record.is_terminal() {
                        terminal = Some(record.state);
                    }
                }
            }
        }
    }
}
