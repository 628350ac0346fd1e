//! Governed strategy records.
//!
//! Records are keyed by `id@version` and updated by revision
//! compare-and-set. The store refuses writes that would break the
//! lifecycle rules no matter who asks: a state change off the lifecycle
//! table, a parameters change once frozen, or any state change after
//! RETIRED.

use crate::error::{StoreError, StoreResult, storage};
use crate::store::{STRATEGIES, Store, decode, encode};
use bastion_core::{LifecycleState, StrategyKey, StrategyRecord};
use redb::{ReadableTable, Table};
use tracing::{debug, info};

fn load_strategy<T>(table: &T, key: &StrategyKey) -> StoreResult<Option<StrategyRecord>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key.storage_key().as_str()).map_err(storage)? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn put_strategy(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    record: &StrategyRecord,
) -> StoreResult<()> {
    let bytes = encode(record)?;
    table
        .insert(record.key.storage_key().as_str(), bytes.as_slice())
        .map_err(storage)?;
    Ok(())
}

fn check_update(current: &StrategyRecord, next: &StrategyRecord) -> StoreResult<()> {
    if next.key != current.key {
        return Err(StoreError::InvalidRecord {
            reason: format!("key changed from {} to {}", current.key, next.key),
        });
    }
    if current.state.params_frozen() && next.params_hash != current.params_hash {
        return Err(StoreError::ImmutableField {
            key: current.key.clone(),
            field: "params_hash",
        });
    }
    if current.state == LifecycleState::Retired && next.state != LifecycleState::Retired {
        return Err(StoreError::ImmutableField {
            key: current.key.clone(),
            field: "state",
        });
    }
    if next.state != current.state && !current.state.can_transition_to(next.state) {
        return Err(StoreError::InvalidRecord {
            reason: format!(
                "{}: {} -> {} is not a lifecycle edge",
                current.key, current.state, next.state
            ),
        });
    }
    Ok(())
}

impl Store {
    /// Register a new strategy in INCUBATION
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StrategyExists`] if the identity is taken and
    /// [`StoreError::InvalidRecord`] if the record is not in INCUBATION
    pub fn register_strategy(&self, record: &StrategyRecord) -> StoreResult<StrategyRecord> {
        if record.state != LifecycleState::Incubation {
            return Err(StoreError::InvalidRecord {
                reason: format!("{} must be registered in INCUBATION", record.key),
            });
        }
        let stored = self.write(|txn| {
            let mut table = txn.open_table(STRATEGIES).map_err(storage)?;
            if load_strategy(&table, &record.key)?.is_some() {
                return Err(StoreError::StrategyExists(record.key.clone()));
            }
            let mut stored = record.clone();
            stored.revision = 1;
            put_strategy(&mut table, &stored)?;
            Ok(stored)
        })?;
        info!(strategy = %stored.key, bucket = %stored.regime_bucket, "strategy registered");
        Ok(stored)
    }

    /// Fetch a strategy
    ///
    /// # Errors
    ///
    /// Returns error if the database is unavailable
    pub fn strategy(&self, key: &StrategyKey) -> StoreResult<Option<StrategyRecord>> {
        let txn = self.read()?;
        let table = txn.open_table(STRATEGIES).map_err(storage)?;
        load_strategy(&table, key)
    }

    /// Fetch a strategy that must exist
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StrategyNotFound`] if it does not
    pub fn require_strategy(&self, key: &StrategyKey) -> StoreResult<StrategyRecord> {
        self.strategy(key)?
            .ok_or_else(|| StoreError::StrategyNotFound(key.clone()))
    }

    /// Every strategy, ordered by `id@version`
    ///
    /// # Errors
    ///
    /// Returns error if the database is unavailable
    pub fn strategies(&self) -> StoreResult<Vec<StrategyRecord>> {
        let txn = self.read()?;
        let table = txn.open_table(STRATEGIES).map_err(storage)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(storage)? {
            let (_, value) = entry.map_err(storage)?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }

    /// Replace a strategy record if its revision is still
    /// `expected_revision`. The stored revision becomes
    /// `expected_revision + 1`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::RevisionConflict`] if another writer got there first
    /// - [`StoreError::ImmutableField`] / [`StoreError::InvalidRecord`] if
    ///   the update breaks the lifecycle rules
    pub fn compare_and_set_strategy(
        &self,
        expected_revision: u64,
        record: &StrategyRecord,
    ) -> StoreResult<StrategyRecord> {
        let mut stored = self.compare_and_set_strategies(&[(expected_revision, record)])?;
        stored.pop().ok_or_else(|| StoreError::InvalidRecord {
            reason: "empty update".to_string(),
        })
    }

    /// Compare-and-set several strategy records in one transaction.
    ///
    /// Either every record is written or none is.
    ///
    /// # Errors
    ///
    /// As [`Store::compare_and_set_strategy`], for the first record that
    /// fails
    pub fn compare_and_set_strategies(
        &self,
        updates: &[(u64, &StrategyRecord)],
    ) -> StoreResult<Vec<StrategyRecord>> {
        let stored = self.write(|txn| {
            let mut table = txn.open_table(STRATEGIES).map_err(storage)?;
            let mut stored = Vec::with_capacity(updates.len());
            for (expected_revision, record) in updates {
                let current = load_strategy(&table, &record.key)?
                    .ok_or_else(|| StoreError::StrategyNotFound(record.key.clone()))?;
                if current.revision != *expected_revision {
                    return Err(StoreError::RevisionConflict {
                        key: record.key.clone(),
                        expected: *expected_revision,
                        actual: current.revision,
                    });
                }
                check_update(&current, record)?;
                let mut next = (*record).clone();
                next.revision = expected_revision + 1;
                put_strategy(&mut table, &next)?;
                stored.push(next);
            }
            Ok(stored)
        })?;
        for record in &stored {
            debug!(strategy = %record.key, state = %record.state, revision = record.revision, "strategy updated");
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::{Timestamp, Transition};

    fn record(id: &str) -> StrategyRecord {
        StrategyRecord::new(
            StrategyKey::new(id, "v1").unwrap(),
            "params-1",
            "trend",
            Timestamp::from_millis(1),
        )
    }

    #[test]
    fn test_register_and_get() {
        let store = Store::in_memory().unwrap();
        let stored = store.register_strategy(&record("a")).unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(store.require_strategy(&stored.key).unwrap(), stored);
        assert!(matches!(
            store.register_strategy(&record("a")),
            Err(StoreError::StrategyExists(_))
        ));
    }

    #[test]
    fn test_register_requires_incubation() {
        let store = Store::in_memory().unwrap();
        let mut candidate = record("a");
        candidate.record_transition(Transition::Graduate, "t", Timestamp::from_millis(2));
        assert!(matches!(
            store.register_strategy(&candidate),
            Err(StoreError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_compare_and_set_revision() {
        let store = Store::in_memory().unwrap();
        let stored = store.register_strategy(&record("a")).unwrap();
        let mut next = stored.clone();
        next.record_transition(Transition::Graduate, "validated", Timestamp::from_millis(2));
        let updated = store.compare_and_set_strategy(1, &next).unwrap();
        assert_eq!(updated.revision, 2);

        let err = store.compare_and_set_strategy(1, &next).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_params_frozen_after_incubation() {
        let store = Store::in_memory().unwrap();
        let stored = store.register_strategy(&record("a")).unwrap();

        let mut edited = stored.clone();
        edited.params_hash = "params-2".to_string();
        let stored = store.compare_and_set_strategy(1, &edited).unwrap();

        let mut next = stored.clone();
        next.record_transition(Transition::Graduate, "validated", Timestamp::from_millis(2));
        let stored = store.compare_and_set_strategy(2, &next).unwrap();

        let mut edited = stored.clone();
        edited.params_hash = "params-3".to_string();
        assert!(matches!(
            store.compare_and_set_strategy(3, &edited),
            Err(StoreError::ImmutableField { field: "params_hash", .. })
        ));
    }

    #[test]
    fn test_retired_is_permanent() {
        let store = Store::in_memory().unwrap();
        let stored = store.register_strategy(&record("a")).unwrap();
        let mut retired = stored.clone();
        retired.record_transition(Transition::Retire, "structural", Timestamp::from_millis(2));
        let retired = store.compare_and_set_strategy(1, &retired).unwrap();

        let mut revived = retired.clone();
        revived.state = LifecycleState::Live;
        assert!(matches!(
            store.compare_and_set_strategy(2, &revived),
            Err(StoreError::ImmutableField { field: "state", .. })
        ));
    }

    #[test]
    fn test_off_table_state_change_refused() {
        let store = Store::in_memory().unwrap();
        let stored = store.register_strategy(&record("a")).unwrap();
        let mut jumped = stored.clone();
        jumped.state = LifecycleState::Live;
        assert!(matches!(
            store.compare_and_set_strategy(1, &jumped),
            Err(StoreError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_batch_is_atomic() {
        let store = Store::in_memory().unwrap();
        let a = store.register_strategy(&record("a")).unwrap();
        let b = store.register_strategy(&record("b")).unwrap();

        let mut next_a = a.clone();
        next_a.record_transition(Transition::Graduate, "validated", Timestamp::from_millis(2));
        let mut next_b = b.clone();
        next_b.record_transition(Transition::Graduate, "validated", Timestamp::from_millis(2));

        // stale revision on the second record aborts the whole batch
        let err = store
            .compare_and_set_strategies(&[(1, &next_a), (7, &next_b)])
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.require_strategy(&a.key).unwrap().state, LifecycleState::Incubation);

        let stored = store
            .compare_and_set_strategies(&[(1, &next_a), (1, &next_b)])
            .unwrap();
        assert!(stored.iter().all(|r| r.revision == 2 && r.state == LifecycleState::Candidate));
    }

    #[test]
    fn test_list_sorted() {
        let store = Store::in_memory().unwrap();
        store.register_strategy(&record("b")).unwrap();
        store.register_strategy(&record("a")).unwrap();
        let ids: Vec<String> = store
            .strategies()
            .unwrap()
            .into_iter()
            .map(|r| r.key.strategy_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
