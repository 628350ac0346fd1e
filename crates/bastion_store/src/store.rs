//! Database handle and table layout.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult, storage};
use redb::{Database, ReadTransaction, TableDefinition, WriteTransaction};
use tracing::{info, warn};

/// Job records by id
pub(crate) const JOBS: TableDefinition<u128, &[u8]> = TableDefinition::new("jobs");
/// Creation order index: order key -> job id
pub(crate) const JOB_ORDER: TableDefinition<&[u8], u128> = TableDefinition::new("job_order");
/// State index: state tag ++ order key
pub(crate) const JOB_STATES: TableDefinition<&[u8], ()> = TableDefinition::new("job_states");
/// Dedup index: fingerprint -> newest job id
pub(crate) const FINGERPRINTS: TableDefinition<&[u8], u128> = TableDefinition::new("fingerprints");
/// Strategy records by `id@version`
pub(crate) const STRATEGIES: TableDefinition<&str, &[u8]> = TableDefinition::new("strategies");
/// Portfolio snapshot log by sequence number
pub(crate) const SNAPSHOTS: TableDefinition<u64, &[u8]> = TableDefinition::new("snapshots");

/// Durable store for jobs, strategies and portfolio snapshots
pub struct Store {
    db: Database,
    config: StoreConfig,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("config", &self.config).finish()
    }
}

impl Store {
    /// Open (or create) the database file named by `config`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created, is locked by another
    /// process, or is not a valid database
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| storage(redb::StorageError::Io(e)))?;
        }
        let db = Database::create(&config.path).map_err(storage)?;
        let store = Self { db, config };
        store.create_tables()?;
        info!(path = %store.config.path.display(), "store opened");
        Ok(store)
    }

    /// Open a store held entirely in memory
    ///
    /// # Errors
    ///
    /// Returns error if the in-memory database cannot be initialised
    pub fn in_memory() -> StoreResult<Self> {
        Self::in_memory_with_config(StoreConfig::default())
    }

    /// Open an in-memory store with custom paging settings
    ///
    /// # Errors
    ///
    /// Returns error if the in-memory database cannot be initialised
    pub fn in_memory_with_config(config: StoreConfig) -> StoreResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(storage)?;
        let store = Self { db, config };
        store.create_tables()?;
        Ok(store)
    }

    /// Store configuration
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn create_tables(&self) -> StoreResult<()> {
        self.write(|txn| {
            txn.open_table(JOBS).map_err(storage)?;
            txn.open_table(JOB_ORDER).map_err(storage)?;
            txn.open_table(JOB_STATES).map_err(storage)?;
            txn.open_table(FINGERPRINTS).map_err(storage)?;
            txn.open_table(STRATEGIES).map_err(storage)?;
            txn.open_table(SNAPSHOTS).map_err(storage)?;
            Ok(())
        })
    }

    /// Run `f` inside a write transaction; commit on `Ok`, abort on `Err`
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let txn = self.db.begin_write().map_err(storage)?;
        match f(&txn) {
            Ok(out) => {
                txn.commit().map_err(storage)?;
                Ok(out)
            }
            Err(err) => {
                if let Err(abort) = txn.abort() {
                    warn!(error = %abort, "failed to abort write transaction");
                }
                Err(err)
            }
        }
    }

    /// Begin a read transaction
    pub(crate) fn read(&self) -> StoreResult<ReadTransaction> {
        self.db.begin_read().map_err(storage)
    }
}

/// Decode a JSON-encoded record
pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(StoreError::from)
}

/// Encode a record as JSON
pub(crate) fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(StoreError::from)
}
