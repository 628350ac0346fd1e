//! Append-only portfolio snapshot log.

use crate::error::{StoreResult, storage};
use crate::store::{SNAPSHOTS, Store, decode, encode};
use bastion_core::PortfolioSnapshot;
use redb::{ReadableTable, ReadableTableMetadata};
use tracing::{info, warn};

impl Store {
    /// Append a snapshot, assigning the next sequence number.
    ///
    /// The sequence number orders the log. A timestamp older than the latest
    /// snapshot's (wall clock stepped back) is raised to it, so `taken_at`
    /// never decreases along the log.
    ///
    /// # Errors
    ///
    /// Returns error if the database is unavailable
    pub fn append_snapshot(&self, snapshot: &PortfolioSnapshot) -> StoreResult<PortfolioSnapshot> {
        let stored = self.write(|txn| {
            let mut table = txn.open_table(SNAPSHOTS).map_err(storage)?;
            let last: Option<PortfolioSnapshot> = match table.last().map_err(storage)? {
                Some((_, value)) => Some(decode(value.value())?),
                None => None,
            };
            let mut stored = snapshot.clone();
            stored.seq = last.as_ref().map_or(1, |previous| previous.seq + 1);
            if let Some(previous) = last.as_ref().filter(|p| p.taken_at > snapshot.taken_at) {
                warn!(
                    previous = %previous.taken_at,
                    clock = %snapshot.taken_at,
                    "clock behind latest snapshot, keeping its timestamp"
                );
                stored.taken_at = previous.taken_at;
            }
            let bytes = encode(&stored)?;
            table.insert(stored.seq, bytes.as_slice()).map_err(storage)?;
            Ok(stored)
        })?;
        info!(
            seq = stored.seq,
            snapshot_id = %stored.id,
            members = stored.members.len(),
            risk_used = stored.risk_used,
            "portfolio snapshot appended"
        );
        Ok(stored)
    }

    /// Most recent snapshot
    ///
    /// # Errors
    ///
    /// Returns error if the database is unavailable
    pub fn latest_snapshot(&self) -> StoreResult<Option<PortfolioSnapshot>> {
        let txn = self.read()?;
        let table = txn.open_table(SNAPSHOTS).map_err(storage)?;
        match table.last().map_err(storage)? {
            Some((_, value)) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// Up to `limit` snapshots starting at `from_seq`
    ///
    /// # Errors
    ///
    /// Returns error if the database is unavailable
    pub fn snapshots(&self, from_seq: u64, limit: usize) -> StoreResult<Vec<PortfolioSnapshot>> {
        let txn = self.read()?;
        let table = txn.open_table(SNAPSHOTS).map_err(storage)?;
        let mut out = Vec::new();
        for entry in table.range(from_seq..).map_err(storage)?.take(limit) {
            let (_, value) = entry.map_err(storage)?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }

    /// Number of snapshots
    ///
    /// # Errors
    ///
    /// Returns error if the database is unavailable
    pub fn snapshot_count(&self) -> StoreResult<u64> {
        let txn = self.read()?;
        let table = txn.open_table(SNAPSHOTS).map_err(storage)?;
        table.len().map_err(storage)
    }
}
