//! Ordered index keys and list cursors.
//!
//! Jobs are listed by creation time, tie-broken by id. The order key is the
//! big-endian creation time followed by the id bytes, so byte order equals
//! list order.

use crate::error::{StoreError, StoreResult};
use bastion_core::{JobId, JobRecord, JobState};

/// Length of a job order key
pub const ORDER_KEY_LEN: usize = 8 + 16;

/// Order key for a job
#[must_use]
pub fn order_key(record: &JobRecord) -> [u8; ORDER_KEY_LEN] {
    let mut key = [0u8; ORDER_KEY_LEN];
    key[..8].copy_from_slice(&record.created_at.as_millis().to_be_bytes());
    key[8..].copy_from_slice(record.id.as_bytes());
    key
}

/// Job id stored in an order key
#[must_use]
pub fn id_from_order_key(key: &[u8]) -> Option<JobId> {
    let bytes: [u8; 16] = key.get(8..ORDER_KEY_LEN)?.try_into().ok()?;
    Some(JobId::from_bytes(bytes))
}

/// One-byte tag for a job state in the state index
#[must_use]
pub const fn state_tag(state: JobState) -> u8 {
    match state {
        JobState::Queued => 0,
        JobState::Running => 1,
        JobState::Succeeded => 2,
        JobState::Failed => 3,
        JobState::Rejected => 4,
        JobState::Cancelled => 5,
    }
}

/// State index key: state tag followed by the order key
#[must_use]
pub fn state_key(state: JobState, order: &[u8; ORDER_KEY_LEN]) -> [u8; ORDER_KEY_LEN + 1] {
    let mut key = [0u8; ORDER_KEY_LEN + 1];
    key[0] = state_tag(state);
    key[1..].copy_from_slice(order);
    key
}

/// Opaque, restartable list position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cursor([u8; ORDER_KEY_LEN]);

impl Cursor {
    /// Cursor positioned after `record`
    #[must_use]
    pub fn after(record: &JobRecord) -> Self {
        Self(order_key(record))
    }

    /// Order key the next page starts after
    #[must_use]
    pub const fn order_key(&self) -> &[u8; ORDER_KEY_LEN] {
        &self.0
    }

    /// Encode for callers
    #[must_use]
    pub fn encode(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode a cursor previously returned by [`Cursor::encode`]
    ///
    /// # Errors
    ///
    /// Returns error if the text is not a cursor
    pub fn decode(text: &str) -> StoreResult<Self> {
        let bytes = hex::decode(text).map_err(|_| StoreError::InvalidCursor(text.to_string()))?;
        let key: [u8; ORDER_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| StoreError::InvalidCursor(text.to_string()))?;
        Ok(Self(key))
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::{JobSpec, JobType, PolicyResult, PolicyStage, Timestamp};
    use serde_json::json;

    fn record_at(millis: u64) -> JobRecord {
        JobRecord::from_submission(
            JobId::new(),
            &JobSpec::new(JobType::BuildData, json!({"dataset": "x"})),
            &PolicyResult::pass(PolicyStage::Preflight),
            Timestamp::from_millis(millis),
        )
    }

    #[test]
    fn test_order_key_sorts_by_creation() {
        let early = record_at(1);
        let late = record_at(256);
        assert!(order_key(&early) < order_key(&late));
        assert_eq!(id_from_order_key(&order_key(&late)), Some(late.id));
    }

    #[test]
    fn test_cursor_encode_decode() {
        let cursor = Cursor::after(&record_at(42));
        assert_eq!(Cursor::decode(&cursor.encode()).unwrap(), cursor);
        assert!(Cursor::decode("abc").is_err());
        assert!(Cursor::decode("00ff").is_err());
    }

    #[test]
    fn test_state_tags_distinct() {
        let mut tags: Vec<u8> = JobState::ALL.iter().map(|s| state_tag(*s)).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), JobState::ALL.len());
    }
}
