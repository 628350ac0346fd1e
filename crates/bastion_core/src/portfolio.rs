//! Portfolio snapshots.
//!
//! Snapshots are immutable once written. They copy every member's state at
//! capture time and hold no reference back to the live records.

use crate::id::SnapshotId;
use crate::strategy::{LifecycleState, StrategyKey, StrategyRecord};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// Why a snapshot was taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotReason {
    /// Fixed cadence
    Scheduled,
    /// Governance-significant event
    GovernanceEvent {
        /// What happened
        description: String,
    },
}

/// One strategy as seen by a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMember {
    /// Identity
    pub key: StrategyKey,
    /// Lifecycle state at capture
    pub state: LifecycleState,
    /// Capital allocation
    pub allocation: f64,
    /// Exposure held, zero outside capital-bearing states
    pub exposure: f64,
    /// Rolling volatility
    pub volatility: f64,
    /// Current drawdown
    pub drawdown: f64,
    /// Regime bucket
    pub regime_bucket: String,
}

impl From<&StrategyRecord> for SnapshotMember {
    fn from(record: &StrategyRecord) -> Self {
        let exposure = if record.state.bears_capital() {
            record.allocation
        } else {
            0.0
        };
        Self {
            key: record.key.clone(),
            state: record.state,
            allocation: record.allocation,
            exposure,
            volatility: record.rolling_volatility,
            drawdown: record.current_drawdown,
            regime_bucket: record.regime_bucket.clone(),
        }
    }
}

/// Point-in-time portfolio record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    /// Position in the snapshot log; assigned on append
    pub seq: u64,
    /// Snapshot ID
    pub id: SnapshotId,
    /// Capture time
    pub taken_at: Timestamp,
    /// Why it was taken
    pub reason: SnapshotReason,
    /// Every known strategy
    pub members: Vec<SnapshotMember>,
    /// Sum of exposures
    pub gross_allocation: f64,
    /// Sum of allocation times volatility over capital-bearing members
    pub risk_used: f64,
}

impl PortfolioSnapshot {
    /// Capture the given strategies
    #[must_use]
    pub fn capture<'a>(
        records: impl IntoIterator<Item = &'a StrategyRecord>,
        reason: SnapshotReason,
        taken_at: Timestamp,
    ) -> Self {
        let mut members = Vec::new();
        let mut risk_used = 0.0;
        for record in records {
            risk_used += record.risk();
            members.push(SnapshotMember::from(record));
        }
        members.sort_by(|a, b| a.key.cmp(&b.key));
        let gross_allocation = members.iter().map(|m| m.exposure).sum();
        Self {
            seq: 0,
            id: SnapshotId::new(),
            taken_at,
            reason,
            members,
            gross_allocation,
            risk_used,
        }
    }

    /// Members in a given state
    pub fn members_in(&self, state: LifecycleState) -> impl Iterator<Item = &SnapshotMember> {
        self.members.iter().filter(move |m| m.state == state)
    }
}
