//! Explicit portfolio state passed into governance decisions.

use crate::stats;
use bastion_core::{LifecycleState, PortfolioSnapshot, StrategyKey, StrategyRecord};
use std::collections::BTreeMap;

/// Point-in-time view of every governed strategy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioState {
    strategies: BTreeMap<StrategyKey, StrategyRecord>,
}

impl PortfolioState {
    /// Empty portfolio
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from strategy records
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = StrategyRecord>) -> Self {
        Self {
            strategies: records
                .into_iter()
                .map(|record| (record.key.clone(), record))
                .collect(),
        }
    }

    /// Add or replace one record
    #[must_use]
    pub fn with_record(mut self, record: StrategyRecord) -> Self {
        self.strategies.insert(record.key.clone(), record);
        self
    }

    /// Look up a strategy
    #[must_use]
    pub fn get(&self, key: &StrategyKey) -> Option<&StrategyRecord> {
        self.strategies.get(key)
    }

    /// Lifecycle state of a strategy, if known
    #[must_use]
    pub fn lifecycle_of(&self, key: &StrategyKey) -> Option<LifecycleState> {
        self.get(key).map(|r| r.state)
    }

    /// Every strategy, ordered by key
    pub fn records(&self) -> impl Iterator<Item = &StrategyRecord> {
        self.strategies.values()
    }

    /// LIVE strategies, optionally leaving one out
    pub fn live_members<'a>(
        &'a self,
        excluding: Option<&'a StrategyKey>,
    ) -> impl Iterator<Item = &'a StrategyRecord> + 'a {
        self.strategies
            .values()
            .filter(move |r| r.state == LifecycleState::Live && Some(&r.key) != excluding)
    }

    /// Strategies holding exposure, optionally leaving one out
    pub fn capital_members<'a>(
        &'a self,
        excluding: Option<&'a StrategyKey>,
    ) -> impl Iterator<Item = &'a StrategyRecord> + 'a {
        self.strategies
            .values()
            .filter(move |r| r.state.bears_capital() && Some(&r.key) != excluding)
    }

    /// Allocation-weighted aggregate signal of the LIVE members holding at
    /// least `min_samples` samples
    #[must_use]
    pub fn aggregate_signal(&self, excluding: Option<&StrategyKey>, min_samples: usize) -> Vec<f64> {
        let series: Vec<(f64, &[f64])> = self
            .live_members(excluding)
            .filter(|r| r.signal.len() >= min_samples)
            .map(|r| (r.allocation, r.signal.as_slice()))
            .collect();
        stats::aggregate_signal(&series)
    }

    /// Allocation per regime bucket over capital-bearing members
    #[must_use]
    pub fn bucket_weights(&self, excluding: Option<&StrategyKey>) -> BTreeMap<String, f64> {
        let mut weights = BTreeMap::new();
        for record in self.capital_members(excluding) {
            *weights.entry(record.regime_bucket.clone()).or_insert(0.0) += record.allocation;
        }
        weights
    }

    /// Risk in use: sum of allocation times volatility
    #[must_use]
    pub fn risk_used(&self, excluding: Option<&StrategyKey>) -> f64 {
        self.capital_members(excluding).map(StrategyRecord::risk).sum()
    }

    /// Capture as a snapshot
    #[must_use]
    pub fn snapshot(
        &self,
        reason: bastion_core::SnapshotReason,
        at: bastion_core::Timestamp,
    ) -> PortfolioSnapshot {
        PortfolioSnapshot::capture(self.strategies.values(), reason, at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::{Timestamp, Transition};

    fn member(id: &str, bucket: &str, allocation: f64, vol: f64) -> StrategyRecord {
        let mut record = StrategyRecord::new(
            StrategyKey::new(id, "v1").unwrap(),
            "p",
            bucket,
            Timestamp::EPOCH,
        )
        .with_volatility(vol)
        .with_signal(vec![1.0, 2.0, 3.0]);
        for t in [Transition::Graduate, Transition::Promote, Transition::Admit] {
            record.record_transition(t, "test", Timestamp::EPOCH);
        }
        record.allocation = allocation;
        record
    }

    #[test]
    fn test_bucket_weights_and_risk() {
        let state = PortfolioState::from_records([
            member("a", "trend", 0.5, 0.2),
            member("b", "trend", 0.5, 0.2),
            member("c", "carry", 1.0, 0.1),
        ]);
        let weights = state.bucket_weights(None);
        assert_eq!(weights.get("trend"), Some(&1.0));
        assert_eq!(weights.get("carry"), Some(&1.0));
        assert!((state.risk_used(None) - 0.3).abs() < 1e-12);

        let a = StrategyKey::new("a", "v1").unwrap();
        assert!((state.risk_used(Some(&a)) - 0.2).abs() < 1e-12);
        assert_eq!(state.live_members(Some(&a)).count(), 2);
    }

    #[test]
    fn test_non_capital_members_ignored() {
        let incubating = StrategyRecord::new(
            StrategyKey::new("x", "v1").unwrap(),
            "p",
            "trend",
            Timestamp::EPOCH,
        );
        let state = PortfolioState::new().with_record(incubating);
        assert!(state.bucket_weights(None).is_empty());
        assert_eq!(state.risk_used(None), 0.0);
        assert!(state.aggregate_signal(None, 0).is_empty());
    }

    #[test]
    fn test_aggregate_skips_short_history() {
        let mut short = member("short", "carry", 1.0, 0.1);
        short.signal = vec![5.0];
        let state = PortfolioState::from_records([member("a", "trend", 1.0, 0.2), short]);
        assert_eq!(state.aggregate_signal(None, 3), vec![1.0, 2.0, 3.0]);
        assert_eq!(state.aggregate_signal(None, 0).len(), 1);
        assert!(state.aggregate_signal(None, 4).is_empty());
    }
}
