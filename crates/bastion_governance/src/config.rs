//! Governance configuration.

use crate::error::{GovernanceError, GovernanceResult};
use serde::{Deserialize, Serialize};

/// Admission controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum correlation with the live aggregate signal
    pub correlation_ceiling: f64,
    /// Number of trailing samples used for correlation
    pub correlation_window: usize,
    /// Volatility target used for allocation sizing
    pub target_volatility: f64,
    /// Ceiling on the sum of allocation times volatility
    pub risk_budget: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            correlation_ceiling: 0.7,
            correlation_window: 30,
            target_volatility: 0.10,
            risk_budget: 0.60,
        }
    }
}

impl AdmissionConfig {
    /// Create with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the correlation ceiling
    #[must_use]
    pub fn with_correlation_ceiling(mut self, ceiling: f64) -> Self {
        self.correlation_ceiling = ceiling;
        self
    }

    /// Set the correlation window
    #[must_use]
    pub fn with_correlation_window(mut self, window: usize) -> Self {
        self.correlation_window = window;
        self
    }

    /// Set the volatility target
    #[must_use]
    pub fn with_target_volatility(mut self, target: f64) -> Self {
        self.target_volatility = target;
        self
    }

    /// Set the risk budget ceiling
    #[must_use]
    pub fn with_risk_budget(mut self, budget: f64) -> Self {
        self.risk_budget = budget;
        self
    }

    /// Validate ranges
    ///
    /// # Errors
    ///
    /// Returns error naming the first out-of-range field
    pub fn validate(&self) -> GovernanceResult<()> {
        if !(self.correlation_ceiling > -1.0 && self.correlation_ceiling <= 1.0) {
            return Err(invalid("correlation_ceiling", "must be in (-1, 1]"));
        }
        if self.correlation_window < 2 {
            return Err(invalid("correlation_window", "must be at least 2"));
        }
        if !(self.target_volatility.is_finite() && self.target_volatility > 0.0) {
            return Err(invalid("target_volatility", "must be positive"));
        }
        if !(self.risk_budget.is_finite() && self.risk_budget > 0.0) {
            return Err(invalid("risk_budget", "must be positive"));
        }
        Ok(())
    }
}

/// Kill-switch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KillSwitchConfig {
    /// LIVE demotes to PROBATION when drawdown exceeds this fraction of the
    /// historical maximum
    pub probation_ratio: f64,
    /// Freeze after this many consecutive exposure updates in PROBATION
    pub auto_freeze_after: Option<u32>,
    /// Number of signal samples kept per strategy
    pub signal_history: usize,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            probation_ratio: 0.5,
            auto_freeze_after: None,
            signal_history: 256,
        }
    }
}

impl KillSwitchConfig {
    /// Create with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the probation ratio
    #[must_use]
    pub fn with_probation_ratio(mut self, ratio: f64) -> Self {
        self.probation_ratio = ratio;
        self
    }

    /// Enable automatic freeze
    #[must_use]
    pub fn with_auto_freeze_after(mut self, updates: u32) -> Self {
        self.auto_freeze_after = Some(updates);
        self
    }

    /// Set retained signal history
    #[must_use]
    pub fn with_signal_history(mut self, samples: usize) -> Self {
        self.signal_history = samples;
        self
    }

    /// Validate ranges
    ///
    /// # Errors
    ///
    /// Returns error naming the first out-of-range field
    pub fn validate(&self) -> GovernanceResult<()> {
        if !(self.probation_ratio > 0.0 && self.probation_ratio < 1.0) {
            return Err(invalid("probation_ratio", "must be in (0, 1)"));
        }
        if self.auto_freeze_after == Some(0) {
            return Err(invalid("auto_freeze_after", "must be at least 1"));
        }
        if self.signal_history == 0 {
            return Err(invalid("signal_history", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> GovernanceError {
    GovernanceError::InvalidConfig {
        field,
        reason: reason.to_string(),
    }
}
