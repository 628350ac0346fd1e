//! Policy verdicts.
//!
//! A [`PolicyResult`] is produced per evaluation call and only persisted as a
//! snapshot on the owning job record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Pass or reject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Checkpoint passed
    Pass,
    /// Checkpoint rejected
    Reject,
}

/// Which checkpoint produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyStage {
    /// Before a job may enter QUEUED
    Preflight,
    /// Before a worker's declared success is accepted
    Postflight,
}

impl PolicyStage {
    /// Stable string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Preflight => "PREFLIGHT",
            Self::Postflight => "POSTFLIGHT",
        }
    }
}

impl fmt::Display for PolicyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable, machine-readable policy reason code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyCode {
    /// No violation
    Ok,
    /// Parameters are not a JSON object or a field has the wrong type
    InvalidParams,
    /// A field required for the job type is absent
    MissingRequiredField,
    /// A numeric ceiling was exceeded
    ThresholdExceeded,
    /// A declared output escapes the job's artifact directory
    PathEscape,
    /// A required output was not declared
    MissingOutput,
    /// Too many declared outputs
    OutputLimitExceeded,
    /// Candidate is not in a lifecycle state that may be admitted
    LifecycleIneligible,
    /// Candidate is currently tripping the drawdown kill-switch
    KillSwitchActive,
    /// Correlation with the live portfolio exceeds the ceiling
    CorrelationCeiling,
    /// Candidate would increase regime-bucket concentration
    RegimeConcentration,
    /// Allocation would breach the portfolio risk budget
    RiskBudget,
    /// Replacement mode names a strategy that is not live
    InvalidReplacement,
    /// Correlation with the live portfolio cannot be computed over the
    /// window: history is too short or a series is flat
    InsufficientHistory,
    /// Candidate volatility is not a positive number
    InvalidVolatility,
}

impl PolicyCode {
    /// Stable string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            Self::ThresholdExceeded => "THRESHOLD_EXCEEDED",
            Self::PathEscape => "PATH_ESCAPE",
            Self::MissingOutput => "MISSING_OUTPUT",
            Self::OutputLimitExceeded => "OUTPUT_LIMIT_EXCEEDED",
            Self::LifecycleIneligible => "LIFECYCLE_INELIGIBLE",
            Self::KillSwitchActive => "KILL_SWITCH_ACTIVE",
            Self::CorrelationCeiling => "CORRELATION_CEILING",
            Self::RegimeConcentration => "REGIME_CONCENTRATION",
            Self::RiskBudget => "RISK_BUDGET",
            Self::InvalidReplacement => "INVALID_REPLACEMENT",
            Self::InsufficientHistory => "INSUFFICIENT_HISTORY",
            Self::InvalidVolatility => "INVALID_VOLATILITY",
        }
    }

    /// Whether the code belongs to the admission taxonomy
    #[must_use]
    pub const fn is_admission(&self) -> bool {
        matches!(
            self,
            Self::LifecycleIneligible
                | Self::KillSwitchActive
                | Self::CorrelationCeiling
                | Self::RegimeConcentration
                | Self::RiskBudget
                | Self::InvalidReplacement
                | Self::InsufficientHistory
                | Self::InvalidVolatility
        )
    }
}

impl fmt::Display for PolicyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one policy evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyResult {
    /// Pass or reject
    pub verdict: Verdict,
    /// Stable reason code
    pub code: PolicyCode,
    /// Human readable message
    pub message: String,
    /// Structured context sufficient to reproduce the decision
    pub details: Value,
    /// Checkpoint that produced this result
    pub stage: PolicyStage,
}

impl PolicyResult {
    /// A passing result
    #[must_use]
    pub fn pass(stage: PolicyStage) -> Self {
        Self {
            verdict: Verdict::Pass,
            code: PolicyCode::Ok,
            message: "passed".to_string(),
            details: Value::Null,
            stage,
        }
    }

    /// A rejecting result
    #[must_use]
    pub fn reject(stage: PolicyStage, code: PolicyCode, message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Reject,
            code,
            message: message.into(),
            details: Value::Null,
            stage,
        }
    }

    /// Attach structured details
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Check if the verdict is PASS
    #[must_use]
    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}
