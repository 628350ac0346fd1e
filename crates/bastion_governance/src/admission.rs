//! Admission controller.
//!
//! Decides whether a PAPER_TRADING strategy may enter LIVE exposure. After
//! the precondition guards, three rules run in order and the first failure
//! wins:
//!
//! 1. correlation with the LIVE aggregate signal must not exceed the ceiling
//! 2. the candidate must land in an empty regime bucket or lower the
//!    portfolio's bucket concentration
//! 3. the volatility-targeted allocation must fit in the risk budget
//!
//! Evaluation is a pure function of the candidate and the passed-in
//! [`PortfolioState`].

use crate::config::{AdmissionConfig, KillSwitchConfig};
use crate::error::{GovernanceError, GovernanceResult};
use crate::lifecycle::KillSwitch;
use crate::portfolio::PortfolioState;
use crate::stats;
use bastion_core::{
    LifecycleState, PolicyCode, PolicyResult, PolicyStage, StrategyKey, StrategyRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

/// Strategy being considered for admission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// The candidate's metrics and lifecycle state
    pub record: StrategyRecord,
    /// LIVE member this candidate supersedes, if any
    pub replaces: Option<StrategyKey>,
}

impl Candidate {
    /// Candidate from a stored record
    #[must_use]
    pub fn new(record: StrategyRecord) -> Self {
        Self {
            record,
            replaces: None,
        }
    }

    /// Declare replacement mode
    #[must_use]
    pub fn replacing(mut self, key: StrategyKey) -> Self {
        self.replaces = Some(key);
        self
    }

    /// Candidate identity
    #[must_use]
    pub fn key(&self) -> &StrategyKey {
        &self.record.key
    }
}

/// Reference to a registered strategy, as carried in job parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CandidateRef {
    /// Strategy identity, `id@version`
    pub strategy: String,
    /// Identity of the LIVE member being replaced, `id@version`
    #[serde(default)]
    pub replaces: Option<String>,
}

impl CandidateRef {
    /// Parse from a JSON value
    ///
    /// # Errors
    ///
    /// Returns error if the value is not a candidate reference
    pub fn from_value(value: &Value) -> GovernanceResult<Self> {
        serde_json::from_value(value.clone()).map_err(|e| GovernanceError::InvalidCandidate {
            reason: e.to_string(),
        })
    }

    /// Parsed strategy identity
    ///
    /// # Errors
    ///
    /// Returns error if the identity is malformed
    pub fn key(&self) -> GovernanceResult<StrategyKey> {
        parse_key(&self.strategy)
    }

    /// Parsed replacement identity
    ///
    /// # Errors
    ///
    /// Returns error if the identity is malformed
    pub fn replaces_key(&self) -> GovernanceResult<Option<StrategyKey>> {
        self.replaces.as_deref().map(parse_key).transpose()
    }
}

fn parse_key(text: &str) -> GovernanceResult<StrategyKey> {
    text.parse().map_err(|e: bastion_core::CoreError| GovernanceError::InvalidCandidate {
        reason: e.to_string(),
    })
}

/// Accepted admission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    /// Candidate
    pub key: StrategyKey,
    /// Allocation to assign, `target_volatility / volatility`
    pub allocation: f64,
    /// Correlation with the live aggregate, if it could be computed
    pub correlation: Option<f64>,
    /// Bucket concentration before admission
    pub concentration_before: f64,
    /// Bucket concentration after admission
    pub concentration_after: f64,
    /// Risk in use after admission
    pub risk_after: f64,
    /// Superseded LIVE member
    pub replaces: Option<StrategyKey>,
}

/// Refused admission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionRejection {
    /// Stable reason code
    pub code: PolicyCode,
    /// Human message
    pub message: String,
    /// Numbers behind the decision
    pub details: Value,
}

/// Outcome of an admission evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionDecision {
    /// Candidate may enter LIVE
    Admit(Admission),
    /// Candidate may not enter LIVE
    Reject(AdmissionRejection),
}

impl AdmissionDecision {
    fn reject(code: PolicyCode, message: impl Into<String>, details: Value) -> Self {
        Self::Reject(AdmissionRejection {
            code,
            message: message.into(),
            details,
        })
    }

    /// Whether the candidate was admitted
    #[must_use]
    pub fn is_admit(&self) -> bool {
        matches!(self, Self::Admit(_))
    }

    /// Reason code; `OK` for an admission
    #[must_use]
    pub fn code(&self) -> PolicyCode {
        match self {
            Self::Admit(_) => PolicyCode::Ok,
            Self::Reject(rejection) => rejection.code,
        }
    }

    /// Express as a policy result for the given checkpoint
    #[must_use]
    pub fn to_policy_result(&self, stage: PolicyStage) -> PolicyResult {
        match self {
            Self::Admit(admission) => PolicyResult::pass(stage).with_details(json!({
                "admission": admission,
            })),
            Self::Reject(rejection) => {
                PolicyResult::reject(stage, rejection.code, rejection.message.clone())
                    .with_details(rejection.details.clone())
            }
        }
    }
}

/// Portfolio admission controller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdmissionController {
    config: AdmissionConfig,
    kill_switch: KillSwitch,
}

impl AdmissionController {
    /// Create a controller
    #[must_use]
    pub fn new(config: AdmissionConfig, kill_switch: KillSwitchConfig) -> Self {
        Self {
            config,
            kill_switch: KillSwitch::new(kill_switch),
        }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Resolve a reference against the portfolio and evaluate it
    #[must_use]
    pub fn evaluate_ref(&self, candidate: &CandidateRef, portfolio: &PortfolioState) -> AdmissionDecision {
        let resolved = candidate.key().and_then(|key| {
            let replaces = candidate.replaces_key()?;
            Ok((key, replaces))
        });
        let (key, replaces) = match resolved {
            Ok(parts) => parts,
            Err(err) => {
                return AdmissionDecision::reject(
                    PolicyCode::InvalidParams,
                    err.to_string(),
                    json!({ "candidate": candidate }),
                );
            }
        };
        let Some(record) = portfolio.get(&key) else {
            return AdmissionDecision::reject(
                PolicyCode::LifecycleIneligible,
                format!("{} is not a registered strategy", key),
                json!({ "candidate": key.to_string() }),
            );
        };
        let mut resolved = Candidate::new(record.clone());
        resolved.replaces = replaces;
        self.evaluate(&resolved, portfolio)
    }

    /// Evaluate a candidate against a portfolio
    #[must_use]
    pub fn evaluate(&self, candidate: &Candidate, portfolio: &PortfolioState) -> AdmissionDecision {
        let decision = self.evaluate_inner(candidate, portfolio);
        match &decision {
            AdmissionDecision::Admit(admission) => info!(
                strategy = %candidate.key(),
                allocation = admission.allocation,
                correlation = admission.correlation,
                "admission granted"
            ),
            AdmissionDecision::Reject(rejection) => info!(
                strategy = %candidate.key(),
                code = %rejection.code,
                reason = %rejection.message,
                "admission rejected"
            ),
        }
        decision
    }

    fn evaluate_inner(&self, candidate: &Candidate, portfolio: &PortfolioState) -> AdmissionDecision {
        let record = &candidate.record;
        let key = candidate.key();

        // The portfolio's view of the lifecycle wins over the descriptor
        let state = portfolio.lifecycle_of(key).unwrap_or(record.state);
        if state != LifecycleState::PaperTrading {
            return AdmissionDecision::reject(
                PolicyCode::LifecycleIneligible,
                format!("{} is {}, admission requires PAPER_TRADING", key, state),
                json!({ "state": state }),
            );
        }
        if self.kill_switch.trips(record) {
            return AdmissionDecision::reject(
                PolicyCode::KillSwitchActive,
                format!("{} is tripping the drawdown kill switch", key),
                json!({
                    "current_drawdown": record.current_drawdown,
                    "historical_max_drawdown": record.historical_max_drawdown,
                    "structural_failure": record.structural_failure,
                }),
            );
        }
        let Some(allocation) =
            stats::volatility_target_allocation(self.config.target_volatility, record.rolling_volatility)
        else {
            return AdmissionDecision::reject(
                PolicyCode::InvalidVolatility,
                format!("{} has non-positive volatility", key),
                json!({ "volatility": record.rolling_volatility }),
            );
        };

        let replaces = candidate.replaces.as_ref();
        if let Some(replaced) = replaces {
            if portfolio.lifecycle_of(replaced) != Some(LifecycleState::Live) {
                return AdmissionDecision::reject(
                    PolicyCode::InvalidReplacement,
                    format!("replacement target {} is not LIVE", replaced),
                    json!({
                        "replaces": replaced.to_string(),
                        "state": portfolio.lifecycle_of(replaced),
                    }),
                );
            }
        }

        let window = self.config.correlation_window;
        let has_live = portfolio.live_members(replaces).next().is_some();
        if has_live && record.signal.len() < window {
            return AdmissionDecision::reject(
                PolicyCode::InsufficientHistory,
                format!(
                    "{} has {} signal samples, correlation window is {}",
                    key,
                    record.signal.len(),
                    window
                ),
                json!({ "samples": record.signal.len(), "window": window }),
            );
        }

        // Rule 1: non-correlation mandate
        let aggregate = portfolio.aggregate_signal(replaces, window);
        let correlation = stats::rolling_correlation(&record.signal, &aggregate, window);
        debug!(strategy = %key, ?correlation, window, "correlation against live aggregate");
        match correlation {
            Some(rho) if rho > self.config.correlation_ceiling => {
                return AdmissionDecision::reject(
                    PolicyCode::CorrelationCeiling,
                    format!(
                        "correlation {:.4} exceeds ceiling {:.4}",
                        rho, self.config.correlation_ceiling
                    ),
                    json!({
                        "correlation": rho,
                        "ceiling": self.config.correlation_ceiling,
                        "window": window,
                    }),
                );
            }
            None if has_live => {
                return AdmissionDecision::reject(
                    PolicyCode::InsufficientHistory,
                    format!(
                        "correlation of {} against the live aggregate is undefined over {} samples",
                        key, window
                    ),
                    json!({
                        "window": window,
                        "aggregate_samples": aggregate.len(),
                        "live_members": portfolio.live_members(replaces).count(),
                    }),
                );
            }
            _ => {}
        }

        // Rule 2: regime bucket occupancy
        let mut weights = portfolio.bucket_weights(replaces);
        let concentration_before = stats::herfindahl(&weights);
        let occupied = weights
            .get(&record.regime_bucket)
            .is_some_and(|w| *w > 0.0);
        *weights.entry(record.regime_bucket.clone()).or_insert(0.0) += allocation;
        let concentration_after = stats::herfindahl(&weights);
        if occupied && concentration_after >= concentration_before {
            return AdmissionDecision::reject(
                PolicyCode::RegimeConcentration,
                format!(
                    "bucket {} is occupied and concentration would rise from {:.4} to {:.4}",
                    record.regime_bucket, concentration_before, concentration_after
                ),
                json!({
                    "bucket": record.regime_bucket,
                    "concentration_before": concentration_before,
                    "concentration_after": concentration_after,
                }),
            );
        }

        // Rule 3: risk budget
        let risk_before = portfolio.risk_used(replaces);
        let risk_after = risk_before + allocation * record.rolling_volatility;
        if risk_after > self.config.risk_budget + 1e-12 {
            return AdmissionDecision::reject(
                PolicyCode::RiskBudget,
                format!(
                    "risk {:.4} would exceed budget {:.4}",
                    risk_after, self.config.risk_budget
                ),
                json!({
                    "allocation": allocation,
                    "risk_before": risk_before,
                    "risk_after": risk_after,
                    "budget": self.config.risk_budget,
                }),
            );
        }

        AdmissionDecision::Admit(Admission {
            key: key.clone(),
            allocation,
            correlation,
            concentration_before,
            concentration_after,
            risk_after,
            replaces: candidate.replaces.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::{Timestamp, Transition};
    use std::f64::consts::PI;

    const N: usize = 30;

    fn sine() -> Vec<f64> {
        (0..N).map(|i| (2.0 * PI * 3.0 * i as f64 / N as f64).sin()).collect()
    }

    fn cosine() -> Vec<f64> {
        (0..N).map(|i| (2.0 * PI * 3.0 * i as f64 / N as f64).cos()).collect()
    }

    /// Series with correlation `rho` against `sine()`
    fn correlated(rho: f64) -> Vec<f64> {
        let off = (1.0 - rho * rho).sqrt();
        sine().iter().zip(cosine()).map(|(s, c)| rho * s + off * c).collect()
    }

    fn strategy(id: &str, bucket: &str, signal: Vec<f64>) -> StrategyRecord {
        StrategyRecord::new(StrategyKey::new(id, "v1").unwrap(), "p", bucket, Timestamp::EPOCH)
            .with_historical_max_drawdown(0.2)
            .with_volatility(0.2)
            .with_signal(signal)
    }

    fn advance(record: &mut StrategyRecord, to: LifecycleState) {
        for t in [Transition::Graduate, Transition::Promote, Transition::Admit] {
            if record.state == to {
                return;
            }
            record.record_transition(t, "test", Timestamp::EPOCH);
        }
    }

    fn live(id: &str, bucket: &str, signal: Vec<f64>) -> StrategyRecord {
        let mut record = strategy(id, bucket, signal);
        advance(&mut record, LifecycleState::Live);
        record.allocation = 0.5;
        record
    }

    fn paper(id: &str, bucket: &str, signal: Vec<f64>) -> StrategyRecord {
        let mut record = strategy(id, bucket, signal);
        advance(&mut record, LifecycleState::PaperTrading);
        record
    }

    fn controller() -> AdmissionController {
        AdmissionController::default()
    }

    #[test]
    fn test_series_helper_has_requested_correlation() {
        let rho = stats::pearson(&sine(), &correlated(0.5)).unwrap();
        assert!((rho - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_low_correlation_admitted_high_rejected() {
        let portfolio = PortfolioState::from_records([live("base", "trend", sine())]);

        let low = Candidate::new(paper("c", "carry", correlated(0.5)));
        let decision = controller().evaluate(&low, &portfolio);
        assert!(decision.is_admit(), "{:?}", decision);

        let high = Candidate::new(paper("c", "carry", correlated(0.85)));
        let decision = controller().evaluate(&high, &portfolio);
        assert_eq!(decision.code(), PolicyCode::CorrelationCeiling);
    }

    #[test]
    fn test_replacement_waives_correlation_for_that_pair() {
        let portfolio = PortfolioState::from_records([live("base", "trend", sine())]);
        let base = StrategyKey::new("base", "v1").unwrap();
        let candidate = Candidate::new(paper("c", "trend", correlated(0.85))).replacing(base);
        let decision = controller().evaluate(&candidate, &portfolio);
        assert!(decision.is_admit(), "{:?}", decision);
    }

    #[test]
    fn test_replacement_must_name_live_member() {
        let portfolio = PortfolioState::from_records([paper("other", "trend", sine())]);
        let candidate = Candidate::new(paper("c", "carry", correlated(0.1)))
            .replacing(StrategyKey::new("other", "v1").unwrap());
        assert_eq!(
            controller().evaluate(&candidate, &portfolio).code(),
            PolicyCode::InvalidReplacement
        );
    }

    #[test]
    fn test_requires_paper_trading() {
        let mut record = strategy("c", "carry", correlated(0.1));
        advance(&mut record, LifecycleState::Candidate);
        let decision = controller().evaluate(&Candidate::new(record), &PortfolioState::new());
        assert_eq!(decision.code(), PolicyCode::LifecycleIneligible);
    }

    #[test]
    fn test_kill_switch_candidate_rejected() {
        let mut record = paper("c", "carry", correlated(0.1));
        record.current_drawdown = 0.15;
        let decision = controller().evaluate(&Candidate::new(record), &PortfolioState::new());
        assert_eq!(decision.code(), PolicyCode::KillSwitchActive);
    }

    #[test]
    fn test_invalid_volatility() {
        let record = paper("c", "carry", correlated(0.1)).with_volatility(0.0);
        let decision = controller().evaluate(&Candidate::new(record), &PortfolioState::new());
        assert_eq!(decision.code(), PolicyCode::InvalidVolatility);
    }

    #[test]
    fn test_insufficient_history_only_with_live_members() {
        let short = paper("c", "carry", vec![0.1, 0.2]);
        let decision = controller().evaluate(&Candidate::new(short.clone()), &PortfolioState::new());
        assert!(decision.is_admit());

        let portfolio = PortfolioState::from_records([live("base", "trend", sine())]);
        let decision = controller().evaluate(&Candidate::new(short), &portfolio);
        assert_eq!(decision.code(), PolicyCode::InsufficientHistory);
    }

    #[test]
    fn test_short_live_member_cannot_mask_correlation() {
        let mut short = live("short", "carry", vec![0.3, -0.1, 0.2]);
        short.allocation = 0.5;
        let portfolio = PortfolioState::from_records([live("base", "trend", sine()), short]);
        let copy = Candidate::new(paper("c", "value", sine()));
        assert_eq!(
            controller().evaluate(&copy, &portfolio).code(),
            PolicyCode::CorrelationCeiling
        );
    }

    #[test]
    fn test_undefined_correlation_rejected() {
        // Every live member is short of the window
        let portfolio = PortfolioState::from_records([live("short", "trend", vec![0.1, 0.2, 0.3])]);
        let candidate = Candidate::new(paper("c", "carry", correlated(0.1)));
        assert_eq!(
            controller().evaluate(&candidate, &portfolio).code(),
            PolicyCode::InsufficientHistory
        );

        // Flat aggregate has no variance
        let portfolio = PortfolioState::from_records([live("flat", "trend", vec![1.0; N])]);
        assert_eq!(
            controller().evaluate(&candidate, &portfolio).code(),
            PolicyCode::InsufficientHistory
        );

        // Flat candidate
        let portfolio = PortfolioState::from_records([live("base", "trend", sine())]);
        let flat = Candidate::new(paper("c", "carry", vec![0.0; N]));
        assert_eq!(
            controller().evaluate(&flat, &portfolio).code(),
            PolicyCode::InsufficientHistory
        );
    }

    #[test]
    fn test_correlation_at_ceiling_admitted() {
        let portfolio = PortfolioState::from_records([live("base", "trend", sine())]);
        let rho = stats::pearson(&correlated(0.7), &sine()).unwrap();
        let at_ceiling = AdmissionController::new(
            AdmissionConfig::new().with_correlation_ceiling(rho),
            KillSwitchConfig::default(),
        );
        let candidate = Candidate::new(paper("c", "carry", correlated(0.7)));
        let decision = at_ceiling.evaluate(&candidate, &portfolio);
        assert!(decision.is_admit(), "{:?}", decision);

        let below = AdmissionController::new(
            AdmissionConfig::new().with_correlation_ceiling(rho - 1e-9),
            KillSwitchConfig::default(),
        );
        assert_eq!(
            below.evaluate(&candidate, &portfolio).code(),
            PolicyCode::CorrelationCeiling
        );
    }

    #[test]
    fn test_regime_concentration() {
        // Only bucket is trend; adding more trend keeps concentration at 1.0
        let portfolio = PortfolioState::from_records([live("base", "trend", sine())]);
        let candidate = Candidate::new(paper("c", "trend", correlated(0.1)));
        assert_eq!(
            controller().evaluate(&candidate, &portfolio).code(),
            PolicyCode::RegimeConcentration
        );
    }

    #[test]
    fn test_regime_underweight_bucket_reduces_concentration() {
        let mut heavy = live("heavy", "trend", sine());
        heavy.allocation = 2.0;
        let mut light = live("light", "carry", cosine());
        light.allocation = 0.1;
        let portfolio = PortfolioState::from_records([heavy, light]);
        let controller = AdmissionController::new(
            AdmissionConfig::new().with_risk_budget(5.0),
            KillSwitchConfig::default(),
        );
        let candidate = Candidate::new(paper("c", "carry", correlated(0.0)));
        let decision = controller.evaluate(&candidate, &portfolio);
        assert!(decision.is_admit(), "{:?}", decision);
    }

    #[test]
    fn test_risk_budget() {
        // 0.5 * 0.2 = 0.1 risk per live member; five members use 0.5
        let buckets = ["a", "b", "c", "d", "e"];
        let portfolio = PortfolioState::from_records(
            buckets
                .iter()
                .map(|b| live(&format!("m-{}", b), b, sine())),
        );
        let candidate = Candidate::new(paper("c", "f", correlated(0.0)));
        let decision = controller().evaluate(&candidate, &portfolio);
        assert!(decision.is_admit(), "{:?}", decision);
        if let AdmissionDecision::Admit(admission) = decision {
            assert!((admission.allocation - 0.5).abs() < 1e-12);
            assert!((admission.risk_after - 0.6).abs() < 1e-9);
        }

        let tight = AdmissionController::new(
            AdmissionConfig::new().with_risk_budget(0.55),
            KillSwitchConfig::default(),
        );
        assert_eq!(tight.evaluate(&candidate, &portfolio).code(), PolicyCode::RiskBudget);
    }

    #[test]
    fn test_evaluate_ref() {
        let portfolio = PortfolioState::from_records([paper("c", "carry", correlated(0.1))]);
        let reference = CandidateRef::from_value(&json!({"strategy": "c@v1"})).unwrap();
        assert!(controller().evaluate_ref(&reference, &portfolio).is_admit());

        let unknown = CandidateRef::from_value(&json!({"strategy": "zzz@v1"})).unwrap();
        assert_eq!(
            controller().evaluate_ref(&unknown, &portfolio).code(),
            PolicyCode::LifecycleIneligible
        );
        let malformed = CandidateRef::from_value(&json!({"strategy": "no-version"})).unwrap();
        assert_eq!(
            controller().evaluate_ref(&malformed, &portfolio).code(),
            PolicyCode::InvalidParams
        );
        assert!(CandidateRef::from_value(&json!({"strat": "x"})).is_err());
    }

    #[test]
    fn test_decision_as_policy_result() {
        let decision = AdmissionDecision::reject(
            PolicyCode::RiskBudget,
            "over budget",
            json!({"risk_after": 0.7}),
        );
        let result = decision.to_policy_result(PolicyStage::Preflight);
        assert!(!result.is_pass());
        assert_eq!(result.code, PolicyCode::RiskBudget);
        assert_eq!(result.details["risk_after"], 0.7);
    }
}
