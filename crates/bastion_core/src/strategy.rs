//! Governed strategy model.
//!
//! A strategy is identified by `(strategy_id, version_hash)`. Its lifecycle
//! state only moves along the edges of [`LifecycleState::successors`], and
//! every edge has exactly one [`Transition`] variant describing it.

use crate::error::CoreError;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a governed strategy
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrategyKey {
    /// Strategy identifier
    pub strategy_id: String,
    /// Version hash; changes whenever frozen parameters change
    pub version_hash: String,
}

impl StrategyKey {
    /// Create a strategy key
    ///
    /// # Errors
    ///
    /// Returns error if either part is empty or contains `@` or whitespace
    pub fn new(
        strategy_id: impl Into<String>,
        version_hash: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let key = Self {
            strategy_id: strategy_id.into(),
            version_hash: version_hash.into(),
        };
        for (part, value) in [("strategy_id", &key.strategy_id), ("version_hash", &key.version_hash)] {
            if value.is_empty() || value.contains('@') || value.chars().any(char::is_whitespace) {
                return Err(CoreError::InvalidStrategyKey {
                    reason: format!("{} must be non-empty without '@' or whitespace: {:?}", part, value),
                });
            }
        }
        Ok(key)
    }

    /// Storage key form, `id@version`
    #[must_use]
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StrategyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.strategy_id, self.version_hash)
    }
}

impl FromStr for StrategyKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, version) = s.split_once('@').ok_or_else(|| CoreError::InvalidStrategyKey {
            reason: format!("expected id@version, got {:?}", s),
        })?;
        Self::new(id, version)
    }
}

/// Lifecycle state of a governed strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Initial; parameters may still change
    Incubation,
    /// Parameters frozen
    Candidate,
    /// Simulated execution against live data
    PaperTrading,
    /// Capital-bearing
    Live,
    /// Capital-bearing, under drawdown watch
    Probation,
    /// No new entries; existing exposure kept
    Freeze,
    /// Permanent terminal state
    Retired,
}

impl LifecycleState {
    /// Every lifecycle state, in declaration order
    pub const ALL: [LifecycleState; 7] = [
        Self::Incubation,
        Self::Candidate,
        Self::PaperTrading,
        Self::Live,
        Self::Probation,
        Self::Freeze,
        Self::Retired,
    ];

    /// States reachable from this one
    #[must_use]
    pub const fn successors(&self) -> &'static [LifecycleState] {
        match self {
            Self::Incubation => &[Self::Candidate, Self::Retired],
            Self::Candidate => &[Self::PaperTrading, Self::Retired],
            Self::PaperTrading => &[Self::Live, Self::Retired],
            Self::Live => &[Self::Probation, Self::Retired],
            Self::Probation => &[Self::Live, Self::Freeze, Self::Retired],
            Self::Freeze => &[Self::Retired],
            Self::Retired => &[],
        }
    }

    /// Check the lifecycle table
    #[must_use]
    pub fn can_transition_to(&self, to: LifecycleState) -> bool {
        self.successors().contains(&to)
    }

    /// RETIRED is the only terminal state
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Retired)
    }

    /// States holding exposure
    #[must_use]
    pub const fn bears_capital(&self) -> bool {
        matches!(self, Self::Live | Self::Probation | Self::Freeze)
    }

    /// States in which parameters are frozen
    #[must_use]
    pub const fn params_frozen(&self) -> bool {
        !matches!(self, Self::Incubation)
    }

    /// Stable string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Incubation => "INCUBATION",
            Self::Candidate => "CANDIDATE",
            Self::PaperTrading => "PAPER_TRADING",
            Self::Live => "LIVE",
            Self::Probation => "PROBATION",
            Self::Freeze => "FREEZE",
            Self::Retired => "RETIRED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "lifecycle state",
                value: s.to_string(),
            })
    }
}

/// A legal lifecycle edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Transition {
    /// INCUBATION -> CANDIDATE, after research validation
    Graduate,
    /// CANDIDATE -> PAPER_TRADING, explicit promotion
    Promote,
    /// PAPER_TRADING -> LIVE, only through an admission
    Admit,
    /// LIVE -> PROBATION, drawdown above the probation ratio
    Demote,
    /// PROBATION -> LIVE, drawdown back below the probation ratio
    Recover,
    /// PROBATION -> FREEZE
    Freeze,
    /// Any non-terminal state -> RETIRED
    Retire,
}

impl Transition {
    /// Every transition
    pub const ALL: [Transition; 7] = [
        Self::Graduate,
        Self::Promote,
        Self::Admit,
        Self::Demote,
        Self::Recover,
        Self::Freeze,
        Self::Retire,
    ];

    /// States the edge may start from
    #[must_use]
    pub const fn sources(&self) -> &'static [LifecycleState] {
        use LifecycleState as S;
        match self {
            Self::Graduate => &[S::Incubation],
            Self::Promote => &[S::Candidate],
            Self::Admit => &[S::PaperTrading],
            Self::Demote => &[S::Live],
            Self::Recover | Self::Freeze => &[S::Probation],
            Self::Retire => &[
                S::Incubation,
                S::Candidate,
                S::PaperTrading,
                S::Live,
                S::Probation,
                S::Freeze,
            ],
        }
    }

    /// Target state
    #[must_use]
    pub const fn target(&self) -> LifecycleState {
        match self {
            Self::Graduate => LifecycleState::Candidate,
            Self::Promote => LifecycleState::PaperTrading,
            Self::Admit | Self::Recover => LifecycleState::Live,
            Self::Demote => LifecycleState::Probation,
            Self::Freeze => LifecycleState::Freeze,
            Self::Retire => LifecycleState::Retired,
        }
    }

    /// Check if the edge may start at `from`
    #[must_use]
    pub fn applies_to(&self, from: LifecycleState) -> bool {
        self.sources().contains(&from)
    }

    /// The transition connecting two states, if the table allows it
    #[must_use]
    pub fn between(from: LifecycleState, to: LifecycleState) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.target() == to && t.applies_to(from))
    }

    /// Stable string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Graduate => "GRADUATE",
            Self::Promote => "PROMOTE",
            Self::Admit => "ADMIT",
            Self::Demote => "DEMOTE",
            Self::Recover => "RECOVER",
            Self::Freeze => "FREEZE",
            Self::Retire => "RETIRE",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transition {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "lifecycle transition",
                value: s.to_string(),
            })
    }
}

/// Intent signalled upstream when a strategy enters a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Directive {
    /// Stop opening new positions; keep existing exposure
    HaltEntries,
    /// Close all exposure
    Liquidate,
}

impl Directive {
    /// Directive implied by entering `state`
    #[must_use]
    pub const fn on_entry(state: LifecycleState) -> Option<Self> {
        match state {
            LifecycleState::Freeze => Some(Self::HaltEntries),
            LifecycleState::Retired => Some(Self::Liquidate),
            _ => None,
        }
    }
}

/// One entry of a strategy's transition history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleTransition {
    /// State before
    pub from: LifecycleState,
    /// State after
    pub to: LifecycleState,
    /// Edge taken
    pub transition: Transition,
    /// When it was applied
    pub at: Timestamp,
    /// Why
    pub reason: String,
}

/// Durable record of a governed strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    /// Identity
    pub key: StrategyKey,
    /// Lifecycle state
    pub state: LifecycleState,
    /// Hash of the strategy parameters; frozen after INCUBATION
    pub params_hash: String,
    /// Worst drawdown seen during validation, as a positive fraction
    pub historical_max_drawdown: f64,
    /// Current drawdown, as a positive fraction
    pub current_drawdown: f64,
    /// Rolling volatility of returns
    pub rolling_volatility: f64,
    /// Regime bucket tag, e.g. `trend` or `mean_reversion`
    pub regime_bucket: String,
    /// Signal series, oldest first
    pub signal: Vec<f64>,
    /// Capital allocation assigned on admission
    pub allocation: f64,
    /// Structural failure flag; forces retirement
    pub structural_failure: bool,
    /// Consecutive exposure updates spent in PROBATION
    pub probation_streak: u32,
    /// Monotonic revision
    pub revision: u64,
    /// Creation time
    pub created_at: Timestamp,
    /// Last write time
    pub updated_at: Timestamp,
    /// Applied transitions, oldest first
    pub history: Vec<LifecycleTransition>,
}

impl StrategyRecord {
    /// Create a record in INCUBATION
    #[must_use]
    pub fn new(
        key: StrategyKey,
        params_hash: impl Into<String>,
        regime_bucket: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            key,
            state: LifecycleState::Incubation,
            params_hash: params_hash.into(),
            historical_max_drawdown: 0.0,
            current_drawdown: 0.0,
            rolling_volatility: 0.0,
            regime_bucket: regime_bucket.into(),
            signal: Vec::new(),
            allocation: 0.0,
            structural_failure: false,
            probation_streak: 0,
            revision: 1,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }

    /// Set the validation drawdown
    #[must_use]
    pub fn with_historical_max_drawdown(mut self, drawdown: f64) -> Self {
        self.historical_max_drawdown = drawdown;
        self
    }

    /// Set the rolling volatility
    #[must_use]
    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.rolling_volatility = volatility;
        self
    }

    /// Set the signal series
    #[must_use]
    pub fn with_signal(mut self, signal: Vec<f64>) -> Self {
        self.signal = signal;
        self
    }

    /// Risk contribution, allocation times volatility
    #[must_use]
    pub fn risk(&self) -> f64 {
        if self.state.bears_capital() {
            self.allocation * self.rolling_volatility
        } else {
            0.0
        }
    }

    /// Record an applied edge. The caller has already validated it.
    pub fn record_transition(&mut self, transition: Transition, reason: impl Into<String>, now: Timestamp) {
        let from = self.state;
        let to = transition.target();
        self.state = to;
        self.updated_at = now;
        if to != LifecycleState::Probation {
            self.probation_streak = 0;
        }
        if to == LifecycleState::Retired {
            self.allocation = 0.0;
        }
        self.history.push(LifecycleTransition {
            from,
            to,
            transition,
            at: now,
            reason: reason.into(),
        });
    }
}
