//! Lifecycle state machine and drawdown kill switch.
//!
//! The kill switch is evaluated on every exposure update and before any
//! requested transition. When it fires, its transition is applied and the
//! request is reported as overridden.

use crate::config::KillSwitchConfig;
use crate::error::{GovernanceError, GovernanceResult};
use bastion_core::{
    Directive, LifecycleState, StrategyKey, StrategyRecord, Timestamp, Transition,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Metrics reported for one strategy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureUpdate {
    /// Current drawdown, as a positive fraction
    pub current_drawdown: f64,
    /// New rolling volatility, if changed
    pub rolling_volatility: Option<f64>,
    /// Samples to append to the signal series
    pub signal: Vec<f64>,
    /// New historical maximum drawdown, if changed
    pub historical_max_drawdown: Option<f64>,
    /// Raise the structural-failure flag
    pub structural_failure: bool,
}

impl ExposureUpdate {
    /// Update carrying only a drawdown
    #[must_use]
    pub fn drawdown(current_drawdown: f64) -> Self {
        Self {
            current_drawdown,
            ..Self::default()
        }
    }

    /// Set volatility
    #[must_use]
    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.rolling_volatility = Some(volatility);
        self
    }

    /// Append signal samples
    #[must_use]
    pub fn with_signal(mut self, samples: Vec<f64>) -> Self {
        self.signal = samples;
        self
    }

    /// Raise the structural-failure flag
    #[must_use]
    pub fn with_structural_failure(mut self) -> Self {
        self.structural_failure = true;
        self
    }
}

/// Result of a lifecycle step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleOutcome {
    /// Strategy
    pub key: StrategyKey,
    /// State before
    pub from: LifecycleState,
    /// State after
    pub to: LifecycleState,
    /// Edges applied, in order
    pub applied: Vec<Transition>,
    /// Whether the kill switch fired
    pub kill_switch: bool,
    /// Requested edge that was not applied because the kill switch won
    pub overridden: Option<Transition>,
    /// Intent to signal upstream
    pub directive: Option<Directive>,
}

impl LifecycleOutcome {
    fn unchanged(record: &StrategyRecord) -> Self {
        Self {
            key: record.key.clone(),
            from: record.state,
            to: record.state,
            applied: Vec::new(),
            kill_switch: false,
            overridden: None,
            directive: None,
        }
    }

    /// Whether the state changed
    #[must_use]
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    /// Whether the change should be captured in a portfolio snapshot
    #[must_use]
    pub fn is_governance_event(&self) -> bool {
        self.kill_switch || self.directive.is_some() || self.to == LifecycleState::Live
    }
}

/// Drawdown kill switch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KillSwitch {
    config: KillSwitchConfig,
}

impl KillSwitch {
    /// Create a kill switch
    #[must_use]
    pub fn new(config: KillSwitchConfig) -> Self {
        Self { config }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &KillSwitchConfig {
        &self.config
    }

    /// Forced transition for the given metrics, if any.
    ///
    /// A historical maximum drawdown of zero means no drawdown reference
    /// exists yet, so only the structural-failure flag can fire.
    #[must_use]
    pub fn evaluate(
        &self,
        state: LifecycleState,
        current_drawdown: f64,
        historical_max_drawdown: f64,
        structural_failure: bool,
        probation_streak: u32,
    ) -> Option<(Transition, String)> {
        if state.is_terminal() {
            return None;
        }
        if structural_failure {
            return Some((Transition::Retire, "structural failure".to_string()));
        }
        if historical_max_drawdown <= 0.0 {
            return None;
        }
        if current_drawdown > historical_max_drawdown {
            return Some((
                Transition::Retire,
                format!(
                    "drawdown {:.4} exceeds historical maximum {:.4}",
                    current_drawdown, historical_max_drawdown
                ),
            ));
        }
        let threshold = self.config.probation_ratio * historical_max_drawdown;
        match state {
            LifecycleState::Live if current_drawdown > threshold => Some((
                Transition::Demote,
                format!(
                    "drawdown {:.4} exceeds probation threshold {:.4}",
                    current_drawdown, threshold
                ),
            )),
            LifecycleState::Probation if current_drawdown < threshold => Some((
                Transition::Recover,
                format!(
                    "drawdown {:.4} back below probation threshold {:.4}",
                    current_drawdown, threshold
                ),
            )),
            LifecycleState::Probation
                if self
                    .config
                    .auto_freeze_after
                    .is_some_and(|limit| probation_streak >= limit) =>
            {
                Some((
                    Transition::Freeze,
                    format!("{} consecutive updates in probation", probation_streak),
                ))
            }
            _ => None,
        }
    }

    /// Forced transition for a stored record
    #[must_use]
    pub fn check(&self, record: &StrategyRecord) -> Option<(Transition, String)> {
        self.evaluate(
            record.state,
            record.current_drawdown,
            record.historical_max_drawdown,
            record.structural_failure,
            record.probation_streak,
        )
    }

    /// Whether the metrics would force a demotion or retirement.
    /// Recovery is not a trip.
    #[must_use]
    pub fn trips(&self, record: &StrategyRecord) -> bool {
        if record.structural_failure {
            return true;
        }
        let hmdd = record.historical_max_drawdown;
        hmdd > 0.0 && record.current_drawdown > self.config.probation_ratio * hmdd
    }
}

/// Lifecycle state machine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleMachine {
    kill_switch: KillSwitch,
}

impl LifecycleMachine {
    /// Create a machine
    #[must_use]
    pub fn new(config: KillSwitchConfig) -> Self {
        Self {
            kill_switch: KillSwitch::new(config),
        }
    }

    /// The kill switch
    #[must_use]
    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    /// Apply metrics to a record, then run the kill switch
    pub fn evaluate_exposure(
        &self,
        record: &mut StrategyRecord,
        update: &ExposureUpdate,
        now: Timestamp,
    ) -> LifecycleOutcome {
        record.current_drawdown = update.current_drawdown;
        if let Some(volatility) = update.rolling_volatility {
            record.rolling_volatility = volatility;
        }
        if let Some(hmdd) = update.historical_max_drawdown {
            record.historical_max_drawdown = hmdd;
        }
        if update.structural_failure {
            record.structural_failure = true;
        }
        if !update.signal.is_empty() {
            record.signal.extend_from_slice(&update.signal);
            let keep = self.kill_switch.config().signal_history;
            if record.signal.len() > keep {
                let drop = record.signal.len() - keep;
                record.signal.drain(..drop);
            }
        }
        if record.state == LifecycleState::Probation {
            record.probation_streak = record.probation_streak.saturating_add(1);
        }
        record.updated_at = now;

        let mut outcome = LifecycleOutcome::unchanged(record);
        self.fire_kill_switch(record, &mut outcome, now);
        outcome
    }

    /// Apply one edge after validating it against the table
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::IllegalTransition`] if the edge does not
    /// start at the record's current state
    pub fn apply(
        &self,
        record: &mut StrategyRecord,
        transition: Transition,
        reason: &str,
        now: Timestamp,
    ) -> GovernanceResult<LifecycleOutcome> {
        let mut outcome = LifecycleOutcome::unchanged(record);
        self.apply_edge(record, transition, reason, now, &mut outcome)?;
        Ok(outcome)
    }

    /// Resolve a requested edge: the kill switch is evaluated first and wins.
    ///
    /// If the kill switch fires, the request is reported as overridden,
    /// except that a requested retirement still applies afterwards.
    ///
    /// # Errors
    ///
    /// Returns error if the request is illegal and the kill switch did not
    /// fire
    pub fn resolve(
        &self,
        record: &mut StrategyRecord,
        requested: Transition,
        reason: &str,
        now: Timestamp,
    ) -> GovernanceResult<LifecycleOutcome> {
        let mut outcome = LifecycleOutcome::unchanged(record);
        if self.fire_kill_switch(record, &mut outcome, now) {
            if outcome.applied.contains(&requested) {
                return Ok(outcome);
            }
            if requested == Transition::Retire && requested.applies_to(record.state) {
                self.apply_edge(record, requested, reason, now, &mut outcome)?;
                return Ok(outcome);
            }
            warn!(
                strategy = %record.key,
                requested = %requested,
                state = %record.state,
                "requested transition overridden by kill switch"
            );
            outcome.overridden = Some(requested);
            return Ok(outcome);
        }
        self.apply_edge(record, requested, reason, now, &mut outcome)?;
        Ok(outcome)
    }

    /// Manual request from an operator; LIVE entry from PAPER_TRADING is
    /// reserved for admissions
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::AdmissionRequired`] for `Admit`, otherwise
    /// as [`LifecycleMachine::resolve`]
    pub fn request(
        &self,
        record: &mut StrategyRecord,
        requested: Transition,
        reason: &str,
        now: Timestamp,
    ) -> GovernanceResult<LifecycleOutcome> {
        if requested == Transition::Admit {
            return Err(GovernanceError::AdmissionRequired {
                key: record.key.clone(),
            });
        }
        self.resolve(record, requested, reason, now)
    }

    fn fire_kill_switch(
        &self,
        record: &mut StrategyRecord,
        outcome: &mut LifecycleOutcome,
        now: Timestamp,
    ) -> bool {
        let Some((transition, reason)) = self.kill_switch.check(record) else {
            return false;
        };
        warn!(
            strategy = %record.key,
            from = %record.state,
            transition = %transition,
            drawdown = record.current_drawdown,
            historical_max_drawdown = record.historical_max_drawdown,
            %reason,
            "kill switch fired"
        );
        outcome.kill_switch = true;
        // check() only returns edges that start at the current state
        if self
            .apply_edge(record, transition, &reason, now, outcome)
            .is_err()
        {
            outcome.kill_switch = false;
            return false;
        }
        true
    }

    fn apply_edge(
        &self,
        record: &mut StrategyRecord,
        transition: Transition,
        reason: &str,
        now: Timestamp,
        outcome: &mut LifecycleOutcome,
    ) -> GovernanceResult<()> {
        if !transition.applies_to(record.state) {
            return Err(GovernanceError::IllegalTransition {
                key: record.key.clone(),
                from: record.state,
                transition,
            });
        }
        let from = record.state;
        record.record_transition(transition, reason, now);
        outcome.to = record.state;
        outcome.applied.push(transition);
        if let Some(directive) = Directive::on_entry(record.state) {
            outcome.directive = Some(directive);
        }
        info!(
            strategy = %record.key,
            from = %from,
            to = %record.state,
            transition = %transition,
            directive = ?outcome.directive,
            "lifecycle transition"
        );
        Ok(())
    }
}
