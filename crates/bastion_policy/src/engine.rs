//! Preflight and postflight evaluation.

use crate::boundary::ArtifactBoundary;
use crate::config::PolicyConfig;
use bastion_core::{
    JobId, JobRecord, JobSpec, JobType, PolicyCode, PolicyResult, PolicyStage, canonical_json,
};
use bastion_governance::{AdmissionController, CandidateRef, PortfolioState};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info};

const STAGE_PRE: PolicyStage = PolicyStage::Preflight;
const STAGE_POST: PolicyStage = PolicyStage::Postflight;

/// Policy engine
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    config: PolicyConfig,
    admission: AdmissionController,
}

impl PolicyEngine {
    /// Create an engine
    #[must_use]
    pub fn new(config: PolicyConfig, admission: AdmissionController) -> Self {
        Self { config, admission }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Admission controller used for PORTFOLIO_ADMISSION preflight
    #[must_use]
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Artifact directory assigned to a job
    #[must_use]
    pub fn artifact_dir_for(&self, id: JobId) -> PathBuf {
        self.config.artifact_root.join(id.to_string())
    }

    /// Evaluate a submission before it may be queued
    #[must_use]
    pub fn evaluate_preflight(&self, spec: &JobSpec, portfolio: &PortfolioState) -> PolicyResult {
        let result = self.preflight(spec, portfolio);
        if result.is_pass() {
            debug!(job_type = %spec.job_type, "preflight passed");
        } else {
            info!(
                job_type = %spec.job_type,
                code = %result.code,
                reason = %result.message,
                "preflight rejected"
            );
        }
        result
    }

    fn preflight(&self, spec: &JobSpec, portfolio: &PortfolioState) -> PolicyResult {
        let Some(params) = spec.params.as_object() else {
            return PolicyResult::reject(
                STAGE_PRE,
                PolicyCode::InvalidParams,
                "params must be a JSON object",
            )
            .with_details(json!({ "job_type": spec.job_type }));
        };

        let size = canonical_json(&spec.params).len();
        if size > self.config.max_params_bytes {
            return PolicyResult::reject(
                STAGE_PRE,
                PolicyCode::ThresholdExceeded,
                format!(
                    "params encode to {size} bytes, limit is {}",
                    self.config.max_params_bytes
                ),
            )
            .with_details(json!({
                "field": "params",
                "value": size,
                "limit": self.config.max_params_bytes,
            }));
        }

        for field in self.config.fields_for(spec.job_type) {
            if params.get(field).is_none_or(Value::is_null) {
                return PolicyResult::reject(
                    STAGE_PRE,
                    PolicyCode::MissingRequiredField,
                    format!("{} requires field {field:?}", spec.job_type),
                )
                .with_details(json!({ "job_type": spec.job_type, "field": field }));
            }
        }

        let ceilings = [
            ("memory_mb", self.config.memory_ceiling_mb),
            ("timeout_secs", self.config.max_timeout_secs),
        ];
        for (field, limit) in ceilings {
            if let Some(rejection) = check_ceiling(params, field, limit) {
                return rejection;
            }
        }

        if spec.job_type == JobType::PortfolioAdmission {
            let raw = params.get("candidate").unwrap_or(&Value::Null);
            return match CandidateRef::from_value(raw) {
                Ok(candidate) => self
                    .admission
                    .evaluate_ref(&candidate, portfolio)
                    .to_policy_result(STAGE_PRE),
                Err(err) => {
                    PolicyResult::reject(STAGE_PRE, PolicyCode::InvalidParams, err.to_string())
                        .with_details(json!({ "field": "candidate" }))
                }
            };
        }

        PolicyResult::pass(STAGE_PRE)
    }

    /// Evaluate a worker's declared outputs before its success is accepted
    #[must_use]
    pub fn evaluate_postflight(&self, job: &JobRecord, declared_outputs: &[String]) -> PolicyResult {
        let result = self.postflight(job, declared_outputs);
        if result.is_pass() {
            debug!(job_id = %job.id, outputs = declared_outputs.len(), "postflight passed");
        } else {
            info!(
                job_id = %job.id,
                code = %result.code,
                reason = %result.message,
                "postflight rejected"
            );
        }
        result
    }

    fn postflight(&self, job: &JobRecord, declared_outputs: &[String]) -> PolicyResult {
        let root = job
            .artifact_dir
            .as_ref()
            .map_or_else(|| self.artifact_dir_for(job.id), PathBuf::from);

        if declared_outputs.len() > self.config.max_outputs {
            return PolicyResult::reject(
                STAGE_POST,
                PolicyCode::OutputLimitExceeded,
                format!(
                    "{} outputs declared, limit is {}",
                    declared_outputs.len(),
                    self.config.max_outputs
                ),
            )
            .with_details(json!({
                "declared": declared_outputs.len(),
                "limit": self.config.max_outputs,
            }));
        }

        let boundary = ArtifactBoundary::new(&root);
        let mut normalized = BTreeSet::new();
        for declared in declared_outputs {
            let checked = if self.config.verify_outputs_on_disk {
                boundary.resolve(declared)
            } else {
                boundary.normalize(declared)
            };
            match checked {
                Ok(path) => {
                    normalized.insert(path.to_string_lossy().into_owned());
                }
                Err(violation) => {
                    return PolicyResult::reject(STAGE_POST, violation.code(), violation.to_string())
                        .with_details(json!({
                            "path": declared,
                            "artifact_dir": root.display().to_string(),
                        }));
                }
            }
        }

        for required in self.config.outputs_for(job.job_type) {
            if !normalized.contains(required) {
                return PolicyResult::reject(
                    STAGE_POST,
                    PolicyCode::MissingOutput,
                    format!("{} must declare {required:?}", job.job_type),
                )
                .with_details(json!({
                    "job_type": job.job_type,
                    "missing": required,
                    "declared": normalized,
                }));
            }
        }

        PolicyResult::pass(STAGE_POST).with_details(json!({ "outputs": normalized }))
    }
}

fn check_ceiling(params: &Map<String, Value>, field: &str, limit: u64) -> Option<PolicyResult> {
    let value = params.get(field)?;
    if value.is_null() {
        return None;
    }
    let Some(amount) = value.as_u64() else {
        return Some(
            PolicyResult::reject(
                STAGE_PRE,
                PolicyCode::InvalidParams,
                format!("{field} must be a non-negative integer"),
            )
            .with_details(json!({ "field": field, "value": value })),
        );
    };
    (amount > limit).then(|| {
        PolicyResult::reject(
            STAGE_PRE,
            PolicyCode::ThresholdExceeded,
            format!("{field} {amount} exceeds ceiling {limit}"),
        )
        .with_details(json!({ "field": field, "value": amount, "limit": limit }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::{StrategyKey, StrategyRecord, Timestamp, Transition};
    use bastion_governance::{AdmissionConfig, KillSwitchConfig};

    fn engine() -> PolicyEngine {
        PolicyEngine::new(
            PolicyConfig::new().with_artifact_root("/var/bastion/artifacts"),
            AdmissionController::new(AdmissionConfig::default(), KillSwitchConfig::default()),
        )
    }

    fn research(params: Value) -> JobSpec {
        JobSpec::new(JobType::ResearchRun, params)
    }

    fn accepted(spec: &JobSpec) -> JobRecord {
        JobRecord::from_submission(
            JobId::new(),
            spec,
            &PolicyResult::pass(STAGE_PRE),
            Timestamp::EPOCH,
        )
    }

    #[test]
    fn test_preflight_pass() {
        let spec = research(json!({"strategy_id": "mom", "dataset": "spx", "memory_mb": 4096}));
        assert!(engine().evaluate_preflight(&spec, &PortfolioState::new()).is_pass());
    }

    #[test]
    fn test_preflight_requires_object() {
        let result = engine().evaluate_preflight(&research(json!([1, 2])), &PortfolioState::new());
        assert_eq!(result.code, PolicyCode::InvalidParams);
        assert_eq!(result.stage, PolicyStage::Preflight);
    }

    #[test]
    fn test_preflight_missing_field() {
        let spec = research(json!({"strategy_id": "mom", "dataset": null}));
        let result = engine().evaluate_preflight(&spec, &PortfolioState::new());
        assert_eq!(result.code, PolicyCode::MissingRequiredField);
        assert_eq!(result.details["field"], "dataset");
    }

    #[test]
    fn test_preflight_memory_ceiling() {
        let spec = research(json!({"strategy_id": "mom", "dataset": "spx", "memory_mb": 6001}));
        let result = engine().evaluate_preflight(&spec, &PortfolioState::new());
        assert_eq!(result.code, PolicyCode::ThresholdExceeded);
        assert_eq!(result.details["limit"], 6000);

        let spec = research(json!({"strategy_id": "mom", "dataset": "spx", "memory_mb": "lots"}));
        let result = engine().evaluate_preflight(&spec, &PortfolioState::new());
        assert_eq!(result.code, PolicyCode::InvalidParams);
    }

    #[test]
    fn test_preflight_is_deterministic() {
        let spec = research(json!({"dataset": "spx", "strategy_id": "mom", "timeout_secs": 1e9}));
        let e = engine();
        let first = e.evaluate_preflight(&spec, &PortfolioState::new());
        let second = e.evaluate_preflight(&spec, &PortfolioState::new());
        assert_eq!(first, second);
    }

    #[test]
    fn test_preflight_admission_candidate() {
        let key = StrategyKey::new("carry", "v1").unwrap();
        let mut record = StrategyRecord::new(key, "p", "carry", Timestamp::EPOCH).with_volatility(0.2);
        record.record_transition(Transition::Graduate, "validated", Timestamp::EPOCH);
        record.record_transition(Transition::Promote, "promoted", Timestamp::EPOCH);
        let portfolio = PortfolioState::new().with_record(record);

        let spec = JobSpec::new(
            JobType::PortfolioAdmission,
            json!({"candidate": {"strategy": "carry@v1"}}),
        );
        let result = engine().evaluate_preflight(&spec, &portfolio);
        assert!(result.is_pass(), "{result:?}");
        assert!(result.details["admission"]["allocation"].is_number());

        let unknown = JobSpec::new(
            JobType::PortfolioAdmission,
            json!({"candidate": {"strategy": "ghost@v1"}}),
        );
        let result = engine().evaluate_preflight(&unknown, &portfolio);
        assert_eq!(result.code, PolicyCode::LifecycleIneligible);

        let malformed = JobSpec::new(JobType::PortfolioAdmission, json!({"candidate": "carry"}));
        let result = engine().evaluate_preflight(&malformed, &portfolio);
        assert_eq!(result.code, PolicyCode::InvalidParams);
    }

    #[test]
    fn test_postflight_path_escape() {
        let spec = research(json!({"strategy_id": "mom", "dataset": "spx"}));
        let job = accepted(&spec);
        let outputs = vec!["metrics.json".to_string(), "../../etc/passwd".to_string()];
        let result = engine().evaluate_postflight(&job, &outputs);
        assert_eq!(result.code, PolicyCode::PathEscape);
        assert_eq!(result.stage, PolicyStage::Postflight);
        assert_eq!(result.details["path"], "../../etc/passwd");
    }

    #[test]
    fn test_postflight_required_output() {
        let spec = research(json!({"strategy_id": "mom", "dataset": "spx"}));
        let job = accepted(&spec);
        let result = engine().evaluate_postflight(&job, &["report.html".to_string()]);
        assert_eq!(result.code, PolicyCode::MissingOutput);

        let result = engine().evaluate_postflight(&job, &["./metrics.json".to_string()]);
        assert!(result.is_pass());
        assert_eq!(result.details["outputs"], json!(["metrics.json"]));
    }

    #[test]
    fn test_postflight_output_limit() {
        let e = PolicyEngine::new(PolicyConfig::new().with_max_outputs(1), AdmissionController::default());
        let job = accepted(&JobSpec::new(JobType::BuildData, json!({"dataset": "spx"})));
        let outputs = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            e.evaluate_postflight(&job, &outputs).code,
            PolicyCode::OutputLimitExceeded
        );
    }

    #[test]
    fn test_postflight_verifies_disk() {
        let dir = tempfile::tempdir().unwrap();
        let e = PolicyEngine::new(
            PolicyConfig::new().with_verify_outputs_on_disk(true),
            AdmissionController::default(),
        );
        let mut job = accepted(&JobSpec::new(JobType::BuildData, json!({"dataset": "spx"})));
        job.artifact_dir = Some(dir.path().display().to_string());

        let outputs = vec!["bars.parquet".to_string()];
        assert_eq!(e.evaluate_postflight(&job, &outputs).code, PolicyCode::MissingOutput);
        std::fs::write(dir.path().join("bars.parquet"), b"bars").unwrap();
        assert!(e.evaluate_postflight(&job, &outputs).is_pass());
    }

    #[test]
    fn test_artifact_dir_for() {
        let id = JobId::new();
        assert_eq!(
            engine().artifact_dir_for(id),
            PathBuf::from("/var/bastion/artifacts").join(id.to_string())
        );
    }
}
