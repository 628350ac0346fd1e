//! Policy configuration.

use bastion_core::JobType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Root under which every job gets its own artifact directory
    pub artifact_root: PathBuf,
    /// Maximum canonical JSON size of declared params, in bytes
    pub max_params_bytes: usize,
    /// Ceiling for the `memory_mb` parameter
    pub memory_ceiling_mb: u64,
    /// Ceiling for the `timeout_secs` parameter
    pub max_timeout_secs: u64,
    /// Maximum number of declared outputs
    pub max_outputs: usize,
    /// Require declared outputs to exist and resolve inside the artifact
    /// directory after following symlinks
    pub verify_outputs_on_disk: bool,
    /// Parameters each job type must carry
    pub required_fields: IndexMap<JobType, Vec<String>>,
    /// Outputs each job type must declare
    pub required_outputs: IndexMap<JobType, Vec<String>>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let fields = |names: &[&str]| names.iter().map(|n| (*n).to_string()).collect::<Vec<_>>();

        let mut required_fields = IndexMap::new();
        required_fields.insert(JobType::ResearchRun, fields(&["strategy_id", "dataset"]));
        required_fields.insert(JobType::BuildData, fields(&["dataset"]));
        required_fields.insert(JobType::PortfolioBuild, fields(&["portfolio_id", "members"]));
        required_fields.insert(JobType::PortfolioAdmission, fields(&["candidate"]));
        required_fields.insert(
            JobType::WalkForward,
            fields(&["strategy_id", "dataset", "folds"]),
        );

        let mut required_outputs = IndexMap::new();
        required_outputs.insert(JobType::ResearchRun, fields(&["metrics.json"]));
        required_outputs.insert(JobType::PortfolioBuild, fields(&["portfolio.json"]));
        required_outputs.insert(JobType::WalkForward, fields(&["walk_forward.json"]));

        Self {
            artifact_root: PathBuf::from("artifacts"),
            max_params_bytes: 64 * 1024,
            memory_ceiling_mb: 6_000,
            max_timeout_secs: 24 * 60 * 60,
            max_outputs: 256,
            verify_outputs_on_disk: false,
            required_fields,
            required_outputs,
        }
    }
}

impl PolicyConfig {
    /// Create with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the artifact root
    #[must_use]
    pub fn with_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_root = root.into();
        self
    }

    /// Set the memory ceiling
    #[must_use]
    pub fn with_memory_ceiling_mb(mut self, ceiling: u64) -> Self {
        self.memory_ceiling_mb = ceiling;
        self
    }

    /// Set the output limit
    #[must_use]
    pub fn with_max_outputs(mut self, limit: usize) -> Self {
        self.max_outputs = limit;
        self
    }

    /// Enable or disable on-disk output verification
    #[must_use]
    pub fn with_verify_outputs_on_disk(mut self, verify: bool) -> Self {
        self.verify_outputs_on_disk = verify;
        self
    }

    /// Replace the required outputs of one job type
    #[must_use]
    pub fn with_required_outputs(mut self, job_type: JobType, outputs: Vec<String>) -> Self {
        self.required_outputs.insert(job_type, outputs);
        self
    }

    /// Required fields for a job type
    #[must_use]
    pub fn fields_for(&self, job_type: JobType) -> &[String] {
        self.required_fields
            .get(&job_type)
            .map_or(&[], Vec::as_slice)
    }

    /// Required outputs for a job type
    #[must_use]
    pub fn outputs_for(&self, job_type: JobType) -> &[String] {
        self.required_outputs
            .get(&job_type)
            .map_or(&[], Vec::as_slice)
    }
}
