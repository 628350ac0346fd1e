//! BASTION CLI
//!
//! Operator interface to the job supervisor and portfolio governance engine.
//! The database takes an exclusive lock, so offline commands cannot run
//! while `serve` holds the same file.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;

use bastion_core::{
    JobFilter, JobId, JobSpec, JobState, JobType, SnapshotReason, StrategyKey, StrategyRecord,
    Transition,
};
use bastion_governance::{Candidate, CandidateRef, ExposureUpdate};
use bastion_store::{Cursor, PageRequest};
use bastion_supervisor::{CancelOutcome, Supervisor};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{bail, eyre};
use config::EngineConfig;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bastion")]
#[command(about = "BASTION - Job supervisor and portfolio governance engine", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "bastion.json")]
    config: PathBuf,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor until interrupted
    Serve,
    /// Submit a job
    Submit {
        /// Job type, e.g. RESEARCH_RUN
        #[arg(short = 't', long = "type")]
        job_type: JobType,
        /// Parameters as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,
    },
    /// Show a job
    Get {
        /// Job ID
        id: JobId,
    },
    /// List jobs in creation order
    List {
        /// Only jobs in this state
        #[arg(long)]
        state: Option<JobState>,
        /// Only jobs of this type
        #[arg(short = 't', long = "type")]
        job_type: Option<JobType>,
        /// Page size
        #[arg(short, long)]
        limit: Option<usize>,
        /// Continue after this cursor
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Cancel a queued job
    Cancel {
        /// Job ID
        id: JobId,
    },
    /// Governed strategy records
    Strategy {
        #[command(subcommand)]
        command: StrategyCommands,
    },
    /// Evaluate an admission without committing it
    Admit {
        /// Registered strategy `{"strategy": "id@version"}` or a full
        /// strategy record
        #[arg(long)]
        candidate: String,
        /// LIVE member to replace, `id@version`
        #[arg(long)]
        replaces: Option<StrategyKey>,
    },
    /// Portfolio snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },
}

#[derive(Subcommand)]
enum StrategyCommands {
    /// Register a strategy in INCUBATION
    Register {
        /// Strategy identifier
        id: String,
        /// Version hash
        version: String,
        /// Hash of the frozen parameters
        #[arg(long)]
        params_hash: String,
        /// Regime bucket
        #[arg(long)]
        bucket: String,
        /// Maximum drawdown seen in validation
        #[arg(long, default_value_t = 0.0)]
        max_drawdown: f64,
        /// Rolling volatility
        #[arg(long, default_value_t = 0.0)]
        volatility: f64,
        /// Signal samples, oldest first
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        signal: Vec<f64>,
    },
    /// Show a strategy
    Show {
        /// `id@version`
        key: StrategyKey,
    },
    /// List strategies
    List,
    /// Request a lifecycle transition
    Transition {
        /// `id@version`
        key: StrategyKey,
        /// GRADUATE, PROMOTE, DEMOTE, RECOVER, FREEZE or RETIRE
        transition: Transition,
        /// Recorded with the transition
        #[arg(long, default_value = "operator request")]
        reason: String,
    },
    /// Record live metrics and run the kill switch
    Exposure {
        /// `id@version`
        key: StrategyKey,
        /// Current drawdown
        #[arg(long)]
        drawdown: f64,
        /// Updated rolling volatility
        #[arg(long)]
        volatility: Option<f64>,
        /// New signal samples, oldest first
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        signal: Vec<f64>,
        /// Revised historical maximum drawdown
        #[arg(long)]
        max_drawdown: Option<f64>,
        /// Flag a structural failure
        #[arg(long)]
        structural_failure: bool,
    },
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// Capture the portfolio now
    Take,
    /// Show the most recent snapshot
    Latest,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bastion=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = EngineConfig::load(&cli.config)?;
    let supervisor = config.open()?;

    match cli.command {
        Commands::Serve => serve(supervisor).await,
        Commands::Submit { job_type, params } => {
            let params: Value = serde_json::from_str(&params)
                .map_err(|e| eyre!("--params is not valid JSON: {}", e))?;
            let submission = supervisor.submit(&JobSpec::new(job_type, params))?;
            if submission.deduplicated {
                info!(job_id = %submission.id(), "identical job already submitted");
            }
            print(&submission.record)
        }
        Commands::Get { id } => match supervisor.get(id)? {
            Some(record) => print(&record),
            None => bail!("job {} not found", id),
        },
        Commands::List {
            state,
            job_type,
            limit,
            cursor,
        } => {
            let filter = JobFilter { state, job_type };
            let mut page = PageRequest {
                limit,
                cursor: None,
            };
            if let Some(cursor) = cursor {
                page = page.after(Cursor::decode(&cursor)?);
            }
            let result = supervisor.list(&filter, &page)?;
            print(&serde_json::json!({
                "jobs": result.jobs,
                "next_cursor": result.next_cursor.map(|c| c.encode()),
            }))
        }
        Commands::Cancel { id } => cancel(&supervisor, id).await,
        Commands::Strategy { command } => strategy(&supervisor, command),
        Commands::Admit {
            candidate,
            replaces,
        } => admit(&supervisor, &candidate, replaces),
        Commands::Snapshot { command } => match command {
            SnapshotCommands::Take => {
                let reason = SnapshotReason::GovernanceEvent {
                    description: "operator request".to_string(),
                };
                print(&supervisor.governance().take_snapshot(reason)?)
            }
            SnapshotCommands::Latest => match supervisor.governance().latest_snapshot()? {
                Some(snapshot) => print(&snapshot),
                None => bail!("no snapshot has been taken"),
            },
        },
    }
}

async fn serve(supervisor: Supervisor) -> Result<()> {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for interrupt, stopping");
        }
        info!("interrupt received, shutting down");
        token.cancel();
    });
    supervisor.run(shutdown).await?;
    Ok(())
}

async fn cancel(supervisor: &Supervisor, id: JobId) -> Result<()> {
    // A RUNNING job belongs to a serving supervisor; this process has no
    // worker to signal.
    if let Some(record) = supervisor.get(id)? {
        if record.state == JobState::Running {
            bail!("job {} is RUNNING; cancel it through the serving supervisor", id);
        }
    }
    match supervisor.cancel(id).await? {
        CancelOutcome::NotFound => bail!("job {} not found", id),
        outcome => print(&outcome),
    }
}

fn strategy(supervisor: &Supervisor, command: StrategyCommands) -> Result<()> {
    let governance = supervisor.governance();
    match command {
        StrategyCommands::Register {
            id,
            version,
            params_hash,
            bucket,
            max_drawdown,
            volatility,
            signal,
        } => {
            let key = StrategyKey::new(id, version)?;
            let record = StrategyRecord::new(key, params_hash, bucket, governance.clock().now())
                .with_historical_max_drawdown(max_drawdown)
                .with_volatility(volatility)
                .with_signal(signal);
            print(&governance.register(&record)?)
        }
        StrategyCommands::Show { key } => match governance.strategy(&key)? {
            Some(record) => print(&record),
            None => bail!("strategy {} not registered", key),
        },
        StrategyCommands::List => print(&governance.strategies()?),
        StrategyCommands::Transition {
            key,
            transition,
            reason,
        } => print(&governance.transition(&key, transition, &reason)?),
        StrategyCommands::Exposure {
            key,
            drawdown,
            volatility,
            signal,
            max_drawdown,
            structural_failure,
        } => {
            let mut update = ExposureUpdate::drawdown(drawdown).with_signal(signal);
            if let Some(volatility) = volatility {
                update = update.with_volatility(volatility);
            }
            if structural_failure {
                update = update.with_structural_failure();
            }
            update.historical_max_drawdown = max_drawdown;
            print(&governance.record_exposure(&key, &update)?)
        }
    }
}

fn admit(supervisor: &Supervisor, candidate: &str, replaces: Option<StrategyKey>) -> Result<()> {
    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| eyre!("--candidate is not valid JSON: {}", e))?;
    let governance = supervisor.governance();
    let decision = if value.get("strategy").is_some() {
        let mut reference = CandidateRef::from_value(&value)?;
        if let Some(key) = replaces {
            reference.replaces = Some(key.to_string());
        }
        governance.dry_run(&reference)?
    } else {
        let record: StrategyRecord = serde_json::from_value(value)
            .map_err(|e| eyre!("--candidate is neither a reference nor a strategy record: {}", e))?;
        let mut candidate = Candidate::new(record);
        if let Some(key) = replaces {
            candidate = candidate.replacing(key);
        }
        governance.dry_run_candidate(&candidate)?
    };
    print(&decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_list_filters() {
        let cli = Cli::try_parse_from([
            "bastion", "list", "--state", "queued", "--type", "research-run", "--limit", "5",
        ])
        .unwrap();
        match cli.command {
            Commands::List {
                state,
                job_type,
                limit,
                cursor,
            } => {
                assert_eq!(state, Some(JobState::Queued));
                assert_eq!(job_type, Some(JobType::ResearchRun));
                assert_eq!(limit, Some(5));
                assert!(cursor.is_none());
            }
            _ => panic!("expected list"),
        }
        assert_eq!(cli.config, PathBuf::from("bastion.json"));
    }

    #[test]
    fn test_parse_exposure_signal() {
        let cli = Cli::try_parse_from([
            "bastion",
            "--log-json",
            "strategy",
            "exposure",
            "mom@v1",
            "--drawdown",
            "0.12",
            "--signal",
            "0.1,-0.2,0.3",
        ])
        .unwrap();
        assert!(cli.log_json);
        match cli.command {
            Commands::Strategy {
                command: StrategyCommands::Exposure { key, signal, .. },
            } => {
                assert_eq!(key.to_string(), "mom@v1");
                assert_eq!(signal, vec![0.1, -0.2, 0.3]);
            }
            _ => panic!("expected strategy exposure"),
        }
    }

    #[tokio::test]
    async fn test_offline_cancel_refuses_running_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.store = bastion_store::StoreConfig::new(dir.path().join("bastion.redb"));
        config.policy = config.policy.with_artifact_root(dir.path().join("artifacts"));
        let supervisor = config.open().unwrap();

        let spec = JobSpec::new(
            JobType::BuildData,
            serde_json::json!({"dataset": "spx"}),
        );
        let id = supervisor.submit(&spec).unwrap().id();
        cancel(&supervisor, id).await.unwrap();
        assert_eq!(supervisor.get(id).unwrap().unwrap().state, JobState::Cancelled);
        assert!(cancel(&supervisor, JobId::new()).await.is_err());
    }
}
