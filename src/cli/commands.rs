//! CLI command definitions for shardsweep.
//!
//! `serve` runs a node. The remaining commands either talk to a running
//! node over HTTP or inspect the node's progress files directly.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;

use crate::campaign::{CampaignCoordinator, UnitRange};
use crate::config::SweepConfig;
use crate::metrics::init_metrics;
use crate::notify;
use crate::probe::CommandProbe;
use crate::progress::ProgressStore;
use crate::queue::{CreateJobRequest, JobSettings, PeerClient, QueueManager};
use crate::resources::{ResourcePool, StaticProvisioner};
use crate::server;

/// Distributed, credential-partitioned sweep over numeric unit ranges.
#[derive(Parser)]
#[command(name = "shardsweep")]
#[command(about = "Run and control a shardsweep node")]
#[command(version)]
#[command(
    long_about = "shardsweep splits a numeric range across nodes and probes every unit through a pool of \
credentialed channels, stopping everywhere once a unit succeeds.\n\nNodes are configured through \
SWEEP_* environment variables.\n\nExample usage:\n  shardsweep serve\n  shardsweep create-job --target acct --start 0 --end 9999"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run this node's HTTP server and job queue.
    Serve(ServeArgs),

    /// Split a range across all nodes and queue it.
    #[command(name = "create-job")]
    CreateJob(CreateJobArgs),

    /// Show a node's queue.
    Status(StatusArgs),

    /// Re-queue a finished job; already-attempted units are skipped.
    Resume(ResumeArgs),

    /// Inspect or edit local progress records.
    Progress(ProgressArgs),
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Override SWEEP_BIND.
    #[arg(long)]
    pub bind: Option<String>,

    /// Override SWEEP_DATA_DIR.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct CreateJobArgs {
    /// Target key the campaign probes.
    #[arg(short, long)]
    pub target: String,

    /// First unit, inclusive.
    #[arg(long)]
    pub start: u64,

    /// Last unit, inclusive.
    #[arg(long)]
    pub end: u64,

    /// Human-readable job name (defaults to the target key).
    #[arg(short, long)]
    pub name: Option<String>,

    /// Workers per campaign on every node.
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Shuffle each worker's batch.
    #[arg(long)]
    pub shuffle: bool,

    /// Consecutive indeterminate results before a worker stops.
    #[arg(long)]
    pub max_indeterminate: Option<u32>,

    /// Node to submit through (defaults to this node's configured address).
    #[arg(long)]
    pub node: Option<String>,

    /// Print the created shards as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Node to query (defaults to this node's configured address).
    #[arg(long)]
    pub node: Option<String>,

    /// Print raw JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ResumeArgs {
    /// Id of the finished or interrupted job.
    pub job_id: String,

    /// Node holding the job (defaults to this node's configured address).
    #[arg(long)]
    pub node: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ProgressArgs {
    /// Override SWEEP_DATA_DIR.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: ProgressSubcommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum ProgressSubcommand {
    /// Print counts and unblocked valid units for a target.
    Stats {
        target: String,
        #[arg(long)]
        json: bool,
    },

    /// Delete every progress record for a target.
    Reset { target: String },

    /// Mark units as blocklisted for a target.
    Blocklist {
        target: String,
        #[arg(required = true)]
        units: Vec<u64>,
    },
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve_command(args).await,
        Commands::CreateJob(args) => run_create_job_command(args).await,
        Commands::Status(args) => run_status_command(args).await,
        Commands::Resume(args) => run_resume_command(args).await,
        Commands::Progress(args) => run_progress_command(args).await,
    }
}

fn load_config() -> anyhow::Result<SweepConfig> {
    SweepConfig::from_env().context("Invalid SWEEP_* configuration")
}

/// Address of the node an operator command talks to.
fn resolve_node(config: &SweepConfig, node: Option<String>) -> anyhow::Result<String> {
    if let Some(node) = node {
        return Ok(node);
    }
    config
        .node_address(config.node_id)
        .map(str::to_string)
        .context("No address configured for this node; pass --node")
}

// ============================================================================
// serve
// ============================================================================

async fn run_serve_command(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = load_config()?;
    if let Some(bind) = args.bind {
        config = config.with_bind_address(bind);
    }
    if let Some(dir) = args.data_dir {
        config = config.with_data_dir(dir);
    }
    config.validate().context("Invalid configuration")?;
    config
        .require_serving()
        .context("Node cannot serve without a probe and resources")?;

    init_metrics().context("Failed to register metrics")?;

    let Some(probe) = CommandProbe::from_config(&config) else {
        bail!("SWEEP_PROBE_COMMAND must point at the probe executable");
    };

    let config = Arc::new(config);
    let store = Arc::new(ProgressStore::new(&config.data_dir, config.unit_width));
    let provisioner = Arc::new(StaticProvisioner::from_specs(&config.resources));
    let pool = Arc::new(ResourcePool::from_config(&config, provisioner));
    let notifier = notify::from_config(config.ntfy.as_ref());

    let coordinator = Arc::new(CampaignCoordinator::new(
        Arc::clone(&config),
        store,
        pool,
        Arc::new(probe),
        notifier,
    ));
    let peers = PeerClient::from_config(&config)?;
    let manager = QueueManager::open(Arc::clone(&config), coordinator, peers)?;

    info!(
        node_id = config.node_id,
        total_nodes = config.total_nodes,
        resources = config.resources.len(),
        mode = ?config.assignment_mode,
        data_dir = %config.data_dir.display(),
        "Node starting"
    );

    server::serve(manager, &config.bind_address).await?;
    Ok(())
}

// ============================================================================
// operator commands
// ============================================================================

async fn run_create_job_command(args: CreateJobArgs) -> anyhow::Result<()> {
    let config = load_config()?;
    let range = UnitRange::new(args.start, args.end)?;
    let node = resolve_node(&config, args.node)?;

    let request = CreateJobRequest {
        name: args.name.unwrap_or_else(|| args.target.clone()),
        target_key: args.target,
        range,
        settings: JobSettings {
            concurrency: args.concurrency,
            shuffle: args.shuffle.then_some(true),
            max_indeterminate: args.max_indeterminate,
        },
    };

    let client = PeerClient::from_config(&config)?;
    let jobs = client.create_job(&node, &request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    println!("Created {} shard(s) for '{}' over {}", jobs.len(), request.target_key, range);
    for job in &jobs {
        println!(
            "  node {:>2}  {}  {}  {}",
            job.node_id,
            job.range,
            job.id,
            job.node_address.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let config = load_config()?;
    let node = resolve_node(&config, args.node)?;
    let client = PeerClient::from_config(&config)?;
    let status = client.queue_status(&node).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let counts = &status.counts;
    println!("Node {}/{} ({})", status.node_id, status.total_nodes, node);
    println!(
        "  pending {}  running {}  completed {}  error {}  cancelled {}  interrupted {}",
        counts.pending,
        counts.running,
        counts.completed,
        counts.error,
        counts.cancelled,
        counts.interrupted
    );
    if let Some(current) = &status.current_job {
        println!("  current: {}", current);
    }
    for job in &status.jobs {
        let detail = match (&job.found_unit, &job.error) {
            (Some(unit), _) => format!("found {}", unit),
            (None, Some(error)) => error.clone(),
            (None, None) => String::new(),
        };
        println!(
            "  {:<12} {}  {}  {}  {}",
            job.status, job.id, job.target_key, job.range, detail
        );
    }
    Ok(())
}

async fn run_resume_command(args: ResumeArgs) -> anyhow::Result<()> {
    let config = load_config()?;
    let node = resolve_node(&config, args.node)?;
    let client = PeerClient::from_config(&config)?;
    let job = client.resume_job(&node, &args.job_id).await?;
    println!("Resumed {} as {} ({})", args.job_id, job.id, job.status);
    Ok(())
}

// ============================================================================
// progress
// ============================================================================

async fn run_progress_command(args: ProgressArgs) -> anyhow::Result<()> {
    let mut config = load_config()?;
    if let Some(dir) = args.data_dir {
        config = config.with_data_dir(dir);
    }
    let store = ProgressStore::new(&config.data_dir, config.unit_width);

    match args.command {
        ProgressSubcommand::Stats { target, json } => {
            let stats = store.stats(&target);
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Target '{}'", target);
                println!("  attempted:   {}", stats.attempted);
                println!("  blocklisted: {}", stats.blocklisted);
                println!("  valid:       {}", stats.valid);
                for unit in &stats.valid_unblocked {
                    println!("  valid unit:  {}", unit);
                }
            }
        }
        ProgressSubcommand::Reset { target } => {
            store
                .reset(&target)
                .await
                .with_context(|| format!("Failed to reset progress for '{}'", target))?;
            println!("Progress for '{}' cleared", target);
        }
        ProgressSubcommand::Blocklist { target, units } => {
            for unit in &units {
                store.add_blocklist(&target, *unit).await;
            }
            println!("Blocklisted {} unit(s) for '{}'", units.len(), target);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_create_job_args() {
        let cli = Cli::try_parse_from([
            "shardsweep",
            "create-job",
            "--target",
            "acct",
            "--start",
            "0",
            "--end",
            "9999",
            "-c",
            "3",
            "--shuffle",
        ])
        .expect("should parse");

        match cli.command {
            Commands::CreateJob(args) => {
                assert_eq!(args.target, "acct");
                assert_eq!(args.start, 0);
                assert_eq!(args.end, 9999);
                assert_eq!(args.concurrency, Some(3));
                assert!(args.shuffle);
                assert!(args.node.is_none());
                assert!(!args.json);
            }
            _ => panic!("Expected CreateJob command"),
        }
    }

    #[test]
    fn test_progress_blocklist_requires_units() {
        let result = Cli::try_parse_from(["shardsweep", "progress", "blocklist", "acct"]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from(["shardsweep", "progress", "blocklist", "acct", "7", "12"])
            .expect("should parse");
        match cli.command {
            Commands::Progress(ProgressArgs {
                command: ProgressSubcommand::Blocklist { target, units },
                ..
            }) => {
                assert_eq!(target, "acct");
                assert_eq!(units, vec![7, 12]);
            }
            _ => panic!("Expected progress blocklist"),
        }
    }

    #[test]
    fn test_log_level_is_global() {
        let cli = Cli::try_parse_from(["shardsweep", "status", "--log-level", "debug"])
            .expect("should parse");
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn test_resolve_node_prefers_flag() {
        let config = SweepConfig::new().with_nodes(
            1,
            vec!["http://a:3000".to_string(), "http://b:3000".to_string()],
        );
        assert_eq!(
            resolve_node(&config, Some("http://x:1".to_string())).unwrap(),
            "http://x:1"
        );
        assert_eq!(resolve_node(&config, None).unwrap(), "http://a:3000");
    }
}
