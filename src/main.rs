//! Crawl-Relay main entry point
//!
//! Runs a coordinator and a pool of local fetch workers over the in-process
//! channel until interrupted.

use anyhow::{bail, Context};
use clap::Parser;
use crawl_relay::channel::MemoryChannel;
use crawl_relay::config::{load_config_with_hash, validate, Config};
use crawl_relay::coordinator::{print_dashboard, RunningCoordinator};
use crawl_relay::worker::{FetchWorker, HttpFetcher, PageFetcher};
use crawl_relay::{Coordinator, Frontier};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Crawl-Relay: a crawl task coordinator
///
/// Dispatches URL-fetch tasks to crawler workers, reassigns tasks whose
/// workers go silent, and never crawls the same normalized URL twice.
#[derive(Parser, Debug)]
#[command(name = "crawl-relay")]
#[command(version)]
#[command(about = "A crawl task coordinator", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Seed URL, in addition to those in the config file (repeatable)
    #[arg(long = "seed", value_name = "URL")]
    seeds: Vec<String>,

    /// Number of local fetch workers to run
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Seconds without a heartbeat before a task is reassigned
    #[arg(long, env = "CRAWL_TIMEOUT", value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Seconds between liveness sweeps
    #[arg(long, env = "CRAWL_SWEEP_INTERVAL", value_name = "SECONDS")]
    sweep_interval: Option<u64>,

    /// Maximum tasks in flight per worker
    #[arg(long, env = "CRAWL_MAX_IN_FLIGHT")]
    max_in_flight: Option<u32>,

    /// Attempts before a task is dead-lettered
    #[arg(long, env = "CRAWL_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Forget every URL already in the frontier before starting
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show frontier statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

impl Cli {
    /// Layers command-line overrides on top of the file configuration
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(timeout) = self.timeout {
            config.coordinator.heartbeat_timeout = timeout;
        }
        if let Some(interval) = self.sweep_interval {
            config.coordinator.sweep_interval = interval;
        }
        if let Some(limit) = self.max_in_flight {
            config.coordinator.max_in_flight_per_worker = limit;
        }
        if let Some(attempts) = self.max_attempts {
            config.coordinator.max_attempts = Some(attempts);
        }
        config.frontier.seeds.extend(self.seeds.iter().cloned());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            Config::default()
        }
    };
    cli.apply_overrides(&mut config);
    validate(&config).context("invalid configuration")?;

    if cli.dry_run {
        handle_dry_run(&config, cli.workers);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_run(config, cli.workers, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("crawl_relay=info,warn"),
            1 => EnvFilter::new("crawl_relay=debug,info"),
            2 => EnvFilter::new("crawl_relay=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration and seeds
fn handle_dry_run(config: &Config, workers: usize) {
    println!("=== Crawl-Relay Dry Run ===\n");

    let coordinator = &config.coordinator;
    println!("Coordinator:");
    println!("  Heartbeat timeout: {}s", coordinator.heartbeat_timeout);
    println!("  Sweep interval: {}s", coordinator.sweep_interval);
    println!("  Dispatch interval: {}ms", coordinator.dispatch_interval);
    println!("  Dashboard interval: {}s", coordinator.dashboard_interval);
    println!(
        "  Max in flight per worker: {}",
        coordinator.max_in_flight_per_worker
    );
    println!(
        "  Max in flight overall: {}",
        display_limit(coordinator.max_in_flight)
    );
    println!("  Max attempts: {}", display_limit(coordinator.max_attempts));

    println!("\nWorkers ({}):", workers);
    println!("  Request timeout: {}s", config.worker.request_timeout);
    println!("  Heartbeat interval: {}s", config.worker.heartbeat_interval);
    println!("  Max links per page: {}", config.worker.max_links_per_page);
    println!("  User agent: {}", config.worker.user_agent);

    println!("\nFrontier:");
    match &config.frontier.database_path {
        Some(path) => println!("  Database: {}", path),
        None => println!("  Database: (in memory)"),
    }

    println!("\nSeeds ({}):", config.frontier.seeds.len());
    for seed in &config.frontier.seeds {
        println!("  - {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

fn display_limit(limit: Option<u32>) -> String {
    limit.map_or_else(|| "unbounded".to_string(), |limit| limit.to_string())
}

/// Handles the --stats mode: shows what the frontier database holds
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let Some(path) = &config.frontier.database_path else {
        bail!("--stats needs [frontier] database-path to be set");
    };

    println!("Database: {}\n", path);
    let frontier = Frontier::open_sqlite(Path::new(path))
        .with_context(|| format!("failed to open frontier at {}", path))?;
    println!("URLs in frontier: {}", frontier.len()?);
    println!("Unfinished: {}", frontier.unfinished()?.len());
    Ok(())
}

fn open_frontier(config: &Config, fresh: bool) -> anyhow::Result<Frontier> {
    let frontier = match &config.frontier.database_path {
        Some(path) => Frontier::open_sqlite(Path::new(path))
            .with_context(|| format!("failed to open frontier at {}", path))?,
        None => Frontier::in_memory(),
    };

    if fresh {
        tracing::info!("Starting fresh crawl (clearing frontier)");
        frontier.clear()?;
    } else if !frontier.is_empty()? {
        tracing::info!(
            "Frontier already holds {} URLs; finished ones will not be crawled again",
            frontier.len()?
        );
    }
    Ok(frontier)
}

/// Handles the main run: coordinator plus local workers until Ctrl-C
async fn handle_run(config: Config, workers: usize, fresh: bool) -> anyhow::Result<()> {
    let channel = MemoryChannel::new(config.channel.ack_deadline());
    let frontier = open_frontier(&config, fresh)?;

    let coordinator = Arc::new(Coordinator::new(
        config.coordinator.clone(),
        frontier,
        Arc::new(channel.clone()),
    ));
    coordinator.resume()?;
    let seeded = coordinator.seed(&config.frontier.seeds)?;
    tracing::info!(
        "Seeded {} tasks from {} seed URLs",
        seeded,
        config.frontier.seeds.len()
    );

    let shutdown = CancellationToken::new();
    let mut running =
        RunningCoordinator::spawn(Arc::clone(&coordinator), &channel, &shutdown).await?;

    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&config.worker)?);
    let worker_shutdown = shutdown.child_token();
    let mut handles = Vec::with_capacity(workers);
    for n in 1..=workers {
        let worker = FetchWorker::new(
            format!("worker-{}", n),
            Arc::new(channel.clone()),
            Arc::clone(&fetcher),
            config.worker.clone(),
        );
        handles.push(worker.spawn(worker_shutdown.clone()).await?);
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("Interrupt received, draining");

    running.stop_dispatch().await;
    worker_shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!("Worker task panicked: {}", e);
        }
    }

    let snapshot = running.shutdown().await;
    channel.close();

    println!();
    print_dashboard(&snapshot);
    Ok(())
}
