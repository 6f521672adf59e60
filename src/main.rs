//! Kumo-Crawl main entry point
//!
//! This is the command-line interface for running the crawl stages, either
//! one stage per process or the whole pipeline in a single process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kumo_crawl::bus::{open_bus, MessageBus};
use kumo_crawl::config::{load_config_with_hash, validate_shared_backends, Config};
use kumo_crawl::crawler::{
    inject_seeds, shutdown_channel, AckDelay, Coordinator, FetchStage, FrontierWorker, ParseStage,
    ShutdownSignal,
};
use kumo_crawl::output::AnalyticsSink;
use kumo_crawl::store::{current_sequence, open_store, resolve_id, resolve_url, IdentifierStore};
use kumo_crawl::url::normalize_url;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Kumo-Crawl: a staged, horizontally scalable web crawler
///
/// Every stage reads the same configuration file and talks to the others only
/// through the shared message bus and identifier store.
#[derive(Parser, Debug)]
#[command(name = "kumo-crawl")]
#[command(version)]
#[command(about = "A staged, horizontally scalable web crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Admit candidate URLs and assign their ids
    Frontier,

    /// Download pages for admitted ids
    Fetcher,

    /// Extract links from downloaded pages
    Parser,

    /// Aggregate and report crawl statistics
    Analyzer,

    /// Publish seed URLs to the frontier's inbound queue
    Seed {
        #[arg(required = true, value_name = "URL")]
        urls: Vec<String>,
    },

    /// Run every stage in this process
    Run {
        /// Seed URL to publish once the stages are up (repeatable)
        #[arg(long = "seed", value_name = "URL")]
        seeds: Vec<String>,
    },

    /// Look up a URL record by id or by URL
    Resolve {
        #[arg(value_name = "ID|URL")]
        target: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if !matches!(cli.command, Command::Run { .. }) {
        validate_shared_backends(&config)?;
    }

    let store = open_store(&config.store).context("failed to open identifier store")?;
    let bus = open_bus(&config.bus).context("failed to open message bus")?;

    match cli.command {
        Command::Frontier => {
            let shutdown = shutdown_on_ctrl_c();
            run_frontier(store, bus, &config, shutdown).await?;
        }
        Command::Fetcher => {
            let shutdown = shutdown_on_ctrl_c();
            FetchStage::from_config(store, bus, &config)?
                .run(shutdown)
                .await?;
        }
        Command::Parser => {
            let shutdown = shutdown_on_ctrl_c();
            ParseStage::from_config(store, bus, &config)
                .run(shutdown)
                .await?;
        }
        Command::Analyzer => {
            let shutdown = shutdown_on_ctrl_c();
            AnalyticsSink::from_config(bus, &config)
                .run(shutdown)
                .await?;
        }
        Command::Seed { urls } => {
            let count = inject_seeds(bus.as_ref(), &config.queues.inbound_candidates, &urls).await?;
            println!("Published {} seed(s) to '{}'", count, config.queues.inbound_candidates);
        }
        Command::Run { seeds } => {
            handle_run(store, bus, &config, &seeds).await?;
        }
        Command::Resolve { target } => {
            handle_resolve(store.as_ref(), &target).await?;
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("kumo_crawl=info,warn"),
            1 => EnvFilter::new("kumo_crawl=debug,info"),
            2 => EnvFilter::new("kumo_crawl=trace,debug"),
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

/// Returns a shutdown signal that fires on Ctrl-C
fn shutdown_on_ctrl_c() -> ShutdownSignal {
    let (tx, rx) = shutdown_channel();
    tokio::spawn(forward_ctrl_c(tx));
    rx
}

async fn forward_ctrl_c(tx: watch::Sender<bool>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Interrupt received, finishing current messages"),
        Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
    }
    let _ = tx.send(true);
}

async fn run_frontier(
    store: Arc<dyn IdentifierStore>,
    bus: Arc<dyn MessageBus>,
    config: &Config,
    shutdown: ShutdownSignal,
) -> anyhow::Result<()> {
    let coordinator = Arc::new(Coordinator::from_config(store, bus, config)?);
    let worker = FrontierWorker::new(
        coordinator,
        config.frontier.prefetch,
        AckDelay::new(config.frontier.ack_delay()),
    );
    worker.run(shutdown).await?;
    Ok(())
}

/// Runs all four stages concurrently until Ctrl-C
async fn handle_run(
    store: Arc<dyn IdentifierStore>,
    bus: Arc<dyn MessageBus>,
    config: &Config,
    seeds: &[String],
) -> anyhow::Result<()> {
    let shutdown = shutdown_on_ctrl_c();

    let coordinator = Arc::new(Coordinator::from_config(store.clone(), bus.clone(), config)?);
    let frontier = tokio::spawn(
        FrontierWorker::new(
            coordinator,
            config.frontier.prefetch,
            AckDelay::new(config.frontier.ack_delay()),
        )
        .run(shutdown.clone()),
    );
    let fetcher = tokio::spawn(
        FetchStage::from_config(store.clone(), bus.clone(), config)?.run(shutdown.clone()),
    );
    let parser =
        tokio::spawn(ParseStage::from_config(store.clone(), bus.clone(), config).run(shutdown.clone()));
    let analyzer = tokio::spawn(AnalyticsSink::from_config(bus.clone(), config).run(shutdown));

    if !seeds.is_empty() {
        inject_seeds(bus.as_ref(), &config.queues.inbound_candidates, seeds).await?;
    }

    let counts = frontier.await??;
    let fetched = fetcher.await??;
    let parsed = parser.await??;
    analyzer.await??;

    tracing::info!(
        "Crawl stopped: {}; {} pages fetched, {} pages parsed",
        counts,
        fetched,
        parsed
    );
    Ok(())
}

/// Prints the record behind an id or a URL
async fn handle_resolve(store: &dyn IdentifierStore, target: &str) -> anyhow::Result<()> {
    if let Ok(id) = target.parse::<u32>() {
        match resolve_id(store, id).await? {
            Some(url) => println!("{} -> {}", id, url),
            None => println!("{} is not bound to any URL", id),
        }
    } else {
        let url = normalize_url(target)?;
        match resolve_url(store, url.as_str()).await? {
            Some(id) => println!("{} -> {}", url, id),
            None => println!("{} has not been admitted", url),
        }
    }

    match current_sequence(store).await? {
        Some(next) => println!("Next id: {}", next),
        None => println!("Sequence counter not seeded yet"),
    }

    Ok(())
}
