//! FIM Monitor - file integrity watcher.
//!
//! # Commands
//!
//! - `fim-monitor run`: Watch the configured directory and record changes
//! - `fim-monitor events`: Print the most recent recorded events
//!
//! # Environment Variables
//!
//! See the [`config`](fim_monitor::config) module for available configuration options.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fim_monitor::alert::{format_alert, run_alerts};
use fim_monitor::config::Config;
use fim_monitor::digest::ChunkedSha256;
use fim_monitor::pipeline::WatcherLoop;
use fim_monitor::replication::Replicator;
use fim_monitor::retry::RetryPolicy;
use fim_monitor::state::FileStateTable;
use fim_monitor::store::{EventQuery, EventStore};
use fim_monitor::types::{EventType, Provenance};

/// Time allowed for background tasks to finish after the loop stops.
const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// FIM Monitor - file integrity watcher.
///
/// Records file creations, modifications and deletions under a directory
/// tree, identified by SHA-256 content digests.
#[derive(Parser, Debug)]
#[command(name = "fim-monitor")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    FIM_WATCH_DIR              Directory to watch (default: ~/.fim/watched)
    FIM_DB_PATH                Event database (default: ~/.fim/fim.db)
    FIM_ENDPOINT_NAME          Endpoint name on events (default: local_agent)
    FIM_AGENT_ID               Agent identifier (default: hostname)
    FIM_CHUNK_SIZE             Digest chunk size in bytes (default: 65536)
    FIM_CHANNEL_CAPACITY       Notification buffer (default: 1024)
    FIM_APPEND_RETRY_LIMIT     Attempts per event write (default: 3)
    FIM_SEED_FROM_STORE        Resume known hashes from the database (default: true)
    FIM_REPLICA_URL            Replica base URL (enables replication)
    FIM_REPLICA_BATCH_INTERVAL_SECS  Seconds between replication batches (default: 30)
    FIM_REPLICA_RETRY_LIMIT    Attempts per replication batch, 1-10 (default: 3)

EXAMPLES:
    # Watch a directory
    FIM_WATCH_DIR=/srv/www fim-monitor run

    # Show the last 20 deletions
    fim-monitor events --limit 20 --type deleted
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the monitor daemon.
    Run,

    /// Print the most recent recorded events, newest first.
    Events {
        /// Maximum number of events to print.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Only show events of this type (created, modified, deleted).
        #[arg(short = 't', long = "type")]
        event_type: Option<EventType>,

        /// Print one JSON object per line.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            runtime.block_on(run_monitor())
        }
        Command::Events {
            limit,
            event_type,
            json,
        } => run_events(limit, event_type, json),
    }
}

/// Prints recent events from the configured store.
fn run_events(limit: usize, event_type: Option<EventType>, json: bool) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let store = EventStore::open(&config.db_path)
        .with_context(|| format!("Failed to open event store at {}", config.db_path.display()))?;

    let mut query = EventQuery::recent(limit);
    if let Some(event_type) = event_type {
        query = query.with_types(vec![event_type]);
    }

    print_events(&store, &query, json).context("Failed to print events")?;
    Ok(())
}

/// Writes the events matching `query` to stdout. Returns how many were printed.
fn print_events(store: &EventStore, query: &EventQuery, json: bool) -> fim_monitor::Result<usize> {
    let events = store.query(query)?;
    for stored in &events {
        if json {
            println!("{}", serde_json::to_string(stored)?);
        } else {
            println!("#{} {}", stored.id, format_alert(&stored.event));
        }
    }
    Ok(events.len())
}

/// Builds the starting file state, seeded from the store when `seed` is set.
fn initial_state(store: &EventStore, seed: bool) -> fim_monitor::Result<FileStateTable> {
    if !seed {
        return Ok(FileStateTable::new());
    }
    let known = store.latest_hashes()?;
    info!(known_files = known.len(), "Seeded file state from the event store");
    Ok(FileStateTable::from_records(known))
}

/// Runs the monitor daemon.
async fn run_monitor() -> Result<()> {
    init_logging();

    info!("Starting FIM Monitor");

    let config = Config::from_env().context("Failed to load configuration")?;

    info!(
        watch_dir = %config.watch_dir.display(),
        db_path = %config.db_path.display(),
        endpoint = %config.endpoint_name,
        replication = config.replication.is_some(),
        "Configuration loaded"
    );

    if config.watch_dir_is_default && !config.watch_dir.exists() {
        info!(watch_dir = %config.watch_dir.display(), "Creating watch directory");
        std::fs::create_dir_all(&config.watch_dir).context("Failed to create watch directory")?;
    }

    let store = EventStore::open(&config.db_path)
        .with_context(|| format!("Failed to open event store at {}", config.db_path.display()))?;

    let state = initial_state(&store, config.seed_from_store)
        .context("Failed to read known hashes from the event store")?;

    let provenance = Provenance::detect(config.endpoint_name.clone());
    let digester = Arc::new(ChunkedSha256::new(config.chunk_size));
    let retry = RetryPolicy::default().with_max_attempts(u32::from(config.append_retry_limit));

    let (alert_tx, alert_rx) = mpsc::channel(config.channel_capacity);
    let mut watcher_loop = WatcherLoop::new(state, digester, Arc::new(store.clone()), provenance)
        .with_retry_policy(retry)
        .with_output(alert_tx);

    watcher_loop
        .subscribe(config.watch_dir.clone(), config.channel_capacity)
        .with_context(|| {
            format!(
                "Failed to subscribe to watch directory {}",
                config.watch_dir.display()
            )
        })?;

    let alerts = tokio::spawn(run_alerts(alert_rx, tokio::io::stdout()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let replication = match &config.replication {
        Some(replication_config) => {
            let replicator =
                Replicator::new(replication_config, config.agent_id.clone(), store.clone())
                    .context("Failed to create replication client")?;
            Some(tokio::spawn(replicator.run(stopped(shutdown_rx))))
        }
        None => None,
    };

    info!("Monitor running. Press Ctrl+C to stop.");

    let report = watcher_loop
        .run(async {
            wait_for_shutdown().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Watcher loop failed")?;

    // Dropping the loop closes the alert channel.
    drop(watcher_loop);
    let _ = shutdown_tx.send(true);

    let timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
    match tokio::time::timeout(timeout, alerts).await {
        Ok(Ok(Ok(written))) => info!(alerts = written, "Alerts finished"),
        Ok(Ok(Err(e))) => error!(error = %e, "Failed to write alerts"),
        Ok(Err(e)) => error!(error = %e, "Alert task failed"),
        Err(_) => warn!("Timeout waiting for alerts to finish"),
    }

    if let Some(handle) = replication {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(total)) => info!(replicated = total, "Replication finished"),
            Ok(Err(e)) => error!(error = %e, "Replication task failed"),
            Err(_) => warn!("Timeout waiting for replication to finish"),
        }
    }

    info!(
        emitted = report.emitted,
        persisted = report.persisted,
        dropped = report.dropped,
        "Monitor stopped"
    );

    Ok(())
}

/// Initializes the tracing subscriber.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves once the shutdown flag is raised or its sender is gone.
async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
