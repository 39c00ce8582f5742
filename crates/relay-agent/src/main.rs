// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay telemetry agent CLI
//!
//! Polls sensors, publishes readings, and buffers them on disk while the
//! uplink is down.
//!
//! # Usage
//!
//! ```bash
//! # Run with a config file
//! relay-agent --config /etc/relay/relay.toml
//!
//! # Demonstrate store-and-forward over a flaky simulated link
//! relay-agent --provider simulated --interval 5 --verbose
//!
//! # Inspect and manage the offline backlog
//! relay-agent --storage file --storage-path data/queue.json stats
//! relay-agent dump --limit 20
//! relay-agent flush
//! relay-agent clear --confirm
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use relay_agent::config::ProviderKind;
use relay_agent::endpoint::build_endpoint;
use relay_agent::manager::open_configured_store;
use relay_agent::{AgentConfig, OfflineBuffer, StoreKind, TelemetryManager};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "relay-agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Store-and-forward telemetry agent", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cloud endpoint provider
    #[arg(long, value_enum)]
    provider: Option<ProviderArg>,

    /// Offline storage backend
    #[arg(long, value_enum)]
    storage: Option<StorageArg>,

    /// Offline storage location
    #[arg(long)]
    storage_path: Option<PathBuf>,

    /// Seconds between sensor readings (minimum 5)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Connect attempts per reconnect
    #[arg(long)]
    max_retries: Option<u32>,

    /// Verbose mode (debug logs)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent until Ctrl+C (default)
    Run,
    /// Show the offline backlog size
    Stats,
    /// Print buffered messages, oldest first
    ///
    /// Reading the queue invalidates damaged data: undecodable SQLite rows
    /// are deleted and an unreadable queue file is moved to `<path>.corrupt`.
    Dump {
        /// Maximum number of messages (0 = all)
        #[arg(short, long, default_value_t = 0)]
        limit: usize,
    },
    /// Connect once and flush the offline backlog
    Flush,
    /// Delete every buffered message
    Clear {
        /// Confirm deletion
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    Console,
    Simulated,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Console => ProviderKind::Console,
            ProviderArg::Simulated => ProviderKind::Simulated,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageArg {
    File,
    Sqlite,
}

impl From<StorageArg> for StoreKind {
    fn from(arg: StorageArg) -> Self {
        match arg {
            StorageArg::File => StoreKind::File,
            StorageArg::Sqlite => StoreKind::Sqlite,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    init_tracing(&config, cli.verbose)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config),
        Commands::Stats => stats(&config),
        Commands::Dump { limit } => dump(&config, limit),
        Commands::Flush => flush(&config),
        Commands::Clear { confirm } => clear(&config, confirm),
    }
}

/// Config file (or defaults) with command-line overrides applied.
fn load_config(cli: &Cli) -> Result<AgentConfig> {
    let mut config = match &cli.config {
        Some(path) => AgentConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AgentConfig::default(),
    };

    if let Some(provider) = cli.provider {
        config.endpoint.provider = provider.into();
    }
    if let Some(storage) = cli.storage {
        config.offline_storage.kind = storage.into();
    }
    if let Some(path) = &cli.storage_path {
        config.offline_storage.path = Some(path.clone());
    }
    if let Some(interval) = cli.interval {
        config.acquisition.read_interval_secs = interval;
    }
    if let Some(retries) = cli.max_retries {
        config.acquisition.max_retries = retries;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_tracing(config: &AgentConfig, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("relay_agent=debug,relay_store=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    match &config.logging.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn run(config: &AgentConfig) -> Result<()> {
    tracing::info!(
        provider = %config.endpoint.provider,
        device_id = %config.endpoint.device_id,
        source = %config.acquisition.source,
        interval_secs = config.read_interval().as_secs(),
        storage = %config.offline_storage.kind,
        path = %config.offline_storage.resolved_path().display(),
        "Starting relay agent"
    );

    let manager = Arc::new(
        TelemetryManager::from_config(config).context("Failed to create telemetry manager")?,
    );

    let weak = Arc::downgrade(&manager);
    manager.on_command(move |name, _payload| match name {
        "ping" => Ok(json!({ "pong": true })),
        "status" => match weak.upgrade() {
            Some(manager) => serde_json::to_value(manager.client_info()).map_err(|e| e.to_string()),
            None => Err("agent is shutting down".to_string()),
        },
        other => Err(format!("unknown command '{other}'")),
    });

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, shutting down...");
        let _ = stop_tx.send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    manager.start().context("Failed to start telemetry manager")?;
    let _ = stop_rx.recv();
    manager.shutdown();

    Ok(())
}

fn stats(config: &AgentConfig) -> Result<()> {
    let Some(store) = open_configured_store(config)? else {
        println!("Offline storage is disabled.");
        return Ok(());
    };

    println!("Backend: {}", config.offline_storage.kind);
    println!("Location: {}", store.location().display());
    println!("Buffered messages: {}", store.len()?);
    Ok(())
}

fn dump(config: &AgentConfig, limit: usize) -> Result<()> {
    let Some(store) = open_configured_store(config)? else {
        println!("Offline storage is disabled.");
        return Ok(());
    };

    let records = store.drain(limit)?;
    for record in &records {
        println!("{} {}", record.id, serde_json::to_string(&record.message)?);
    }
    eprintln!("{} message(s) shown", records.len());
    Ok(())
}

fn flush(config: &AgentConfig) -> Result<()> {
    let Some(store) = open_configured_store(config)? else {
        println!("Offline storage is disabled, nothing to flush.");
        return Ok(());
    };

    let endpoint = build_endpoint(&config.endpoint);
    let buffer = OfflineBuffer::new(Some(store)).with_batch_size(config.offline_storage.batch_size);
    buffer.attach_endpoint(Arc::clone(&endpoint));

    if let Err(e) = endpoint.connect() {
        tracing::warn!(error = %e, "Initial connection failed, trying reconnect");
        endpoint
            .reconnect_with(config.acquisition.max_retries, &config.backoff())
            .context("Could not reach the endpoint")?;
    }

    let report = buffer.flush();
    if let Err(e) = endpoint.disconnect() {
        tracing::error!(error = %e, "Error during disconnect");
    }

    println!(
        "Sent {} message(s), {} still buffered{}",
        report.sent,
        buffer.pending(),
        if report.halted { " (stopped on failure)" } else { "" }
    );
    Ok(())
}

fn clear(config: &AgentConfig, confirm: bool) -> Result<()> {
    if !confirm {
        println!("Use --confirm to actually delete buffered messages.");
        return Ok(());
    }

    let Some(store) = open_configured_store(config)? else {
        println!("Offline storage is disabled.");
        return Ok(());
    };

    let count = store.len()?;
    store.clear()?;
    println!("Deleted {count} buffered message(s).");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "relay-agent",
            "--provider",
            "simulated",
            "--storage",
            "file",
            "--storage-path",
            "/tmp/relay/q.json",
            "--interval",
            "1",
            "--max-retries",
            "9",
            "stats",
        ]);

        let config = load_config(&cli).unwrap();
        assert_eq!(config.endpoint.provider, ProviderKind::Simulated);
        assert_eq!(config.offline_storage.kind, StoreKind::File);
        assert_eq!(
            config.offline_storage.resolved_path(),
            PathBuf::from("/tmp/relay/q.json")
        );
        assert_eq!(config.read_interval().as_secs(), 5);
        assert_eq!(config.acquisition.max_retries, 9);
        assert!(matches!(cli.command, Some(Commands::Stats)));
    }

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::parse_from(["relay-agent"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_dump_limit() {
        let cli = Cli::parse_from(["relay-agent", "dump", "--limit", "5"]);
        assert!(matches!(cli.command, Some(Commands::Dump { limit: 5 })));
    }

    #[test]
    fn test_flush_drains_backlog_and_closes_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("published.jsonl");
        let config = AgentConfig::builder()
            .console_output(output.to_string_lossy())
            .storage_kind(StoreKind::File)
            .storage_path(dir.path().join("queue.json"))
            .build();

        let store = open_configured_store(&config).unwrap().unwrap();
        store
            .enqueue(&[
                json!({"n": 1}).as_object().cloned().unwrap(),
                json!({"n": 2}).as_object().cloned().unwrap(),
            ])
            .unwrap();

        flush(&config).unwrap();

        assert!(store.is_empty().unwrap());
        let published = std::fs::read_to_string(&output).unwrap();
        assert_eq!(published.lines().count(), 2);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["relay-agent", "--config", "/nonexistent/relay.toml"]);
        assert!(load_config(&cli).is_err());
    }
}
