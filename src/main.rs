//! # Edgewatch Agent
//!
//! Edge-device monitoring agent: a poll scheduler drives the periodic
//! self-test and export activities; slow work runs on a bounded
//! background worker pool.
//!
//! Usage:
//!   edgewatch                         # Run the agent
//!   edgewatch --config agent.toml     # Explicit config file
//!   edgewatch --oneshot               # Single self-test, print JSON, exit
//!   edgewatch --check-config          # Validate configuration and exit

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use edgewatch_core::AgentConfig;
use edgewatch_diagnostics::{HealthMonitor, SqliteHealthStore, SystemCollector, SystemdServiceControl};
use edgewatch_scheduler::{BackgroundTaskQueue, PollScheduler};

#[derive(Parser)]
#[command(
    name = "edgewatch",
    version,
    about = "📡 Edgewatch — edge-device monitoring agent"
)]
struct Cli {
    /// Path to config file (default: ~/.edgewatch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one self-test, print the record as JSON, and exit
    #[arg(long)]
    oneshot: bool,

    /// Run one export cycle immediately and exit
    #[arg(long)]
    export_now: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "edgewatch=debug"
    } else {
        "edgewatch=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => AgentConfig::load_from(path)?,
        None => AgentConfig::load()?,
    };
    config.validate()?;
    if cli.check_config {
        println!("✅ Configuration OK");
        return Ok(());
    }

    let store = Arc::new(SqliteHealthStore::open(&config.health_db)?);
    let queue = Arc::new(BackgroundTaskQueue::new(
        config.queue_workers,
        config.queue_capacity,
    ));
    let collector = Arc::new(SystemCollector::new(config.monitored_services.clone()));
    let monitor = Arc::new(HealthMonitor::new(
        config.clone(),
        collector,
        store,
        Arc::new(SystemdServiceControl),
        Arc::clone(&queue),
    ));

    if cli.oneshot {
        let record = monitor.run_self_test().await;
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }
    if cli.export_now {
        monitor.export_now().await?;
        return Ok(());
    }

    queue.start().await;
    let scheduler = Arc::new(PollScheduler::new(Duration::from_secs(
        config.tick_resolution_secs,
    )));
    monitor.register(&scheduler).await?;
    scheduler.start();
    tracing::info!(
        "📡 Edgewatch agent running (self-test every {}s)",
        config.health_poll_interval
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    // Scheduler first, so no new jobs land while the queue drains.
    scheduler.stop().await;
    queue.stop().await;
    Ok(())
}
