//! infergridd — the InferGrid daemon.
//!
//! Runs the adaptive allocations scaler against a simulated cluster whose
//! load rises and falls over time, so the scaling behaviour can be watched
//! in the logs.
//!
//! # Usage
//!
//! ```text
//! infergridd simulate --config infergridd.toml --duration 900
//! ```

mod config;
mod sim;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use infergrid_autoscale::{AdaptiveAllocationsScalerService, TracingNotifier, UtilizationDecider};

use crate::config::DaemonConfig;
use crate::sim::SimCluster;

#[derive(Parser)]
#[command(name = "infergridd", about = "InferGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scaler against simulated deployments.
    Simulate {
        /// Config file. Uses a built-in two-deployment setup when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Stop after this many seconds. Runs until Ctrl-C when omitted.
        #[arg(long)]
        duration: Option<u64>,

        /// Override the scaler interval, in seconds.
        #[arg(long)]
        interval: Option<u64>,

        /// Override the scale-up cooldown, in seconds.
        #[arg(long)]
        scale_up_cooldown: Option<u64>,

        /// Fail every Nth stats fetch (0 never fails).
        #[arg(long, default_value = "0")]
        fail_every: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,infergridd=debug,infergrid=debug"))?,
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            config,
            duration,
            interval,
            scale_up_cooldown,
            fail_every,
        } => run_simulation(config, duration, interval, scale_up_cooldown, fail_every).await,
    }
}

async fn run_simulation(
    config_path: Option<PathBuf>,
    duration: Option<u64>,
    interval: Option<u64>,
    scale_up_cooldown: Option<u64>,
    fail_every: u64,
) -> anyhow::Result<()> {
    let mut config = match &config_path {
        Some(path) => {
            let config = DaemonConfig::from_file(path)?;
            info!(path = ?path, "config loaded");
            config
        }
        None => {
            info!("no config given, using the demo deployments");
            DaemonConfig::demo()
        }
    };
    if let Some(secs) = interval {
        config.scaler = config.scaler.with_interval(Duration::from_secs(secs));
        config.scaler.validate()?;
    }
    if let Some(secs) = scale_up_cooldown {
        config.scaler = config
            .scaler
            .with_scale_up_cooldown(Duration::from_secs(secs));
    }

    info!(
        deployments = config.deployments.len(),
        interval = ?config.scaler.interval,
        scale_up_cooldown = ?config.scaler.scale_up_cooldown,
        enabled = config.scaler.enabled,
        "InferGrid daemon starting in simulation mode"
    );

    // ── Subsystems ─────────────────────────────────────────────

    let cluster = Arc::new(SimCluster::new(&config.deployments, fail_every));
    let topology = config.topology();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scaler = AdaptiveAllocationsScalerService::new(
        config.scaler.clone(),
        cluster.clone(),
        Arc::new(TracingNotifier),
        UtilizationDecider::factory(config.decider.clone()),
    )
    .with_shutdown(shutdown_rx);

    scaler.start(&topology).await?;
    info!(
        tracked = ?scaler.tracked_deployments().await,
        state = ?scaler.state().await,
        "scaler started"
    );

    // ── Run until Ctrl-C or the duration elapses ───────────────

    match duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received Ctrl-C"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!(secs, "simulation duration elapsed");
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("received Ctrl-C");
        }
    }

    info!("shutting down");
    if shutdown_tx.send(true).is_err() {
        warn!("scaler already dropped its shutdown receiver");
    }
    scaler.stop().await;

    for d in &config.deployments {
        if let Some(allocations) = cluster.allocations(&d.id).await {
            info!(deployment = %d.id, allocations, "final allocations");
        }
    }

    info!("InferGrid daemon stopped");
    Ok(())
}
