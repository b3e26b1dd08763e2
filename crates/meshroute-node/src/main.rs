//! Meshroute node: entry point.
//!
//! Runs a simulated radio mesh with configuration from a TOML file or defaults.

// Host accessors are used by tests and by embedders of the node module.
#![allow(dead_code)]

mod commands;
mod config;
mod node;

use clap::Parser;
use meshroute_core::Address;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::NodeConfig;
use node::MeshHost;

/// Meshroute Node
#[derive(Parser, Debug)]
#[command(name = "meshroute-node", version, about = "On-demand mesh routing node")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "meshroute.toml")]
    config: PathBuf,

    /// Override the local node address (dotted hex, 0x hex or decimal).
    #[arg(long)]
    address: Option<Address>,

    /// Override the routing policy (endnode, always, ifawake, shared-basestation).
    #[arg(long)]
    policy: Option<String>,

    /// Override the number of simulated nodes in the line.
    #[arg(long)]
    nodes: Option<usize>,

    /// Discover a route to this address at start-up.
    #[arg(long)]
    discover: Option<Address>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Generate a default config file and exit.
    #[arg(long)]
    init: bool,
}

fn init_tracing(config: &NodeConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Handle --init flag
    if args.init {
        let config = NodeConfig::default();
        config.save(&args.config)?;
        println!("wrote default config to {}", args.config.display());
        return Ok(());
    }

    // Load configuration and apply CLI overrides
    let mut config = NodeConfig::load(&args.config)?;
    if let Some(address) = args.address {
        config.node.address = address;
    }
    if let Some(policy) = args.policy {
        config.node.policy = policy;
    }
    if let Some(nodes) = args.nodes {
        config.simulation.nodes = nodes;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config);
    tracing::info!("Meshroute node v{}", env!("CARGO_PKG_VERSION"));

    // Create and start the mesh
    let mut host = MeshHost::new(config)?;
    host.start()?;

    if let Some(destination) = args.discover {
        let handle = host.handle();
        tokio::spawn(async move {
            match handle.find_route(destination).await {
                Ok(outcome) => match outcome.into_result() {
                    Ok(route) => tracing::info!(%route, "start-up discovery succeeded"),
                    Err(e) => tracing::warn!(%destination, error = %e, "start-up discovery failed"),
                },
                Err(e) => tracing::warn!(%destination, error = %e, "start-up discovery refused"),
            }
            if let Ok(routes) = handle.snapshot().await {
                match serde_json::to_string(&routes) {
                    Ok(json) => tracing::info!(routes = %json, "route table"),
                    Err(e) => tracing::warn!(error = %e, "route table not serializable"),
                }
            }
        });
    }

    // Set up graceful shutdown on SIGINT
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("received shutdown signal");
    };

    tokio::select! {
        result = host.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "host event loop error");
            }
        }
        _ = shutdown => {
            tracing::info!("initiating graceful shutdown");
        }
    }

    host.shutdown().await?;
    tracing::info!("meshroute node exited cleanly");
    Ok(())
}
