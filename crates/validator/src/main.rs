//! Stakemesh Validator
//!
//! Thin launcher for a stake-weighted consensus validator node. Reads the
//! node key and seed peers from the environment, constructs the node, and
//! runs until interrupted (or until the node exits itself after losing
//! every peer, for a supervisor to restart).

use anyhow::Result;
use clap::Parser;
use stakemesh_consensus::NodeBuilder;
use stakemesh_ledger::Chain;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::LauncherConfig;

/// Stakemesh consensus validator
#[derive(Parser, Debug)]
#[command(name = "stakemesh")]
#[command(about = "Peer-to-peer validator for a stake-weighted transaction ledger", long_about = None)]
struct Args {
    /// Port to listen on for peer connections
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let launcher = LauncherConfig::from_env()?;

    tracing::info!("Starting stakemesh validator");
    tracing::info!("  Port: {}", args.port);
    tracing::info!("  Seed peers: {}", launcher.peers.len());

    let node = NodeBuilder::new()
        .port(args.port)
        .peers(launcher.peers)
        .private_key(&launcher.private_key)
        .chain(Chain::new())
        .build()?;

    tracing::info!("  Public key: {}", node.public_key());

    node.start().await?;

    tracing::info!("Node running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    let stats = node.stats();
    tracing::info!(
        "Shutting down: {} records committed, {} peers connected",
        stats.chain_length,
        stats.sockets
    );

    Ok(())
}
