//! DAG Ledger Node - Main Binary
//!
//! Single authoritative ledger node with:
//! - Newline-delimited TCP command protocol
//! - Two-phase transfers over per-account DAGs
//! - JSON snapshot persistence
//! - Prometheus metrics

use anyhow::Result;
use clap::Parser;
use dagledger_node::{LedgerNode, NodeConfig};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

/// DAG Ledger Node CLI
#[derive(Parser)]
#[command(name = "dagledger-node")]
#[command(about = "DAG Ledger Node - two-phase transfers over per-account DAGs")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/node.toml", env = "DAGLEDGER_CONFIG")]
    config: PathBuf,

    /// Override listen address
    #[arg(long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Override command port
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser)]
enum Command {
    /// Show node version
    Version,

    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = cli.command {
        println!("DAG Ledger Node v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration
    let mut config = NodeConfig::load_or_default(&cli.config)?;

    // Apply CLI overrides
    if let Some(listen_addr) = cli.listen {
        config.server.listen_addr = listen_addr;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    // Initialize logging
    let log_level = if cli.verbose { "debug".to_string() } else { config.node.log_level.clone() };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},dagledger_node={}", log_level, log_level).into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    // Validate configuration
    config.validate()?;

    if let Some(Command::CheckConfig) = cli.command {
        println!("Configuration {} is valid", cli.config.display());
        return Ok(());
    }

    info!("Starting DAG Ledger Node v{}", env!("CARGO_PKG_VERSION"));
    info!("Using configuration from {:?}", cli.config);

    let mut node = LedgerNode::new(config)?;
    info!("Ledger node '{}' initialized", node.node_id());

    // Run node with graceful shutdown
    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                error!("Node error: {:#}", e);
                return Err(e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal (Ctrl+C)");
            node.shutdown().await?;
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal (SIGTERM)");
            node.shutdown().await?;
        }
    }

    info!("Node stopped gracefully");
    Ok(())
}

/// Cross-platform shutdown signal handling
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    // On non-Unix systems, only Ctrl+C is supported
    std::future::pending::<()>().await
}
