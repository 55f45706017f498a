//! Ledger node orchestrator wiring config, state, server and metrics together

use anyhow::{Context, Result};
use dagledger_ledger::{Ledger, LedgerHandle, SnapshotWriter};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::metrics::{metrics_route, NodeMetrics};
use crate::processor::CommandProcessor;
use crate::server::{LedgerServer, ServerSettings};

pub struct LedgerNode {
    /// Node identifier
    node_id: String,

    config: NodeConfig,

    /// Shared ledger state
    ledger: LedgerHandle,

    metrics: Arc<NodeMetrics>,

    /// Present when snapshots are enabled
    snapshots: Option<Arc<SnapshotWriter>>,

    /// Shutdown signal
    shutdown_tx: watch::Sender<bool>,
}

impl LedgerNode {
    /// Create a node, restoring the ledger from its snapshot when enabled
    pub fn new(config: NodeConfig) -> Result<Self> {
        info!("Initializing ledger node '{}'", config.node.id);

        let (ledger, snapshots) = if config.storage.snapshot_enabled {
            let path = config.snapshot_path();
            std::fs::create_dir_all(config.data_dir()).context("Failed to create data directory")?;

            let ledger = match Ledger::load_snapshot(&path)
                .with_context(|| format!("Failed to restore snapshot {}", path.display()))?
            {
                Some(ledger) => {
                    info!(
                        "Restored {} accounts and {} confirmed transactions from {:?}",
                        ledger.accounts().len(),
                        ledger.dag().len(),
                        path
                    );
                    ledger
                }
                None => {
                    info!("No snapshot at {:?}, starting with an empty ledger", path);
                    Ledger::new()
                }
            };
            (ledger, Some(Arc::new(SnapshotWriter::new(path))))
        } else {
            (Ledger::new(), None)
        };

        let metrics = Arc::new(NodeMetrics::new().context("Failed to register metrics")?);
        metrics.observe_ledger(&ledger);

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            node_id: config.node.id.clone(),
            config,
            ledger: LedgerHandle::new(ledger),
            metrics,
            snapshots,
            shutdown_tx,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }

    /// Command processor sharing this node's ledger, metrics and snapshots
    pub fn processor(&self) -> CommandProcessor {
        let processor = CommandProcessor::new(self.ledger.clone()).with_metrics(self.metrics.clone());
        match &self.snapshots {
            Some(writer) => processor.with_snapshots(writer.clone()),
            None => processor,
        }
    }

    /// Bind the command server on the configured address
    pub async fn bind(&self) -> Result<LedgerServer> {
        let addr = self.config.listen_socket()?;
        let settings = ServerSettings {
            max_line_length: self.config.server.max_line_length,
            idle_timeout: self.config.idle_timeout(),
            max_connections: self.config.server.max_connections,
        };
        LedgerServer::bind(addr, self.processor(), settings)
            .await
            .with_context(|| format!("Failed to bind command server on {}", addr))
    }

    /// Run the node until `shutdown` is called
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting ledger node...");

        let server = self.bind().await?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let server_task = tokio::spawn(server.run_until(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        }));

        // Start metrics server if enabled
        let metrics_task = match (self.config.metrics.enabled, self.config.metrics_segment()) {
            (true, Some(segment)) => {
                let port = self.config.metrics.port;
                let metrics = self.metrics.clone();
                Some(tokio::spawn(async move { Self::run_metrics_server(port, segment, metrics).await }))
            }
            _ => None,
        };

        let result = server_task.await.context("Command server task failed")?;

        if let Some(task) = metrics_task {
            task.abort();
        }

        result.context("Command server stopped with an error")
    }

    /// Graceful shutdown: stop accepting and persist a final snapshot
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Initiating graceful shutdown...");
        self.shutdown_tx.send_replace(true);

        if let Some(writer) = &self.snapshots {
            let snapshot = self.ledger.read().snapshot();
            match writer.write(&snapshot) {
                Ok(true) => info!("Final snapshot written to {:?}", writer.path()),
                Ok(false) => info!("Snapshot already current"),
                Err(err) => warn!("Failed to write final snapshot: {}", err),
            }
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Run Prometheus metrics server
    async fn run_metrics_server(port: u16, segment: String, metrics: Arc<NodeMetrics>) -> Result<()> {
        info!("Metrics server listening on http://0.0.0.0:{}/{}", port, segment);

        let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
        warp::serve(metrics_route(metrics, segment)).run(addr).await;

        Ok(())
    }
}
