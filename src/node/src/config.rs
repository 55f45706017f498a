//! Node configuration loading and validation

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Complete node configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub metrics: MetricsSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeSection {
    #[serde(default = "default_node_id")]
    pub id: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSection {
    /// Persist the full ledger after every state-changing command. The copy is
    /// taken under a read lock and grows with history, so writers queue behind it.
    #[serde(default)]
    pub snapshot_enabled: bool,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        NodeSection {
            id: default_node_id(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            listen_addr: default_listen_addr(),
            port: default_port(),
            max_line_length: default_max_line_length(),
            idle_timeout_secs: default_idle_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        StorageSection {
            snapshot_enabled: false,
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl Default for MetricsSection {
    fn default() -> Self {
        MetricsSection {
            enabled: default_true(),
            port: default_metrics_port(),
            endpoint: default_metrics_endpoint(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_node_id() -> String { "ledger-node".to_string() }
fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_log_level() -> String { "info".to_string() }
fn default_listen_addr() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_line_length() -> usize { 8192 }
fn default_idle_timeout() -> u64 { 30 }
fn default_max_connections() -> usize { 1024 }
fn default_snapshot_path() -> PathBuf { PathBuf::from("ledger_snapshot.json") }
fn default_metrics_port() -> u16 { 9090 }
fn default_metrics_endpoint() -> String { "/metrics".to_string() }

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl NodeConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        let config: NodeConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))?;

        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.node.id.trim().is_empty() {
            bail!("Node id must not be empty");
        }

        if !LOG_LEVELS.contains(&self.node.log_level.to_ascii_lowercase().as_str()) {
            bail!(
                "Log level '{}' must be one of {}",
                self.node.log_level,
                LOG_LEVELS.join(", ")
            );
        }

        self.server
            .listen_addr
            .parse::<IpAddr>()
            .with_context(|| format!("Invalid listen address '{}'", self.server.listen_addr))?;

        if self.server.max_line_length == 0 {
            bail!("max_line_length must be greater than 0");
        }

        if self.server.idle_timeout_secs == 0 {
            bail!("idle_timeout_secs must be greater than 0");
        }

        if self.server.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if self.storage.snapshot_enabled && self.storage.snapshot_path.as_os_str().is_empty() {
            bail!("snapshot_path must be set when snapshots are enabled");
        }

        if self.metrics.enabled {
            if self.metrics_segment().is_none() {
                bail!(
                    "Metrics endpoint '{}' must be a single path segment such as /metrics",
                    self.metrics.endpoint
                );
            }
            if self.metrics.port == self.server.port && self.server.port != 0 {
                bail!("Metrics port {} collides with the command port", self.metrics.port);
            }
        }

        Ok(())
    }

    /// Get absolute data directory path
    pub fn data_dir(&self) -> PathBuf {
        if self.node.data_dir.is_absolute() {
            self.node.data_dir.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.node.data_dir)
        }
    }

    /// Get absolute snapshot path
    pub fn snapshot_path(&self) -> PathBuf {
        if self.storage.snapshot_path.is_absolute() {
            self.storage.snapshot_path.clone()
        } else {
            self.data_dir().join(&self.storage.snapshot_path)
        }
    }

    /// Address the command server binds to
    pub fn listen_socket(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address '{}'", self.server.listen_addr))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.server.idle_timeout_secs)
    }

    /// Metrics endpoint without its leading slash, if it is a single segment
    pub fn metrics_segment(&self) -> Option<String> {
        let segment = self.metrics.endpoint.strip_prefix('/')?;
        if segment.is_empty() || segment.contains('/') {
            return None;
        }
        Some(segment.to_string())
    }
}
