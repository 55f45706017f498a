//! DAG Ledger Node Library
//!
//! This crate provides the ledger node that serves the line-oriented command
//! protocol over TCP: command parsing and rendering, the connection loop,
//! configuration, metrics, and snapshot-backed startup and shutdown.

pub mod command;
pub mod config;
pub mod metrics;
pub mod node;
pub mod processor;
pub mod server;

pub use command::{Command, CommandError};
pub use config::NodeConfig;
pub use metrics::NodeMetrics;
pub use node::LedgerNode;
pub use processor::CommandProcessor;
pub use server::{LedgerServer, ServerSettings};
