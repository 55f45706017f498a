//! Prometheus metrics for the ledger node
//!
//! Metrics live in a registry owned by [`NodeMetrics`] and are exposed as text
//! on the node's metrics endpoint (default: http://localhost:9090/metrics).

use dagledger_ledger::Ledger;
use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry, register_int_gauge_with_registry,
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use warp::Filter;

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,

    /// Commands executed per verb (Counter)
    pub commands_total: IntCounterVec,

    /// Failed commands per error code (Counter)
    pub command_errors_total: IntCounterVec,

    /// Accepted TCP connections (Counter)
    pub connections_total: IntCounter,

    /// Open accounts (Gauge)
    pub accounts: IntGauge,

    /// Transactions awaiting a decision (Gauge)
    pub pending_transactions: IntGauge,

    /// Nodes in the global DAG (Gauge)
    pub confirmed_transactions: IntGauge,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let commands_total = register_int_counter_vec_with_registry!(
            Opts::new("dagledger_commands_total", "Commands executed per verb"),
            &["verb"],
            registry
        )?;

        let command_errors_total = register_int_counter_vec_with_registry!(
            Opts::new("dagledger_command_errors_total", "Commands that returned an error, per error code"),
            &["code"],
            registry
        )?;

        let connections_total = register_int_counter_with_registry!(
            Opts::new("dagledger_connections_total", "Accepted client connections"),
            registry
        )?;

        let accounts = register_int_gauge_with_registry!(
            Opts::new("dagledger_accounts", "Number of open accounts"),
            registry
        )?;

        let pending_transactions = register_int_gauge_with_registry!(
            Opts::new("dagledger_pending_transactions", "Transactions awaiting confirmation"),
            registry
        )?;

        let confirmed_transactions = register_int_gauge_with_registry!(
            Opts::new("dagledger_confirmed_transactions", "Confirmed transactions in the global DAG"),
            registry
        )?;

        Ok(NodeMetrics {
            registry,
            commands_total,
            command_errors_total,
            connections_total,
            accounts,
            pending_transactions,
            confirmed_transactions,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_command(&self, verb: &str) {
        self.commands_total.with_label_values(&[verb]).inc();
    }

    pub fn record_error(&self, code: &str) {
        self.command_errors_total.with_label_values(&[code]).inc();
    }

    pub fn record_connection(&self) {
        self.connections_total.inc();
    }

    /// Refresh the state gauges from the ledger
    pub fn observe_ledger(&self, ledger: &Ledger) {
        self.accounts.set(ledger.accounts().len() as i64);
        self.pending_transactions.set(ledger.pending().len() as i64);
        self.confirmed_transactions.set(ledger.dag().len() as i64);
    }

    /// Encode every registered metric in the Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer).ok();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl fmt::Debug for NodeMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeMetrics")
            .field("accounts", &self.accounts.get())
            .field("pending_transactions", &self.pending_transactions.get())
            .field("confirmed_transactions", &self.confirmed_transactions.get())
            .finish_non_exhaustive()
    }
}

/// GET route serving the registry at `/<segment>`
pub fn metrics_route(
    metrics: Arc<NodeMetrics>,
    segment: String,
) -> impl Filter<Extract = (String,), Error = warp::Rejection> + Clone {
    warp::get()
        .and(warp::path(segment))
        .and(warp::path::end())
        .and_then(move || {
            let metrics = metrics.clone();
            async move { Ok::<_, Infallible>(metrics.render()) }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagledger_ledger::TransactionKind;

    #[test]
    fn test_counters_and_gauges() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.record_command("ADD_USER");
        metrics.record_command("ADD_USER");
        metrics.record_error("UnknownAccount");
        metrics.record_connection();

        let mut ledger = Ledger::new();
        ledger.add_user("Alice", 10).unwrap();
        ledger.add_user("Bob", 0).unwrap();
        ledger.submit("Alice", "Bob", 5, TransactionKind::Token).unwrap();
        metrics.observe_ledger(&ledger);

        assert_eq!(metrics.commands_total.with_label_values(&["ADD_USER"]).get(), 2);
        assert_eq!(metrics.accounts.get(), 2);
        assert_eq!(metrics.pending_transactions.get(), 1);
        assert_eq!(metrics.confirmed_transactions.get(), 0);

        let text = metrics.render();
        assert!(text.contains("dagledger_command_errors_total{code=\"UnknownAccount\"} 1"));
        assert!(text.contains("dagledger_connections_total 1"));
    }

    #[tokio::test]
    async fn test_route_serves_text() {
        let metrics = Arc::new(NodeMetrics::new().unwrap());
        metrics.record_command("PRINT_DAG");
        let route = metrics_route(metrics, "metrics".to_string());

        let response = warp::test::request().method("GET").path("/metrics").reply(&route).await;
        assert_eq!(response.status(), 200);
        let body = String::from_utf8(response.body().to_vec()).unwrap();
        assert!(body.contains("dagledger_commands_total{verb=\"PRINT_DAG\"} 1"));

        let missing = warp::test::request().path("/other").reply(&route).await;
        assert_eq!(missing.status(), 404);
    }
}
