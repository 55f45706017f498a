//! Command dispatch and response rendering
//!
//! The processor owns no ledger rules. It takes the right lock on the shared
//! ledger, calls one operation, and turns the outcome into response text.
//! A response may span several lines; lines are joined with `\n` and the
//! transport terminates the last one.

use crate::command::{Command, CommandError, Result};
use crate::metrics::NodeMetrics;
use dagledger_ledger::{
    DagView, Ledger, LedgerHandle, LedgerSnapshot, SnapshotWriter, TransactionRecord, TransactionStatus,
    ValidationReport,
};
use parking_lot::RwLockWriteGuard;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CommandProcessor {
    ledger: LedgerHandle,
    metrics: Option<Arc<NodeMetrics>>,
    snapshots: Option<Arc<SnapshotWriter>>,
}

impl CommandProcessor {
    pub fn new(ledger: LedgerHandle) -> Self {
        CommandProcessor {
            ledger,
            metrics: None,
            snapshots: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<NodeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Persist a snapshot after every mutating command
    pub fn with_snapshots(mut self, writer: Arc<SnapshotWriter>) -> Self {
        self.snapshots = Some(writer);
        self
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    pub fn metrics(&self) -> Option<&Arc<NodeMetrics>> {
        self.metrics.as_ref()
    }

    /// Parse and run one command line, always producing a response
    pub fn execute(&self, line: &str) -> String {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(err) => return self.failure(&err),
        };

        let verb = command.verb();
        debug!(verb, "executing command");
        if let Some(metrics) = &self.metrics {
            metrics.record_command(verb);
        }

        match self.dispatch(command) {
            Ok(response) => response,
            Err(err) => self.failure(&err),
        }
    }

    /// Render an error response and count it
    pub fn failure(&self, err: &CommandError) -> String {
        warn!(code = err.code(), error = %err, "command failed");
        if let Some(metrics) = &self.metrics {
            metrics.record_error(err.code());
        }
        err.render()
    }

    fn dispatch(&self, command: Command) -> Result<String> {
        if !command.is_mutating() {
            let ledger = self.ledger.read();
            return self.query(&ledger, command);
        }

        let (response, snapshot) = {
            let mut ledger = self.ledger.write();
            let before = ledger.revision();
            let response = self.mutate(&mut ledger, command);

            // Readers may proceed while the snapshot is cloned
            let ledger = RwLockWriteGuard::downgrade(ledger);
            if let Some(metrics) = &self.metrics {
                metrics.observe_ledger(&ledger);
            }
            let snapshot = match &self.snapshots {
                Some(writer) if ledger.revision() != before && writer.is_stale(ledger.revision()) => {
                    Some(ledger.snapshot())
                }
                _ => None,
            };
            (response, snapshot)
        };

        if let Some(snapshot) = snapshot {
            self.persist(&snapshot);
        }
        response
    }

    fn mutate(&self, ledger: &mut Ledger, command: Command) -> Result<String> {
        match command {
            Command::AddUser { name, initial_balance } => {
                let balance = ledger.add_user(&name, initial_balance)?;
                Ok(format!("User {} added with balance {}", name, balance))
            }
            Command::Transaction(requests) => {
                let lines: Vec<String> = ledger
                    .submit_batch(&requests)
                    .into_iter()
                    .zip(&requests)
                    .map(|(result, request)| match result {
                        Ok(id) => format!("Transaction {} is pending confirmation from {}", id, request.receiver),
                        Err(err) => self.failure(&CommandError::from(err)),
                    })
                    .collect();
                Ok(lines.join("\n"))
            }
            Command::Confirm { receiver, id } => {
                let record = ledger.confirm(&receiver, &id)?;
                Ok(format!("Transaction {} confirmed and processed", record.id))
            }
            Command::Reject { receiver, id } => {
                let record = ledger.reject(&receiver, &id)?;
                Ok(format!("Transaction {} rejected", record.id))
            }
            other => self.query(ledger, other),
        }
    }

    fn query(&self, ledger: &Ledger, command: Command) -> Result<String> {
        match command {
            Command::CheckBalance { name } => {
                let balance = ledger.check_balance(&name)?;
                let available = ledger.available_balance(&name)?;
                Ok(format!(
                    "User {} has a balance of {}, Available: {}",
                    name, balance, available
                ))
            }
            Command::ViewPending { receiver } => {
                let pending = ledger.view_pending(&receiver)?;
                if pending.is_empty() {
                    return Ok("No pending transactions".to_string());
                }
                Ok(pending
                    .iter()
                    .map(|record| {
                        format!(
                            "Pending Transaction ID: {}, From: {}, Amount: {}, Kind: {}",
                            record.id, record.sender, record.amount, record.kind
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            Command::Query { id } => Ok(render_query(ledger.query_transaction(&id)?)),
            Command::Verify { id } => {
                let report = ledger.verify_transaction(&id)?;
                if report.verified() {
                    Ok("Transaction integrity verified successfully".to_string())
                } else {
                    Ok(format!(
                        "Transaction integrity verification failed: {}",
                        report.failures.join("; ")
                    ))
                }
            }
            Command::PrintUserDag { name } => {
                let view = ledger.local_dag(&name)?;
                render_user_dag(ledger, &name, &view)
            }
            Command::PrintDag => {
                let view = ledger.global_dag();
                let mut lines = vec!["Global DAG:".to_string()];
                lines.extend(view.iter().map(render_node));
                lines.push(format!("Tips: [{}]", ledger.dag().tips().join(", ")));
                Ok(lines.join("\n"))
            }
            Command::FetchUserDags { names } => {
                let views = ledger.fetch_user_dags(&names)?;
                let blocks = names
                    .iter()
                    .zip(&views)
                    .map(|(name, view)| render_user_dag(ledger, name, view))
                    .collect::<Result<Vec<_>>>()?;
                Ok(blocks.join("\n"))
            }
            Command::ValidateLocalDag { name } => Ok(render_validation(&ledger.validate_local_dag(&name)?)),
            mutating => Err(CommandError::BadArguments(format!(
                "{} needs write access",
                mutating.verb()
            ))),
        }
    }

    fn persist(&self, snapshot: &LedgerSnapshot) {
        if let Some(writer) = &self.snapshots {
            if let Err(err) = writer.write(snapshot) {
                warn!(error = %err, path = %writer.path().display(), "failed to write snapshot");
            }
        }
    }
}

fn render_validation(report: &ValidationReport) -> String {
    if report.is_valid() {
        return "Local DAG is valid".to_string();
    }
    let mut lines = vec!["Local DAG validation failed:".to_string()];
    lines.extend(report.violations.iter().map(|violation| format!("  - {}", violation)));
    lines.join("\n")
}

fn render_user_dag(ledger: &Ledger, name: &str, view: &DagView<'_>) -> Result<String> {
    let mut lines = vec![format!("User {}'s DAG:", name)];
    lines.extend(view.iter().map(render_node));
    lines.push(format!("Replayed balance: {}", ledger.replay_balance(name)?));
    Ok(lines.join("\n"))
}

fn render_node(record: &TransactionRecord) -> String {
    let sequence = record.sequence().map_or_else(|| "-".to_string(), |seq| seq.to_string());
    format!(
        "Transaction ID: {}, Sender: {}, Receiver: {}, Amount: {}, Kind: {}, Parents: [{}], Sequence: {}",
        record.id,
        record.sender,
        record.receiver,
        record.amount,
        record.kind,
        record.parents.join(", "),
        sequence
    )
}

fn render_query(record: &TransactionRecord) -> String {
    let resolved = match record.status() {
        TransactionStatus::Pending => String::new(),
        TransactionStatus::Confirmed { at, sequence } => {
            format!(", Resolved: {}, Sequence: {}", at.to_rfc3339(), sequence)
        }
        TransactionStatus::Rejected { at } => format!(", Resolved: {}", at.to_rfc3339()),
    };
    format!(
        "Transaction found: ID: {}, Sender: {}, Receiver: {}, Amount: {}, Kind: {}, Status: {}, Parents: [{}], Timestamp: {}, Hash: {}{}",
        record.id,
        record.sender,
        record.receiver,
        record.amount,
        record.kind,
        record.status(),
        record.parents.join(", "),
        record.created_at.to_rfc3339(),
        record.hash_hex(),
        resolved
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagledger_ledger::Violation;

    fn processor() -> CommandProcessor {
        CommandProcessor::new(LedgerHandle::default())
    }

    /// Pull the id out of a `Transaction <id> is pending ...` line
    fn pending_id(response: &str) -> String {
        response.split_whitespace().nth(1).unwrap().to_string()
    }

    #[test]
    fn test_add_and_check_balance() {
        let p = processor();
        assert_eq!(p.execute("ADD_USER Alice 1000"), "User Alice added with balance 1000");
        assert_eq!(
            p.execute("CHECK_BALANCE Alice"),
            "User Alice has a balance of 1000, Available: 1000"
        );
        assert_eq!(
            p.execute("ADD_USER Alice 5"),
            "Error: DuplicateAccount: User Alice already exists"
        );
        assert_eq!(
            p.execute("CHECK_BALANCE Zed"),
            "Error: UnknownAccount: User Zed does not exist"
        );
    }

    #[test]
    fn test_two_phase_flow() {
        let p = processor();
        p.execute("ADD_USER Alice 1000");
        p.execute("ADD_USER Bob 500");

        let submitted = p.execute("TRANSACTION TOKEN Alice Bob 200");
        assert!(submitted.ends_with("is pending confirmation from Bob"), "{}", submitted);
        let id = pending_id(&submitted);

        assert_eq!(
            p.execute("VIEW_PENDING_TRANSACTIONS Bob"),
            format!("Pending Transaction ID: {}, From: Alice, Amount: 200, Kind: TOKEN", id)
        );
        assert_eq!(
            p.execute("CHECK_BALANCE Alice"),
            "User Alice has a balance of 1000, Available: 800"
        );

        assert_eq!(
            p.execute(&format!("CONFIRM_TRANSACTION Bob {}", id)),
            format!("Transaction {} confirmed and processed", id)
        );
        assert_eq!(p.execute("VIEW_PENDING_TRANSACTIONS Bob"), "No pending transactions");
        assert_eq!(p.execute("VALIDATE_LOCAL_DAG Alice"), "Local DAG is valid");
        assert_eq!(
            p.execute(&format!("VERIFY_TRANSACTION {}", id)),
            "Transaction integrity verified successfully"
        );

        let query = p.execute(&format!("QUERY_TRANSACTION {}", id));
        assert!(query.starts_with(&format!("Transaction found: ID: {}, Sender: Alice, Receiver: Bob, Amount: 200, Kind: TOKEN, Status: CONFIRMED", id)));
    }

    #[test]
    fn test_batch_reports_each_group() {
        let p = processor();
        p.execute("ADD_USER Alice 100");
        p.execute("ADD_USER Bob 0");

        let response = p.execute("TRANSACTION Alice Bob 60 Alice Bob 60 Alice Ghost 1");
        let lines: Vec<&str> = response.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Transaction "));
        assert!(lines[1].starts_with("Error: InsufficientFunds:"));
        assert_eq!(lines[2], "Error: UnknownAccount: User Ghost does not exist");
    }

    #[test]
    fn test_reject_and_authorization() {
        let p = processor();
        p.execute("ADD_USER Alice 1000");
        p.execute("ADD_USER Bob 500");
        let id = pending_id(&p.execute("TRANSACTION Alice Bob 300"));

        assert!(p
            .execute(&format!("REJECT_TRANSACTION Alice {}", id))
            .starts_with("Error: NotAuthorized:"));
        assert_eq!(
            p.execute(&format!("REJECT_TRANSACTION Bob {}", id)),
            format!("Transaction {} rejected", id)
        );
        assert_eq!(
            p.execute(&format!("CONFIRM_TRANSACTION Bob {}", id)),
            format!("Error: UnknownTransaction: Transaction {} not found", id)
        );
        assert!(p
            .execute(&format!("VERIFY_TRANSACTION {}", id))
            .starts_with("Transaction integrity verification failed: transaction is REJECTED"));
    }

    #[test]
    fn test_dag_rendering() {
        let p = processor();
        p.execute("ADD_USER Alice 1000");
        p.execute("ADD_USER Bob 500");
        let first = pending_id(&p.execute("TRANSACTION Alice Bob 200"));
        p.execute(&format!("CONFIRM_TRANSACTION Bob {}", first));
        let second = pending_id(&p.execute("TRANSACTION Bob Alice 50"));
        p.execute(&format!("CONFIRM_TRANSACTION Alice {}", second));

        let dag = p.execute("PRINT_USER_DAG Bob");
        let lines: Vec<&str> = dag.lines().collect();
        assert_eq!(lines[0], "User Bob's DAG:");
        assert!(lines[1].starts_with(&format!("Transaction ID: {}", first)));
        assert!(lines[2].starts_with(&format!("Transaction ID: {}", second)));
        assert!(lines[2].contains(&format!("Parents: [{}]", first)));
        assert_eq!(lines[3], "Replayed balance: 650");

        let global = p.execute("PRINT_DAG");
        assert!(global.starts_with("Global DAG:"));
        assert!(global.ends_with(&format!("Tips: [{}]", second)));

        let both = p.execute("FETCH_USER_DAGS Alice Bob");
        assert!(both.contains("User Alice's DAG:") && both.contains("User Bob's DAG:"));
        assert_eq!(
            p.execute("FETCH_USER_DAGS Alice Nobody"),
            "Error: UnknownAccount: User Nobody does not exist"
        );
    }

    #[test]
    fn test_parse_errors_render() {
        let p = processor();
        assert_eq!(p.execute("HELLO"), "Error: UnknownCommand: Unknown command HELLO");
        assert_eq!(
            p.execute("ADD_USER Alice lots"),
            "Error: BadArguments: amount lots is not an integer"
        );
        assert_eq!(
            p.execute("ADD_USER Alice -1"),
            "Error: InvalidAmount: Invalid amount: initial balance -1 is negative"
        );
    }

    #[test]
    fn test_metrics_follow_commands() {
        let metrics = Arc::new(NodeMetrics::new().unwrap());
        let p = processor().with_metrics(metrics.clone());
        p.execute("ADD_USER Alice 10");
        p.execute("ADD_USER Bob 10");
        p.execute("TRANSACTION Alice Bob 5");
        p.execute("CHECK_BALANCE Nobody");

        assert_eq!(metrics.commands_total.with_label_values(&["ADD_USER"]).get(), 2);
        assert_eq!(metrics.command_errors_total.with_label_values(&["UnknownAccount"]).get(), 1);
        assert_eq!(metrics.accounts.get(), 2);
        assert_eq!(metrics.pending_transactions.get(), 1);
    }

    #[test]
    fn test_validation_failure_rendering() {
        let report = ValidationReport {
            account: "Bob".to_string(),
            checked: 2,
            violations: vec![
                Violation::Cycle,
                Violation::Overdraft {
                    id: "t2".to_string(),
                    balance: -450,
                },
                Violation::ForeignTransaction("t9".to_string()),
            ],
        };

        assert_eq!(
            render_validation(&report),
            "Local DAG validation failed:\n  - Cycle detected in local DAG\n  \
             - Balance goes negative (-450) after transaction t2\n  \
             - Transaction t9 does not involve this account"
        );

        let clean = ValidationReport {
            violations: Vec::new(),
            ..report
        };
        assert_eq!(render_validation(&clean), "Local DAG is valid");
    }

    #[test]
    fn test_unchanged_revision_skips_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let writer = Arc::new(SnapshotWriter::new(&path));
        let p = processor().with_snapshots(writer.clone());

        p.execute("ADD_USER Alice 10");
        assert!(!writer.is_stale(1));
        std::fs::remove_file(&path).unwrap();

        // A failed mutation leaves the revision alone, so nothing is rewritten
        assert!(p.execute("ADD_USER Alice 10").starts_with("Error: DuplicateAccount"));
        assert!(!path.exists());
        assert!(writer.is_stale(2));
    }

    #[test]
    fn test_snapshots_written_after_mutations() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let p = processor().with_snapshots(Arc::new(SnapshotWriter::new(&path)));

        p.execute("CHECK_BALANCE Alice");
        assert!(!path.exists());

        p.execute("ADD_USER Alice 10");
        p.execute("ADD_USER Bob 10");
        let restored = Ledger::load_snapshot(&path).unwrap().unwrap();
        assert_eq!(restored.check_balance("Bob").unwrap(), 10);
        assert_eq!(restored.revision(), p.ledger().read().revision());
    }
}
