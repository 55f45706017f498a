//! Local DAG validation and per-transaction verification
//!
//! Validation findings are data, not errors: a report lists every violation
//! found so the caller can render them all at once.

use crate::accounts::Account;
use crate::error::Result;
use crate::ledger::Ledger;
use dagledger_dag::{DagView, TransactionId, TransactionStatus};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// A single consistency problem in an account's local DAG
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The induced subgraph contains a cycle
    Cycle,

    /// A node names a parent that is not a confirmed node
    DanglingParent { id: TransactionId, parent: TransactionId },

    /// Replaying from the genesis balance does not land on the current balance
    BalanceMismatch { replayed: i128, balance: u64 },

    /// Replay dipped below zero after applying `id`
    Overdraft { id: TransactionId, balance: i128 },

    /// Id listed twice, or held by more than one store
    DuplicateTransaction(TransactionId),

    /// Id in the local set that does not touch the account
    ForeignTransaction(TransactionId),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Cycle => write!(f, "Cycle detected in local DAG"),
            Violation::DanglingParent { id, parent } => {
                write!(f, "Transaction {} references missing parent {}", id, parent)
            }
            Violation::BalanceMismatch { replayed, balance } => write!(
                f,
                "Replayed balance {} does not match current balance {}",
                replayed, balance
            ),
            Violation::Overdraft { id, balance } => {
                write!(f, "Balance goes negative ({}) after transaction {}", balance, id)
            }
            Violation::DuplicateTransaction(id) => write!(f, "Transaction {} appears more than once", id),
            Violation::ForeignTransaction(id) => {
                write!(f, "Transaction {} does not involve this account", id)
            }
        }
    }
}

/// Result of validating one account's local DAG
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub account: String,

    /// Number of local DAG nodes examined
    pub checked: usize,

    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Result of verifying one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub id: TransactionId,
    pub status: TransactionStatus,

    /// Stored BLAKE3 hash matches the record content
    pub hash_valid: bool,

    /// Every transitive ancestor is a confirmed node
    pub ancestors_confirmed: bool,

    /// Sender's replayed balance just before this record, if confirmed
    pub sender_balance_before: Option<i128>,

    /// Record is indexed in both the sender's and the receiver's local DAG
    pub in_local_dags: bool,

    /// Human-readable reasons verification failed
    pub failures: Vec<String>,
}

impl VerificationReport {
    pub fn verified(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Ledger {
    /// Check an account's local DAG for structural and accounting consistency
    pub fn validate_local_dag(&self, account: &str) -> Result<ValidationReport> {
        let owner = self.accounts.get(account)?;
        Ok(self.validate_account(owner))
    }

    /// Validate every account, in name order
    pub fn validate_all(&self) -> Vec<ValidationReport> {
        self.accounts.iter().map(|owner| self.validate_account(owner)).collect()
    }

    fn validate_account(&self, owner: &Account) -> ValidationReport {
        let account = owner.name.as_str();
        let view = self.dag.local_dag(account);
        let mut violations = Vec::new();

        if view.has_cycle() || !view.is_topologically_ordered() {
            violations.push(Violation::Cycle);
        }

        for record in view.iter() {
            if !record.touches(account) {
                violations.push(Violation::ForeignTransaction(record.id.clone()));
            }
            for parent in &record.parents {
                if !self.dag.contains(parent) {
                    violations.push(Violation::DanglingParent {
                        id: record.id.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        violations.extend(self.duplicate_ids(account));

        let mut running = owner.genesis_balance as i128;
        for record in view.iter() {
            running += record.delta_for(account);
            if running < 0 {
                violations.push(Violation::Overdraft {
                    id: record.id.clone(),
                    balance: running,
                });
            }
        }
        if running != owner.balance as i128 {
            violations.push(Violation::BalanceMismatch {
                replayed: running,
                balance: owner.balance,
            });
        }

        if violations.is_empty() {
            debug!(%account, nodes = view.len(), "local DAG valid");
        } else {
            warn!(%account, violations = violations.len(), "local DAG validation failed");
        }

        ValidationReport {
            account: account.to_string(),
            checked: view.len(),
            violations,
        }
    }

    /// Replay an account's local DAG from its genesis balance
    pub fn replay_balance(&self, account: &str) -> Result<i128> {
        let owner = self.accounts.get(account)?;
        let view = self.dag.local_dag(account);
        Ok(replay(&view, account, owner.genesis_balance, None))
    }

    /// Check one transaction's integrity and its place in history
    pub fn verify_transaction(&self, id: &str) -> Result<VerificationReport> {
        let record = self.query_transaction(id)?;
        let mut failures = Vec::new();

        let hash_valid = record.verify_hash().is_ok();
        if !hash_valid {
            failures.push("content hash mismatch".to_string());
        }

        if !record.is_confirmed() {
            failures.push(format!("transaction is {}", record.status()));
            return Ok(VerificationReport {
                id: record.id.clone(),
                status: record.status().clone(),
                hash_valid,
                ancestors_confirmed: false,
                sender_balance_before: None,
                in_local_dags: false,
                failures,
            });
        }

        let ancestors = self.dag.ancestors(id)?;
        let missing: Vec<&TransactionId> = ancestors
            .iter()
            .filter(|ancestor| !self.dag.get(ancestor).map_or(false, |a| a.is_confirmed()))
            .collect();
        let ancestors_confirmed = missing.is_empty();
        for ancestor in missing {
            failures.push(format!("ancestor {} is not confirmed", ancestor));
        }

        let sender = self.accounts.get(&record.sender)?;
        let view = self.dag.local_dag(&record.sender);
        let before = replay(&view, &record.sender, sender.genesis_balance, Some(id));
        if before < record.amount as i128 {
            failures.push(format!(
                "sender balance before transaction was {}, below amount {}",
                before, record.amount
            ));
        }

        let in_local_dags = self.dag.local_ids(&record.sender).iter().any(|local| local == id)
            && self.dag.local_ids(&record.receiver).iter().any(|local| local == id);
        if !in_local_dags {
            failures.push("transaction missing from a party's local DAG".to_string());
        }

        Ok(VerificationReport {
            id: record.id.clone(),
            status: record.status().clone(),
            hash_valid,
            ancestors_confirmed,
            sender_balance_before: Some(before),
            in_local_dags,
            failures,
        })
    }

    /// Ids touching `account` that are listed twice locally or held by two stores
    fn duplicate_ids(&self, account: &str) -> Vec<Violation> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for id in self.dag.local_ids(account) {
            *seen.entry(id.as_str()).or_insert(0) += 1;
        }
        for record in self.pending.iter().chain(self.rejected.values()) {
            if record.touches(account) {
                *seen.entry(record.id.as_str()).or_insert(0) += 1;
            }
        }

        let mut duplicates: Vec<&str> = seen
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(id, _)| id)
            .collect();
        duplicates.sort_unstable();
        duplicates
            .into_iter()
            .map(|id| Violation::DuplicateTransaction(id.to_string()))
            .collect()
    }
}

/// Fold a view's deltas for `account`, stopping before `until` if given
fn replay(view: &DagView<'_>, account: &str, genesis: u64, until: Option<&str>) -> i128 {
    let mut balance = genesis as i128;
    for record in view.iter() {
        if Some(record.id.as_str()) == until {
            break;
        }
        balance += record.delta_for(account);
    }
    balance
}
