//! JSON snapshot persistence
//!
//! A snapshot stores accounts at their genesis balances plus every record.
//! Loading rebuilds the ledger by replaying confirmed records in sequence
//! order, so current balances and reservations are always derived, never
//! trusted from disk.

use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;
use chrono::{DateTime, Utc};
use dagledger_dag::{DagError, TransactionRecord, TransactionStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub name: String,
    pub genesis_balance: u64,
    pub created_at: DateTime<Utc>,
}

/// Serializable ledger state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub revision: u64,
    pub next_sequence: u64,
    pub accounts: Vec<AccountSnapshot>,

    /// Confirmed records by sequence, then pending, then rejected
    pub records: Vec<TransactionRecord>,
}

impl Ledger {
    pub fn snapshot(&self) -> LedgerSnapshot {
        let accounts = self
            .accounts
            .iter()
            .map(|account| AccountSnapshot {
                name: account.name.clone(),
                genesis_balance: account.genesis_balance,
                created_at: account.created_at,
            })
            .collect();

        let mut confirmed: Vec<&TransactionRecord> = self.dag.records().collect();
        confirmed.sort_by_key(|record| record.sequence());

        let mut rejected: Vec<&TransactionRecord> = self.rejected.values().collect();
        rejected.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let records = confirmed
            .into_iter()
            .chain(self.pending.iter())
            .chain(rejected)
            .cloned()
            .collect();

        LedgerSnapshot {
            revision: self.revision,
            next_sequence: self.next_sequence,
            accounts,
            records,
        }
    }

    /// Rebuild a ledger from a snapshot, failing unless it validates cleanly
    pub fn restore(snapshot: LedgerSnapshot) -> Result<Ledger> {
        let mut ledger = Ledger::new();

        for account in snapshot.accounts {
            ledger
                .accounts
                .restore(account.name, account.genesis_balance, account.created_at)
                .map_err(snapshot_error)?;
        }

        let mut confirmed = Vec::new();
        let mut pending = Vec::new();
        let mut rejected = Vec::new();
        for record in snapshot.records {
            record.verify_hash().map_err(|err| snapshot_error(err.into()))?;
            match record.status() {
                TransactionStatus::Confirmed { .. } => confirmed.push(record),
                TransactionStatus::Pending => pending.push(record),
                TransactionStatus::Rejected { .. } => rejected.push(record),
            }
        }

        confirmed.sort_by_key(|record| record.sequence());
        let mut last_sequence = 0;
        for record in confirmed {
            last_sequence = record.sequence().unwrap_or(last_sequence);
            ledger.apply_confirmed(record).map_err(snapshot_error)?;
        }

        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        for record in pending {
            ledger.restore_pending(record).map_err(snapshot_error)?;
        }

        for record in rejected {
            if ledger.dag.contains(&record.id)
                || ledger.pending.contains(&record.id)
                || ledger.rejected.contains_key(&record.id)
            {
                return Err(LedgerError::Snapshot(format!(
                    "transaction {} stored more than once",
                    record.id
                )));
            }
            ledger.rejected.insert(record.id.clone(), record);
        }

        ledger.next_sequence = snapshot.next_sequence.max(last_sequence + 1);
        ledger.revision = snapshot.revision;

        let violations: Vec<String> = ledger
            .validate_all()
            .into_iter()
            .flat_map(|report| {
                let account = report.account;
                report
                    .violations
                    .into_iter()
                    .map(move |violation| format!("{}: {}", account, violation))
            })
            .collect();
        if !violations.is_empty() {
            return Err(LedgerError::Snapshot(format!(
                "restored ledger is inconsistent: {}",
                violations.join("; ")
            )));
        }

        info!(
            accounts = ledger.accounts.len(),
            confirmed = ledger.dag.len(),
            pending = ledger.pending.len(),
            revision = ledger.revision,
            "ledger restored from snapshot"
        );
        Ok(ledger)
    }

    /// Re-apply a confirmed record's transfer and attach it to the DAG
    fn apply_confirmed(&mut self, record: TransactionRecord) -> Result<()> {
        self.accounts.get(&record.receiver)?;
        self.accounts.debit(&record.sender, record.amount)?;
        self.accounts.credit(&record.receiver, record.amount)?;
        self.dag.insert_confirmed(record)?;
        Ok(())
    }

    /// Re-stage a pending record, re-deriving its reservation
    fn restore_pending(&mut self, record: TransactionRecord) -> Result<()> {
        self.accounts.get(&record.receiver)?;
        let available = self.available_balance(&record.sender)?;
        if record.amount > available {
            return Err(LedgerError::InsufficientFunds {
                account: record.sender.clone(),
                available,
                requested: record.amount,
            });
        }
        if self.dag.contains(&record.id) || self.pending.contains(&record.id) {
            return Err(DagError::DuplicateTransaction(record.id).into());
        }
        self.pending.insert(record);
        Ok(())
    }

    /// Write a snapshot atomically: temp file in the same directory, then rename
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        write_snapshot(&self.snapshot(), path)
    }

    /// Load a ledger from `path`; `None` if the file does not exist
    pub fn load_snapshot(path: &Path) -> Result<Option<Ledger>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path).map_err(|err| io_error(path, err))?;
        let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes)
            .map_err(|err| LedgerError::Snapshot(format!("{}: {}", path.display(), err)))?;
        Ledger::restore(snapshot).map(Some)
    }
}

fn write_snapshot(snapshot: &LedgerSnapshot, path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(snapshot)
        .map_err(|err| LedgerError::Snapshot(format!("serialize: {}", err)))?;

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|err| io_error(dir, err))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json).map_err(|err| io_error(&tmp, err))?;
    fs::rename(&tmp, path).map_err(|err| io_error(path, err))?;
    Ok(())
}

fn io_error(path: &Path, err: std::io::Error) -> LedgerError {
    LedgerError::Snapshot(format!("{}: {}", path.display(), err))
}

fn snapshot_error(err: LedgerError) -> LedgerError {
    match err {
        LedgerError::Snapshot(_) => err,
        other => LedgerError::Snapshot(format!("invalid snapshot: {}", other)),
    }
}

/// Writes snapshots to one path, never replacing a newer revision with an older one
#[derive(Debug)]
pub struct SnapshotWriter {
    path: PathBuf,
    last_written: Mutex<Option<u64>>,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotWriter {
            path: path.into(),
            last_written: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file on disk is older than `revision`
    pub fn is_stale(&self, revision: u64) -> bool {
        self.last_written.lock().map_or(true, |written| written < revision)
    }

    /// Persist `snapshot` unless a revision at least as new is already on disk.
    /// Returns whether the file was written.
    pub fn write(&self, snapshot: &LedgerSnapshot) -> Result<bool> {
        let mut last = self.last_written.lock();
        if last.map_or(false, |written| written >= snapshot.revision) {
            debug!(revision = snapshot.revision, "snapshot skipped, newer revision on disk");
            return Ok(false);
        }

        write_snapshot(snapshot, &self.path)?;
        *last = Some(snapshot.revision);
        debug!(revision = snapshot.revision, path = %self.path.display(), "snapshot written");
        Ok(true)
    }
}
