//! Ledger state and the shared handle around it
//!
//! `Ledger` ties the account store, the pending pool, the DAG and the
//! rejected archive together and is the only place where a record moves
//! between them. `LedgerHandle` is the cloneable, lock-guarded entry point the
//! node hands to every connection.

use crate::accounts::AccountStore;
use crate::error::{LedgerError, Result};
use crate::pending::PendingPool;
use dagledger_dag::{DagLedger, DagView, RecordBuilder, TransactionId, TransactionKind, TransactionRecord};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// One `sender receiver amount` group of a transfer command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub sender: String,
    pub receiver: String,
    pub amount: i64,
    pub kind: TransactionKind,
}

impl TransferRequest {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, amount: i64, kind: TransactionKind) -> Self {
        TransferRequest {
            sender: sender.into(),
            receiver: receiver.into(),
            amount,
            kind,
        }
    }
}

/// The authoritative ledger state
#[derive(Debug)]
pub struct Ledger {
    pub(crate) accounts: AccountStore,
    pub(crate) pending: PendingPool,
    pub(crate) dag: DagLedger,

    /// Rejected records, kept for audit and `query_transaction`
    pub(crate) rejected: HashMap<TransactionId, TransactionRecord>,

    /// Sequence the next confirmed record receives
    pub(crate) next_sequence: u64,

    /// Bumped by every successful mutation
    pub(crate) revision: u64,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Ledger {
            accounts: AccountStore::new(),
            pending: PendingPool::new(),
            dag: DagLedger::new(),
            rejected: HashMap::new(),
            next_sequence: 1,
            revision: 0,
        }
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn pending(&self) -> &PendingPool {
        &self.pending
    }

    pub fn dag(&self) -> &DagLedger {
        &self.dag
    }

    pub fn rejected(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.rejected.values()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Open an account, returning its balance
    pub fn add_user(&mut self, name: &str, initial_balance: i64) -> Result<u64> {
        let balance = self.accounts.add_user(name, initial_balance)?.balance;
        self.revision += 1;
        info!(account = %name, balance, "account created");
        Ok(balance)
    }

    pub fn check_balance(&self, name: &str) -> Result<u64> {
        self.accounts.check_balance(name)
    }

    /// Balance minus the funds reserved by the account's pending transfers
    pub fn available_balance(&self, name: &str) -> Result<u64> {
        let balance = self.accounts.check_balance(name)?;
        Ok(balance.saturating_sub(self.pending.reserved(name)))
    }

    // ------------------------------------------------------------------
    // Two-phase transfers
    // ------------------------------------------------------------------

    /// Stage a transfer for the receiver's decision, reserving sender funds
    pub fn submit(
        &mut self,
        sender: &str,
        receiver: &str,
        amount: i64,
        kind: TransactionKind,
    ) -> Result<TransactionId> {
        self.accounts.get(sender)?;
        self.accounts.get(receiver)?;

        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "transfer amount must be positive, got {}",
                amount
            )));
        }
        if sender == receiver {
            return Err(LedgerError::InvalidAmount(format!(
                "sender and receiver are both {}",
                sender
            )));
        }

        let amount = amount as u64;
        let available = self.available_balance(sender)?;
        if amount > available {
            return Err(LedgerError::InsufficientFunds {
                account: sender.to_string(),
                available,
                requested: amount,
            });
        }

        let parents: Vec<TransactionId> = [self.dag.latest_for(sender), self.dag.latest_for(receiver)]
            .into_iter()
            .flatten()
            .cloned()
            .collect();

        let record = RecordBuilder::new(sender, receiver, amount)
            .id(self.fresh_id())
            .kind(kind)
            .parents(parents)
            .build();
        let id = record.id.clone();

        self.pending.insert(record);
        self.revision += 1;

        debug!(tx = %id, %sender, %receiver, amount, kind = %kind, "transaction pending");
        Ok(id)
    }

    /// Submit several independent transfers; later ones see earlier reservations
    pub fn submit_batch(&mut self, requests: &[TransferRequest]) -> Vec<Result<TransactionId>> {
        requests
            .iter()
            .map(|req| self.submit(&req.sender, &req.receiver, req.amount, req.kind))
            .collect()
    }

    /// Pending records addressed to `receiver`
    pub fn view_pending(&self, receiver: &str) -> Result<Vec<&TransactionRecord>> {
        self.accounts.get(receiver)?;
        Ok(self.pending.for_receiver(receiver))
    }

    /// Receiver accepts a pending transfer: funds move and the record joins the DAG
    pub fn confirm(&mut self, receiver: &str, id: &str) -> Result<&TransactionRecord> {
        let record = self.authorize(receiver, id)?;

        // Every precondition of the mutation below is checked up front so a
        // failure leaves the ledger untouched.
        let sender_balance = self.accounts.check_balance(&record.sender)?;
        if sender_balance < record.amount {
            return Err(LedgerError::InsufficientFunds {
                account: record.sender.clone(),
                available: sender_balance,
                requested: record.amount,
            });
        }
        let receiver_balance = self.accounts.check_balance(&record.receiver)?;
        if receiver_balance.checked_add(record.amount).is_none() {
            return Err(LedgerError::InvalidAmount(format!(
                "crediting {} to {} overflows",
                record.amount, record.receiver
            )));
        }
        if let Some(parent) = record.parents.iter().find(|p| !self.dag.contains(p)) {
            return Err(LedgerError::DanglingParent {
                id: record.id.clone(),
                parent: parent.clone(),
            });
        }

        let mut record = self
            .pending
            .take(id)
            .ok_or_else(|| LedgerError::UnknownTransaction(id.to_string()))?;
        let sequence = self.next_sequence;
        record.confirm(sequence)?;

        self.accounts.debit(&record.sender, record.amount)?;
        self.accounts.credit(&record.receiver, record.amount)?;
        info!(
            tx = %record.id,
            sender = %record.sender,
            receiver = %record.receiver,
            amount = record.amount,
            sequence,
            "transaction confirmed"
        );
        self.dag.insert_confirmed(record)?;

        self.next_sequence += 1;
        self.revision += 1;

        self.dag
            .get(id)
            .ok_or_else(|| LedgerError::UnknownTransaction(id.to_string()))
    }

    /// Receiver declines a pending transfer: the reservation is released
    pub fn reject(&mut self, receiver: &str, id: &str) -> Result<&TransactionRecord> {
        self.authorize(receiver, id)?;

        let mut record = self
            .pending
            .take(id)
            .ok_or_else(|| LedgerError::UnknownTransaction(id.to_string()))?;
        record.reject()?;

        info!(tx = %record.id, %receiver, amount = record.amount, "transaction rejected");
        self.revision += 1;

        let id = record.id.clone();
        Ok(&*self.rejected.entry(id).or_insert(record))
    }

    /// Lookup and authorization shared by confirm and reject
    fn authorize(&self, receiver: &str, id: &str) -> Result<&TransactionRecord> {
        self.accounts.get(receiver)?;

        let record = self
            .pending
            .get(id)
            .ok_or_else(|| LedgerError::UnknownTransaction(id.to_string()))?;

        if record.receiver != receiver {
            return Err(LedgerError::NotAuthorized {
                account: receiver.to_string(),
                id: id.to_string(),
            });
        }
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Find a record in pending, confirmed or rejected storage
    pub fn query_transaction(&self, id: &str) -> Result<&TransactionRecord> {
        self.pending
            .get(id)
            .or_else(|| self.dag.get(id))
            .or_else(|| self.rejected.get(id))
            .ok_or_else(|| LedgerError::UnknownTransaction(id.to_string()))
    }

    pub fn local_dag(&self, account: &str) -> Result<DagView<'_>> {
        self.accounts.get(account)?;
        Ok(self.dag.local_dag(account))
    }

    pub fn global_dag(&self) -> DagView<'_> {
        self.dag.global_dag()
    }

    /// Local DAGs for several accounts, failing on the first unknown name
    pub fn fetch_user_dags<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<DagView<'_>>> {
        for name in names {
            let name: &str = name.as_ref();
            if !self.accounts.contains(name) {
                return Err(LedgerError::UnknownAccount(name.to_string()));
            }
        }
        Ok(names
            .iter()
            .map(|name| {
                let name: &str = name.as_ref();
                self.dag.local_dag(name)
            })
            .collect())
    }

    fn fresh_id(&self) -> TransactionId {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.pending.contains(&id) && !self.dag.contains(&id) && !self.rejected.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Shared, lock-guarded ledger.
///
/// Mutations hold the write lock for a whole command and reads hold the read
/// lock, so readers never observe a half-applied confirmation. The guards are
/// not `Send`, which keeps them from being held across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct LedgerHandle {
    inner: Arc<RwLock<Ledger>>,
}

impl LedgerHandle {
    pub fn new(ledger: Ledger) -> Self {
        LedgerHandle {
            inner: Arc::new(RwLock::new(ledger)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Ledger> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Ledger> {
        self.inner.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice_and_bob() -> Ledger {
        let mut ledger = Ledger::new();
        ledger.add_user("Alice", 1000).unwrap();
        ledger.add_user("Bob", 500).unwrap();
        ledger
    }

    #[test]
    fn test_confirm_moves_funds() {
        let mut ledger = alice_and_bob();
        let id = ledger.submit("Alice", "Bob", 200, TransactionKind::Token).unwrap();

        // Pending: balances untouched, funds reserved.
        assert_eq!(ledger.check_balance("Alice").unwrap(), 1000);
        assert_eq!(ledger.available_balance("Alice").unwrap(), 800);

        let record = ledger.confirm("Bob", &id).unwrap();
        assert_eq!(record.sequence(), Some(1));

        assert_eq!(ledger.check_balance("Alice").unwrap(), 800);
        assert_eq!(ledger.check_balance("Bob").unwrap(), 700);
        assert_eq!(ledger.available_balance("Alice").unwrap(), 800);
        assert!(ledger.pending().is_empty());
        assert!(ledger.dag().contains(&id));
    }

    #[test]
    fn test_reject_releases_reservation() {
        let mut ledger = alice_and_bob();
        let id = ledger.submit("Alice", "Bob", 300, TransactionKind::Token).unwrap();
        ledger.reject("Bob", &id).unwrap();

        assert_eq!(ledger.check_balance("Alice").unwrap(), 1000);
        assert_eq!(ledger.available_balance("Alice").unwrap(), 1000);
        assert_eq!(ledger.check_balance("Bob").unwrap(), 500);
        assert!(ledger.query_transaction(&id).unwrap().is_rejected());
        assert!(!ledger.dag().contains(&id));
    }

    #[test]
    fn test_submit_validation_order() {
        let mut ledger = alice_and_bob();

        let err = ledger.submit("Alice", "Zed", 0, TransactionKind::Direct).unwrap_err();
        assert_eq!(err, LedgerError::UnknownAccount("Zed".to_string()));

        let err = ledger.submit("Alice", "Bob", 0, TransactionKind::Direct).unwrap_err();
        assert_eq!(err.code(), "InvalidAmount");

        let err = ledger.submit("Alice", "Bob", -5, TransactionKind::Direct).unwrap_err();
        assert_eq!(err.code(), "InvalidAmount");

        let err = ledger.submit("Alice", "Alice", 5, TransactionKind::Direct).unwrap_err();
        assert_eq!(err.code(), "InvalidAmount");

        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn test_reservations_prevent_double_spend() {
        let mut ledger = alice_and_bob();
        ledger.submit("Alice", "Bob", 700, TransactionKind::Token).unwrap();

        let err = ledger.submit("Alice", "Bob", 301, TransactionKind::Token).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                account: "Alice".to_string(),
                available: 300,
                requested: 301,
            }
        );
        assert_eq!(ledger.pending().len(), 1);

        ledger.submit("Alice", "Bob", 300, TransactionKind::Token).unwrap();
        assert_eq!(ledger.available_balance("Alice").unwrap(), 0);
    }

    #[test]
    fn test_batch_results_are_independent() {
        let mut ledger = alice_and_bob();
        let results = ledger.submit_batch(&[
            TransferRequest::new("Alice", "Bob", 600, TransactionKind::Token),
            TransferRequest::new("Alice", "Bob", 600, TransactionKind::Token),
            TransferRequest::new("Bob", "Alice", 100, TransactionKind::Direct),
        ]);

        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err().code(), "InsufficientFunds");
        assert!(results[2].is_ok());
        assert_eq!(ledger.pending().len(), 2);
    }

    #[test]
    fn test_only_receiver_may_resolve() {
        let mut ledger = alice_and_bob();
        let id = ledger.submit("Alice", "Bob", 100, TransactionKind::Token).unwrap();

        let err = ledger.confirm("Alice", &id).unwrap_err();
        assert_eq!(err.code(), "NotAuthorized");
        let err = ledger.reject("Alice", &id).unwrap_err();
        assert_eq!(err.code(), "NotAuthorized");

        assert!(ledger.pending().contains(&id));
        assert_eq!(ledger.check_balance("Alice").unwrap(), 1000);
    }

    #[test]
    fn test_resolved_ids_are_unknown() {
        let mut ledger = alice_and_bob();
        let id = ledger.submit("Alice", "Bob", 100, TransactionKind::Token).unwrap();
        ledger.confirm("Bob", &id).unwrap();

        assert_eq!(
            ledger.confirm("Bob", &id).unwrap_err(),
            LedgerError::UnknownTransaction(id.clone())
        );
        assert_eq!(ledger.reject("Bob", &id).unwrap_err().code(), "UnknownTransaction");
        assert_eq!(ledger.check_balance("Alice").unwrap(), 900);
        assert_eq!(ledger.check_balance("Bob").unwrap(), 600);
    }

    #[test]
    fn test_parents_link_latest_history() {
        let mut ledger = alice_and_bob();
        ledger.add_user("Carol", 0).unwrap();

        let first = ledger.submit("Alice", "Bob", 100, TransactionKind::Token).unwrap();
        ledger.confirm("Bob", &first).unwrap();

        let second = ledger.submit("Bob", "Carol", 50, TransactionKind::Token).unwrap();
        assert_eq!(ledger.query_transaction(&second).unwrap().parents, vec![first.clone()]);
        ledger.confirm("Carol", &second).unwrap();

        let third = ledger.submit("Carol", "Alice", 10, TransactionKind::Direct).unwrap();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(ledger.query_transaction(&third).unwrap().parents, expected);
    }

    #[test]
    fn test_fetch_user_dags_reports_first_unknown() {
        let ledger = alice_and_bob();
        let err = ledger.fetch_user_dags(&["Alice", "Ghost", "Phantom"]).unwrap_err();
        assert_eq!(err, LedgerError::UnknownAccount("Ghost".to_string()));
        assert_eq!(ledger.fetch_user_dags(&["Bob", "Alice"]).unwrap().len(), 2);
    }

    #[test]
    fn test_revision_tracks_mutations() {
        let mut ledger = alice_and_bob();
        let start = ledger.revision();

        assert!(ledger.add_user("Alice", 1).is_err());
        assert_eq!(ledger.revision(), start);

        let id = ledger.submit("Alice", "Bob", 1, TransactionKind::Direct).unwrap();
        ledger.confirm("Bob", &id).unwrap();
        assert_eq!(ledger.revision(), start + 2);
    }
}
