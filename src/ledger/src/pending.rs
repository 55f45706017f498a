//! Pending transaction pool
//!
//! Staging area for submitted transfers awaiting their receiver's decision.
//! Records are grouped per receiver in submission order, and every pending
//! record holds a reservation on its sender's funds until it is resolved.

use dagledger_dag::{TransactionId, TransactionRecord};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct PendingPool {
    /// Owned pending records (transaction_id -> record)
    records: HashMap<TransactionId, TransactionRecord>,

    /// Receiver -> ids addressed to it, in submission order
    by_receiver: HashMap<String, Vec<TransactionId>>,

    /// Sender -> sum of its outstanding pending amounts
    reserved: HashMap<String, u64>,
}

impl PendingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a pending record and reserve its amount on the sender.
    ///
    /// Callers check availability first; the pool only does bookkeeping.
    pub(crate) fn insert(&mut self, record: TransactionRecord) {
        *self.reserved.entry(record.sender.clone()).or_insert(0) += record.amount;
        self.by_receiver
            .entry(record.receiver.clone())
            .or_default()
            .push(record.id.clone());
        self.records.insert(record.id.clone(), record);
    }

    /// Remove a record and release its reservation
    pub(crate) fn take(&mut self, id: &str) -> Option<TransactionRecord> {
        let record = self.records.remove(id)?;

        if let Some(ids) = self.by_receiver.get_mut(&record.receiver) {
            ids.retain(|pending| pending != id);
            if ids.is_empty() {
                self.by_receiver.remove(&record.receiver);
            }
        }

        if let Some(held) = self.reserved.get_mut(&record.sender) {
            *held = held.saturating_sub(record.amount);
            if *held == 0 {
                self.reserved.remove(&record.sender);
            }
        }

        Some(record)
    }

    pub fn get(&self, id: &str) -> Option<&TransactionRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Pending records addressed to `receiver`, oldest first
    pub fn for_receiver(&self, receiver: &str) -> Vec<&TransactionRecord> {
        self.by_receiver
            .get(receiver)
            .map(|ids| ids.iter().filter_map(|id| self.records.get(id)).collect())
            .unwrap_or_default()
    }

    /// Funds held by `sender`'s outstanding outgoing transactions
    pub fn reserved(&self, sender: &str) -> u64 {
        self.reserved.get(sender).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All pending records, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &TransactionRecord> {
        let mut records: Vec<&TransactionRecord> = self.records.values().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagledger_dag::RecordBuilder;

    #[test]
    fn test_insert_reserves_and_take_releases() {
        let mut pool = PendingPool::new();
        pool.insert(RecordBuilder::new("alice", "bob", 200).id("t1").build());
        pool.insert(RecordBuilder::new("alice", "carol", 50).id("t2").build());

        assert_eq!(pool.reserved("alice"), 250);
        assert_eq!(pool.reserved("bob"), 0);
        assert_eq!(pool.len(), 2);

        let taken = pool.take("t1").unwrap();
        assert_eq!(taken.amount, 200);
        assert_eq!(pool.reserved("alice"), 50);
        assert!(pool.for_receiver("bob").is_empty());

        assert!(pool.take("t1").is_none());
        assert_eq!(pool.reserved("alice"), 50);
    }

    #[test]
    fn test_receiver_view_keeps_submission_order() {
        let mut pool = PendingPool::new();
        pool.insert(RecordBuilder::new("alice", "bob", 1).id("t1").build());
        pool.insert(RecordBuilder::new("carol", "bob", 2).id("t2").build());
        pool.insert(RecordBuilder::new("alice", "bob", 3).id("t3").build());

        let ids: Vec<_> = pool.for_receiver("bob").iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);

        pool.take("t2");
        let ids: Vec<_> = pool.for_receiver("bob").iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t3"]);
        assert!(pool.for_receiver("alice").is_empty());
    }
}
