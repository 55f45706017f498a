//! Transaction record implementation
//!
//! A record is a single transfer between two accounts. It starts out
//! `Pending`, and is resolved exactly once into either `Confirmed` (at which
//! point it becomes a node of the DAG) or `Rejected`.

use crate::error::{DagError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Unique transaction identifier
pub type TransactionId = String;

/// Record hash (BLAKE3)
pub type RecordHash = [u8; 32];

/// How the transfer was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TransactionKind {
    /// Raw value transfer
    #[default]
    Direct,
    /// Transfer routed through the fungible token unit
    Token,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Direct => "DIRECT",
            TransactionKind::Token => "TOKEN",
        }
    }

    /// Parse a kind tag, case-insensitively
    pub fn parse(tag: &str) -> Option<Self> {
        if tag.eq_ignore_ascii_case("TOKEN") {
            Some(TransactionKind::Token)
        } else if tag.eq_ignore_ascii_case("DIRECT") {
            Some(TransactionKind::Direct)
        } else {
            None
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a record. Both resolved states are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Confirmed {
        at: DateTime<Utc>,
        /// Ledger-wide confirmation counter, starting at 1
        sequence: u64,
    },
    Rejected {
        at: DateTime<Utc>,
    },
}

impl TransactionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Confirmed { .. } => "CONFIRMED",
            TransactionStatus::Rejected { .. } => "REJECTED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Transfer record, and once confirmed, a node of the ledger DAG
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique transaction identifier
    pub id: TransactionId,

    /// Debited account
    pub sender: String,

    /// Credited account, the only party allowed to resolve the record
    pub receiver: String,

    /// Transferred amount, always positive
    pub amount: u64,

    pub kind: TransactionKind,

    /// Causal predecessors (sorted, no duplicates)
    pub parents: Vec<TransactionId>,

    pub created_at: DateTime<Utc>,

    /// BLAKE3 of id + sender + receiver + amount + kind + parents + created_at
    pub hash: RecordHash,

    status: TransactionStatus,
}

impl TransactionRecord {
    /// Create a new pending record
    pub fn new(
        id: TransactionId,
        sender: String,
        receiver: String,
        amount: u64,
        kind: TransactionKind,
        mut parents: Vec<TransactionId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        parents.sort();
        parents.dedup();

        let hash = Self::compute_hash(&id, &sender, &receiver, amount, kind, &parents, created_at);

        TransactionRecord {
            id,
            sender,
            receiver,
            amount,
            kind,
            parents,
            created_at,
            hash,
            status: TransactionStatus::Pending,
        }
    }

    /// Compute BLAKE3 hash of record content
    pub fn compute_hash(
        id: &str,
        sender: &str,
        receiver: &str,
        amount: u64,
        kind: TransactionKind,
        parents: &[TransactionId],
        created_at: DateTime<Utc>,
    ) -> RecordHash {
        use blake3::Hasher;

        let mut hasher = Hasher::new();
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        for field in [id, sender, receiver] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(&amount.to_le_bytes());
        hasher.update(kind.as_str().as_bytes());

        hasher.update(&(parents.len() as u64).to_le_bytes());
        for parent in parents {
            hasher.update(&(parent.len() as u64).to_le_bytes());
            hasher.update(parent.as_bytes());
        }

        hasher.update(&created_at.timestamp_millis().to_le_bytes());

        *hasher.finalize().as_bytes()
    }

    /// Verify the stored hash matches the record content
    pub fn verify_hash(&self) -> Result<()> {
        let computed = Self::compute_hash(
            &self.id,
            &self.sender,
            &self.receiver,
            self.amount,
            self.kind,
            &self.parents,
            self.created_at,
        );

        if computed != self.hash {
            return Err(DagError::InvalidRecord(format!("Hash mismatch for {}", self.id)));
        }

        Ok(())
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn status(&self) -> &TransactionStatus {
        &self.status
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, TransactionStatus::Pending)
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self.status, TransactionStatus::Confirmed { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.status, TransactionStatus::Rejected { .. })
    }

    /// Confirmation sequence, if confirmed
    pub fn sequence(&self) -> Option<u64> {
        match self.status {
            TransactionStatus::Confirmed { sequence, .. } => Some(sequence),
            _ => None,
        }
    }

    /// `PENDING -> CONFIRMED`
    pub fn confirm(&mut self, sequence: u64) -> Result<()> {
        self.ensure_pending()?;
        self.status = TransactionStatus::Confirmed {
            at: Utc::now(),
            sequence,
        };
        Ok(())
    }

    /// `PENDING -> REJECTED`
    pub fn reject(&mut self) -> Result<()> {
        self.ensure_pending()?;
        self.status = TransactionStatus::Rejected { at: Utc::now() };
        Ok(())
    }

    fn ensure_pending(&self) -> Result<()> {
        if !self.is_pending() {
            return Err(DagError::InvalidTransition {
                id: self.id.clone(),
                status: self.status.label().to_string(),
            });
        }
        Ok(())
    }

    /// Whether `account` is the sender or the receiver
    pub fn touches(&self, account: &str) -> bool {
        self.sender == account || self.receiver == account
    }

    /// Signed balance change this record applies to `account`
    pub fn delta_for(&self, account: &str) -> i128 {
        if self.sender == account {
            -(self.amount as i128)
        } else if self.receiver == account {
            self.amount as i128
        } else {
            0
        }
    }

    /// Get parent set as HashSet for efficient lookups
    pub fn parent_set(&self) -> HashSet<TransactionId> {
        self.parents.iter().cloned().collect()
    }

    /// A record with no parents is the first in both parties' histories
    pub fn is_genesis(&self) -> bool {
        self.parents.is_empty()
    }
}

/// Builder for creating records
pub struct RecordBuilder {
    id: Option<TransactionId>,
    sender: String,
    receiver: String,
    amount: u64,
    kind: TransactionKind,
    parents: Vec<TransactionId>,
    created_at: Option<DateTime<Utc>>,
}

impl RecordBuilder {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, amount: u64) -> Self {
        RecordBuilder {
            id: None,
            sender: sender.into(),
            receiver: receiver.into(),
            amount,
            kind: TransactionKind::Direct,
            parents: Vec::new(),
            created_at: None,
        }
    }

    /// Set record ID (auto-generated if not set)
    pub fn id(mut self, id: impl Into<TransactionId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn kind(mut self, kind: TransactionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Add a parent record
    pub fn parent(mut self, parent: impl Into<TransactionId>) -> Self {
        self.parents.push(parent.into());
        self
    }

    /// Replace the parent list
    pub fn parents(mut self, parents: Vec<TransactionId>) -> Self {
        self.parents = parents;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Build the pending record
    pub fn build(self) -> TransactionRecord {
        let id = self.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        TransactionRecord::new(
            id,
            self.sender,
            self.receiver,
            self.amount,
            self.kind,
            self.parents,
            created_at,
        )
    }
}
