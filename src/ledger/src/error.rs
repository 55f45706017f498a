//! Error types for the ledger module

use dagledger_dag::DagError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("User {0} already exists")]
    DuplicateAccount(String),

    #[error("User {0} does not exist")]
    UnknownAccount(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient balance for user {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        account: String,
        available: u64,
        requested: u64,
    },

    #[error("Transaction {0} not found")]
    UnknownTransaction(String),

    #[error("Transaction {id} is not pending for user {account}")]
    NotAuthorized { account: String, id: String },

    #[error("Transaction {id} references unconfirmed parent {parent}")]
    DanglingParent { id: String, parent: String },

    #[error("Cycle detected at transaction {0}")]
    CycleDetected(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("DAG error: {0}")]
    Dag(DagError),
}

impl LedgerError {
    /// Stable, machine-readable name of the error kind
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::DuplicateAccount(_) => "DuplicateAccount",
            LedgerError::UnknownAccount(_) => "UnknownAccount",
            LedgerError::InvalidAmount(_) => "InvalidAmount",
            LedgerError::InsufficientFunds { .. } => "InsufficientFunds",
            LedgerError::UnknownTransaction(_) => "UnknownTransaction",
            LedgerError::NotAuthorized { .. } => "NotAuthorized",
            LedgerError::DanglingParent { .. } => "DanglingParent",
            LedgerError::CycleDetected(_) => "CycleDetected",
            LedgerError::Snapshot(_) => "Snapshot",
            LedgerError::Dag(_) => "Dag",
        }
    }
}

impl From<DagError> for LedgerError {
    fn from(err: DagError) -> Self {
        match err {
            DagError::DanglingParent { id, parent } => LedgerError::DanglingParent { id, parent },
            DagError::CycleDetected(id) => LedgerError::CycleDetected(id),
            DagError::UnknownTransaction(id) => LedgerError::UnknownTransaction(id),
            other => LedgerError::Dag(other),
        }
    }
}
