//! Error types for the DAG module

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DagError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("Transaction {id} references parent {parent} which is not a confirmed node")]
    DanglingParent { id: String, parent: String },

    #[error("Cycle detected in DAG at transaction {0}")]
    CycleDetected(String),

    #[error("Transaction {0} already exists in the DAG")]
    DuplicateTransaction(String),

    #[error("Transaction {0} not found")]
    UnknownTransaction(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Transaction {id} is already {status} and cannot change state")]
    InvalidTransition { id: String, status: String },
}
