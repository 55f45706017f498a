//! # Ledger State Module
//!
//! Accounts, the two-phase transfer protocol and the consistency checks that
//! sit on top of the DAG.
//!
//! ## Features
//!
//! - **Account Store**: named accounts with non-negative balances
//! - **Pending Pool**: per-receiver staging with sender reservations
//! - **Two-Phase Transfers**: submit, then confirm or reject by the receiver
//! - **Validation**: local DAG replay, acyclicity and duplicate checks
//! - **Snapshots**: JSON persistence rebuilt by replay on load
//!
//! ## Example
//!
//! ```rust
//! use dagledger_ledger::{Ledger, TransactionKind};
//!
//! let mut ledger = Ledger::new();
//! ledger.add_user("Alice", 1000).unwrap();
//! ledger.add_user("Bob", 500).unwrap();
//!
//! let id = ledger.submit("Alice", "Bob", 200, TransactionKind::Token).unwrap();
//! ledger.confirm("Bob", &id).unwrap();
//!
//! assert_eq!(ledger.check_balance("Alice").unwrap(), 800);
//! assert!(ledger.validate_local_dag("Bob").unwrap().is_valid());
//! ```

pub mod accounts;
pub mod error;
pub mod ledger;
pub mod pending;
pub mod snapshot;
pub mod validator;

pub use accounts::{Account, AccountStore};
pub use error::{LedgerError, Result};
pub use ledger::{Ledger, LedgerHandle, TransferRequest};
pub use pending::PendingPool;
pub use snapshot::{AccountSnapshot, LedgerSnapshot, SnapshotWriter};
pub use validator::{ValidationReport, VerificationReport, Violation};

pub use dagledger_dag::{DagView, TransactionId, TransactionKind, TransactionRecord, TransactionStatus};
