//! # DAG Ledger Graph Module
//!
//! Transaction records and the append-only DAG they form once confirmed.
//!
//! ## Features
//!
//! - **Transaction Records**: two-phase lifecycle (`PENDING -> CONFIRMED | REJECTED`)
//!   with BLAKE3 content hashes
//! - **DAG Arena**: each confirmed record stored once, keyed by id
//! - **Local Views**: per-account index sets over the arena
//! - **Deterministic Ordering**: topological order, confirmation sequence as tie-break
//!
//! ## Module Structure
//!
//! ```text
//! dag/
//! ├── record/   - Transaction record and its state machine
//! ├── graph/    - DAG arena, local and global views
//! └── error/    - Error types
//! ```

pub mod error;
pub mod graph;
pub mod record;

pub use error::{DagError, Result};
pub use graph::{DagLedger, DagView};
pub use record::{
    RecordBuilder, RecordHash, TransactionId, TransactionKind, TransactionRecord,
    TransactionStatus,
};
