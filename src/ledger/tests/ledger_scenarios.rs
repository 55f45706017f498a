//! End-to-end ledger scenarios and property tests
//!
//! Tests:
//! - Two-phase transfer walkthroughs (confirm, reject, over-reservation)
//! - Local DAG ordering and replay
//! - Balance conservation and DAG validity under random workloads

use dagledger_ledger::{Ledger, LedgerError, LedgerHandle, TransactionKind, TransferRequest};
use proptest::prelude::*;
use std::collections::HashSet;
use std::thread;

fn alice_and_bob() -> Ledger {
    let mut ledger = Ledger::new();
    ledger.add_user("Alice", 1000).unwrap();
    ledger.add_user("Bob", 500).unwrap();
    ledger
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn test_confirm_then_reject_walkthrough() {
    let mut ledger = alice_and_bob();
    assert_eq!(ledger.check_balance("Alice").unwrap(), 1000);

    let x = ledger.submit("Alice", "Bob", 200, TransactionKind::Token).unwrap();
    let pending = ledger.view_pending("Bob").unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, x);

    ledger.confirm("Bob", &x).unwrap();
    assert_eq!(ledger.check_balance("Alice").unwrap(), 800);
    assert_eq!(ledger.check_balance("Bob").unwrap(), 700);
    assert!(ledger.validate_local_dag("Alice").unwrap().is_valid());
    assert!(ledger.validate_local_dag("Bob").unwrap().is_valid());

    let y = ledger.submit("Alice", "Bob", 300, TransactionKind::Token).unwrap();
    ledger.reject("Bob", &y).unwrap();
    assert_eq!(ledger.check_balance("Alice").unwrap(), 800);
    assert_eq!(ledger.check_balance("Bob").unwrap(), 700);
    assert!(ledger.view_pending("Bob").unwrap().is_empty());
    assert!(ledger.query_transaction(&y).unwrap().is_rejected());
}

#[test]
fn test_over_reservation_leaves_no_record() {
    let mut ledger = alice_and_bob();
    ledger.submit("Alice", "Bob", 900, TransactionKind::Token).unwrap();

    let err = ledger.submit("Alice", "Bob", 200, TransactionKind::Token).unwrap_err();
    assert_eq!(err.code(), "InsufficientFunds");
    assert_eq!(ledger.view_pending("Bob").unwrap().len(), 1);
}

#[test]
fn test_confirm_missing_and_resolved() {
    let mut ledger = alice_and_bob();
    assert_eq!(
        ledger.confirm("Bob", "no-such-id").unwrap_err(),
        LedgerError::UnknownTransaction("no-such-id".to_string())
    );
    assert_eq!(
        ledger.confirm("Nobody", "no-such-id").unwrap_err(),
        LedgerError::UnknownAccount("Nobody".to_string())
    );

    let x = ledger.submit("Alice", "Bob", 100, TransactionKind::Direct).unwrap();
    ledger.reject("Bob", &x).unwrap();
    assert_eq!(ledger.confirm("Bob", &x).unwrap_err().code(), "UnknownTransaction");
    assert_eq!(ledger.check_balance("Bob").unwrap(), 500);
}

#[test]
fn test_local_dag_is_topological_and_replays() {
    let mut ledger = alice_and_bob();
    ledger.add_user("Carol", 100).unwrap();

    let transfers = [
        ("Alice", "Bob", 200),
        ("Carol", "Alice", 50),
        ("Bob", "Carol", 120),
        ("Alice", "Carol", 30),
    ];
    for (sender, receiver, amount) in transfers {
        let id = ledger.submit(sender, receiver, amount, TransactionKind::Token).unwrap();
        ledger.confirm(receiver, &id).unwrap();
    }

    for name in ["Alice", "Bob", "Carol"] {
        let view = ledger.local_dag(name).unwrap();
        let mut placed = HashSet::new();
        for record in view.iter() {
            for parent in view.parents_within(record) {
                assert!(placed.contains(parent), "{} precedes its parent {}", record.id, parent);
            }
            placed.insert(&record.id);
        }
        assert_eq!(
            ledger.replay_balance(name).unwrap(),
            ledger.check_balance(name).unwrap() as i128
        );
    }
}

#[test]
fn test_batch_submission_through_handle() {
    let handle = LedgerHandle::new(alice_and_bob());
    let results = handle.write().submit_batch(&[
        TransferRequest::new("Alice", "Bob", 100, TransactionKind::Token),
        TransferRequest::new("Bob", "Ghost", 100, TransactionKind::Token),
        TransferRequest::new("Bob", "Alice", 50, TransactionKind::Direct),
    ]);

    assert!(results[0].is_ok());
    assert_eq!(results[1].as_ref().unwrap_err().code(), "UnknownAccount");
    assert!(results[2].is_ok());
    assert_eq!(handle.read().pending().len(), 2);
}

#[test]
fn test_concurrent_confirmations_conserve_total() {
    let mut ledger = Ledger::new();
    let names: Vec<String> = (0..8).map(|i| format!("user{}", i)).collect();
    for name in &names {
        ledger.add_user(name, 1_000).unwrap();
    }
    let handle = LedgerHandle::new(ledger);

    let workers: Vec<_> = (0..names.len())
        .map(|i| {
            let handle = handle.clone();
            let sender = names[i].clone();
            let receiver = names[(i + 1) % names.len()].clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let mut ledger = handle.write();
                    let id = ledger.submit(&sender, &receiver, 7, TransactionKind::Token).unwrap();
                    ledger.confirm(&receiver, &id).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let ledger = handle.read();
    assert_eq!(ledger.accounts().total_balance(), 8_000);
    assert_eq!(ledger.dag().len(), 400);
    assert!(ledger.validate_all().iter().all(|report| report.is_valid()));
}

// ============================================================================
// PROPERTIES
// ============================================================================

#[derive(Debug, Clone)]
enum Step {
    Submit { sender: usize, receiver: usize, amount: i64 },
    Confirm(usize),
    Reject(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0usize..4, 0usize..4, -5i64..400).prop_map(|(sender, receiver, amount)| Step::Submit {
            sender,
            receiver,
            amount
        }),
        (0usize..16).prop_map(Step::Confirm),
        (0usize..16).prop_map(Step::Reject),
    ]
}

const NAMES: [&str; 4] = ["alice", "bob", "carol", "dave"];

proptest! {
    #[test]
    fn test_random_workload_conserves_and_validates(
        balances in prop::collection::vec(0i64..1_000, 4),
        steps in prop::collection::vec(step(), 1..60)
    ) {
        let mut ledger = Ledger::new();
        for (name, balance) in NAMES.iter().zip(&balances) {
            ledger.add_user(name, *balance).unwrap();
        }
        let total: u128 = balances.iter().map(|b| *b as u128).sum();

        for step in steps {
            match step {
                Step::Submit { sender, receiver, amount } => {
                    let _ = ledger.submit(NAMES[sender], NAMES[receiver], amount, TransactionKind::Token);
                }
                Step::Confirm(_) | Step::Reject(_) if ledger.pending().is_empty() => {}
                Step::Confirm(pick) => {
                    let record = ledger.pending().iter().nth(pick % ledger.pending().len()).cloned().unwrap();
                    let before = ledger.check_balance(&record.sender).unwrap();
                    ledger.confirm(&record.receiver, &record.id).unwrap();
                    prop_assert_eq!(ledger.check_balance(&record.sender).unwrap(), before - record.amount);
                }
                Step::Reject(pick) => {
                    let record = ledger.pending().iter().nth(pick % ledger.pending().len()).cloned().unwrap();
                    let before = ledger.check_balance(&record.sender).unwrap();
                    ledger.reject(&record.receiver, &record.id).unwrap();
                    prop_assert_eq!(ledger.check_balance(&record.sender).unwrap(), before);
                }
            }

            prop_assert_eq!(ledger.accounts().total_balance(), total);
            for name in NAMES {
                let reserved = ledger.pending().reserved(name);
                prop_assert!(reserved <= ledger.check_balance(name).unwrap());
            }
        }

        for report in ledger.validate_all() {
            prop_assert!(report.is_valid(), "{:?}", report);
        }
        for record in ledger.dag().records() {
            prop_assert!(ledger.verify_transaction(&record.id).unwrap().verified());
        }
    }
}
