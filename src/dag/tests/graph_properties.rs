//! Property tests for DAG structure under random confirmation histories

use dagledger_dag::{DagLedger, RecordBuilder, TransactionRecord};
use proptest::prelude::*;

const ACCOUNTS: [&str; 4] = ["alice", "bob", "carol", "dave"];

/// Confirm a transfer with the latest record of each party as parents
fn attach(dag: &mut DagLedger, sender: &str, receiver: &str, amount: u64, sequence: u64) -> TransactionRecord {
    let mut parents: Vec<String> = Vec::new();
    for party in [sender, receiver] {
        if let Some(latest) = dag.latest_for(party) {
            if !parents.contains(latest) {
                parents.push(latest.clone());
            }
        }
    }

    let mut record = RecordBuilder::new(sender, receiver, amount)
        .id(format!("tx-{}", sequence))
        .parents(parents)
        .build();
    record.confirm(sequence).unwrap();
    dag.insert_confirmed(record.clone()).unwrap();
    record
}

fn transfer() -> impl Strategy<Value = (usize, usize, u64)> {
    (0..ACCOUNTS.len(), 1..ACCOUNTS.len(), 1u64..1_000).prop_map(|(sender, offset, amount)| {
        (sender, (sender + offset) % ACCOUNTS.len(), amount)
    })
}

proptest! {
    #[test]
    fn test_views_stay_acyclic_and_ordered(transfers in prop::collection::vec(transfer(), 1..60)) {
        let mut dag = DagLedger::new();
        for (sequence, (sender, receiver, amount)) in transfers.iter().enumerate() {
            attach(&mut dag, ACCOUNTS[*sender], ACCOUNTS[*receiver], *amount, sequence as u64 + 1);
        }

        let global = dag.global_dag();
        prop_assert_eq!(global.len(), transfers.len());
        prop_assert!(!global.has_cycle());
        prop_assert!(global.is_topologically_ordered());

        let sequences: Vec<u64> = global.iter().filter_map(|record| record.sequence()).collect();
        prop_assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]));

        for account in ACCOUNTS {
            let local = dag.local_dag(account);
            prop_assert!(!local.has_cycle());
            prop_assert!(local.is_topologically_ordered());
            prop_assert!(local.iter().all(|record| record.touches(account)));
            prop_assert_eq!(local.len(), dag.local_ids(account).len());
        }
    }

    #[test]
    fn test_transfers_conserve_value(transfers in prop::collection::vec(transfer(), 1..60)) {
        let mut dag = DagLedger::new();
        for (sequence, (sender, receiver, amount)) in transfers.iter().enumerate() {
            attach(&mut dag, ACCOUNTS[*sender], ACCOUNTS[*receiver], *amount, sequence as u64 + 1);
        }

        let net: i128 = ACCOUNTS
            .iter()
            .map(|account| dag.local_dag(account).iter().map(|record| record.delta_for(account)).sum::<i128>())
            .sum();
        prop_assert_eq!(net, 0);
    }

    #[test]
    fn test_every_ancestor_precedes_descendant(transfers in prop::collection::vec(transfer(), 2..40)) {
        let mut dag = DagLedger::new();
        let mut last = None;
        for (sequence, (sender, receiver, amount)) in transfers.iter().enumerate() {
            last = Some(attach(&mut dag, ACCOUNTS[*sender], ACCOUNTS[*receiver], *amount, sequence as u64 + 1));
        }

        let last = last.unwrap();
        for ancestor in dag.ancestors(&last.id).unwrap() {
            let record = dag.get(&ancestor).unwrap();
            prop_assert!(record.sequence() < last.sequence());
        }
        prop_assert!(dag.tips().contains(&last.id));
    }
}
