//! DAG ledger structure implementation
//!
//! Confirmed records live once in an arena keyed by transaction id. A petgraph
//! index mirrors the parent -> child edges, and every account owns an index
//! set (its local DAG) over the arena rather than a copy of the records.

use crate::error::{DagError, Result};
use crate::record::{TransactionId, TransactionRecord};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Append-only DAG of confirmed transactions
#[derive(Debug, Default)]
pub struct DagLedger {
    /// Petgraph directed graph, edges point parent -> child
    graph: DiGraph<TransactionId, ()>,

    /// Record arena (transaction_id -> record)
    records: HashMap<TransactionId, TransactionRecord>,

    /// Node index mapping (transaction_id -> NodeIndex)
    node_indices: HashMap<TransactionId, NodeIndex>,

    /// Per-account index sets, in confirmation order
    local: HashMap<String, Vec<TransactionId>>,

    /// Records without parents
    genesis: HashSet<TransactionId>,
}

impl DagLedger {
    /// Create a new empty DAG
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a confirmed record.
    ///
    /// Every check runs before the arena is touched, so a failed insert leaves
    /// the ledger exactly as it was.
    pub fn insert_confirmed(&mut self, record: TransactionRecord) -> Result<()> {
        if !record.is_confirmed() {
            return Err(DagError::InvalidRecord(format!(
                "Transaction {} is {}, only confirmed records join the DAG",
                record.id,
                record.status()
            )));
        }

        if self.records.contains_key(&record.id) {
            return Err(DagError::DuplicateTransaction(record.id.clone()));
        }

        if record.parents.iter().any(|parent| parent == &record.id) {
            return Err(DagError::CycleDetected(record.id.clone()));
        }

        for parent in &record.parents {
            if !self.records.contains_key(parent) {
                return Err(DagError::DanglingParent {
                    id: record.id.clone(),
                    parent: parent.clone(),
                });
            }
        }

        let id = record.id.clone();
        let node_idx = self.graph.add_node(id.clone());
        self.node_indices.insert(id.clone(), node_idx);

        for parent in &record.parents {
            let parent_idx = self.node_indices[parent];
            self.graph.add_edge(parent_idx, node_idx, ());
        }

        if record.is_genesis() {
            self.genesis.insert(id.clone());
        }

        self.local.entry(record.sender.clone()).or_default().push(id.clone());
        self.local.entry(record.receiver.clone()).or_default().push(id.clone());

        debug!(
            tx = %id,
            sequence = ?record.sequence(),
            parents = record.parents.len(),
            "record attached to DAG"
        );
        self.records.insert(id, record);

        Ok(())
    }

    /// Get a record by ID
    pub fn get(&self, id: &str) -> Option<&TransactionRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Number of confirmed records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ids touching `account`, in confirmation order
    pub fn local_ids(&self, account: &str) -> &[TransactionId] {
        self.local.get(account).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Most recent confirmed record touching `account`
    pub fn latest_for(&self, account: &str) -> Option<&TransactionId> {
        self.local.get(account).and_then(|ids| ids.last())
    }

    /// Local DAG of one account
    pub fn local_dag(&self, account: &str) -> DagView<'_> {
        DagView::build(self, Some(account.to_string()), self.local_ids(account).iter())
    }

    /// The whole confirmed history
    pub fn global_dag(&self) -> DagView<'_> {
        DagView::build(self, None, self.records.keys())
    }

    /// Get children of a record
    pub fn children(&self, id: &str) -> Result<Vec<TransactionId>> {
        let node_idx = self
            .node_indices
            .get(id)
            .ok_or_else(|| DagError::UnknownTransaction(id.to_string()))?;

        let mut children: Vec<TransactionId> = self
            .graph
            .edges_directed(*node_idx, Direction::Outgoing)
            .filter_map(|edge| self.graph.node_weight(edge.target()).cloned())
            .collect();
        children.sort_by_key(|child| self.sequence_of(child));

        Ok(children)
    }

    /// Get all ancestors of a record (transitive parents)
    pub fn ancestors(&self, id: &str) -> Result<HashSet<TransactionId>> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| DagError::UnknownTransaction(id.to_string()))?;

        let mut ancestors = HashSet::new();
        let mut queue: VecDeque<TransactionId> = record.parents.iter().cloned().collect();

        while let Some(current) = queue.pop_front() {
            if !ancestors.insert(current.clone()) {
                continue;
            }
            if let Some(parent) = self.records.get(&current) {
                queue.extend(parent.parents.iter().cloned());
            }
        }

        Ok(ancestors)
    }

    /// Get tips (records with no children), in confirmation order
    pub fn tips(&self) -> Vec<TransactionId> {
        let mut tips: Vec<TransactionId> = self
            .graph
            .node_indices()
            .filter(|idx| self.graph.edges_directed(*idx, Direction::Outgoing).count() == 0)
            .filter_map(|idx| self.graph.node_weight(idx).cloned())
            .collect();
        tips.sort_by_key(|id| self.sequence_of(id));
        tips
    }

    /// Records without parents, in confirmation order
    pub fn roots(&self) -> Vec<TransactionId> {
        let mut roots: Vec<TransactionId> = self.genesis.iter().cloned().collect();
        roots.sort_by_key(|id| self.sequence_of(id));
        roots
    }

    /// Iterate the arena in no particular order
    pub fn records(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.records.values()
    }

    fn sequence_of(&self, id: &str) -> u64 {
        self.records
            .get(id)
            .and_then(TransactionRecord::sequence)
            .unwrap_or(u64::MAX)
    }
}

/// Read-only view over a subset of the arena, ordered parents-first.
///
/// Holds ids only; `iter()` resolves them against the arena lazily and can be
/// called any number of times.
#[derive(Debug, Clone)]
pub struct DagView<'a> {
    ledger: &'a DagLedger,
    account: Option<String>,
    order: Vec<&'a TransactionId>,
    members: HashSet<&'a TransactionId>,
    acyclic: bool,
}

impl<'a> DagView<'a> {
    fn build<I>(ledger: &'a DagLedger, account: Option<String>, ids: I) -> Self
    where
        I: Iterator<Item = &'a TransactionId>,
    {
        let members: HashSet<&'a TransactionId> =
            ids.filter(|id| ledger.records.contains_key(*id)).collect();

        // Kahn's algorithm restricted to `members`, lowest sequence first.
        let mut in_degree: HashMap<&'a TransactionId, usize> = HashMap::new();
        for id in &members {
            let record = &ledger.records[*id];
            let degree = record
                .parents
                .iter()
                .filter(|parent| members.contains(parent))
                .count();
            in_degree.insert(*id, degree);
        }

        let mut ready: BinaryHeap<Reverse<(u64, &'a TransactionId)>> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| Reverse((ledger.sequence_of(id), *id)))
            .collect();

        let mut order = Vec::with_capacity(members.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id);
            let node_idx = ledger.node_indices[id];
            for edge in ledger.graph.edges_directed(node_idx, Direction::Outgoing) {
                let child = &ledger.graph[edge.target()];
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((ledger.sequence_of(child), child)));
                    }
                }
            }
        }

        let acyclic = order.len() == members.len();
        if !acyclic {
            let placed: HashSet<&TransactionId> = order.iter().copied().collect();
            let mut rest: Vec<&'a TransactionId> = members
                .iter()
                .copied()
                .filter(|id| !placed.contains(id))
                .collect();
            rest.sort_by_key(|id| ledger.sequence_of(id));
            order.extend(rest);
        }

        DagView {
            ledger,
            account,
            order,
            members,
            acyclic,
        }
    }

    /// Owner of a local view, `None` for the global view
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    /// Records in topological order
    pub fn iter(&self) -> impl Iterator<Item = &'a TransactionRecord> + '_ {
        let ledger = self.ledger;
        self.order.iter().map(move |id| &ledger.records[*id])
    }

    /// Ids in topological order
    pub fn ids(&self) -> impl Iterator<Item = &'a TransactionId> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|member| member.as_str() == id)
    }

    /// Parents of `record` that are inside this view
    pub fn parents_within(&self, record: &TransactionRecord) -> Vec<&'a TransactionId> {
        record
            .parents
            .iter()
            .filter_map(|parent| self.members.get(parent).copied())
            .collect()
    }

    /// Edges (parent, child) restricted to this view
    pub fn edges(&self) -> Vec<(&'a TransactionId, &'a TransactionId)> {
        self.iter()
            .flat_map(|record| {
                self.parents_within(record)
                    .into_iter()
                    .map(move |parent| (parent, &record.id))
            })
            .collect()
    }

    /// Whether Kahn's algorithm placed every member
    pub fn is_topologically_ordered(&self) -> bool {
        self.acyclic
    }

    /// Independent cycle check over the induced subgraph
    pub fn has_cycle(&self) -> bool {
        let mut induced: DiGraph<&TransactionId, ()> = DiGraph::new();
        let mut indices = HashMap::new();
        for id in &self.order {
            indices.insert(*id, induced.add_node(*id));
        }
        for (parent, child) in self.edges() {
            induced.add_edge(indices[parent], indices[child], ());
        }
        is_cyclic_directed(&induced)
    }
}
