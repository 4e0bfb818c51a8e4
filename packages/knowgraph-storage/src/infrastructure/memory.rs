//! In-memory graph store for tests and dry runs.
//!
//! Interface-first twin of the neo4j adapter: same transactional contract,
//! plus failure injection so loader behavior (backpressure, mid-batch
//! failure) is testable without a live store.

use crate::domain::{ConstraintDef, GraphStore};
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use knowgraph_transform::{NodeTuple, RelationshipTuple};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

type RelKey = (String, String, String);

#[derive(Default)]
pub struct InMemoryGraphStore {
    name: String,
    nodes: Mutex<HashMap<String, NodeTuple>>,
    relationships: Mutex<HashMap<RelKey, RelationshipTuple>>,
    constraints: Mutex<Vec<ConstraintDef>>,

    /// Reject any transaction with more items than this, mimicking a store
    /// that pushes back on oversized transactions.
    max_transaction_items: Mutex<Option<usize>>,
    /// Fail permanently once this many write transactions have committed.
    fail_after_commits: Mutex<Option<usize>>,
    commits: AtomicUsize,
}

impl InMemoryGraphStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_transaction_items(self, cap: usize) -> Self {
        *self.max_transaction_items.lock() = Some(cap);
        self
    }

    pub fn with_fail_after_commits(self, commits: usize) -> Self {
        *self.fail_after_commits.lock() = Some(commits);
        self
    }

    pub fn constraints(&self) -> Vec<ConstraintDef> {
        self.constraints.lock().clone()
    }

    pub fn node(&self, unique_key: &str) -> Option<NodeTuple> {
        self.nodes.lock().get(unique_key).cloned()
    }

    /// Full dump, for state comparisons in tests.
    pub fn snapshot_keys(&self) -> (Vec<String>, Vec<RelKey>) {
        let mut nodes: Vec<String> = self.nodes.lock().keys().cloned().collect();
        let mut rels: Vec<RelKey> = self.relationships.lock().keys().cloned().collect();
        nodes.sort();
        rels.sort();
        (nodes, rels)
    }

    fn check_transaction(&self, items: usize) -> Result<()> {
        if let Some(cap) = *self.max_transaction_items.lock() {
            if items > cap {
                return Err(StorageError::Transient(format!(
                    "backpressure: transaction of {items} items exceeds the store cap of {cap}"
                )));
            }
        }
        if let Some(limit) = *self.fail_after_commits.lock() {
            if self.commits.load(Ordering::SeqCst) >= limit {
                return Err(StorageError::Permanent(
                    "constraint violation: injected failure".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    fn logical_name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_constraints(&self, constraints: &[ConstraintDef]) -> Result<()> {
        let mut existing = self.constraints.lock();
        for constraint in constraints {
            if !existing.contains(constraint) {
                existing.push(constraint.clone());
            }
        }
        Ok(())
    }

    async fn upsert_nodes(&self, nodes: &[NodeTuple]) -> Result<()> {
        self.check_transaction(nodes.len())?;
        let mut store = self.nodes.lock();
        for node in nodes {
            store.insert(node.unique_key.clone(), node.clone());
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_relationships(
        &self,
        relationships: &[RelationshipTuple],
    ) -> Result<Vec<usize>> {
        self.check_transaction(relationships.len())?;
        let nodes = self.nodes.lock();
        let mut store = self.relationships.lock();
        let mut skipped = Vec::new();
        for (i, rel) in relationships.iter().enumerate() {
            if !nodes.contains_key(&rel.source_key) || !nodes.contains_key(&rel.target_key) {
                skipped.push(i);
                continue;
            }
            store.insert(
                (
                    rel.source_key.clone(),
                    rel.target_key.clone(),
                    rel.rel_type.clone(),
                ),
                rel.clone(),
            );
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(skipped)
    }

    async fn clear(&self) -> Result<()> {
        self.nodes.lock().clear();
        self.relationships.lock().clear();
        Ok(())
    }

    async fn node_count(&self) -> Result<u64> {
        Ok(self.nodes.lock().len() as u64)
    }

    async fn relationship_count(&self) -> Result<u64> {
        Ok(self.relationships.lock().len() as u64)
    }
}
