//! Buffered, serializable transactions over [`crate::storage::StorageCore`]
//! (spec §4.4). A `Transaction` buffers writes locally (read-your-writes via
//! shadow maps) until [`Transaction::commit`], which hands the whole batch
//! to [`crate::storage::StorageCore::commit`] as one atomic unit: validate,
//! WAL-append, apply, publish — or nothing at all.
//!
//! There is no MVCC: only one transaction can be mid-commit at a time (the
//! `Mutex<Wal>` here, plus `StorageCore`'s own writer lock during `commit`,
//! together give the coarse single-writer critical section spec §5 calls
//! for).

use crate::error::{NornicError, Result};
use crate::model::{Direction, Edge, EdgeId, Node, NodeId, PropertyValue, now_millis};
use crate::storage::events::CommitEvent;
use crate::storage::{PendingOp, StorageCore};
use crate::wal::Wal;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

pub struct TransactionManager {
    storage: Arc<StorageCore>,
    wal: Arc<Mutex<Wal>>,
}

impl TransactionManager {
    pub fn new(storage: Arc<StorageCore>, wal: Arc<Mutex<Wal>>) -> Self {
        Self { storage, wal }
    }

    pub fn begin(&self) -> Transaction {
        Transaction {
            storage: self.storage.clone(),
            wal: self.wal.clone(),
            state: TxState::Active,
            ops: Vec::new(),
            pending_nodes: HashMap::new(),
            deleted_nodes: HashMap::new(),
            pending_edges: HashMap::new(),
            deleted_edges: HashMap::new(),
        }
    }

    /// Runs a single buffered op as its own transaction (spec glossary
    /// "Auto-commit"), used by direct `StorageCore`-level callers that don't
    /// need an explicit multi-op transaction.
    pub fn auto_commit(&self, op: PendingOp) -> Result<CommitEvent> {
        let mut wal = self.wal.lock();
        let mut events = self.storage.commit(Some(&mut *wal), vec![op])?;
        Ok(events.remove(0))
    }
}

pub struct Transaction {
    storage: Arc<StorageCore>,
    wal: Arc<Mutex<Wal>>,
    state: TxState,
    ops: Vec<PendingOp>,
    pending_nodes: HashMap<NodeId, Node>,
    deleted_nodes: HashMap<NodeId, ()>,
    pending_edges: HashMap<EdgeId, Edge>,
    deleted_edges: HashMap<EdgeId, ()>,
}

impl Transaction {
    pub fn state(&self) -> TxState {
        self.state
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(NornicError::TransactionClosed);
        }
        Ok(())
    }

    pub fn create_node(
        &mut self,
        labels: Vec<String>,
        properties: Vec<(String, PropertyValue)>,
        embedding: Option<Vec<f32>>,
    ) -> Result<NodeId> {
        self.ensure_active()?;
        let id = self.storage.allocate_node_id();
        let now = now_millis();
        let node = Node {
            id: id.clone(),
            labels: labels.clone(),
            properties: properties.iter().cloned().collect(),
            embedding: embedding.clone(),
            created: now,
            updated: now,
        };
        self.pending_nodes.insert(id.clone(), node);
        self.ops.push(PendingOp::CreateNode {
            id: id.clone(),
            labels,
            properties,
            embedding,
            now,
        });
        Ok(id)
    }

    pub fn update_node(
        &mut self,
        id: NodeId,
        labels: Vec<String>,
        properties: Vec<(String, PropertyValue)>,
        embedding: Option<Vec<f32>>,
    ) -> Result<()> {
        self.ensure_active()?;
        let now = now_millis();
        let mut node = self.get_node(&id)?;
        node.labels = labels.clone();
        node.properties = properties.iter().cloned().collect();
        node.embedding = embedding.clone();
        node.updated = now;
        self.pending_nodes.insert(id.clone(), node);
        self.ops.push(PendingOp::UpdateNode {
            id,
            labels,
            properties,
            embedding,
            now,
        });
        Ok(())
    }

    pub fn delete_node(&mut self, id: NodeId) -> Result<()> {
        self.ensure_active()?;
        let _ = self.get_node(&id)?;
        self.pending_nodes.remove(&id);
        self.deleted_nodes.insert(id.clone(), ());
        self.ops.push(PendingOp::DeleteNode { id });
        Ok(())
    }

    pub fn create_edge(
        &mut self,
        start: NodeId,
        end: NodeId,
        edge_type: String,
        properties: Vec<(String, PropertyValue)>,
    ) -> Result<EdgeId> {
        self.ensure_active()?;
        if self.get_node(&start).is_err() || self.get_node(&end).is_err() {
            return Err(NornicError::InvalidEdge(
                "edge endpoints must exist".into(),
            ));
        }
        let id = self.storage.allocate_edge_id();
        let now = now_millis();
        let edge = Edge {
            id: id.clone(),
            start: start.clone(),
            end: end.clone(),
            edge_type: edge_type.clone(),
            properties: properties.iter().cloned().collect(),
            created: now,
            updated: now,
        };
        self.pending_edges.insert(id.clone(), edge);
        self.ops.push(PendingOp::CreateEdge {
            id: id.clone(),
            start,
            end,
            edge_type,
            properties,
            now,
        });
        Ok(id)
    }

    pub fn update_edge(
        &mut self,
        id: EdgeId,
        edge_type: String,
        properties: Vec<(String, PropertyValue)>,
    ) -> Result<()> {
        self.ensure_active()?;
        let now = now_millis();
        let mut edge = self.get_edge(&id)?;
        edge.edge_type = edge_type.clone();
        edge.properties = properties.iter().cloned().collect();
        edge.updated = now;
        self.pending_edges.insert(id.clone(), edge);
        self.ops.push(PendingOp::UpdateEdge {
            id,
            edge_type,
            properties,
            now,
        });
        Ok(())
    }

    pub fn delete_edge(&mut self, id: EdgeId) -> Result<()> {
        self.ensure_active()?;
        let _ = self.get_edge(&id)?;
        self.pending_edges.remove(&id);
        self.deleted_edges.insert(id.clone(), ());
        self.ops.push(PendingOp::DeleteEdge { id });
        Ok(())
    }

    /// Read-your-writes: checks the transaction's own buffer before falling
    /// back to committed storage (spec §4.4).
    pub fn get_node(&self, id: &NodeId) -> Result<Node> {
        if self.deleted_nodes.contains_key(id) {
            return Err(NornicError::NotFound(format!("node {id}")));
        }
        if let Some(node) = self.pending_nodes.get(id) {
            return Ok(node.clone());
        }
        self.storage.get_node(id)
    }

    pub fn get_edge(&self, id: &EdgeId) -> Result<Edge> {
        if self.deleted_edges.contains_key(id) {
            return Err(NornicError::NotFound(format!("edge {id}")));
        }
        if let Some(edge) = self.pending_edges.get(id) {
            return Ok(edge.clone());
        }
        self.storage.get_edge(id)
    }

    pub fn adjacency(&self, node_id: &NodeId, direction: Direction) -> Vec<Edge> {
        // Buffered edge changes are layered on top of the committed view;
        // within a single transaction this is rare enough that a full
        // merge (rather than a bespoke incremental index) is acceptable.
        let mut edges: HashMap<EdgeId, Edge> = self
            .storage
            .adjacency(node_id, direction, None)
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();
        for (id, edge) in &self.pending_edges {
            let touches = match direction {
                Direction::Outgoing => &edge.start == node_id,
                Direction::Incoming => &edge.end == node_id,
                Direction::Both => &edge.start == node_id || &edge.end == node_id,
            };
            if touches {
                edges.insert(id.clone(), edge.clone());
            }
        }
        for id in self.deleted_edges.keys() {
            edges.remove(id);
        }
        edges.into_values().collect()
    }

    pub fn commit(mut self) -> Result<Vec<CommitEvent>> {
        self.ensure_active()?;
        let ops = std::mem::take(&mut self.ops);
        let mut wal = self.wal.lock();
        let result = self.storage.commit(Some(&mut *wal), ops);
        self.state = match &result {
            Ok(_) => TxState::Committed,
            Err(_) => TxState::RolledBack,
        };
        result
    }

    pub fn rollback(mut self) -> Result<()> {
        self.ensure_active()?;
        self.ops.clear();
        self.state = TxState::RolledBack;
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            warn!("transaction dropped without commit or rollback, discarding buffered writes");
            if !std::thread::panicking() {
                panic!("transaction dropped while still active");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncMode;
    use crate::schema::SchemaManager;

    fn manager() -> (TransactionManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (wal, _) = Wal::reopen(dir.path(), SyncMode::Immediate, 64 * 1024 * 1024).unwrap();
        let schema = Arc::new(SchemaManager::new(1.2, 0.75));
        let storage = Arc::new(StorageCore::new(schema, true));
        (
            TransactionManager::new(storage, Arc::new(Mutex::new(wal))),
            dir,
        )
    }

    #[test]
    fn read_your_writes_sees_uncommitted_node() {
        let (manager, _dir) = manager();
        let mut txn = manager.begin();
        let id = txn
            .create_node(vec!["Person".into()], vec![], None)
            .unwrap();
        assert!(txn.get_node(&id).is_ok());
        txn.commit().unwrap();
    }

    #[test]
    fn rollback_discards_buffered_writes() {
        let (manager, _dir) = manager();
        let mut txn = manager.begin();
        let id = txn
            .create_node(vec!["Person".into()], vec![], None)
            .unwrap();
        txn.rollback().unwrap();

        let txn2 = manager.begin();
        assert!(txn2.get_node(&id).is_err());
        txn2.rollback().unwrap();
    }

    #[test]
    fn multi_op_transaction_commits_as_one_unit() {
        let (manager, _dir) = manager();
        let mut txn = manager.begin();
        let a = txn.create_node(vec!["Person".into()], vec![], None).unwrap();
        let b = txn.create_node(vec!["Person".into()], vec![], None).unwrap();
        txn.create_edge(a, b, "KNOWS".into(), vec![]).unwrap();
        let events = txn.commit().unwrap();
        assert_eq!(events.len(), 3);
    }
}
