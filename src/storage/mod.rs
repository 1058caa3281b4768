//! In-memory authoritative graph state (spec §4.1): nodes, edges,
//! label/type adjacency, and the property store. [`StorageCore`] also
//! embeds the [`crate::schema::SchemaManager`] and the commit-event
//! [`events::EventBus`], since both are updated under the same writer-lock
//! critical section a commit acquires (spec §5 locking hierarchy).

pub mod events;

use crate::error::{NornicError, Result};
use crate::model::{Direction, Edge, EdgeId, IdAllocator, Node, NodeId, PropertyValue};
use crate::schema::SchemaManager;
use crate::serialization;
use crate::wal::{OperationKind, Wal};
use events::{CommitEvent, EventBus, EventSink, SubscriptionHandle};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// One buffered write, the unit [`crate::txn::TransactionManager`] and
/// auto-commit callers assemble and hand to [`StorageCore::commit`].
#[derive(Debug, Clone)]
pub enum PendingOp {
    CreateNode {
        id: NodeId,
        labels: Vec<String>,
        properties: Vec<(String, PropertyValue)>,
        embedding: Option<Vec<f32>>,
        now: i64,
    },
    UpdateNode {
        id: NodeId,
        labels: Vec<String>,
        properties: Vec<(String, PropertyValue)>,
        embedding: Option<Vec<f32>>,
        now: i64,
    },
    DeleteNode {
        id: NodeId,
    },
    CreateEdge {
        id: EdgeId,
        start: NodeId,
        end: NodeId,
        edge_type: String,
        properties: Vec<(String, PropertyValue)>,
        now: i64,
    },
    UpdateEdge {
        id: EdgeId,
        edge_type: String,
        properties: Vec<(String, PropertyValue)>,
        now: i64,
    },
    DeleteEdge {
        id: EdgeId,
    },
}

impl PendingOp {
    fn wal_kind(&self) -> OperationKind {
        match self {
            PendingOp::CreateNode { .. } => OperationKind::CreateNode,
            PendingOp::UpdateNode { .. } => OperationKind::UpdateNode,
            PendingOp::DeleteNode { .. } => OperationKind::DeleteNode,
            PendingOp::CreateEdge { .. } => OperationKind::CreateEdge,
            PendingOp::UpdateEdge { .. } => OperationKind::UpdateEdge,
            PendingOp::DeleteEdge { .. } => OperationKind::DeleteEdge,
        }
    }

    /// Encodes the op as a WAL payload using the shared binary format
    /// (spec §4.7), reusing the node/edge encoders with a leading id so
    /// delete ops (which carry no body) still decode unambiguously.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            PendingOp::CreateNode {
                id,
                labels,
                properties,
                embedding,
                now,
            }
            | PendingOp::UpdateNode {
                id,
                labels,
                properties,
                embedding,
                now,
            } => {
                let node = Node {
                    id: id.clone(),
                    labels: labels.clone(),
                    properties: properties.iter().cloned().collect(),
                    embedding: embedding.clone(),
                    created: *now,
                    updated: *now,
                };
                let mut out = Vec::new();
                serialization::encode_node(&node, &mut out);
                out
            }
            PendingOp::DeleteNode { id } => id.as_str().as_bytes().to_vec(),
            PendingOp::CreateEdge {
                id,
                start,
                end,
                edge_type,
                properties,
                now,
            } => {
                let edge = Edge {
                    id: id.clone(),
                    start: start.clone(),
                    end: end.clone(),
                    edge_type: edge_type.clone(),
                    properties: properties.iter().cloned().collect(),
                    created: *now,
                    updated: *now,
                };
                let mut out = Vec::new();
                serialization::encode_edge(&edge, &mut out);
                out
            }
            PendingOp::UpdateEdge {
                id,
                edge_type,
                properties,
                now,
            } => {
                // start/end are not known at encode time for an update; the
                // decoder only needs id/type/properties here, the endpoints
                // are preserved from the existing edge when the record is
                // replayed (see `StorageCore::apply`).
                let edge = Edge {
                    id: id.clone(),
                    start: NodeId::from(""),
                    end: NodeId::from(""),
                    edge_type: edge_type.clone(),
                    properties: properties.iter().cloned().collect(),
                    created: *now,
                    updated: *now,
                };
                let mut out = Vec::new();
                serialization::encode_edge(&edge, &mut out);
                out
            }
            PendingOp::DeleteEdge { id } => id.as_str().as_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Adjacency {
    outgoing: BTreeSet<EdgeId>,
    incoming: BTreeSet<EdgeId>,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeId, Node>,
    edges: HashMap<EdgeId, Edge>,
    label_index: HashMap<String, BTreeSet<NodeId>>,
    type_index: HashMap<String, BTreeSet<EdgeId>>,
    adjacency: HashMap<NodeId, Adjacency>,
}

pub struct StorageCore {
    inner: RwLock<Inner>,
    schema: Arc<SchemaManager>,
    events: EventBus,
    node_ids: IdAllocator,
    edge_ids: IdAllocator,
    case_insensitive_labels: bool,
}

impl StorageCore {
    pub fn new(schema: Arc<SchemaManager>, case_insensitive_labels: bool) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            schema,
            events: EventBus::new(),
            node_ids: IdAllocator::new(1),
            edge_ids: IdAllocator::new(1),
            case_insensitive_labels,
        }
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionHandle {
        self.events.subscribe(sink)
    }

    pub fn allocate_node_id(&self) -> NodeId {
        NodeId::from(self.node_ids.alloc("n"))
    }

    pub fn allocate_edge_id(&self) -> EdgeId {
        EdgeId::from(self.edge_ids.alloc("e"))
    }

    // --- reads -------------------------------------------------------

    pub fn get_node(&self, id: &NodeId) -> Result<Node> {
        let inner = self.inner.read();
        inner
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| NornicError::NotFound(format!("node {id}")))
    }

    pub fn get_edge(&self, id: &EdgeId) -> Result<Edge> {
        let inner = self.inner.read();
        inner
            .edges
            .get(id)
            .cloned()
            .ok_or_else(|| NornicError::NotFound(format!("edge {id}")))
    }

    pub fn nodes_by_label(&self, label: &str) -> Vec<Node> {
        let inner = self.inner.read();
        let Some(canonical) = self.find_canonical_label(&inner, label) else {
            return Vec::new();
        };
        inner
            .label_index
            .get(&canonical)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| inner.nodes.get(id).cloned())
            .collect()
    }

    pub fn edges_by_type(&self, edge_type: &str) -> Vec<Edge> {
        let inner = self.inner.read();
        inner
            .type_index
            .get(edge_type)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| inner.edges.get(id).cloned())
            .collect()
    }

    pub fn adjacency(
        &self,
        node_id: &NodeId,
        direction: Direction,
        type_filter: Option<&str>,
    ) -> Vec<Edge> {
        let inner = self.inner.read();
        let Some(adj) = inner.adjacency.get(node_id) else {
            return Vec::new();
        };
        let ids: Vec<EdgeId> = match direction {
            Direction::Outgoing => adj.outgoing.iter().cloned().collect(),
            Direction::Incoming => adj.incoming.iter().cloned().collect(),
            Direction::Both => adj
                .outgoing
                .iter()
                .chain(adj.incoming.iter())
                .cloned()
                .collect(),
        };
        ids.into_iter()
            .filter_map(|id| inner.edges.get(&id).cloned())
            .filter(|e| type_filter.map(|t| e.edge_type == t).unwrap_or(true))
            .collect()
    }

    pub fn all_nodes(&self) -> Vec<Node> {
        self.inner.read().nodes.values().cloned().collect()
    }

    pub fn all_edges(&self) -> Vec<Edge> {
        self.inner.read().edges.values().cloned().collect()
    }

    fn find_canonical_label(&self, inner: &Inner, label: &str) -> Option<String> {
        if !self.case_insensitive_labels {
            return inner.label_index.contains_key(label).then(|| label.to_string());
        }
        inner
            .label_index
            .keys()
            .find(|k| k.eq_ignore_ascii_case(label))
            .cloned()
    }

    // --- writes --------------------------------------------------------

    /// Validates, durably logs (unless `wal` is `None`, used when replaying
    /// the WAL itself), applies, and fans out events for `ops` as a single
    /// atomic unit (spec §4.4 commit protocol, §4.1 synchronized-indexes
    /// contract). `DeleteNode` is expanded into its cascade of edge deletes
    /// (outgoing ascending, then incoming ascending) followed by the node
    /// delete, surfaced to WAL/subscribers as individual ops but presented
    /// to the caller as the single logical delete (spec invariant 2).
    pub fn commit(&self, wal: Option<&mut Wal>, ops: Vec<PendingOp>) -> Result<Vec<CommitEvent>> {
        let mut inner = self.inner.write();

        let expanded = expand_cascades(&inner, ops);

        for op in &expanded {
            self.validate(&inner, op)?;
        }

        let mut sequences = Vec::with_capacity(expanded.len());
        if let Some(wal) = wal {
            for op in &expanded {
                let seq = wal.append(op.wal_kind(), op.encode())?;
                sequences.push(seq);
            }
            wal.sync()?;
        } else {
            sequences.extend(std::iter::repeat(0).take(expanded.len()));
        }

        let mut events = Vec::with_capacity(expanded.len());
        for (op, sequence) in expanded.into_iter().zip(sequences) {
            let event = self.apply(&mut inner, op, sequence)?;
            self.events.publish(&event);
            events.push(event);
        }

        trace!(count = events.len(), "storage commit applied");
        Ok(events)
    }

    fn validate(&self, inner: &Inner, op: &PendingOp) -> Result<()> {
        match op {
            PendingOp::CreateNode { id, .. } => {
                if inner.nodes.contains_key(id) {
                    return Err(NornicError::AlreadyExists(format!("node {id}")));
                }
            }
            PendingOp::UpdateNode { id, .. } | PendingOp::DeleteNode { id } => {
                if !inner.nodes.contains_key(id) {
                    return Err(NornicError::NotFound(format!("node {id}")));
                }
            }
            PendingOp::CreateEdge {
                id, start, end, ..
            } => {
                if inner.edges.contains_key(id) {
                    return Err(NornicError::AlreadyExists(format!("edge {id}")));
                }
                if !inner.nodes.contains_key(start) {
                    return Err(NornicError::InvalidEdge(format!(
                        "start node {start} does not exist"
                    )));
                }
                if !inner.nodes.contains_key(end) {
                    return Err(NornicError::InvalidEdge(format!(
                        "end node {end} does not exist"
                    )));
                }
            }
            PendingOp::UpdateEdge { id, .. } | PendingOp::DeleteEdge { id } => {
                if !inner.edges.contains_key(id) {
                    return Err(NornicError::NotFound(format!("edge {id}")));
                }
            }
        }
        self.schema.validate_before_write(op)
    }

    fn apply(&self, inner: &mut Inner, op: PendingOp, sequence: u64) -> Result<CommitEvent> {
        let (wal_kind, node, edge) = match op {
            PendingOp::CreateNode {
                id,
                labels,
                properties,
                embedding,
                now,
            } => {
                let node = Node {
                    id: id.clone(),
                    labels,
                    properties: properties.into_iter().collect(),
                    embedding,
                    created: now,
                    updated: now,
                };
                for label in &node.labels {
                    inner
                        .label_index
                        .entry(label.clone())
                        .or_default()
                        .insert(id.clone());
                }
                inner.adjacency.entry(id.clone()).or_default();
                self.schema.apply_after_write_node(None, Some(&node));
                inner.nodes.insert(id, node.clone());
                (OperationKind::CreateNode, Some(node), None)
            }
            PendingOp::UpdateNode {
                id,
                labels,
                properties,
                embedding,
                now,
            } => {
                let previous = inner
                    .nodes
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| NornicError::NotFound(format!("node {id}")))?;
                for label in &previous.labels {
                    if let Some(set) = inner.label_index.get_mut(label) {
                        set.remove(&id);
                        if set.is_empty() {
                            inner.label_index.remove(label);
                        }
                    }
                }
                let updated = Node {
                    id: id.clone(),
                    labels,
                    properties: properties.into_iter().collect(),
                    embedding,
                    created: previous.created,
                    updated: now.max(previous.created),
                };
                for label in &updated.labels {
                    inner
                        .label_index
                        .entry(label.clone())
                        .or_default()
                        .insert(id.clone());
                }
                self.schema
                    .apply_after_write_node(Some(&previous), Some(&updated));
                inner.nodes.insert(id, updated.clone());
                (OperationKind::UpdateNode, Some(updated), None)
            }
            PendingOp::DeleteNode { id } => {
                let previous = inner
                    .nodes
                    .remove(&id)
                    .ok_or_else(|| NornicError::NotFound(format!("node {id}")))?;
                for label in &previous.labels {
                    if let Some(set) = inner.label_index.get_mut(label) {
                        set.remove(&id);
                        if set.is_empty() {
                            inner.label_index.remove(label);
                        }
                    }
                }
                inner.adjacency.remove(&id);
                self.schema.apply_after_write_node(Some(&previous), None);
                (OperationKind::DeleteNode, Some(previous), None)
            }
            PendingOp::CreateEdge {
                id,
                start,
                end,
                edge_type,
                properties,
                now,
            } => {
                let edge = Edge {
                    id: id.clone(),
                    start: start.clone(),
                    end: end.clone(),
                    edge_type: edge_type.clone(),
                    properties: properties.into_iter().collect(),
                    created: now,
                    updated: now,
                };
                inner
                    .type_index
                    .entry(edge_type.clone())
                    .or_default()
                    .insert(id.clone());
                inner.adjacency.entry(start.clone()).or_default().outgoing.insert(id.clone());
                inner.adjacency.entry(end.clone()).or_default().incoming.insert(id.clone());
                inner.edges.insert(id, edge.clone());
                (OperationKind::CreateEdge, None, Some(edge))
            }
            PendingOp::UpdateEdge {
                id,
                edge_type,
                properties,
                now,
            } => {
                let previous = inner
                    .edges
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| NornicError::NotFound(format!("edge {id}")))?;
                if previous.edge_type != edge_type {
                    if let Some(set) = inner.type_index.get_mut(&previous.edge_type) {
                        set.remove(&id);
                        if set.is_empty() {
                            inner.type_index.remove(&previous.edge_type);
                        }
                    }
                    inner
                        .type_index
                        .entry(edge_type.clone())
                        .or_default()
                        .insert(id.clone());
                }
                let updated = Edge {
                    id: id.clone(),
                    start: previous.start.clone(),
                    end: previous.end.clone(),
                    edge_type,
                    properties: properties.into_iter().collect(),
                    created: previous.created,
                    updated: now.max(previous.created),
                };
                inner.edges.insert(id, updated.clone());
                (OperationKind::UpdateEdge, None, Some(updated))
            }
            PendingOp::DeleteEdge { id } => {
                let previous = inner
                    .edges
                    .remove(&id)
                    .ok_or_else(|| NornicError::NotFound(format!("edge {id}")))?;
                if let Some(set) = inner.type_index.get_mut(&previous.edge_type) {
                    set.remove(&id);
                    if set.is_empty() {
                        inner.type_index.remove(&previous.edge_type);
                    }
                }
                if let Some(adj) = inner.adjacency.get_mut(&previous.start) {
                    adj.outgoing.remove(&id);
                }
                if let Some(adj) = inner.adjacency.get_mut(&previous.end) {
                    adj.incoming.remove(&id);
                }
                (OperationKind::DeleteEdge, None, Some(previous))
            }
        };

        debug!(sequence, ?wal_kind, "applied storage op");
        Ok(CommitEvent {
            sequence,
            op: wal_kind,
            node,
            edge,
        })
    }

    /// Rebuilds all in-memory state from a WAL replay (spec "Lifecycle",
    /// `SchemaManager::rebuild_from`). Sequences from the replayed records
    /// are not re-logged.
    pub fn replay_apply(&self, op: PendingOp, sequence: u64) -> Result<()> {
        let mut inner = self.inner.write();
        self.apply(&mut inner, op, sequence)?;
        Ok(())
    }

    /// Advances the node/edge id allocators past every id already present,
    /// so a store reopened after WAL replay never reissues one (the
    /// allocators themselves are not WAL-logged, only their effects are).
    pub fn restore_id_allocators(&self) {
        let inner = self.inner.read();
        for id in inner.nodes.keys() {
            if let Some(n) = crate::model::parse_base36_suffix(id.as_str()) {
                self.node_ids.observe(n);
            }
        }
        for id in inner.edges.keys() {
            if let Some(n) = crate::model::parse_base36_suffix(id.as_str()) {
                self.edge_ids.observe(n);
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().edges.len()
    }
}

/// A read-only view into [`Inner`] state handed to [`SchemaManager`] so it
/// can check uniqueness without needing its own copy of node data.
pub struct StorageView<'a> {
    inner: &'a Inner,
}

impl<'a> StorageView<'a> {
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.inner.nodes.get(id)
    }

    pub fn nodes_with_label(&self, label: &str) -> impl Iterator<Item = &Node> {
        self.inner
            .label_index
            .get(label)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(move |id| self.inner.nodes.get(id))
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.inner.nodes.values()
    }
}

fn inner_view(inner: &Inner) -> StorageView<'_> {
    StorageView { inner }
}

fn expand_cascades(inner: &Inner, ops: Vec<PendingOp>) -> Vec<PendingOp> {
    let mut out = Vec::with_capacity(ops.len());
    for op in ops {
        if let PendingOp::DeleteNode { id } = &op {
            if let Some(adj) = inner.adjacency.get(id) {
                for edge_id in adj.outgoing.iter() {
                    out.push(PendingOp::DeleteEdge { id: edge_id.clone() });
                }
                for edge_id in adj.incoming.iter() {
                    out.push(PendingOp::DeleteEdge { id: edge_id.clone() });
                }
            }
        }
        out.push(op);
    }
    out
}
