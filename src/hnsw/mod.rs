//! Approximate k-NN search over node embeddings (spec §4.5): a layered
//! Hierarchical Navigable Small World graph. None of the pack's teacher
//! repos ship a real HNSW graph (see `DESIGN.md`), so the layer/beam-search
//! algorithm here follows the spec directly; the surrounding struct shape,
//! locking, and metrics follow `teacher_reference`'s conventions
//! (`db/metrics.rs`, `db/core/graphdb.rs`).

use crate::error::{NornicError, Result};
use crate::model::NodeId;
use crate::storage::events::{CommitEvent, EventSink};
use crate::wal::OperationKind;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Bounded inline capacity for a node's per-layer neighbor list before it
/// spills to the heap; covers `m0` for most configurations without an
/// allocation per node.
const INLINE_NEIGHBORS: usize = 16;
type NeighborList = SmallVec<[NodeId; INLINE_NEIGHBORS]>;

/// Cooperative cancellation for a long-running search (spec §4.5).
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct GraphNode {
    vector: Vec<f32>,
    /// `neighbors[layer]` for `layer` in `0..=level`.
    neighbors: Vec<NeighborList>,
}

struct Inner {
    nodes: HashMap<NodeId, GraphNode>,
    entry_point: Option<(NodeId, usize)>,
}

#[derive(Debug, Default, Clone)]
pub struct HnswMetrics {
    pub inserts: u64,
    pub removals: u64,
    pub searches: u64,
    pub dimension_rejections: u64,
}

pub struct HnswIndex {
    dimensions: usize,
    m: usize,
    m0: usize,
    ef_construction: usize,
    ef_search: usize,
    level_multiplier: f64,
    inner: RwLock<Inner>,
    rng: Mutex<ChaCha8Rng>,
    size: AtomicUsize,
    metrics: Mutex<HnswMetrics>,
}

impl HnswIndex {
    pub fn new(dimensions: usize, m: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self::with_seed(dimensions, m, ef_construction, ef_search, rand::thread_rng().gen())
    }

    pub fn with_seed(
        dimensions: usize,
        m: usize,
        ef_construction: usize,
        ef_search: usize,
        seed: u64,
    ) -> Self {
        Self {
            dimensions,
            m,
            m0: m * 2,
            ef_construction,
            ef_search,
            level_multiplier: 1.0 / (m.max(2) as f64).ln(),
            inner: RwLock::new(Inner {
                nodes: HashMap::new(),
                entry_point: None,
            }),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            size: AtomicUsize::new(0),
            metrics: Mutex::new(HnswMetrics::default()),
        }
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> HnswMetrics {
        self.metrics.lock().clone()
    }

    fn sample_level(&self) -> usize {
        let mut rng = self.rng.lock();
        let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
        (-u.ln() * self.level_multiplier).floor() as usize
    }

    /// Inserts or replaces `id`'s embedding. Rejects a dimension mismatch
    /// rather than corrupting distance computations for every other entry
    /// (spec invariant: "vector dimension must match index dimension").
    pub fn add(&self, id: NodeId, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimensions {
            self.metrics.lock().dimension_rejections += 1;
            return Err(NornicError::InvalidDimensions {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }

        self.remove(&id);

        let level = self.sample_level();
        let mut inner = self.inner.write();

        if inner.nodes.is_empty() {
            inner.nodes.insert(
                id.clone(),
                GraphNode {
                    vector,
                    neighbors: vec![NeighborList::new(); level + 1],
                },
            );
            inner.entry_point = Some((id, level));
            self.size.fetch_add(1, Ordering::Relaxed);
            self.metrics.lock().inserts += 1;
            return Ok(());
        }

        let (entry_id, entry_level) = inner
            .entry_point
            .clone()
            .expect("entry point exists once the graph is non-empty");

        let mut current = entry_id.clone();
        for layer in (level.min(entry_level) + 1..=entry_level).rev() {
            current = greedy_descend(&inner, &current, &vector, layer);
        }

        let mut node = GraphNode {
            vector: vector.clone(),
            neighbors: vec![NeighborList::new(); level + 1],
        };

        for layer in (0..=level.min(entry_level)).rev() {
            let candidates = search_layer(&inner, &current, &vector, self.ef_construction, layer);
            let max_neighbors = if layer == 0 { self.m0 } else { self.m };
            let selected: Vec<NodeId> = candidates
                .into_iter()
                .take(max_neighbors)
                .map(|(_, id)| id)
                .collect();

            if let Some(first) = selected.first() {
                current = first.clone();
            }
            node.neighbors[layer] = selected.iter().cloned().collect();

            for neighbor_id in &selected {
                if let Some(neighbor) = inner.nodes.get_mut(neighbor_id) {
                    if layer < neighbor.neighbors.len() {
                        neighbor.neighbors[layer].push(id.clone());
                        prune_neighbors(neighbor, layer, max_neighbors);
                    }
                }
            }
        }

        inner.nodes.insert(id.clone(), node);

        if level > entry_level {
            inner.entry_point = Some((id, level));
        }

        self.size.fetch_add(1, Ordering::Relaxed);
        self.metrics.lock().inserts += 1;
        Ok(())
    }

    /// Removes `id` if present, promoting a fresh entry point if it was the
    /// graph's current one (spec §4.5 edge case).
    pub fn remove(&self, id: &NodeId) -> bool {
        let mut inner = self.inner.write();
        let Some(removed) = inner.nodes.remove(id) else {
            return false;
        };

        for layer_neighbors in &removed.neighbors {
            for neighbor_id in layer_neighbors {
                if let Some(neighbor) = inner.nodes.get_mut(neighbor_id) {
                    for list in neighbor.neighbors.iter_mut() {
                        list.retain(|n| n != id);
                    }
                }
            }
        }

        if inner.entry_point.as_ref().map(|(eid, _)| eid) == Some(id) {
            inner.entry_point = inner
                .nodes
                .iter()
                .map(|(nid, n)| (nid.clone(), n.neighbors.len().saturating_sub(1)))
                .max_by_key(|(_, level)| *level);
        }

        self.size.fetch_sub(1, Ordering::Relaxed);
        self.metrics.lock().removals += 1;
        true
    }

    /// Approximate top-`k` nearest neighbors to `query` by cosine
    /// similarity, filtered to `score >= min_score` and checking `token`
    /// between layers so a caller can abort a slow search.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
        token: Option<&CancellationToken>,
    ) -> Result<Vec<(NodeId, f32)>> {
        if query.len() != self.dimensions {
            return Err(NornicError::InvalidDimensions {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        self.metrics.lock().searches += 1;

        let inner = self.inner.read();
        let Some((entry_id, entry_level)) = inner.entry_point.clone() else {
            return Ok(Vec::new());
        };

        let mut current = entry_id;
        for layer in (1..=entry_level).rev() {
            if token.map(|t| t.is_cancelled()).unwrap_or(false) {
                return Err(NornicError::Cancelled);
            }
            current = greedy_descend(&inner, &current, query, layer);
        }

        let ef = self.ef_search.max(k);
        let candidates = search_layer(&inner, &current, query, ef, 0);
        Ok(candidates
            .into_iter()
            .map(|(dist, id)| (id, 1.0 - dist))
            .filter(|(_, score)| *score >= min_score)
            .take(k)
            .collect())
    }

    /// Subscribes this index to `storage`'s commit events, so node
    /// creates/updates/deletes keep the graph's embeddings in sync without
    /// the caller wiring each operation by hand (spec §4.5 `subscribe_to`).
    pub fn subscribe_to(
        self: &Arc<Self>,
        storage: &crate::storage::StorageCore,
    ) -> crate::storage::events::SubscriptionHandle {
        storage.subscribe(self.clone())
    }
}

impl EventSink for HnswIndex {
    fn on_commit(&self, event: &CommitEvent) {
        match event.op {
            OperationKind::CreateNode | OperationKind::UpdateNode => {
                if let Some(node) = &event.node {
                    if let Some(embedding) = &node.embedding {
                        if let Err(err) = self.add(node.id.clone(), embedding.clone()) {
                            warn!(node = %node.id, error = %err, "hnsw skipped node with bad embedding");
                        }
                    } else {
                        self.remove(&node.id);
                    }
                }
            }
            OperationKind::DeleteNode => {
                if let Some(node) = &event.node {
                    self.remove(&node.id);
                }
            }
            _ => trace!(op = ?event.op, "hnsw ignoring non-node event"),
        }
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b))
}

fn greedy_descend(inner: &Inner, from: &NodeId, query: &[f32], layer: usize) -> NodeId {
    let mut current = from.clone();
    let mut current_dist = inner
        .nodes
        .get(&current)
        .map(|n| cosine_distance(&n.vector, query))
        .unwrap_or(f32::MAX);

    loop {
        let mut improved = false;
        if let Some(node) = inner.nodes.get(&current) {
            if let Some(neighbors) = node.neighbors.get(layer) {
                for neighbor_id in neighbors {
                    if let Some(neighbor) = inner.nodes.get(neighbor_id) {
                        let dist = cosine_distance(&neighbor.vector, query);
                        if dist < current_dist {
                            current_dist = dist;
                            current = neighbor_id.clone();
                            improved = true;
                        }
                    }
                }
            }
        }
        if !improved {
            return current;
        }
    }
}

/// Beam search at a single layer, returning up to `ef` candidates ordered
/// nearest-first.
fn search_layer(
    inner: &Inner,
    entry: &NodeId,
    query: &[f32],
    ef: usize,
    layer: usize,
) -> Vec<(f32, NodeId)> {
    use std::cmp::Ordering as CmpOrdering;
    use std::collections::BinaryHeap;

    #[derive(PartialEq)]
    struct ScoredId(f32, NodeId);
    impl Eq for ScoredId {}
    impl PartialOrd for ScoredId {
        fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for ScoredId {
        fn cmp(&self, other: &Self) -> CmpOrdering {
            other.0.partial_cmp(&self.0).unwrap_or(CmpOrdering::Equal)
        }
    }

    let mut visited = std::collections::HashSet::new();
    let mut candidates: BinaryHeap<ScoredId> = BinaryHeap::new();
    let mut best: Vec<(f32, NodeId)> = Vec::new();

    if let Some(node) = inner.nodes.get(entry) {
        let dist = cosine_distance(&node.vector, query);
        candidates.push(ScoredId(dist, entry.clone()));
        best.push((dist, entry.clone()));
        visited.insert(entry.clone());
    }

    while let Some(ScoredId(dist, id)) = candidates.pop() {
        if best.len() >= ef {
            let worst = best
                .iter()
                .map(|(d, _)| *d)
                .fold(f32::MIN, f32::max);
            if dist > worst {
                break;
            }
        }
        let Some(node) = inner.nodes.get(&id) else {
            continue;
        };
        let Some(neighbors) = node.neighbors.get(layer) else {
            continue;
        };
        for neighbor_id in neighbors {
            if !visited.insert(neighbor_id.clone()) {
                continue;
            }
            let Some(neighbor) = inner.nodes.get(neighbor_id) else {
                continue;
            };
            let ndist = cosine_distance(&neighbor.vector, query);
            candidates.push(ScoredId(ndist, neighbor_id.clone()));
            best.push((ndist, neighbor_id.clone()));
        }
    }

    best.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    best.truncate(ef);
    best
}

/// Keeps a node's per-layer neighbor list within `max_neighbors` after a
/// new bidirectional edge is added. Drops the oldest surplus entries rather
/// than re-ranking by distance to the (unavailable, here) query vector —
/// an approximation the spec leaves as an implementation choice.
fn prune_neighbors(node: &mut GraphNode, layer: usize, max_neighbors: usize) {
    let list = &mut node.neighbors[layer];
    while list.len() > max_neighbors {
        list.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_exact_match_first() {
        let index = HnswIndex::with_seed(3, 8, 64, 32, 42);
        index.add(NodeId::from("a"), vec![1.0, 0.0, 0.0]).unwrap();
        index.add(NodeId::from("b"), vec![0.0, 1.0, 0.0]).unwrap();
        index.add(NodeId::from("c"), vec![0.9, 0.1, 0.0]).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 2, -1.0, None).unwrap();
        assert_eq!(results[0].0, NodeId::from("a"));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let index = HnswIndex::with_seed(3, 8, 64, 32, 1);
        let err = index.add(NodeId::from("a"), vec![1.0, 0.0]).unwrap_err();
        assert!(matches!(err, NornicError::InvalidDimensions { .. }));
    }

    #[test]
    fn remove_promotes_new_entry_point() {
        let index = HnswIndex::with_seed(2, 8, 64, 32, 7);
        index.add(NodeId::from("a"), vec![1.0, 0.0]).unwrap();
        index.add(NodeId::from("b"), vec![0.0, 1.0]).unwrap();
        assert!(index.remove(&NodeId::from("a")));
        assert_eq!(index.size(), 1);
        let results = index.search(&[0.0, 1.0], 1, -1.0, None).unwrap();
        assert_eq!(results[0].0, NodeId::from("b"));
    }

    #[test]
    fn recall_is_reasonable_on_small_random_set() {
        use rand::Rng;
        let index = HnswIndex::with_seed(8, 16, 128, 64, 99);
        let mut rng = ChaCha8Rng::seed_from_u64(123);
        let mut vectors = Vec::new();
        for i in 0..200 {
            let v: Vec<f32> = (0..8).map(|_| rng.gen_range(-1.0..1.0)).collect();
            index.add(NodeId::from(format!("n{i}")), v.clone()).unwrap();
            vectors.push(v);
        }

        let query = &vectors[0];
        let results = index.search(query, 10, -1.0, None).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().any(|(id, _)| id.as_str() == "n0"));
    }
}
