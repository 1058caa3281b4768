//! Constraint and index definitions (spec §4.3, §3 entities
//! `UniqueConstraint`/`PropertyIndex`/`CompositeIndex`/`FulltextIndex`/
//! `VectorIndexDef`). Registration is in-memory only, re-issued by the
//! caller at startup (it is not itself WAL-logged — only the node/edge
//! data the indexes derive from is).
//!
//! `SchemaManager` keeps its own lock, nested inside
//! [`crate::storage::StorageCore`]'s writer lock during a commit (spec §5
//! locking hierarchy), so registering an index concurrently with writes
//! never races against `apply_after_write_node`.

pub mod fulltext;

use crate::error::{NornicError, Result};
use crate::model::{Node, NodeId, PropertyValue};
use crate::serialization::canonical_key;
use crate::storage::PendingOp;
use fulltext::FulltextIndex;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Distance metric a `VectorIndexDef` scores against (spec §3 `VectorIndex`).
/// `HnswIndex` and `CpuBackend` currently only implement cosine; a
/// non-cosine index still registers and participates in lookups, but scoring
/// falls back to cosine until euclidean/dot backends land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorSimilarity {
    Cosine,
    Euclidean,
    Dot,
}

#[derive(Debug, Clone)]
pub struct VectorIndexDef {
    pub label: String,
    pub property: String,
    pub dimensions: usize,
    pub similarity: VectorSimilarity,
}

struct Inner {
    unique: HashMap<(String, String), HashMap<Vec<u8>, NodeId>>,
    property: HashMap<(String, String), BTreeMap<Vec<u8>, BTreeSet<NodeId>>>,
    composite: HashMap<String, (String, Vec<String>, BTreeMap<Vec<u8>, BTreeSet<NodeId>>)>,
    fulltext: HashMap<String, FulltextIndex>,
    vector: HashMap<String, VectorIndexDef>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            unique: HashMap::new(),
            property: HashMap::new(),
            composite: HashMap::new(),
            fulltext: HashMap::new(),
            vector: HashMap::new(),
        }
    }
}

pub struct SchemaManager {
    inner: RwLock<Inner>,
    bm25_k1: f64,
    bm25_b: f64,
}

impl SchemaManager {
    pub fn new(bm25_k1: f64, bm25_b: f64) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            bm25_k1,
            bm25_b,
        }
    }

    // --- registration, idempotent by name/key (spec §4.3) ---------------

    pub fn add_unique_constraint(&self, label: &str, property: &str) {
        let mut inner = self.inner.write();
        inner
            .unique
            .entry((label.to_string(), property.to_string()))
            .or_default();
    }

    pub fn add_property_index(&self, label: &str, property: &str) {
        let mut inner = self.inner.write();
        inner
            .property
            .entry((label.to_string(), property.to_string()))
            .or_default();
    }

    /// Registers a composite index under `name`, or confirms an existing
    /// registration matches. A second registration of the same `name` with
    /// a different label or property list is a schema conflict (spec §4.3).
    pub fn add_composite_index(&self, name: &str, label: &str, properties: Vec<String>) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.composite.get(name) {
            Some((existing_label, existing_properties, _)) => {
                if existing_label == label && existing_properties == &properties {
                    Ok(())
                } else {
                    Err(NornicError::SchemaConflict(format!(
                        "composite index {name:?} already registered on {existing_label}.{existing_properties:?}, cannot re-register on {label}.{properties:?}"
                    )))
                }
            }
            None => {
                inner
                    .composite
                    .insert(name.to_string(), (label.to_string(), properties, BTreeMap::new()));
                Ok(())
            }
        }
    }

    /// Registers a full-text index under `name`, or confirms an existing
    /// registration matches (same conflict rule as [`Self::add_composite_index`]).
    pub fn add_fulltext_index(&self, name: &str, label: &str, properties: Vec<String>) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.fulltext.get(name) {
            Some(existing) => {
                if existing.label == label && existing.properties == properties {
                    Ok(())
                } else {
                    Err(NornicError::SchemaConflict(format!(
                        "fulltext index {name:?} already registered on {}.{:?}, cannot re-register on {label}.{properties:?}",
                        existing.label, existing.properties
                    )))
                }
            }
            None => {
                inner.fulltext.insert(
                    name.to_string(),
                    FulltextIndex::new(label.to_string(), properties, self.bm25_k1, self.bm25_b),
                );
                Ok(())
            }
        }
    }

    /// Registers a vector index under `name`, or confirms an existing
    /// registration matches (same conflict rule as [`Self::add_composite_index`]).
    pub fn add_vector_index(
        &self,
        name: &str,
        label: &str,
        property: &str,
        dimensions: usize,
        similarity: VectorSimilarity,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.vector.get(name) {
            Some(existing) => {
                if existing.label == label
                    && existing.property == property
                    && existing.dimensions == dimensions
                    && existing.similarity == similarity
                {
                    Ok(())
                } else {
                    Err(NornicError::SchemaConflict(format!(
                        "vector index {name:?} already registered as {}.{} [{}, {:?}], cannot re-register as {label}.{property} [{dimensions}, {similarity:?}]",
                        existing.label, existing.property, existing.dimensions, existing.similarity
                    )))
                }
            }
            None => {
                inner.vector.insert(
                    name.to_string(),
                    VectorIndexDef {
                        label: label.to_string(),
                        property: property.to_string(),
                        dimensions,
                        similarity,
                    },
                );
                Ok(())
            }
        }
    }

    pub fn vector_index(&self, name: &str) -> Option<VectorIndexDef> {
        self.inner.read().vector.get(name).cloned()
    }

    // --- commit-path hooks ----------------------------------------------

    /// Dry-run check against the in-flight op, called under the
    /// already-held `StorageCore` writer lock. Only unique constraints can
    /// fail a write; index maintenance never rejects.
    pub fn validate_before_write(&self, op: &PendingOp) -> Result<()> {
        let (id, labels, properties) = match op {
            PendingOp::CreateNode {
                id,
                labels,
                properties,
                ..
            } => (Some(id), labels.as_slice(), properties.as_slice()),
            PendingOp::UpdateNode {
                id,
                labels,
                properties,
                ..
            } => (Some(id), labels.as_slice(), properties.as_slice()),
            _ => return Ok(()),
        };
        let Some(id) = id else { return Ok(()) };

        let inner = self.inner.read();
        for label in labels {
            for ((constraint_label, property), values) in inner.unique.iter() {
                if constraint_label != label {
                    continue;
                }
                if let Some((_, value)) = properties.iter().find(|(k, _)| k == property) {
                    let key = canonical_key(value);
                    if let Some(existing) = values.get(&key) {
                        if existing != id {
                            return Err(NornicError::ConstraintViolation {
                                constraint: format!("{label}.{property}"),
                                value: format!("{value:?}"),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies index/constraint-map deltas after a node write has already
    /// been committed to storage. `previous` is `None` on create, `current`
    /// is `None` on delete.
    pub fn apply_after_write_node(&self, previous: Option<&Node>, current: Option<&Node>) {
        let mut inner = self.inner.write();

        if let Some(node) = previous {
            retract_node(&mut inner, node);
        }
        if let Some(node) = current {
            insert_node(&mut inner, node);
        }
    }

    /// Rebuilds every derived index from a freshly-replayed storage state
    /// (spec "Lifecycle": replay populates `StorageCore`, then schema
    /// indexes are rebuilt from it).
    pub fn rebuild_from(&self, nodes: impl Iterator<Item = Node>) {
        let mut inner = self.inner.write();
        for map in inner.unique.values_mut() {
            map.clear();
        }
        for map in inner.property.values_mut() {
            map.clear();
        }
        for (_, _, map) in inner.composite.values_mut() {
            map.clear();
        }
        for index in inner.fulltext.values_mut() {
            index.clear();
        }
        for node in nodes {
            insert_node(&mut inner, &node);
        }
    }

    pub fn find_by_unique(&self, label: &str, property: &str, value: &PropertyValue) -> Option<NodeId> {
        let inner = self.inner.read();
        inner
            .unique
            .get(&(label.to_string(), property.to_string()))
            .and_then(|map| map.get(&canonical_key(value)))
            .cloned()
    }

    pub fn find_by_property(&self, label: &str, property: &str, value: &PropertyValue) -> Vec<NodeId> {
        let inner = self.inner.read();
        inner
            .property
            .get(&(label.to_string(), property.to_string()))
            .and_then(|map| map.get(&canonical_key(value)))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn find_by_composite(&self, name: &str, values: &[PropertyValue]) -> Vec<NodeId> {
        let inner = self.inner.read();
        let Some((_, _, map)) = inner.composite.get(name) else {
            return Vec::new();
        };
        let key = composite_key(values);
        map.get(&key).map(|ids| ids.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn search_fulltext(&self, name: &str, query: &str, limit: usize) -> Vec<(NodeId, f64)> {
        let inner = self.inner.read();
        inner
            .fulltext
            .get(name)
            .map(|index| index.search(query, limit))
            .unwrap_or_default()
    }
}

fn composite_key(values: &[PropertyValue]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        out.extend_from_slice(&canonical_key(v));
    }
    out
}

fn insert_node(inner: &mut Inner, node: &Node) {
    for label in &node.labels {
        for ((constraint_label, property), values) in inner.unique.iter_mut() {
            if constraint_label != label {
                continue;
            }
            if let Some(value) = node.properties.get(property) {
                values.insert(canonical_key(value), node.id.clone());
            }
        }
        for ((idx_label, property), values) in inner.property.iter_mut() {
            if idx_label != label {
                continue;
            }
            if let Some(value) = node.properties.get(property) {
                values
                    .entry(canonical_key(value))
                    .or_default()
                    .insert(node.id.clone());
            }
        }
        for (idx_label, properties, map) in inner.composite.values_mut() {
            if idx_label != label {
                continue;
            }
            if let Some(values) = collect_composite(node, properties) {
                map.entry(composite_key(&values)).or_default().insert(node.id.clone());
            }
        }
    }
    for index in inner.fulltext.values_mut() {
        if node.labels.iter().any(|l| l == &index.label) {
            index.index_node(node);
        }
    }
}

fn retract_node(inner: &mut Inner, node: &Node) {
    for label in &node.labels {
        for ((constraint_label, property), values) in inner.unique.iter_mut() {
            if constraint_label != label {
                continue;
            }
            if let Some(value) = node.properties.get(property) {
                let key = canonical_key(value);
                if values.get(&key) == Some(&node.id) {
                    values.remove(&key);
                }
            }
        }
        for ((idx_label, property), values) in inner.property.iter_mut() {
            if idx_label != label {
                continue;
            }
            if let Some(value) = node.properties.get(property) {
                if let Some(set) = values.get_mut(&canonical_key(value)) {
                    set.remove(&node.id);
                }
            }
        }
        for (idx_label, properties, map) in inner.composite.values_mut() {
            if idx_label != label {
                continue;
            }
            if let Some(values) = collect_composite(node, properties) {
                if let Some(set) = map.get_mut(&composite_key(&values)) {
                    set.remove(&node.id);
                }
            }
        }
    }
    for index in inner.fulltext.values_mut() {
        if node.labels.iter().any(|l| l == &index.label) {
            index.remove_node(&node.id);
        }
    }
}

fn collect_composite(node: &Node, properties: &[String]) -> Option<Vec<PropertyValue>> {
    let mut out = Vec::with_capacity(properties.len());
    for key in properties {
        out.push(node.properties.get(key)?.clone());
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PendingOp;

    fn node(id: &str, label: &str, email: &str) -> Node {
        let mut n = Node::new(NodeId::from(id), vec![label.into()], 0);
        n.properties
            .insert("email".into(), PropertyValue::String(email.into()));
        n
    }

    #[test]
    fn unique_constraint_rejects_duplicate_value() {
        let schema = SchemaManager::new(1.2, 0.75);
        schema.add_unique_constraint("Person", "email");
        let existing = node("n1", "Person", "a@example.com");
        schema.apply_after_write_node(None, Some(&existing));

        let op = PendingOp::CreateNode {
            id: NodeId::from("n2"),
            labels: vec!["Person".into()],
            properties: vec![("email".into(), PropertyValue::String("a@example.com".into()))],
            embedding: None,
            now: 0,
        };
        let err = schema.validate_before_write(&op).unwrap_err();
        assert!(matches!(err, NornicError::ConstraintViolation { .. }));
    }

    #[test]
    fn property_index_finds_by_value() {
        let schema = SchemaManager::new(1.2, 0.75);
        schema.add_property_index("Person", "email");
        let n = node("n1", "Person", "b@example.com");
        schema.apply_after_write_node(None, Some(&n));
        let found = schema.find_by_property("Person", "email", &PropertyValue::String("b@example.com".into()));
        assert_eq!(found, vec![NodeId::from("n1")]);
    }

    #[test]
    fn re_registering_a_composite_index_with_the_same_definition_is_ok() {
        let schema = SchemaManager::new(1.2, 0.75);
        schema
            .add_composite_index("by_name_and_dob", "Person", vec!["name".into(), "dob".into()])
            .unwrap();
        schema
            .add_composite_index("by_name_and_dob", "Person", vec!["name".into(), "dob".into()])
            .unwrap();
    }

    #[test]
    fn re_registering_a_composite_index_with_a_different_definition_is_a_conflict() {
        let schema = SchemaManager::new(1.2, 0.75);
        schema
            .add_composite_index("by_name_and_dob", "Person", vec!["name".into(), "dob".into()])
            .unwrap();
        let err = schema
            .add_composite_index("by_name_and_dob", "Person", vec!["name".into()])
            .unwrap_err();
        assert!(matches!(err, NornicError::SchemaConflict(_)));
    }

    #[test]
    fn re_registering_a_fulltext_index_with_a_different_label_is_a_conflict() {
        let schema = SchemaManager::new(1.2, 0.75);
        schema.add_fulltext_index("bios", "Person", vec!["bio".into()]).unwrap();
        let err = schema
            .add_fulltext_index("bios", "Company", vec!["bio".into()])
            .unwrap_err();
        assert!(matches!(err, NornicError::SchemaConflict(_)));
    }

    #[test]
    fn re_registering_a_vector_index_with_a_different_similarity_is_a_conflict() {
        let schema = SchemaManager::new(1.2, 0.75);
        schema
            .add_vector_index("embeddings", "Document", "embedding", 384, VectorSimilarity::Cosine)
            .unwrap();
        let err = schema
            .add_vector_index("embeddings", "Document", "embedding", 384, VectorSimilarity::Euclidean)
            .unwrap_err();
        assert!(matches!(err, NornicError::SchemaConflict(_)));
    }

    #[test]
    fn vector_index_carries_its_similarity_kind() {
        let schema = SchemaManager::new(1.2, 0.75);
        schema
            .add_vector_index("embeddings", "Document", "embedding", 384, VectorSimilarity::Dot)
            .unwrap();
        let def = schema.vector_index("embeddings").unwrap();
        assert_eq!(def.similarity, VectorSimilarity::Dot);
    }
}
