//! BM25-scored full-text index over a set of string properties (spec §4.3).
//!
//! Tokenization is intentionally simple: lowercase, split on non-alphanumeric
//! boundaries. There is no stemming or stopword list; ranking alone (BM25)
//! is the spec's contract, not linguistic sophistication.

use crate::model::{Node, NodeId, PropertyValue};
use rustc_hash::FxHashMap;
use std::collections::HashSet;

pub struct FulltextIndex {
    pub label: String,
    pub properties: Vec<String>,
    k1: f64,
    b: f64,
    /// token -> (node -> term frequency)
    postings: FxHashMap<String, FxHashMap<NodeId, u32>>,
    doc_lengths: FxHashMap<NodeId, usize>,
    total_length: u64,
}

impl FulltextIndex {
    pub fn new(label: String, properties: Vec<String>, k1: f64, b: f64) -> Self {
        Self {
            label,
            properties,
            k1,
            b,
            postings: FxHashMap::default(),
            doc_lengths: FxHashMap::default(),
            total_length: 0,
        }
    }

    pub fn clear(&mut self) {
        self.postings.clear();
        self.doc_lengths.clear();
        self.total_length = 0;
    }

    pub fn index_node(&mut self, node: &Node) {
        self.remove_node(&node.id);
        let tokens = self.tokens_for(node);
        if tokens.is_empty() {
            return;
        }
        self.doc_lengths.insert(node.id.clone(), tokens.len());
        self.total_length += tokens.len() as u64;
        let mut counts: FxHashMap<String, u32> = FxHashMap::default();
        for token in tokens {
            *counts.entry(token).or_insert(0) += 1;
        }
        for (token, count) in counts {
            self.postings
                .entry(token)
                .or_default()
                .insert(node.id.clone(), count);
        }
    }

    pub fn remove_node(&mut self, id: &NodeId) {
        if let Some(len) = self.doc_lengths.remove(id) {
            self.total_length = self.total_length.saturating_sub(len as u64);
        }
        for postings in self.postings.values_mut() {
            postings.remove(id);
        }
        self.postings.retain(|_, postings| !postings.is_empty());
    }

    pub fn search(&self, query: &str, limit: usize) -> Vec<(NodeId, f64)> {
        let doc_count = self.doc_lengths.len().max(1);
        let avg_len = if self.doc_lengths.is_empty() {
            1.0
        } else {
            self.total_length as f64 / self.doc_lengths.len() as f64
        };

        let mut query_tokens: Vec<String> = tokenize(query);
        query_tokens.dedup();

        let mut scores: FxHashMap<NodeId, f64> = FxHashMap::default();
        for token in &query_tokens {
            let Some(postings) = self.postings.get(token) else {
                continue;
            };
            let n_q = postings.len() as f64;
            let idf = ((doc_count as f64 - n_q + 0.5) / (n_q + 0.5) + 1.0).ln();
            for (node_id, &tf) in postings {
                let doc_len = self.doc_lengths.get(node_id).copied().unwrap_or(1) as f64;
                let tf = tf as f64;
                let denom = tf + self.k1 * (1.0 - self.b + self.b * doc_len / avg_len);
                let score = idf * (tf * (self.k1 + 1.0)) / denom.max(f64::EPSILON);
                *scores.entry(node_id.clone()).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(NodeId, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);
        ranked
    }

    fn tokens_for(&self, node: &Node) -> Vec<String> {
        let mut out = Vec::new();
        let unique_properties: HashSet<&String> = self.properties.iter().collect();
        for property in unique_properties {
            if let Some(PropertyValue::String(text)) = node.properties.get(property) {
                out.extend(tokenize(text));
            }
        }
        out
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;

    fn node_with_bio(id: &str, bio: &str) -> Node {
        let mut n = Node::new(NodeId::from(id), vec!["Person".into()], 0);
        n.properties.insert("bio".into(), PropertyValue::String(bio.into()));
        n
    }

    #[test]
    fn ranks_more_relevant_document_higher() {
        let mut index = FulltextIndex::new("Person".into(), vec!["bio".into()], 1.2, 0.75);
        index.index_node(&node_with_bio("n1", "graph database engine written in rust"));
        index.index_node(&node_with_bio("n2", "rust rust rust programming language"));

        let results = index.search("rust", 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, NodeId::from("n2"));
    }

    #[test]
    fn remove_node_drops_it_from_results() {
        let mut index = FulltextIndex::new("Person".into(), vec!["bio".into()], 1.2, 0.75);
        index.index_node(&node_with_bio("n1", "graph database"));
        index.remove_node(&NodeId::from("n1"));
        assert!(index.search("graph", 10).is_empty());
    }
}
