//! Exact similarity scoring used for brute-force fallback queries and for
//! scoring the small candidate sets [`crate::hnsw::HnswIndex`] surfaces
//! (spec §4.8). Grounded on the pack's only real vector-similarity code —
//! `examples/takurot-aLayaSiki/storage/src/index/ann.rs`'s
//! `cosine_similarity` / sort-and-truncate top-k — generalized behind a
//! trait so a future GPU/SIMD backend can slot in without touching callers.

use crate::error::{NornicError, Result};

pub trait VectorBackend: Send + Sync {
    /// Cosine similarity of `query` against every row of `corpus`, in
    /// order. Every row must match `query`'s length.
    fn cosine_batch(&self, query: &[f32], corpus: &[Vec<f32>]) -> Result<Vec<f32>>;

    /// Indices (into `corpus`) of the `k` highest-scoring rows, descending.
    fn top_k(&self, query: &[f32], corpus: &[Vec<f32>], k: usize) -> Result<Vec<(usize, f32)>>;

    fn normalize(&self, vector: &mut [f32]);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

impl VectorBackend for CpuBackend {
    fn cosine_batch(&self, query: &[f32], corpus: &[Vec<f32>]) -> Result<Vec<f32>> {
        corpus
            .iter()
            .map(|row| cosine_similarity(query, row))
            .collect()
    }

    fn top_k(&self, query: &[f32], corpus: &[Vec<f32>], k: usize) -> Result<Vec<(usize, f32)>> {
        let scores = self.cosine_batch(query, corpus)?;
        let mut scored: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn normalize(&self, vector: &mut [f32]) {
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(NornicError::InvalidDimensions {
            expected: a.len(),
            actual: b.len(),
        });
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a * norm_b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_k_orders_by_similarity_descending() {
        let backend = CpuBackend;
        let corpus = vec![vec![0.0, 1.0, 0.0], vec![1.0, 0.0, 0.0], vec![0.9, 0.1, 0.0]];
        let results = backend.top_k(&[1.0, 0.0, 0.0], &corpus, 2).unwrap();
        assert_eq!(results[0].0, 1);
        assert_eq!(results[1].0, 2);
    }

    #[test]
    fn mismatched_dimensions_error() {
        let backend = CpuBackend;
        let err = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, NornicError::InvalidDimensions { .. }));
        let _ = backend;
    }

    #[test]
    fn normalize_produces_unit_vector() {
        let backend = CpuBackend;
        let mut v = vec![3.0, 4.0];
        backend.normalize(&mut v);
        let norm = (v[0] * v[0] + v[1] * v[1]).sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
