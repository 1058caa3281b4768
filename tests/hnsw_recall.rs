//! HNSW recall@10 vs. brute force (spec §8: "average recall@10 vs brute
//! force >= 0.8 across >= 20 random queries, >= 500 points in >= 64 dims").

use nornicdb::HnswIndex;
use nornicdb::model::NodeId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const DIMENSIONS: usize = 64;
const POINTS: usize = 500;
const QUERIES: usize = 20;
const K: usize = 10;

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn brute_force_top_k(points: &[(NodeId, Vec<f32>)], query: &[f32], k: usize) -> Vec<NodeId> {
    let mut scored: Vec<(f32, NodeId)> = points
        .iter()
        .map(|(id, v)| (cosine_similarity(v, query), id.clone()))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    scored.into_iter().take(k).map(|(_, id)| id).collect()
}

#[test]
fn recall_at_10_meets_threshold_on_random_points() {
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let index = HnswIndex::with_seed(DIMENSIONS, 16, 200, 100, 7);

    let mut points = Vec::with_capacity(POINTS);
    for i in 0..POINTS {
        let vector: Vec<f32> = (0..DIMENSIONS).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let id = NodeId::from(format!("n{i}"));
        index.add(id.clone(), vector.clone()).unwrap();
        points.push((id, vector));
    }

    let mut total_recall = 0.0;
    for _ in 0..QUERIES {
        let query: Vec<f32> = (0..DIMENSIONS).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let approx: std::collections::HashSet<NodeId> = index
            .search(&query, K, -1.0, None)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let exact: std::collections::HashSet<NodeId> =
            brute_force_top_k(&points, &query, K).into_iter().collect();

        let hits = approx.intersection(&exact).count();
        total_recall += hits as f64 / K as f64;
    }

    let average_recall = total_recall / QUERIES as f64;
    assert!(
        average_recall >= 0.8,
        "average recall@10 was {average_recall}, expected >= 0.8"
    );
}
