//! Tunables for every subsystem, collected in one place so callers can reason
//! about durability/performance trade-offs without touching individual
//! components. Mirrors the teacher's `db::config::Config` preset pattern.

use serde::{Deserialize, Serialize};

/// Controls when a WAL frame is considered durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// fsync after every append.
    Immediate,
    /// fsync every `every` records or `interval_ms` milliseconds, whichever
    /// comes first.
    Group { every: usize, interval_ms: u64 },
    /// Leave durability to the OS page cache.
    Os,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub wal_sync_mode: SyncMode,
    /// Segment rotation threshold, bytes. Spec default: 64 MiB.
    pub wal_segment_size: u64,
    pub label_case_insensitive: bool,

    // HNSW defaults (spec §4.5). `hnsw_dimensions` fixes the embedding
    // width `GraphStore` builds its index for; every node's `embedding`
    // must match it or be absent.
    pub hnsw_dimensions: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,

    // Fulltext BM25 defaults (spec §6).
    pub bm25_k1: f64,
    pub bm25_b: f64,

    // Temporal engine defaults (spec §4.6, §9 — exposed as configuration).
    pub session_gap_seconds: u64,
    pub session_velocity_change_threshold: f64,
    pub session_max_duration_seconds: u64,
    pub burst_window_seconds: u64,
    pub burst_min_accesses: u64,
    pub pattern_growth_threshold: f64,
    pub pattern_decay_threshold: f64,
    pub decay_weight_velocity: f64,
    pub decay_weight_pattern: f64,
    pub decay_weight_recency: f64,
    pub decay_min_multiplier: f64,
    pub decay_max_multiplier: f64,
    pub kalman_process_noise: f64,
    pub kalman_measurement_noise: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self::balanced()
    }
}

impl Config {
    /// Every write fsynced before returning; slowest, safest.
    pub fn durable() -> Self {
        Self {
            wal_sync_mode: SyncMode::Immediate,
            wal_segment_size: 64 * 1024 * 1024,
            label_case_insensitive: true,
            hnsw_dimensions: 128,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 100,
            bm25_k1: 1.2,
            bm25_b: 0.75,
            session_gap_seconds: 300,
            session_velocity_change_threshold: 0.5,
            session_max_duration_seconds: 4 * 3600,
            burst_window_seconds: 60,
            burst_min_accesses: 10,
            pattern_growth_threshold: 0.2,
            pattern_decay_threshold: -0.2,
            decay_weight_velocity: 0.4,
            decay_weight_pattern: 0.3,
            decay_weight_recency: 0.3,
            decay_min_multiplier: 0.1,
            decay_max_multiplier: 5.0,
            kalman_process_noise: 1e-3,
            kalman_measurement_noise: 1e-1,
        }
    }

    /// Group-commit fsync; a reasonable default for most embedders.
    pub fn balanced() -> Self {
        Self {
            wal_sync_mode: SyncMode::Group {
                every: 100,
                interval_ms: 10,
            },
            ..Self::durable()
        }
    }

    /// No fsync; for benchmarks and scratch databases only.
    pub fn fast() -> Self {
        Self {
            wal_sync_mode: SyncMode::Os,
            ..Self::durable()
        }
    }
}
