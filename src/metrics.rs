//! Live operation counters (spec §9 observability).
//!
//! Follows `teacher_reference/src/storage/vstore/mod.rs`'s `VStoreMetrics`
//! shape: private `AtomicU64` fields behind `Relaxed` ordering (these are
//! counters for humans, not a synchronization mechanism) plus a
//! `Clone + Copy + Debug + Default` snapshot struct callers can log or
//! serve from a health endpoint without touching the atomics directly.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct PerformanceMetrics {
    nodes_created: AtomicU64,
    nodes_updated: AtomicU64,
    nodes_deleted: AtomicU64,
    edges_created: AtomicU64,
    edges_updated: AtomicU64,
    edges_deleted: AtomicU64,
    txn_commits: AtomicU64,
    txn_rollbacks: AtomicU64,
    wal_appends: AtomicU64,
    wal_bytes_written: AtomicU64,
    wal_syncs: AtomicU64,
    hnsw_inserts: AtomicU64,
    hnsw_removals: AtomicU64,
    hnsw_searches: AtomicU64,
}

/// Point-in-time snapshot of [`PerformanceMetrics`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PerformanceMetricsSnapshot {
    pub nodes_created: u64,
    pub nodes_updated: u64,
    pub nodes_deleted: u64,
    pub edges_created: u64,
    pub edges_updated: u64,
    pub edges_deleted: u64,
    pub txn_commits: u64,
    pub txn_rollbacks: u64,
    pub wal_appends: u64,
    pub wal_bytes_written: u64,
    pub wal_syncs: u64,
    pub hnsw_inserts: u64,
    pub hnsw_removals: u64,
    pub hnsw_searches: u64,
}

impl PerformanceMetricsSnapshot {
    pub fn txn_success_rate(&self) -> f64 {
        let total = self.txn_commits + self.txn_rollbacks;
        if total == 0 {
            1.0
        } else {
            self.txn_commits as f64 / total as f64
        }
    }
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_node_created(&self) {
        self.nodes_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_node_updated(&self) {
        self.nodes_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_node_deleted(&self) {
        self.nodes_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_edge_created(&self) {
        self.edges_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_edge_updated(&self) {
        self.edges_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_edge_deleted(&self) {
        self.edges_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_txn_commit(&self) {
        self.txn_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_txn_rollback(&self) {
        self.txn_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wal_append(&self, bytes: u64) {
        self.wal_appends.fetch_add(1, Ordering::Relaxed);
        self.wal_bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_wal_sync(&self) {
        self.wal_syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hnsw_insert(&self) {
        self.hnsw_inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hnsw_removal(&self) {
        self.hnsw_removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hnsw_search(&self) {
        self.hnsw_searches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PerformanceMetricsSnapshot {
        PerformanceMetricsSnapshot {
            nodes_created: self.nodes_created.load(Ordering::Relaxed),
            nodes_updated: self.nodes_updated.load(Ordering::Relaxed),
            nodes_deleted: self.nodes_deleted.load(Ordering::Relaxed),
            edges_created: self.edges_created.load(Ordering::Relaxed),
            edges_updated: self.edges_updated.load(Ordering::Relaxed),
            edges_deleted: self.edges_deleted.load(Ordering::Relaxed),
            txn_commits: self.txn_commits.load(Ordering::Relaxed),
            txn_rollbacks: self.txn_rollbacks.load(Ordering::Relaxed),
            wal_appends: self.wal_appends.load(Ordering::Relaxed),
            wal_bytes_written: self.wal_bytes_written.load(Ordering::Relaxed),
            wal_syncs: self.wal_syncs.load(Ordering::Relaxed),
            hnsw_inserts: self.hnsw_inserts.load(Ordering::Relaxed),
            hnsw_removals: self.hnsw_removals.load(Ordering::Relaxed),
            hnsw_searches: self.hnsw_searches.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_threads() {
        let metrics = PerformanceMetrics::new();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        metrics.record_node_created();
                    }
                });
            }
        });
        assert_eq!(metrics.snapshot().nodes_created, 400);
    }

    #[test]
    fn txn_success_rate_is_one_with_no_activity() {
        let metrics = PerformanceMetrics::new();
        assert_eq!(metrics.snapshot().txn_success_rate(), 1.0);
    }
}
