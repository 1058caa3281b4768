//! Aggregate health status over a [`crate::graph_store::GraphStore`]
//! instance (spec §9 observability). Grounded directly on
//! `teacher_reference/src/db/health.rs`'s `HealthStatus`/`Check`/
//! `HealthCheck` shape, with the individual checks renamed from the
//! teacher's page-cache terms to this crate's WAL/transaction terms.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Check {
    WalSize {
        bytes: u64,
        threshold: u64,
        healthy: bool,
    },
    WalPoisoned {
        healthy: bool,
    },
    TxnSuccessRate {
        rate: f64,
        threshold: f64,
        healthy: bool,
    },
    LastCheckpoint {
        seconds_ago: u64,
        threshold: u64,
        healthy: bool,
    },
}

impl Check {
    fn is_healthy(&self) -> bool {
        match self {
            Check::WalSize { healthy, .. }
            | Check::WalPoisoned { healthy, .. }
            | Check::TxnSuccessRate { healthy, .. }
            | Check::LastCheckpoint { healthy, .. } => *healthy,
        }
    }

    /// Whether this check alone is severe enough to force the overall
    /// status to `Unhealthy` rather than merely `Degraded`.
    fn is_critical(&self) -> bool {
        matches!(self, Check::WalPoisoned { healthy: false })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub checks: Vec<Check>,
}

impl HealthCheck {
    pub fn new() -> Self {
        Self {
            status: HealthStatus::Healthy,
            checks: Vec::new(),
        }
    }

    pub fn add_check(&mut self, check: Check) {
        if !check.is_healthy() {
            self.status = if check.is_critical() {
                HealthStatus::Unhealthy
            } else {
                match self.status {
                    HealthStatus::Unhealthy => HealthStatus::Unhealthy,
                    _ => HealthStatus::Degraded,
                }
            };
        }
        self.checks.push(check);
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_checks_keep_status_healthy() {
        let mut hc = HealthCheck::new();
        hc.add_check(Check::WalSize {
            bytes: 10,
            threshold: 100,
            healthy: true,
        });
        assert!(hc.is_healthy());
    }

    #[test]
    fn one_failing_check_degrades_status() {
        let mut hc = HealthCheck::new();
        hc.add_check(Check::TxnSuccessRate {
            rate: 0.5,
            threshold: 0.9,
            healthy: false,
        });
        assert_eq!(hc.status, HealthStatus::Degraded);
    }

    #[test]
    fn poisoned_wal_is_unhealthy() {
        let mut hc = HealthCheck::new();
        hc.add_check(Check::WalPoisoned { healthy: false });
        assert_eq!(hc.status, HealthStatus::Unhealthy);
    }
}
