//! Session boundary detection and co-access tracking (spec §4.6
//! `SessionDetector`).
//!
//! A "session" is a run of accesses, across possibly many nodes, that the
//! caller is treated as having visited together — the basis for "what else
//! was touched around the same time as this node" co-access queries.

use crate::model::NodeId;

#[derive(Debug, Clone)]
struct Session {
    started_at: i64,
    last_access: i64,
    last_velocity: f64,
    nodes: Vec<NodeId>,
}

impl Session {
    fn new(node: NodeId, timestamp_ms: i64, velocity: f64) -> Self {
        Self {
            started_at: timestamp_ms,
            last_access: timestamp_ms,
            last_velocity: velocity,
            nodes: vec![node],
        }
    }

    fn touch(&mut self, node: NodeId, timestamp_ms: i64, velocity: f64) {
        self.last_access = timestamp_ms;
        self.last_velocity = velocity;
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
    }
}

/// Tracks one rolling session per caller (typically one `SessionDetector`
/// per connection/process), bounded by a time gap, a relative velocity
/// swing, or a maximum duration — whichever trips first.
#[derive(Debug, Clone)]
pub struct SessionDetector {
    gap_ms: i64,
    velocity_change_threshold: f64,
    max_duration_ms: i64,
    current: Option<Session>,
}

impl SessionDetector {
    pub fn new(gap_seconds: u64, velocity_change_threshold: f64, max_duration_seconds: u64) -> Self {
        Self {
            gap_ms: gap_seconds as i64 * 1000,
            velocity_change_threshold,
            max_duration_ms: max_duration_seconds as i64 * 1000,
            current: None,
        }
    }

    /// Records an access to `node` at `timestamp_ms`, with the caller's
    /// current smoothed access-rate `velocity`. Starts a new session if the
    /// existing one has expired by any of the three bounds.
    pub fn record_access(&mut self, node: NodeId, timestamp_ms: i64, velocity: f64) {
        let starts_new = match &self.current {
            None => true,
            Some(session) => {
                let gap = timestamp_ms - session.last_access;
                let duration = timestamp_ms - session.started_at;
                let velocity_change = relative_change(session.last_velocity, velocity);
                gap > self.gap_ms
                    || duration > self.max_duration_ms
                    || velocity_change > self.velocity_change_threshold
            }
        };

        if starts_new {
            self.current = Some(Session::new(node, timestamp_ms, velocity));
        } else if let Some(session) = &mut self.current {
            session.touch(node, timestamp_ms, velocity);
        }
    }

    /// Other nodes in `node`'s current session, in access order, excluding
    /// `node` itself. Empty if `node` isn't part of the live session.
    pub fn co_accessed(&self, node: &NodeId) -> Vec<NodeId> {
        match &self.current {
            Some(session) if session.nodes.contains(node) => session
                .nodes
                .iter()
                .filter(|n| *n != node)
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn current_session_size(&self) -> usize {
        self.current.as_ref().map_or(0, |s| s.nodes.len())
    }
}

fn relative_change(previous: f64, current: f64) -> f64 {
    if previous.abs() < f64::EPSILON {
        if current.abs() < f64::EPSILON {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        ((current - previous) / previous).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accesses_within_gap_share_a_session() {
        let mut sd = SessionDetector::new(300, 0.5, 4 * 3600);
        sd.record_access(NodeId::from("a"), 0, 1.0);
        sd.record_access(NodeId::from("b"), 10_000, 1.0);
        assert_eq!(sd.co_accessed(&NodeId::from("a")), vec![NodeId::from("b")]);
    }

    #[test]
    fn gap_over_threshold_starts_new_session() {
        let mut sd = SessionDetector::new(300, 0.5, 4 * 3600);
        sd.record_access(NodeId::from("a"), 0, 1.0);
        sd.record_access(NodeId::from("b"), 400_000, 1.0);
        assert!(sd.co_accessed(&NodeId::from("a")).is_empty());
        assert!(sd.co_accessed(&NodeId::from("b")).is_empty());
    }

    #[test]
    fn large_velocity_swing_starts_new_session() {
        let mut sd = SessionDetector::new(300, 0.5, 4 * 3600);
        sd.record_access(NodeId::from("a"), 0, 1.0);
        sd.record_access(NodeId::from("b"), 1000, 5.0);
        assert!(sd.co_accessed(&NodeId::from("a")).is_empty());
    }

    #[test]
    fn max_duration_bounds_a_session_even_without_a_gap() {
        let mut sd = SessionDetector::new(300, 0.5, 10);
        sd.record_access(NodeId::from("a"), 0, 1.0);
        sd.record_access(NodeId::from("b"), 11_000, 1.0);
        assert!(sd.co_accessed(&NodeId::from("a")).is_empty());
    }
}
