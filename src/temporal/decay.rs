//! Combines velocity, pattern, and recency signals into a single decay-rate
//! multiplier (spec §4.6 `DecayModifier`). Consumers multiply a base
//! per-hour decay rate by the value this returns.

use crate::model::NodeId;
use crate::temporal::kalman::KalmanFilter;
use std::collections::HashMap;

/// Keeps the activity-inversion finite when every component score is zero.
const ACTIVITY_EPSILON: f64 = 0.05;

#[derive(Debug, Clone, Copy)]
pub struct DecayWeights {
    pub velocity: f64,
    pub pattern: f64,
    pub recency: f64,
}

pub struct DecayModifier {
    weights: DecayWeights,
    min_multiplier: f64,
    max_multiplier: f64,
    process_noise: f64,
    measurement_noise: f64,
    filters: HashMap<NodeId, KalmanFilter>,
}

impl DecayModifier {
    pub fn new(
        weights: DecayWeights,
        min_multiplier: f64,
        max_multiplier: f64,
        process_noise: f64,
        measurement_noise: f64,
    ) -> Self {
        Self {
            weights,
            min_multiplier,
            max_multiplier,
            process_noise,
            measurement_noise,
            filters: HashMap::new(),
        }
    }

    /// Folds a new set of component scores (each expected roughly in
    /// `[0, 1]`, `boost` additive on top) into the node's smoothed decay
    /// multiplier, returning the clamped result.
    ///
    /// The multiplier is inversely related to activity: a node accessed
    /// often and recently should decay *slower* (multiplier below 1), and
    /// a node gone quiet should decay *faster* (multiplier above 1), so
    /// the combined activity score is inverted around the reference point
    /// where the weighted scores average to one half.
    pub fn update(
        &mut self,
        node_id: &NodeId,
        velocity_score: f64,
        pattern_score: f64,
        recency_score: f64,
        boost: f64,
        dt_seconds: f64,
    ) -> f64 {
        let activity = self.weights.velocity * velocity_score
            + self.weights.pattern * pattern_score
            + self.weights.recency * recency_score
            + boost;
        let reference = (self.weights.velocity + self.weights.pattern + self.weights.recency) / 2.0;
        let raw = reference / (activity + ACTIVITY_EPSILON);

        let filter = self.filters.entry(node_id.clone()).or_insert_with(|| {
            KalmanFilter::new(self.process_noise, self.measurement_noise)
        });
        let smoothed = filter.update(raw, dt_seconds);
        smoothed.clamp(self.min_multiplier, self.max_multiplier)
    }

    /// The last smoothed value without folding in a new sample, clamped.
    /// Returns `None` if the node has never been scored.
    pub fn current(&self, node_id: &NodeId) -> Option<f64> {
        self.filters
            .get(node_id)
            .map(|f| f.value().clamp(self.min_multiplier, self.max_multiplier))
    }

    pub fn remove(&mut self, node_id: &NodeId) {
        self.filters.remove(node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> DecayWeights {
        DecayWeights {
            velocity: 0.4,
            pattern: 0.3,
            recency: 0.3,
        }
    }

    #[test]
    fn repeated_update_without_new_access_is_stable() {
        let mut dm = DecayModifier::new(weights(), 0.1, 5.0, 1e-3, 1e-1);
        let id = NodeId::from("n1");
        let first = dm.update(&id, 0.8, 0.8, 0.8, 0.0, 1.0);
        let second = dm.current(&id).unwrap();
        assert!((first - second).abs() < 1e-9);
    }

    #[test]
    fn result_is_clamped_to_configured_bounds() {
        let mut dm = DecayModifier::new(weights(), 0.5, 1.5, 1e-3, 1e-1);
        let id = NodeId::from("n1");
        let v = dm.update(&id, 10.0, 10.0, 10.0, 10.0, 1.0);
        assert!(v <= 1.5);
    }

    #[test]
    fn nodes_are_scored_independently() {
        let mut dm = DecayModifier::new(weights(), 0.0, 5.0, 1e-3, 1e-1);
        let a = NodeId::from("a");
        let b = NodeId::from("b");
        dm.update(&a, 1.0, 1.0, 1.0, 0.0, 1.0);
        dm.update(&b, 0.0, 0.0, 0.0, 0.0, 1.0);
        // a is fully active, b is idle: a should decay slower (lower multiplier).
        assert!(dm.current(&a).unwrap() < dm.current(&b).unwrap());
    }
}
