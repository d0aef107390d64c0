//! Common types shared between the core algorithms and the harness.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an access point.
///
/// Access points are indexed densely from zero in map order, so the id
/// doubles as the landmark index in per-particle SLAM storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApId(pub u32);

impl ApId {
    /// Returns the id as a slice index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ApId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AP{}", self.0)
    }
}

/// Unique identifier for a pipeline run, stamped into exported records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Creates a new random RunId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic RunId from a seed.
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Whether the direct path between two points is obstructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkClass {
    /// Line of sight
    Los,
    /// Non line of sight (at least one obstacle crossed)
    Nlos,
}

impl LinkClass {
    pub fn is_nlos(&self) -> bool {
        matches!(self, LinkClass::Nlos)
    }
}

/// Output of a link classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkPrediction {
    /// Hard decision
    pub class: LinkClass,
    /// Soft confidence that the link is NLOS, in [0, 1]
    pub nlos_probability: f64,
}

impl LinkPrediction {
    /// Builds a prediction from a soft score, thresholding at 0.5.
    /// Non-finite scores carry no information and map to 0.5.
    pub fn from_probability(nlos_probability: f64) -> Self {
        let p = if nlos_probability.is_finite() {
            nlos_probability.clamp(0.0, 1.0)
        } else {
            0.5
        };
        let class = if p >= 0.5 { LinkClass::Nlos } else { LinkClass::Los };
        Self {
            class,
            nlos_probability: p,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_from_seed_deterministic() {
        assert_eq!(RunId::from_seed(7), RunId::from_seed(7));
        assert_ne!(RunId::from_seed(7), RunId::from_seed(8));
    }

    #[test]
    fn test_prediction_threshold() {
        assert_eq!(LinkPrediction::from_probability(0.7).class, LinkClass::Nlos);
        assert_eq!(LinkPrediction::from_probability(0.2).class, LinkClass::Los);
        assert_eq!(LinkPrediction::from_probability(1.5).nlos_probability, 1.0);
    }

    #[test]
    fn test_non_finite_score_is_uninformative() {
        for score in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let prediction = LinkPrediction::from_probability(score);
            assert_eq!(prediction.nlos_probability, 0.5);
            assert_eq!(prediction.class, LinkClass::Nlos);
        }
    }

    #[test]
    fn test_ap_id_display() {
        assert_eq!(ApId(3).to_string(), "AP3");
        assert_eq!(ApId(3).index(), 3);
    }
}
