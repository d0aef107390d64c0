//! Link classifier abstraction.

use crate::types::LinkPrediction;
use serde::{Deserialize, Serialize};

/// Features describing a single (waypoint, access point) link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkFeatures {
    /// Measured signal strength (dBm)
    pub rssi_dbm: f64,
    /// Range between receiver and access point (meters)
    pub distance: f64,
}

/// Predict-only capability for LOS/NLOS classification.
///
/// # Implementations
///
/// - **Built-in**: `rilo_core::classifier::ResidualClassifier`, thresholds
///   the RSSI shortfall against the free-space expectation
/// - **External**: any trained model wrapped behind this trait
///
/// The propagation and observation models depend on this trait only, so a
/// model can be swapped without touching the estimator.
pub trait LinkClassifier {
    /// Classifies one link.
    fn predict(&self, features: &LinkFeatures) -> LinkPrediction;

    /// Short name for logs and exported records.
    fn name(&self) -> &str {
        "classifier"
    }
}

/// How the estimator consumes classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierMode {
    /// Use the thresholded class
    Hard,
    /// Use the NLOS probability as a mixture weight
    Soft,
}

impl ClassifierMode {
    /// Maps the CLI's `--hard` flag (0 = soft, anything else = hard).
    pub fn from_flag(hard: u8) -> Self {
        if hard == 0 {
            ClassifierMode::Soft
        } else {
            ClassifierMode::Hard
        }
    }
}
