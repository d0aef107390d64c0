//! Built-in LOS/NLOS classifier.
//!
//! Scores the RSSI shortfall against the free-space expectation at the
//! measured range. Measurement noise makes it misfire near the threshold,
//! which is the imperfect sensing the estimator has to cope with.

use crate::propagation::PathLossModel;
use rilo_env::{LinkClass, LinkClassifier, LinkFeatures, LinkPrediction};

/// Logistic classifier on the RSSI residual.
#[derive(Debug, Clone, Copy)]
pub struct ResidualClassifier {
    path_loss: PathLossModel,
    /// Residual at which NLOS becomes the more likely class (dB)
    threshold_db: f64,
    /// Logistic steepness (1/dB)
    slope: f64,
}

impl ResidualClassifier {
    /// Threshold at half the NLOS bias, slope scaled to the measurement noise.
    pub fn new(path_loss: PathLossModel, noise_std_db: f64) -> Self {
        Self {
            path_loss,
            threshold_db: 0.5 * path_loss.nlos_bias_db,
            slope: 1.0 / noise_std_db.max(0.5),
        }
    }

    pub fn with_threshold(mut self, threshold_db: f64) -> Self {
        self.threshold_db = threshold_db;
        self
    }
}

impl LinkClassifier for ResidualClassifier {
    fn predict(&self, features: &LinkFeatures) -> LinkPrediction {
        let expected_los = self.path_loss.expected_rssi(features.distance, LinkClass::Los);
        let residual = expected_los - features.rssi_dbm;
        let p = 1.0 / (1.0 + (-self.slope * (residual - self.threshold_db)).exp());
        LinkPrediction::from_probability(p)
    }

    fn name(&self) -> &str {
        "residual"
    }
}
