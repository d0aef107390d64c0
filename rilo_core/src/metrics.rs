//! RILO Metrics Module
//! ====================
//!
//! Accuracy figures reported at the end of a run:
//! - **MSE**: mean of squared per-waypoint position errors
//! - **Error CDF**: empirical distribution of the per-waypoint errors
//! - **Confusion matrix**: classifier LOS/NLOS decisions against geometry

use crate::geometry::Pose;
use rilo_env::{LinkClass, LocalizationError, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// TRAJECTORY ERROR
// =============================================================================

/// Euclidean error of each estimate against its true waypoint.
pub fn position_errors(estimated: &[Pose], truth: &[Pose]) -> Result<Vec<f64>> {
    if estimated.len() != truth.len() {
        return Err(LocalizationError::config(format!(
            "estimated path has {} poses, true path has {}",
            estimated.len(),
            truth.len()
        )));
    }
    Ok(estimated
        .iter()
        .zip(truth)
        .map(|(e, t)| (e.position - t.position).norm())
        .collect())
}

/// Mean of the squared per-point Euclidean errors. Zero for empty paths.
pub fn mean_squared_error(estimated: &[Pose], truth: &[Pose]) -> Result<f64> {
    Ok(mean_of_squares(&position_errors(estimated, truth)?))
}

fn mean_of_squares(errors: &[f64]) -> f64 {
    if errors.is_empty() {
        return 0.0;
    }
    errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64
}

/// One point of the empirical CDF.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CdfPoint {
    pub error: f64,
    pub probability: f64,
}

/// Empirical CDF of position errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorCdf {
    sorted: Vec<f64>,
}

impl ErrorCdf {
    /// NaN errors are dropped.
    pub fn new(errors: &[f64]) -> Self {
        let mut sorted: Vec<f64> = errors.iter().copied().filter(|e| !e.is_nan()).collect();
        sorted.sort_by(f64::total_cmp);
        Self { sorted }
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// `(error, (i + 1) / n)` in ascending error order.
    pub fn points(&self) -> Vec<CdfPoint> {
        let n = self.sorted.len() as f64;
        self.sorted
            .iter()
            .enumerate()
            .map(|(i, &error)| CdfPoint {
                error,
                probability: (i + 1) as f64 / n,
            })
            .collect()
    }

    /// Smallest error whose cumulative probability reaches `p`.
    pub fn quantile(&self, p: f64) -> Option<f64> {
        if self.sorted.is_empty() {
            return None;
        }
        let n = self.sorted.len();
        let rank = (p.clamp(0.0, 1.0) * n as f64).ceil() as usize;
        Some(self.sorted[rank.clamp(1, n) - 1])
    }

    pub fn median(&self) -> Option<f64> {
        self.quantile(0.5)
    }

    pub fn max(&self) -> Option<f64> {
        self.sorted.last().copied()
    }
}

/// Per-step errors with their summaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalizationErrors {
    pub per_step: Vec<f64>,
    pub mse: f64,
    pub cdf: ErrorCdf,
}

impl LocalizationErrors {
    pub fn between(estimated: &[Pose], truth: &[Pose]) -> Result<Self> {
        let per_step = position_errors(estimated, truth)?;
        let mse = mean_of_squares(&per_step);
        let cdf = ErrorCdf::new(&per_step);
        Ok(Self { per_step, mse, cdf })
    }

    pub fn rmse(&self) -> f64 {
        self.mse.sqrt()
    }
}

// =============================================================================
// LINK CLASSIFICATION
// =============================================================================

/// Classifier decisions against geometric truth, NLOS being positive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    pub fn record(&mut self, predicted: LinkClass, actual: LinkClass) {
        match (predicted, actual) {
            (LinkClass::Nlos, LinkClass::Nlos) => self.true_positive += 1,
            (LinkClass::Nlos, LinkClass::Los) => self.false_positive += 1,
            (LinkClass::Los, LinkClass::Los) => self.true_negative += 1,
            (LinkClass::Los, LinkClass::Nlos) => self.false_negative += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    /// Fraction of correct decisions; `None` before any decision.
    pub fn accuracy(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some((self.true_positive + self.true_negative) as f64 / total as f64)
    }

    /// `[TP, FP, TN, FN]`
    pub fn as_array(&self) -> [usize; 4] {
        [
            self.true_positive,
            self.false_positive,
            self.true_negative,
            self.false_negative,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_mse_of_known_offsets() {
        let truth = vec![Pose::at(0.0, 0.0, 0.0), Pose::at(1.0, 0.0, 0.0)];
        let est = vec![Pose::at(3.0, 4.0, 0.0), Pose::at(1.0, 0.0, 0.0)];
        // Errors 5 and 0
        assert_relative_eq!(mean_squared_error(&est, &truth).unwrap(), 12.5);
    }

    #[test]
    fn test_mse_length_mismatch() {
        let truth = vec![Pose::at(0.0, 0.0, 0.0)];
        assert!(mean_squared_error(&[], &truth).is_err());
    }

    #[test]
    fn test_cdf_points() {
        let cdf = ErrorCdf::new(&[3.0, 1.0, 2.0, 4.0]);
        let points = cdf.points();
        assert_eq!(points.len(), 4);
        assert_relative_eq!(points[0].error, 1.0);
        assert_relative_eq!(points[0].probability, 0.25);
        assert_relative_eq!(points[3].probability, 1.0);

        assert_relative_eq!(cdf.quantile(0.5).unwrap(), 2.0);
        assert_relative_eq!(cdf.quantile(0.51).unwrap(), 3.0);
        assert_relative_eq!(cdf.quantile(0.0).unwrap(), 1.0);
        assert_relative_eq!(cdf.max().unwrap(), 4.0);
    }

    #[test]
    fn test_empty_cdf() {
        let cdf = ErrorCdf::new(&[]);
        assert!(cdf.points().is_empty());
        assert!(cdf.quantile(0.9).is_none());
    }

    #[test]
    fn test_confusion_counts() {
        let mut m = ConfusionMatrix::default();
        m.record(LinkClass::Nlos, LinkClass::Nlos);
        m.record(LinkClass::Nlos, LinkClass::Los);
        m.record(LinkClass::Los, LinkClass::Los);
        m.record(LinkClass::Los, LinkClass::Los);
        m.record(LinkClass::Los, LinkClass::Nlos);

        assert_eq!(m.as_array(), [1, 1, 2, 1]);
        assert_relative_eq!(m.accuracy().unwrap(), 0.6);
        assert!(ConfusionMatrix::default().accuracy().is_none());
    }

    #[test]
    fn test_errors_summary() {
        let truth = vec![Pose::at(0.0, 0.0, 0.0); 3];
        let est = vec![
            Pose::at(1.0, 0.0, 0.0),
            Pose::at(2.0, 0.0, 0.0),
            Pose::at(2.0, 0.0, 0.0),
        ];
        let errors = LocalizationErrors::between(&est, &truth).unwrap();
        assert_relative_eq!(errors.mse, 3.0);
        assert_relative_eq!(errors.mse, mean_squared_error(&est, &truth).unwrap());
        assert_relative_eq!(errors.rmse(), 3f64.sqrt());
        assert_eq!(errors.cdf.len(), 3);

        let empty = LocalizationErrors::between(&[], &[]).unwrap();
        assert_relative_eq!(empty.mse, 0.0);
        assert!(empty.cdf.is_empty());
    }

    proptest! {
        #[test]
        fn prop_cdf_is_monotone(errors in prop::collection::vec(0.0f64..100.0, 1..100)) {
            let points = ErrorCdf::new(&errors).points();
            for pair in points.windows(2) {
                prop_assert!(pair[0].error <= pair[1].error);
                prop_assert!(pair[0].probability < pair[1].probability);
            }
            prop_assert!((points[points.len() - 1].probability - 1.0).abs() < 1e-12);
        }
    }
}
