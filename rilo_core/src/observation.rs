//! Observation model: scores a hypothesized position against a reading.
//!
//! All scores are log-likelihoods; the filter normalizes them with
//! log-sum-exp, so products of many small densities never underflow.

use crate::geometry::Dimension;
use crate::propagation::{Observation, ObservationFrame, PathLossModel};
use nalgebra::Vector3;
use rilo_env::{ApId, ClassifierMode, LinkClass, LocalizationError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Which LOS/NLOS decision the likelihood trusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkInterpretation {
    /// The reading's geometric flag
    Geometric,
    /// The classifier's thresholded class
    Hard,
    /// Mixture weighted by the classifier's NLOS probability
    Soft,
}

impl LinkInterpretation {
    pub fn needs_classifier(&self) -> bool {
        !matches!(self, LinkInterpretation::Geometric)
    }
}

impl From<ClassifierMode> for LinkInterpretation {
    fn from(mode: ClassifierMode) -> Self {
        match mode {
            ClassifierMode::Hard => LinkInterpretation::Hard,
            ClassifierMode::Soft => LinkInterpretation::Soft,
        }
    }
}

/// Gaussian log-density.
pub fn gaussian_log_pdf(x: f64, mean: f64, std_dev: f64) -> f64 {
    let z = (x - mean) / std_dev;
    -0.5 * z * z - std_dev.ln() - 0.5 * (2.0 * PI).ln()
}

/// Log of `exp(a) + exp(b)` without overflow.
fn log_add_exp(a: f64, b: f64) -> f64 {
    let hi = a.max(b);
    if hi == f64::NEG_INFINITY {
        return hi;
    }
    hi + ((a - hi).exp() + (b - hi).exp()).ln()
}

/// RSSI likelihood under the path-loss law.
#[derive(Debug, Clone)]
pub struct ObservationModel {
    path_loss: PathLossModel,
    noise_std: Vec<f64>,
    interpretation: LinkInterpretation,
    dimension: Dimension,
}

impl ObservationModel {
    /// `noise_std` holds one entry per access point, or one broadcast entry.
    pub fn new(
        path_loss: PathLossModel,
        noise_std: Vec<f64>,
        interpretation: LinkInterpretation,
        dimension: Dimension,
    ) -> Result<Self> {
        path_loss.validate()?;
        if noise_std.is_empty() || noise_std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(LocalizationError::config(format!(
                "observation noise must be non-empty and strictly positive, got {:?}",
                noise_std
            )));
        }
        Ok(Self {
            path_loss,
            noise_std,
            interpretation,
            dimension,
        })
    }

    pub fn path_loss(&self) -> &PathLossModel {
        &self.path_loss
    }

    pub fn interpretation(&self) -> LinkInterpretation {
        self.interpretation
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn noise_for(&self, ap: ApId) -> f64 {
        if self.noise_std.len() == 1 {
            self.noise_std[0]
        } else {
            self.noise_std.get(ap.index()).copied().unwrap_or(self.noise_std[0])
        }
    }

    /// Fraction of the NLOS bias the model expects on this reading.
    pub fn nlos_weight(&self, reading: &Observation) -> f64 {
        let geometric = if reading.link.is_nlos() { 1.0 } else { 0.0 };
        match (self.interpretation, reading.prediction) {
            (LinkInterpretation::Geometric, _) | (_, None) => geometric,
            (LinkInterpretation::Hard, Some(p)) => {
                if p.class.is_nlos() {
                    1.0
                } else {
                    0.0
                }
            }
            (LinkInterpretation::Soft, Some(p)) => p.nlos_probability,
        }
    }

    /// Noise-free RSSI the model expects for a reading at a range.
    pub fn expected_rssi(&self, reading: &Observation, distance: f64) -> f64 {
        let los = self.path_loss.expected_rssi(distance, LinkClass::Los);
        los - self.nlos_weight(reading) * self.path_loss.nlos_bias_db
    }

    /// Log-likelihood of one reading given receiver and AP positions.
    ///
    /// Out-of-range readings carry no information and score zero.
    pub fn log_likelihood(
        &self,
        position: &Vector3<f64>,
        ap_position: &Vector3<f64>,
        reading: &Observation,
    ) -> f64 {
        if !reading.in_range {
            return 0.0;
        }
        let distance = self.dimension.distance(position, ap_position);
        let std_dev = self.noise_for(reading.ap);

        match (self.interpretation, reading.prediction) {
            (LinkInterpretation::Soft, Some(prediction)) => {
                let p = prediction.nlos_probability.clamp(0.0, 1.0);
                let los = self.path_loss.expected_rssi(distance, LinkClass::Los);
                let nlos = self.path_loss.expected_rssi(distance, LinkClass::Nlos);
                log_add_exp(
                    (1.0 - p).ln() + gaussian_log_pdf(reading.rssi_dbm, los, std_dev),
                    p.ln() + gaussian_log_pdf(reading.rssi_dbm, nlos, std_dev),
                )
            }
            _ => gaussian_log_pdf(reading.rssi_dbm, self.expected_rssi(reading, distance), std_dev),
        }
    }

    /// Sum of per-reading log-likelihoods for one frame.
    pub fn frame_log_likelihood(
        &self,
        position: &Vector3<f64>,
        frame: &ObservationFrame,
        ap_positions: &[Vector3<f64>],
    ) -> f64 {
        frame
            .readings
            .iter()
            .filter_map(|r| ap_positions.get(r.ap.index()).map(|ap| (r, ap)))
            .map(|(r, ap)| self.log_likelihood(position, ap, r))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rilo_env::LinkPrediction;

    fn reading(rssi_dbm: f64, link: LinkClass) -> Observation {
        Observation {
            ap: ApId(0),
            distance: 0.0,
            rssi_dbm,
            link,
            prediction: None,
            in_range: true,
        }
    }

    fn model(interpretation: LinkInterpretation) -> ObservationModel {
        ObservationModel::new(PathLossModel::default(), vec![2.0], interpretation, Dimension::Two).unwrap()
    }

    #[test]
    fn test_peak_at_true_range() {
        let m = model(LinkInterpretation::Geometric);
        let ap = Vector3::new(0.0, 0.0, 0.0);
        let r = reading(PathLossModel::default().expected_rssi(5.0, LinkClass::Los), LinkClass::Los);

        let at_truth = m.log_likelihood(&Vector3::new(5.0, 0.0, 0.0), &ap, &r);
        let too_close = m.log_likelihood(&Vector3::new(3.0, 0.0, 0.0), &ap, &r);
        let too_far = m.log_likelihood(&Vector3::new(8.0, 0.0, 0.0), &ap, &r);
        assert!(at_truth > too_close);
        assert!(at_truth > too_far);
        assert_relative_eq!(at_truth, gaussian_log_pdf(0.0, 0.0, 2.0), epsilon = 1e-12);
    }

    #[test]
    fn test_nlos_flag_shifts_expectation() {
        let m = model(LinkInterpretation::Geometric);
        let ap = Vector3::zeros();
        let rssi = PathLossModel::default().expected_rssi(5.0, LinkClass::Nlos);

        let as_nlos = m.log_likelihood(&Vector3::new(5.0, 0.0, 0.0), &ap, &reading(rssi, LinkClass::Nlos));
        let as_los = m.log_likelihood(&Vector3::new(5.0, 0.0, 0.0), &ap, &reading(rssi, LinkClass::Los));
        assert!(as_nlos > as_los);
    }

    #[test]
    fn test_hard_mode_uses_prediction() {
        let m = model(LinkInterpretation::Hard);
        let mut r = reading(-60.0, LinkClass::Los);
        r.prediction = Some(LinkPrediction::from_probability(0.9));
        assert_relative_eq!(m.nlos_weight(&r), 1.0);

        // Without a prediction the geometric flag is used
        r.prediction = None;
        assert_relative_eq!(m.nlos_weight(&r), 0.0);
    }

    #[test]
    fn test_soft_mode_is_mixture() {
        let m = model(LinkInterpretation::Soft);
        let ap = Vector3::zeros();
        let pos = Vector3::new(5.0, 0.0, 0.0);
        let mut r = reading(-65.0, LinkClass::Los);

        r.prediction = Some(LinkPrediction::from_probability(0.0));
        let pure_los = m.log_likelihood(&pos, &ap, &r);
        let geometric = model(LinkInterpretation::Geometric).log_likelihood(&pos, &ap, &reading(-65.0, LinkClass::Los));
        assert_relative_eq!(pure_los, geometric, epsilon = 1e-9);

        r.prediction = Some(LinkPrediction::from_probability(0.5));
        let mixed = m.log_likelihood(&pos, &ap, &r);
        assert!(mixed.is_finite());
    }

    #[test]
    fn test_soft_mode_survives_nan_score() {
        let m = model(LinkInterpretation::Soft);
        let mut r = reading(-65.0, LinkClass::Los);
        r.prediction = Some(LinkPrediction::from_probability(f64::NAN));

        let pos = Vector3::new(5.0, 0.0, 0.0);
        let ll = m.log_likelihood(&pos, &Vector3::zeros(), &r);

        r.prediction = Some(LinkPrediction::from_probability(0.5));
        let even = m.log_likelihood(&pos, &Vector3::zeros(), &r);
        assert!(ll.is_finite());
        assert_relative_eq!(ll, even, epsilon = 1e-12);
    }

    #[test]
    fn test_out_of_range_scores_zero() {
        let m = model(LinkInterpretation::Geometric);
        let mut r = reading(-90.0, LinkClass::Los);
        r.in_range = false;
        assert_eq!(m.log_likelihood(&Vector3::zeros(), &Vector3::new(1.0, 0.0, 0.0), &r), 0.0);
    }

    #[test]
    fn test_zero_noise_rejected() {
        let result = ObservationModel::new(
            PathLossModel::default(),
            vec![0.0],
            LinkInterpretation::Geometric,
            Dimension::Two,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_frame_sum() {
        let m = model(LinkInterpretation::Geometric);
        let aps = vec![Vector3::zeros(), Vector3::new(10.0, 0.0, 0.0)];
        let mut second = reading(-50.0, LinkClass::Los);
        second.ap = ApId(1);
        let frame = ObservationFrame {
            step: 0,
            readings: vec![reading(-50.0, LinkClass::Los), second],
        };
        let pos = Vector3::new(4.0, 0.0, 0.0);

        let total = m.frame_log_likelihood(&pos, &frame, &aps);
        let parts = m.log_likelihood(&pos, &aps[0], &frame.readings[0])
            + m.log_likelihood(&pos, &aps[1], &frame.readings[1]);
        assert_relative_eq!(total, parts, epsilon = 1e-12);
    }
}
