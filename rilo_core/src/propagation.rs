//! Signal propagation: geometric visibility to synthetic RSSI observations.
//!
//! The same `PathLossModel` is used noise-free by the observation model,
//! so the estimator scores particles with exactly the law that generated
//! the data.

use crate::environment::EnvironmentMap;
use crate::geometry::Pose;
use nalgebra::Vector3;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rilo_env::{ApId, LinkClass, LinkClassifier, LinkFeatures, LinkPrediction, LocalizationError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_10;
use tracing::{debug, info};

/// Log-distance path loss with an additive NLOS penalty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathLossModel {
    /// RSSI at the reference distance (dBm)
    pub reference_rssi_dbm: f64,
    /// Path loss exponent
    pub exponent: f64,
    /// Excess loss applied to obstructed links (dB)
    pub nlos_bias_db: f64,
    /// Reference distance; closer ranges are clamped to it (meters)
    pub reference_distance_m: f64,
}

impl Default for PathLossModel {
    fn default() -> Self {
        Self {
            reference_rssi_dbm: -40.0,
            exponent: 2.0,
            nlos_bias_db: 10.0,
            reference_distance_m: 1.0,
        }
    }
}

impl PathLossModel {
    /// Noise-free RSSI at a range for the given link class.
    pub fn expected_rssi(&self, distance: f64, link: LinkClass) -> f64 {
        let d = distance.max(self.reference_distance_m);
        let nominal = self.reference_rssi_dbm
            - 10.0 * self.exponent * (d / self.reference_distance_m).log10();
        match link {
            LinkClass::Los => nominal,
            LinkClass::Nlos => nominal - self.nlos_bias_db,
        }
    }

    /// Inverts the law: the range that would produce `rssi` on this link.
    pub fn distance_for(&self, rssi_dbm: f64, link: LinkClass) -> f64 {
        let nominal = match link {
            LinkClass::Los => rssi_dbm,
            LinkClass::Nlos => rssi_dbm + self.nlos_bias_db,
        };
        let exponent = (self.reference_rssi_dbm - nominal) / (10.0 * self.exponent);
        (self.reference_distance_m * 10f64.powf(exponent)).max(self.reference_distance_m)
    }

    /// Derivative of `expected_rssi` with respect to range.
    ///
    /// Zero inside the reference distance, where the law is clamped.
    pub fn rssi_slope(&self, distance: f64) -> f64 {
        if distance <= self.reference_distance_m {
            0.0
        } else {
            -10.0 * self.exponent / (LN_10 * distance)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.exponent <= 0.0 || self.reference_distance_m <= 0.0 || self.nlos_bias_db < 0.0 {
            return Err(LocalizationError::config(format!(
                "path loss model needs positive exponent and reference distance, non-negative bias: {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// One (waypoint, access point) measurement. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub ap: ApId,
    /// True range to the access point (meters)
    pub distance: f64,
    /// Measured signal strength (dBm)
    pub rssi_dbm: f64,
    /// Geometric line-of-sight decision
    pub link: LinkClass,
    /// Classifier output, when a classifier is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<LinkPrediction>,
    /// Within sensing range of the receiver
    pub in_range: bool,
}

/// All readings taken at one waypoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationFrame {
    /// Index of the waypoint in the path
    pub step: usize,
    pub readings: Vec<Observation>,
}

/// Aggregate line-of-sight statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCounts {
    pub los: usize,
    pub nlos: usize,
}

impl LinkCounts {
    pub fn record(&mut self, link: LinkClass) {
        match link {
            LinkClass::Los => self.los += 1,
            LinkClass::Nlos => self.nlos += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.los + self.nlos
    }
}

/// The observation sequence, in path order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationLog {
    pub frames: Vec<ObservationFrame>,
    pub counts: LinkCounts,
}

impl ObservationLog {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// True if every reading carries a classifier prediction.
    pub fn has_predictions(&self) -> bool {
        self.frames
            .iter()
            .flat_map(|f| f.readings.iter())
            .all(|r| r.prediction.is_some())
    }
}

/// Configuration of the measurement simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationConfig {
    pub path_loss: PathLossModel,
    /// Measurement noise std per access point (dB); one entry is broadcast
    pub measurement_noise_db: Vec<f64>,
    /// Readings beyond this range are marked out of range
    pub sensing_range: Option<f64>,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            path_loss: PathLossModel::default(),
            measurement_noise_db: vec![2.0],
            sensing_range: None,
        }
    }
}

/// Turns a waypoint sequence into an observation sequence.
pub struct PropagationModel {
    config: PropagationConfig,
    /// Per-AP noise, `None` for noiseless readings
    noise: Vec<Option<Normal<f64>>>,
}

impl PropagationModel {
    pub fn new(config: PropagationConfig) -> Result<Self> {
        config.path_loss.validate()?;
        if config.measurement_noise_db.is_empty() {
            return Err(LocalizationError::config("measurement noise vector is empty"));
        }
        if config.measurement_noise_db.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(LocalizationError::config("measurement noise must be finite and non-negative"));
        }
        if matches!(config.sensing_range, Some(r) if r <= 0.0) {
            return Err(LocalizationError::config("sensing range must be positive"));
        }
        let noise = config
            .measurement_noise_db
            .iter()
            .map(|&std_dev| {
                if std_dev == 0.0 {
                    return Ok(None);
                }
                Normal::new(0.0, std_dev)
                    .map(Some)
                    .map_err(|e| LocalizationError::config(format!("measurement noise: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { config, noise })
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Index into the noise vector; a single entry covers every AP.
    fn noise_index(&self, ap: ApId) -> usize {
        if self.noise.len() == 1 || ap.index() >= self.noise.len() {
            0
        } else {
            ap.index()
        }
    }

    /// Measurement noise std for an access point.
    pub fn noise_for(&self, ap: ApId) -> f64 {
        self.config.measurement_noise_db[self.noise_index(ap)]
    }

    /// Produces one frame per waypoint and one reading per access point.
    pub fn observe<R: Rng + ?Sized>(
        &self,
        waypoints: &[Pose],
        map: &EnvironmentMap,
        classifier: Option<&dyn LinkClassifier>,
        rng: &mut R,
    ) -> Result<ObservationLog> {
        if map.access_points().is_empty() {
            return Err(LocalizationError::degenerate("map has no access points"));
        }
        let noise = &self.config.measurement_noise_db;
        if noise.len() != 1 && noise.len() != map.access_points().len() {
            return Err(LocalizationError::config(format!(
                "{} noise entries for {} access points",
                noise.len(),
                map.access_points().len()
            )));
        }

        let mut log = ObservationLog::default();
        for (step, waypoint) in waypoints.iter().enumerate() {
            let readings = map
                .access_points()
                .iter()
                .map(|ap| {
                    let reading =
                        self.measure(&waypoint.position, ap.id, &ap.position, map, classifier, rng);
                    log.counts.record(reading.link);
                    reading
                })
                .collect();
            log.frames.push(ObservationFrame { step, readings });
        }

        info!(
            "Generated {} frames: {} LOS / {} NLOS links",
            log.frames.len(),
            log.counts.los,
            log.counts.nlos
        );
        Ok(log)
    }

    fn measure<R: Rng + ?Sized>(
        &self,
        receiver: &Vector3<f64>,
        ap: ApId,
        ap_position: &Vector3<f64>,
        map: &EnvironmentMap,
        classifier: Option<&dyn LinkClassifier>,
        rng: &mut R,
    ) -> Observation {
        let distance = map.dimension().distance(receiver, ap_position);
        let link = if map.segment_is_free(receiver, ap_position) {
            LinkClass::Los
        } else {
            LinkClass::Nlos
        };

        let nominal = self.config.path_loss.expected_rssi(distance, link);
        let rssi_dbm = match &self.noise[self.noise_index(ap)] {
            Some(normal) => nominal + normal.sample(rng),
            None => nominal,
        };

        let prediction = classifier.map(|c| c.predict(&LinkFeatures { rssi_dbm, distance }));
        let in_range = self.config.sensing_range.map_or(true, |r| distance <= r);

        debug!(
            "{} d={:.2}m rssi={:.1}dBm {:?} in_range={}",
            ap, distance, rssi_dbm, link, in_range
        );

        Observation {
            ap,
            distance,
            rssi_dbm,
            link,
            prediction,
            in_range,
        }
    }
}
