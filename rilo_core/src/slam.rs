//! FastSLAM: joint trajectory and access-point estimation.
//!
//! Each particle carries its own pose plus one small EKF per access point.
//! The true AP positions are never read; the map only supplies the AP count
//! and the workspace bounds.
//!
//! Landmark filters are updated in RSSI space. With `d = |m - x|` and the
//! path-loss law `h(d)`:
//!
//! ```text
//! H = h'(d) · (m - x)ᵀ / d
//! S = H P Hᵀ + σ²
//! K = P Hᵀ / S
//! m ← m + K (z - h)
//! P ← (I - K H) P (I - K H)ᵀ + K σ² Kᵀ
//! ```

use crate::environment::{Bounds, EnvironmentMap};
use crate::filter::{require_predictions, spread_poses, validate_log, FilterConfig, FilterState, Localization};
use crate::geometry::{Dimension, Pose};
use crate::metrics::{ConfusionMatrix, LocalizationErrors};
use crate::motion::{Control, MotionModel};
use crate::observation::{gaussian_log_pdf, ObservationModel};
use crate::population::{best_index, normalize_log_weights, Population};
use crate::propagation::{Observation, ObservationFrame, ObservationLog};
use nalgebra::{Matrix3, RowVector3, Vector3};
use rand::Rng;
use rilo_env::{ApId, LinkClass, LocalizationError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};
use tracing::{debug, info, warn};

/// Configuration for FastSLAM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlamConfig {
    pub filter: FilterConfig,
    /// Initial landmark std as a fraction of the inverted range
    pub init_std_fraction: f64,
    /// Floor on the initial landmark std (meters)
    pub min_init_std: f64,
}

impl Default for SlamConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            init_std_fraction: 0.5,
            min_init_std: 1.0,
        }
    }
}

impl SlamConfig {
    pub fn validate(&self) -> Result<()> {
        self.filter.validate()?;
        if !(self.init_std_fraction >= 0.0 && self.min_init_std > 0.0) {
            return Err(LocalizationError::config(format!(
                "landmark init std needs a non-negative fraction and positive floor, got {} / {}",
                self.init_std_fraction, self.min_init_std
            )));
        }
        Ok(())
    }
}

/// One particle's belief about one access point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkEstimate {
    pub mean: Vector3<f64>,
    pub covariance: Matrix3<f64>,
    /// Readings fused so far, including the initializing one
    pub observations: usize,
}

impl LandmarkEstimate {
    pub fn trace(&self) -> f64 {
        self.covariance.trace()
    }

    /// Scalar position uncertainty: `sqrt(trace(P))`.
    pub fn uncertainty(&self) -> f64 {
        self.trace().max(0.0).sqrt()
    }

    /// EKF correction with one RSSI reading taken at `receiver`.
    ///
    /// Returns the log-likelihood of the innovation, which is what the
    /// owning particle's weight gains.
    #[allow(non_snake_case)]
    pub fn update(
        &mut self,
        receiver: &Vector3<f64>,
        reading: &Observation,
        model: &ObservationModel,
    ) -> f64 {
        let dimension = model.dimension();
        let offset = dimension.project(&(self.mean - receiver));
        let distance = offset.norm();
        let sigma = model.noise_for(reading.ap);

        let H: RowVector3<f64> = if distance > f64::EPSILON {
            offset.transpose() * (model.path_loss().rssi_slope(distance) / distance)
        } else {
            RowVector3::zeros()
        };
        let predicted = model.expected_rssi(reading, distance);
        let innovation = reading.rssi_dbm - predicted;

        let S = (H * self.covariance * H.transpose())[(0, 0)] + sigma * sigma;
        let K: Vector3<f64> = self.covariance * H.transpose() / S;

        self.mean = dimension.project(&(self.mean + K * innovation));
        let IKH = Matrix3::identity() - K * H;
        self.covariance = IKH * self.covariance * IKH.transpose() + K * (sigma * sigma) * K.transpose();
        self.observations += 1;

        gaussian_log_pdf(innovation, 0.0, S.sqrt())
    }
}

/// Per-particle landmark storage: one flat arena indexed
/// `particle * num_landmarks + landmark`.
#[derive(Debug, Clone, Default)]
pub struct LandmarkBank {
    num_landmarks: usize,
    slots: Vec<Option<LandmarkEstimate>>,
}

impl LandmarkBank {
    pub fn new(num_particles: usize, num_landmarks: usize) -> Self {
        Self {
            num_landmarks,
            slots: vec![None; num_particles * num_landmarks],
        }
    }

    pub fn num_landmarks(&self) -> usize {
        self.num_landmarks
    }

    fn index(&self, particle: usize, landmark: ApId) -> Option<usize> {
        let l = landmark.index();
        (l < self.num_landmarks).then(|| particle * self.num_landmarks + l)
    }

    pub fn get(&self, particle: usize, landmark: ApId) -> Option<&LandmarkEstimate> {
        self.index(particle, landmark)
            .and_then(|i| self.slots.get(i))
            .and_then(|slot| slot.as_ref())
    }

    pub fn slot_mut(&mut self, particle: usize, landmark: ApId) -> Option<&mut Option<LandmarkEstimate>> {
        let i = self.index(particle, landmark)?;
        self.slots.get_mut(i)
    }

    /// All landmark beliefs of one particle, in AP id order.
    pub fn particle(&self, particle: usize) -> &[Option<LandmarkEstimate>] {
        let start = particle * self.num_landmarks;
        &self.slots[start..start + self.num_landmarks]
    }

    /// Rebuilds the arena from ancestor indices, block by block.
    pub fn gather(&mut self, ancestors: &[usize]) {
        let mut slots = Vec::with_capacity(ancestors.len() * self.num_landmarks);
        for &a in ancestors {
            slots.extend_from_slice(self.particle(a));
        }
        self.slots = slots;
    }
}

/// An access point as estimated by the best particle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatedAccessPoint {
    pub id: ApId,
    /// `None` if the AP was never in range
    pub position: Option<Vector3<f64>>,
    pub uncertainty: Option<f64>,
    pub observations: usize,
}

/// Result of a FastSLAM run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlamLocalization {
    pub localization: Localization,
    pub landmarks: Vec<EstimatedAccessPoint>,
}

impl SlamLocalization {
    /// Distance of each estimated AP to its true position.
    pub fn landmark_errors(&self, truth: &[Vector3<f64>]) -> Vec<Option<f64>> {
        self.landmarks
            .iter()
            .map(|l| {
                let actual = truth.get(l.id.index())?;
                l.position.map(|p| (p - actual).norm())
            })
            .collect()
    }
}

/// FastSLAM 1.0 over RSSI readings.
#[derive(Debug, Clone)]
pub struct FastSlam {
    config: SlamConfig,
    dimension: Dimension,
    state: FilterState,
    population: Population,
    bank: LandmarkBank,
    motion: MotionModel,
    observation: ObservationModel,
    estimates: Vec<Pose>,
    best_landmarks: Vec<Option<LandmarkEstimate>>,
    confusion: ConfusionMatrix,
    collapses: usize,
    resample_count: usize,
}

impl FastSlam {
    pub fn new(config: SlamConfig, dimension: Dimension) -> Result<Self> {
        config.validate()?;
        let filter = &config.filter;
        let motion = MotionModel::new(dimension, filter.motion_noise)?;
        let observation = ObservationModel::new(
            filter.path_loss,
            filter.observation_noise_db.clone(),
            filter.link_interpretation,
            dimension,
        )?;

        Ok(Self {
            config,
            dimension,
            state: FilterState::Uninitialized,
            population: Population::default(),
            bank: LandmarkBank::default(),
            motion,
            observation,
            estimates: Vec::new(),
            best_landmarks: Vec::new(),
            confusion: ConfusionMatrix::default(),
            collapses: 0,
            resample_count: 0,
        })
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    pub fn bank(&self) -> &LandmarkBank {
        &self.bank
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Landmark belief at first sight: the inverted range along a random
    /// bearing, with an isotropic covariance scaled to that range.
    fn initial_landmark<R: Rng + ?Sized>(
        &self,
        receiver: &Vector3<f64>,
        reading: &Observation,
        bounds: &Bounds,
        rng: &mut R,
    ) -> LandmarkEstimate {
        let path_loss = self.observation.path_loss();
        let unbiased = reading.rssi_dbm + self.observation.nlos_weight(reading) * path_loss.nlos_bias_db;
        let range = path_loss.distance_for(unbiased, LinkClass::Los);

        let bearing = rng.gen_range(0.0..2.0 * PI);
        let mean = match self.dimension {
            Dimension::Two => Vector3::new(
                receiver.x + range * bearing.cos(),
                receiver.y + range * bearing.sin(),
                0.0,
            ),
            Dimension::Three => {
                let elevation = rng.gen_range(-FRAC_PI_2..FRAC_PI_2);
                let horizontal = range * elevation.cos();
                let (z_lo, z_hi) = (bounds.min.z.min(bounds.max.z), bounds.max.z.max(bounds.min.z));
                Vector3::new(
                    receiver.x + horizontal * bearing.cos(),
                    receiver.y + horizontal * bearing.sin(),
                    (receiver.z + range * elevation.sin()).clamp(z_lo, z_hi),
                )
            }
        };

        let std_dev = (self.config.init_std_fraction * range).max(self.config.min_init_std);
        let mut covariance = Matrix3::identity() * (std_dev * std_dev);
        if self.dimension == Dimension::Two {
            covariance[(2, 2)] = 0.0;
        }
        LandmarkEstimate {
            mean,
            covariance,
            observations: 1,
        }
    }

    fn initialize<R: Rng + ?Sized>(&mut self, start: &Pose, num_landmarks: usize, rng: &mut R) {
        let filter = &self.config.filter;
        let poses = spread_poses(start, &filter.initial_spread, filter.num_particles, self.dimension, rng);
        self.population = Population::uniform(poses);
        self.bank = LandmarkBank::new(filter.num_particles, num_landmarks);
        self.estimates.clear();
        self.best_landmarks = vec![None; num_landmarks];
        self.confusion = ConfusionMatrix::default();
        self.collapses = 0;
        self.resample_count = 0;
        self.state = FilterState::Initialized;
    }

    fn predict<R: Rng + ?Sized>(&mut self, control: &Control, rng: &mut R) {
        for particle in self.population.particles_mut() {
            particle.pose = self.motion.propagate(&particle.pose, control, rng);
        }
    }

    fn correct<R: Rng + ?Sized>(
        &mut self,
        frame: &ObservationFrame,
        bounds: &Bounds,
        rng: &mut R,
    ) -> Result<Pose> {
        require_predictions(self.config.filter.link_interpretation, frame)?;
        self.state = FilterState::Stepping;

        for reading in &frame.readings {
            if let Some(prediction) = reading.prediction {
                self.confusion.record(prediction.class, reading.link);
            }
        }

        let n = self.population.len();
        let mut weights = Vec::with_capacity(n);
        for i in 0..n {
            let particle = self.population.particles()[i];
            let mut log_weight = particle.weight.ln();
            for reading in frame.readings.iter().filter(|r| r.in_range) {
                let existing = self.bank.get(i, reading.ap).copied();
                let updated = match existing {
                    Some(mut landmark) => {
                        log_weight += landmark.update(&particle.pose.position, reading, &self.observation);
                        landmark
                    }
                    None => self.initial_landmark(&particle.pose.position, reading, bounds, rng),
                };
                if let Some(slot) = self.bank.slot_mut(i, reading.ap) {
                    *slot = Some(updated);
                }
            }
            weights.push(log_weight);
        }

        let normalization = normalize_log_weights(&mut weights);
        if normalization.collapsed {
            self.collapses += 1;
            warn!("SLAM weight collapse at frame {}, reset to uniform", frame.step);
        }
        self.population.set_weights(&weights);

        let estimate = self
            .config
            .filter
            .estimate
            .estimate(self.population.particles())
            .ok_or_else(|| LocalizationError::config("empty particle population"))?;
        self.estimates.push(estimate);
        if let Some(best) = best_index(self.population.particles()) {
            self.best_landmarks = self.bank.particle(best).to_vec();
        }

        let ess = self.population.effective_sample_size();
        let resampled = self.config.filter.resampling.should_resample(ess, n);
        if resampled {
            let ancestors = self.config.filter.scheme.resample_indices(&weights, rng);
            self.population.gather(&ancestors);
            self.bank.gather(&ancestors);
            self.resample_count += 1;
        }
        debug!("SLAM frame {}: ESS {:.1}/{} resampled={}", frame.step, ess, n, resampled);
        Ok(estimate)
    }

    /// Runs the whole observation log; mirrors `ParticleFilter::run`.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        waypoints: &[Pose],
        log: &ObservationLog,
        map: &EnvironmentMap,
        rng: &mut R,
    ) -> Result<SlamLocalization> {
        validate_log(waypoints, log, self.config.filter.link_interpretation)?;
        let bounds = *map.bounds();
        self.initialize(&waypoints[0], map.access_points().len(), rng);

        for (i, frame) in log.frames.iter().enumerate() {
            if i > 0 {
                let control = Control::between(&waypoints[i - 1], &waypoints[i]);
                self.predict(&control, rng);
            }
            self.correct(frame, &bounds, rng)?;
        }

        let errors = LocalizationErrors::between(&self.estimates, waypoints)?;
        self.state = FilterState::Converged;

        let landmarks: Vec<EstimatedAccessPoint> = self
            .best_landmarks
            .iter()
            .enumerate()
            .map(|(i, belief)| EstimatedAccessPoint {
                id: ApId(i as u32),
                position: belief.map(|b| b.mean),
                uncertainty: belief.map(|b| b.uncertainty()),
                observations: belief.map_or(0, |b| b.observations),
            })
            .collect();

        info!(
            "FastSLAM done: {} steps, MSE {:.3}, {}/{} APs mapped",
            self.estimates.len(),
            errors.mse,
            landmarks.iter().filter(|l| l.position.is_some()).count(),
            landmarks.len()
        );

        Ok(SlamLocalization {
            localization: Localization {
                path: self.estimates.clone(),
                errors,
                confusion: self.confusion,
                collapses: self.collapses,
                resample_count: self.resample_count,
            },
            landmarks,
        })
    }
}
