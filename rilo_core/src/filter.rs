//! Particle filter localization over RSSI observations.
//!
//! The filter is a bootstrap SIR filter: particles are moved with the noisy
//! odometry, scored with the observation model in log space, normalized,
//! and resampled when the effective sample size drops.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --initialize--> Initialized --step--> Stepping --finish--> Converged
//! ```
//!
//! Calls outside that order are configuration errors.

use crate::environment::EnvironmentMap;
use crate::geometry::{Dimension, Pose};
use crate::metrics::{ConfusionMatrix, LocalizationErrors};
use crate::motion::{Control, MotionModel, MotionNoise};
use crate::observation::{LinkInterpretation, ObservationModel};
use crate::population::{normalize_log_weights, PointEstimate, Population, ResamplingScheme};
use crate::propagation::{ObservationFrame, ObservationLog, PathLossModel};
use nalgebra::Vector3;
use rand::Rng;
use rilo_env::{LocalizationError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Lifecycle of a filter run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterState {
    Uninitialized,
    Initialized,
    Stepping,
    Converged,
}

/// When the population is resampled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ResamplingPolicy {
    /// After every update
    EveryStep,
    /// When ESS / N falls below `ratio`
    EffectiveSampleSize { ratio: f64 },
}

impl Default for ResamplingPolicy {
    fn default() -> Self {
        ResamplingPolicy::EffectiveSampleSize { ratio: 0.5 }
    }
}

impl ResamplingPolicy {
    pub fn should_resample(&self, ess: f64, num_particles: usize) -> bool {
        match self {
            ResamplingPolicy::EveryStep => true,
            ResamplingPolicy::EffectiveSampleSize { ratio } => ess < ratio * num_particles as f64,
        }
    }
}

/// Configuration for the particle filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Population size
    pub num_particles: usize,
    /// Half-widths of the uniform box particles are spread in around the start
    pub initial_spread: [f64; 3],
    pub resampling: ResamplingPolicy,
    pub scheme: ResamplingScheme,
    pub estimate: PointEstimate,
    pub link_interpretation: LinkInterpretation,
    /// Process noise applied to every particle
    pub motion_noise: MotionNoise,
    /// Observation noise std per access point (dB); one entry is broadcast
    pub observation_noise_db: Vec<f64>,
    pub path_loss: PathLossModel,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            num_particles: 3000,
            initial_spread: [1.0, 1.0, 0.1],
            resampling: ResamplingPolicy::default(),
            scheme: ResamplingScheme::default(),
            estimate: PointEstimate::default(),
            link_interpretation: LinkInterpretation::Geometric,
            motion_noise: MotionNoise([0.4, 0.4, 0.2]),
            observation_noise_db: vec![2.0],
            path_loss: PathLossModel::default(),
        }
    }
}

impl FilterConfig {
    pub fn with_num_particles(mut self, num_particles: usize) -> Self {
        self.num_particles = num_particles;
        self
    }

    pub fn with_motion_noise(mut self, noise: MotionNoise) -> Self {
        self.motion_noise = noise;
        self
    }

    pub fn with_observation_noise(mut self, noise_db: Vec<f64>) -> Self {
        self.observation_noise_db = noise_db;
        self
    }

    pub fn with_link_interpretation(mut self, interpretation: LinkInterpretation) -> Self {
        self.link_interpretation = interpretation;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_particles == 0 {
            return Err(LocalizationError::config("particle count must be positive"));
        }
        if self.initial_spread.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(LocalizationError::config(format!(
                "initial spread must be finite and non-negative, got {:?}",
                self.initial_spread
            )));
        }
        if let ResamplingPolicy::EffectiveSampleSize { ratio } = self.resampling {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(LocalizationError::config(format!(
                    "ESS ratio must lie in [0, 1], got {}",
                    ratio
                )));
            }
        }
        self.motion_noise.validate()
    }
}

/// Per-step diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDiagnostics {
    pub ess: f64,
    pub resampled: bool,
    pub collapsed: bool,
    pub max_weight: f64,
}

/// Result of a completed filter run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Localization {
    /// One estimate per waypoint
    pub path: Vec<Pose>,
    pub errors: LocalizationErrors,
    pub confusion: ConfusionMatrix,
    /// Updates in which every weight underflowed
    pub collapses: usize,
    pub resample_count: usize,
}

/// Fails with `MissingCollaborator` when the interpretation needs
/// classifier output the readings do not carry.
pub(crate) fn require_predictions(
    interpretation: LinkInterpretation,
    frame: &ObservationFrame,
) -> Result<()> {
    if interpretation.needs_classifier() && frame.readings.iter().any(|r| r.prediction.is_none()) {
        return Err(LocalizationError::missing(format!(
            "{:?} link interpretation needs classifier predictions (frame {})",
            interpretation, frame.step
        )));
    }
    Ok(())
}

/// Uniform box around `center`, projected to the map dimension.
pub(crate) fn spread_poses<R: Rng + ?Sized>(
    center: &Pose,
    spread: &[f64; 3],
    count: usize,
    dimension: Dimension,
    rng: &mut R,
) -> Vec<Pose> {
    let mut offset = |half_width: f64| {
        if half_width > 0.0 {
            rng.gen_range(-half_width..=half_width)
        } else {
            0.0
        }
    };
    (0..count)
        .map(|_| {
            let delta = Vector3::new(offset(spread[0]), offset(spread[1]), offset(spread[2]));
            let position = dimension.project(&(center.position + delta));
            Pose::new(position, center.heading)
        })
        .collect()
}

/// Bootstrap particle filter.
#[derive(Debug, Clone)]
pub struct ParticleFilter {
    config: FilterConfig,
    state: FilterState,
    dimension: Dimension,
    population: Population,
    motion: MotionModel,
    observation: ObservationModel,
    estimates: Vec<Pose>,
    confusion: ConfusionMatrix,
    collapses: usize,
    resample_count: usize,
    last_step: StepDiagnostics,
}

impl ParticleFilter {
    pub fn new(config: FilterConfig, dimension: Dimension) -> Result<Self> {
        config.validate()?;
        let motion = MotionModel::new(dimension, config.motion_noise)?;
        let observation = ObservationModel::new(
            config.path_loss,
            config.observation_noise_db.clone(),
            config.link_interpretation,
            dimension,
        )?;

        Ok(Self {
            config,
            state: FilterState::Uninitialized,
            dimension,
            population: Population::default(),
            motion,
            observation,
            estimates: Vec::new(),
            confusion: ConfusionMatrix::default(),
            collapses: 0,
            resample_count: 0,
            last_step: StepDiagnostics::default(),
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Diagnostics of the most recent update.
    pub fn last_step(&self) -> StepDiagnostics {
        self.last_step
    }

    /// Estimates recorded so far, one per update.
    pub fn estimates(&self) -> &[Pose] {
        &self.estimates
    }

    /// Spreads `num_particles` poses uniformly around `start`.
    ///
    /// Allowed on a fresh filter or after a finished run, which it resets.
    pub fn initialize<R: Rng + ?Sized>(&mut self, start: &Pose, rng: &mut R) -> Result<()> {
        if !matches!(self.state, FilterState::Uninitialized | FilterState::Converged) {
            return Err(LocalizationError::config(format!(
                "initialize called in state {:?}",
                self.state
            )));
        }
        let poses = spread_poses(
            start,
            &self.config.initial_spread,
            self.config.num_particles,
            self.dimension,
            rng,
        );
        self.population = Population::uniform(poses);
        self.estimates.clear();
        self.confusion = ConfusionMatrix::default();
        self.collapses = 0;
        self.resample_count = 0;
        self.state = FilterState::Initialized;
        debug!("Initialized {} particles around {:?}", self.population.len(), start.position);
        Ok(())
    }

    fn require_running(&self, operation: &str) -> Result<()> {
        match self.state {
            FilterState::Initialized | FilterState::Stepping => Ok(()),
            state => Err(LocalizationError::config(format!(
                "{} called in state {:?}",
                operation, state
            ))),
        }
    }

    /// Moves every particle by the control with independent noise.
    pub fn predict<R: Rng + ?Sized>(&mut self, control: &Control, rng: &mut R) -> Result<()> {
        self.require_running("predict")?;
        for particle in self.population.particles_mut() {
            particle.pose = self.motion.propagate(&particle.pose, control, rng);
        }
        Ok(())
    }

    /// Weights the population against one frame, records the estimate and
    /// resamples per policy.
    pub fn correct<R: Rng + ?Sized>(
        &mut self,
        frame: &ObservationFrame,
        map: &EnvironmentMap,
        rng: &mut R,
    ) -> Result<Pose> {
        self.require_running("correct")?;
        require_predictions(self.config.link_interpretation, frame)?;
        self.state = FilterState::Stepping;

        for reading in &frame.readings {
            if let Some(prediction) = reading.prediction {
                self.confusion.record(prediction.class, reading.link);
            }
        }

        let ap_positions = map.access_point_positions();
        let likelihoods = self.log_likelihoods(frame, &ap_positions);
        let mut weights: Vec<f64> = self
            .population
            .particles()
            .iter()
            .zip(&likelihoods)
            .map(|(p, l)| p.weight.ln() + l)
            .collect();

        let normalization = normalize_log_weights(&mut weights);
        if normalization.collapsed {
            self.collapses += 1;
            warn!(
                "Weight collapse at frame {}: every particle underflowed, reset to uniform",
                frame.step
            );
        }
        self.population.set_weights(&weights);

        let estimate = self
            .config
            .estimate
            .estimate(self.population.particles())
            .ok_or_else(|| LocalizationError::config("empty particle population"))?;
        self.estimates.push(estimate);

        let n = self.population.len();
        let ess = self.population.effective_sample_size();
        let resampled = self.config.resampling.should_resample(ess, n);
        if resampled {
            let ancestors = self.config.scheme.resample_indices(&weights, rng);
            self.population.gather(&ancestors);
            self.resample_count += 1;
        }

        self.last_step = StepDiagnostics {
            ess,
            resampled,
            collapsed: normalization.collapsed,
            max_weight: weights.iter().copied().fold(0.0, f64::max),
        };
        debug!(
            "Frame {}: ESS {:.1}/{} resampled={} estimate=({:.2}, {:.2}, {:.2})",
            frame.step, ess, n, resampled, estimate.position.x, estimate.position.y, estimate.position.z
        );
        Ok(estimate)
    }

    /// One full update: predict with the control, then correct.
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        control: &Control,
        frame: &ObservationFrame,
        map: &EnvironmentMap,
        rng: &mut R,
    ) -> Result<Pose> {
        self.predict(control, rng)?;
        self.correct(frame, map, rng)
    }

    /// Closes the run and scores the estimates against the true path.
    pub fn finish(&mut self, waypoints: &[Pose]) -> Result<Localization> {
        self.require_running("finish")?;
        let errors = LocalizationErrors::between(&self.estimates, waypoints)?;
        self.state = FilterState::Converged;

        Ok(Localization {
            path: self.estimates.clone(),
            errors,
            confusion: self.confusion,
            collapses: self.collapses,
            resample_count: self.resample_count,
        })
    }

    /// Runs the whole observation log along the true waypoints.
    ///
    /// The first frame is scored at the initial population; each later
    /// frame follows the odometry from the previous waypoint.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        waypoints: &[Pose],
        log: &ObservationLog,
        map: &EnvironmentMap,
        rng: &mut R,
    ) -> Result<Localization> {
        validate_log(waypoints, log, self.config.link_interpretation)?;
        self.initialize(&waypoints[0], rng)?;

        for (i, frame) in log.frames.iter().enumerate() {
            if i == 0 {
                self.correct(frame, map, rng)?;
            } else {
                let control = Control::between(&waypoints[i - 1], &waypoints[i]);
                self.step(&control, frame, map, rng)?;
            }
        }

        let localization = self.finish(waypoints)?;
        info!(
            "Particle filter done: {} steps, MSE {:.3}, {} resamples, {} collapses",
            localization.path.len(),
            localization.errors.mse,
            localization.resample_count,
            localization.collapses
        );
        Ok(localization)
    }

    #[cfg(not(feature = "parallel"))]
    fn log_likelihoods(&self, frame: &ObservationFrame, ap_positions: &[Vector3<f64>]) -> Vec<f64> {
        self.population
            .particles()
            .iter()
            .map(|p| {
                self.observation
                    .frame_log_likelihood(&p.pose.position, frame, ap_positions)
            })
            .collect()
    }

    #[cfg(feature = "parallel")]
    fn log_likelihoods(&self, frame: &ObservationFrame, ap_positions: &[Vector3<f64>]) -> Vec<f64> {
        let particles = self.population.particles();
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let chunk = particles.len().div_ceil(workers).max(1);
        let observation = &self.observation;
        let mut out = vec![0.0; particles.len()];

        let result = crossbeam::thread::scope(|s| {
            for (src, dst) in particles.chunks(chunk).zip(out.chunks_mut(chunk)) {
                s.spawn(move |_| {
                    for (p, o) in src.iter().zip(dst.iter_mut()) {
                        *o = observation.frame_log_likelihood(&p.pose.position, frame, ap_positions);
                    }
                });
            }
        });
        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
        out
    }
}

/// Shared precondition of the filter and SLAM loops.
pub(crate) fn validate_log(
    waypoints: &[Pose],
    log: &ObservationLog,
    interpretation: LinkInterpretation,
) -> Result<()> {
    if waypoints.is_empty() {
        return Err(LocalizationError::config("cannot localize along an empty path"));
    }
    if waypoints.len() != log.len() {
        return Err(LocalizationError::config(format!(
            "{} waypoints but {} observation frames",
            waypoints.len(),
            log.len()
        )));
    }
    if interpretation.needs_classifier() && !log.has_predictions() {
        return Err(LocalizationError::missing(format!(
            "{:?} link interpretation needs a classifier",
            interpretation
        )));
    }
    Ok(())
}
