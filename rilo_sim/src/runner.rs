//! Pipeline runner - map → plan → propagate → estimate → report.

use crate::maps::MapId;
use crate::world::ProceduralMapProvider;

use nalgebra::Vector3;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use rilo_core::environment::{AccessPoint, EnvironmentMap, MapProvider};
use rilo_core::filter::{FilterConfig, Localization, ParticleFilter};
use rilo_core::geometry::{Dimension, Pose};
use rilo_core::motion::MotionNoise;
use rilo_core::observation::LinkInterpretation;
use rilo_core::planner::{PlanStats, RrtConfig, RrtPlanner};
use rilo_core::propagation::{ObservationLog, PathLossModel, PropagationConfig, PropagationModel};
use rilo_core::slam::{EstimatedAccessPoint, FastSlam, SlamConfig};
use rilo_env::{
    ClassifierMode, LinkClassifier, LocalizationError, Result, RngStream, RunContext, RunId, SeededContext,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Observation noise is floored here so a noiseless run still scores.
const MIN_SCORING_NOISE_DB: f64 = 0.5;

/// How the run's noise parameters are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseSpec {
    /// Motion noise scale `su`; per-axis std is `[U·su, U·su, U·su/2]`
    pub motion_scale: f64,
    /// Per-AP measurement std is uniform in `[low, high)` (dB)
    pub measurement_db: (f64, f64),
}

impl Default for NoiseSpec {
    fn default() -> Self {
        Self {
            motion_scale: 0.8,
            measurement_db: (1.0, 4.0),
        }
    }
}

/// The noise parameters a run actually used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseParameters {
    pub motion: MotionNoise,
    /// Measurement std per access point (dB)
    pub measurement_db: Vec<f64>,
}

impl NoiseSpec {
    pub fn validate(&self) -> Result<()> {
        let (low, high) = self.measurement_db;
        if !(self.motion_scale >= 0.0 && low >= 0.0 && high >= low) {
            return Err(LocalizationError::config(format!("invalid noise spec {:?}", self)));
        }
        Ok(())
    }

    pub fn draw<R: Rng + ?Sized>(&self, num_access_points: usize, rng: &mut R) -> NoiseParameters {
        let motion = MotionNoise::from_scale(self.motion_scale, rng);
        let (low, high) = self.measurement_db;
        let measurement_db = if high > low {
            let uniform = Uniform::new(low, high);
            (0..num_access_points).map(|_| uniform.sample(rng)).collect()
        } else {
            vec![low; num_access_points]
        };
        NoiseParameters { motion, measurement_db }
    }
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub map: u8,
    pub dimension: Dimension,
    /// Height of generated maps (meters)
    pub max_height: f64,
    pub planner: RrtConfig,
    pub path_loss: PathLossModel,
    pub noise: NoiseSpec,
    pub sensing_range: Option<f64>,
    pub filter: FilterConfig,
    pub slam: bool,
    pub use_classifier: bool,
    pub classifier_mode: ClassifierMode,
    /// Overrides the table's blueprint descriptor
    pub blueprint: Option<String>,
    /// Master seed (0 = derive from the clock)
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            map: 1,
            dimension: Dimension::Two,
            max_height: 2.0,
            planner: RrtConfig::default(),
            path_loss: PathLossModel::default(),
            noise: NoiseSpec::default(),
            sensing_range: Some(10.0),
            filter: FilterConfig::default(),
            slam: false,
            use_classifier: false,
            classifier_mode: ClassifierMode::Soft,
            blueprint: None,
            seed: 42,
        }
    }
}

impl PipelineConfig {
    pub fn with_map(mut self, map: u8) -> Self {
        self.map = map;
        self
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_slam(mut self, slam: bool) -> Self {
        self.slam = slam;
        self
    }

    pub fn with_classifier(mut self, mode: ClassifierMode) -> Self {
        self.use_classifier = true;
        self.classifier_mode = mode;
        self
    }

    pub fn with_num_particles(mut self, num_particles: usize) -> Self {
        self.filter.num_particles = num_particles;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Link interpretation implied by the classifier flags.
    pub fn link_interpretation(&self) -> LinkInterpretation {
        if self.use_classifier {
            LinkInterpretation::from(self.classifier_mode)
        } else {
            LinkInterpretation::Geometric
        }
    }

    pub fn validate(&self) -> Result<()> {
        MapId::new(self.map)?;
        self.noise.validate()?;
        self.filter.validate()?;
        self.path_loss.validate()?;
        if !(self.max_height.is_finite() && self.max_height > 0.0) {
            return Err(LocalizationError::config(format!(
                "max height must be positive, got {}",
                self.max_height
            )));
        }
        Ok(())
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub seed: u64,
    pub map: u8,
    pub blueprint: String,
    pub dimension: Dimension,
    pub start: Vector3<f64>,
    pub goal: Vector3<f64>,
    pub waypoints: Vec<Pose>,
    pub plan_stats: PlanStats,
    pub observations: ObservationLog,
    pub noise: NoiseParameters,
    pub sensing_range: Option<f64>,
    pub access_points: Vec<AccessPoint>,
    pub localization: Localization,
    /// Present in SLAM mode
    pub landmarks: Option<Vec<EstimatedAccessPoint>>,
}

impl RunReport {
    pub fn mse(&self) -> f64 {
        self.localization.errors.mse
    }

    /// Distance of each estimated AP to the true one (SLAM mode only).
    pub fn landmark_errors(&self) -> Option<Vec<Option<f64>>> {
        let landmarks = self.landmarks.as_ref()?;
        Some(
            landmarks
                .iter()
                .map(|l| {
                    let truth = self.access_points.get(l.id.index())?;
                    l.position.map(|p| (p - truth.position).norm())
                })
                .collect(),
        )
    }
}

/// Runs the localization pipeline.
pub struct PipelineRunner {
    map_provider: Option<Box<dyn MapProvider>>,
    classifier: Option<Box<dyn LinkClassifier>>,
}

impl Default for PipelineRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRunner {
    /// Procedural maps, no classifier.
    pub fn new() -> Self {
        Self {
            map_provider: None,
            classifier: None,
        }
    }

    /// Replaces the procedural provider.
    pub fn with_map_provider(mut self, provider: Box<dyn MapProvider>) -> Self {
        self.map_provider = Some(provider);
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn LinkClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    fn build_map(
        &self,
        config: &PipelineConfig,
        anchors: &[Vector3<f64>],
        descriptor: &str,
        ctx: &SeededContext,
    ) -> Result<EnvironmentMap> {
        match &self.map_provider {
            Some(provider) => provider.build(descriptor, config.dimension, config.max_height),
            None => {
                let map_seed: u64 = ctx.stream(RngStream::Map).gen();
                ProceduralMapProvider::new(map_seed)
                    .with_anchors(anchors)
                    .build(descriptor, config.dimension, config.max_height)
            }
        }
    }

    /// Runs one pipeline. A planning failure aborts the run.
    pub fn run(&self, config: &PipelineConfig) -> Result<RunReport> {
        config.validate()?;
        let map_id = MapId::new(config.map)?;
        let entry = map_id.entry();
        let ctx = SeededContext::from_flag(config.seed);
        let dimension = config.dimension;
        let interpretation = config.link_interpretation();

        let classifier = match (config.use_classifier, &self.classifier) {
            (false, _) => None,
            (true, Some(c)) => Some(c.as_ref()),
            (true, None) => {
                return Err(LocalizationError::missing(
                    "classifier requested but none is installed",
                ))
            }
        };

        let descriptor = config.blueprint.clone().unwrap_or_else(|| entry.blueprint.to_string());
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!(
            "Map {} in {}, seed {}, {} particles{}",
            map_id,
            dimension,
            ctx.seed(),
            config.filter.num_particles,
            if config.slam { ", SLAM" } else { "" }
        );

        // Stage 1: map
        let map = self.build_map(config, &[entry.start(), entry.goal()], &descriptor, &ctx)?;
        let start = Pose::new(dimension.project(&entry.start()), 0.0);
        let goal = Pose::new(dimension.project(&entry.goal()), 0.0);

        // Stage 2: plan
        let mut planner = RrtPlanner::new(config.planner)?;
        let mut planner_rng = ctx.stream(RngStream::Planner);
        let waypoints = planner.plan(start, goal, &map, &mut planner_rng)?;
        let plan_stats = planner.stats();

        // Stage 3: noise parameters and observations
        let mut noise_rng = ctx.stream(RngStream::NoiseParameters);
        let noise = config.noise.draw(map.access_points().len(), &mut noise_rng);
        let propagation = PropagationModel::new(PropagationConfig {
            path_loss: config.path_loss,
            measurement_noise_db: noise.measurement_db.clone(),
            sensing_range: config.sensing_range,
        })?;
        let mut measurement_rng = ctx.stream(RngStream::Measurement);
        let observations = propagation.observe(&waypoints, &map, classifier, &mut measurement_rng)?;

        // Stage 4: estimation
        let filter_config = FilterConfig {
            motion_noise: noise.motion,
            observation_noise_db: noise
                .measurement_db
                .iter()
                .map(|s| s.max(MIN_SCORING_NOISE_DB))
                .collect(),
            path_loss: config.path_loss,
            link_interpretation: interpretation,
            ..config.filter.clone()
        };
        let mut filter_rng = ctx.stream(RngStream::Filter);
        let (localization, landmarks) = if config.slam {
            let slam_config = SlamConfig {
                filter: filter_config,
                ..Default::default()
            };
            let result = FastSlam::new(slam_config, dimension)?
                .run(&waypoints, &observations, &map, &mut filter_rng)?;
            (result.localization, Some(result.landmarks))
        } else {
            let localization = ParticleFilter::new(filter_config, dimension)?
                .run(&waypoints, &observations, &map, &mut filter_rng)?;
            (localization, None)
        };

        if localization.collapses > 0 {
            warn!("{} weight collapses during the run", localization.collapses);
        }
        info!(
            "✓ {} waypoints, {} LOS / {} NLOS, MSE {:.3} m²",
            waypoints.len(),
            observations.counts.los,
            observations.counts.nlos,
            localization.errors.mse
        );

        Ok(RunReport {
            run_id: RunId::from_seed(ctx.seed()),
            seed: ctx.seed(),
            map: map_id.get(),
            blueprint: descriptor,
            dimension,
            start: start.position,
            goal: goal.position,
            waypoints,
            plan_stats,
            observations,
            noise,
            sensing_range: config.sensing_range,
            access_points: map.access_points().to_vec(),
            localization,
            landmarks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_noise_draw_within_ranges() {
        let noise_spec = NoiseSpec::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let noise = noise_spec.draw(5, &mut rng);

        assert_eq!(noise.measurement_db.len(), 5);
        assert!(noise.measurement_db.iter().all(|s| (1.0..4.0).contains(s)));
        assert!(noise.motion.0[2] < 0.4);
    }

    #[test]
    fn test_degenerate_noise_range() {
        let spec = NoiseSpec {
            motion_scale: 0.0,
            measurement_db: (0.0, 0.0),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let noise = spec.draw(2, &mut rng);
        assert_eq!(noise.measurement_db, vec![0.0, 0.0]);
        assert_eq!(noise.motion, MotionNoise::zero());
    }

    #[test]
    fn test_interpretation_from_flags() {
        let config = PipelineConfig::default();
        assert_eq!(config.link_interpretation(), LinkInterpretation::Geometric);
        let hard = config.clone().with_classifier(ClassifierMode::Hard);
        assert_eq!(hard.link_interpretation(), LinkInterpretation::Hard);
    }

    #[test]
    fn test_invalid_map_rejected_before_planning() {
        let config = PipelineConfig::default().with_map(42);
        let result = PipelineRunner::new().run(&config);
        assert!(matches!(result, Err(LocalizationError::InvalidMapId(_))));
    }

    #[test]
    fn test_classifier_flag_without_classifier() {
        let config = PipelineConfig::default().with_classifier(ClassifierMode::Soft);
        let result = PipelineRunner::new().run(&config);
        assert!(matches!(result, Err(LocalizationError::MissingCollaborator(_))));
    }
}
