//! RILO Core - Radio-Inertial Localization
//!
//! The localization pipeline has three coupled stages:
//! 1. **Planning**: an RRT grows a feasible ground-truth path through the obstacle map
//! 2. **Propagation**: geometric visibility becomes noisy RSSI and LOS/NLOS readings
//! 3. **Estimation**: a particle filter (or FastSLAM) fuses readings with odometry

pub mod classifier;
pub mod environment;
pub mod filter;
pub mod geometry;
pub mod metrics;
pub mod motion;
pub mod observation;
pub mod planner;
pub mod population;
pub mod propagation;
pub mod slam;

// Re-export key types for convenience
pub use classifier::ResidualClassifier;
pub use environment::{AccessPoint, BlueprintFile, Bounds, EnvironmentMap, MapProvider, Obstacle};
pub use filter::{FilterConfig, FilterState, Localization, ParticleFilter, ResamplingPolicy};
pub use geometry::{Dimension, Pose};
pub use metrics::{ConfusionMatrix, ErrorCdf, LocalizationErrors};
pub use motion::{Control, MotionModel, MotionNoise};
pub use observation::{LinkInterpretation, ObservationModel};
pub use planner::{PlanStats, RrtConfig, RrtPlanner};
pub use population::{PointEstimate, ResamplingScheme};
pub use propagation::{LinkCounts, Observation, ObservationFrame, ObservationLog, PathLossModel, PropagationConfig, PropagationModel};
pub use slam::{EstimatedAccessPoint, FastSlam, SlamConfig, SlamLocalization};
