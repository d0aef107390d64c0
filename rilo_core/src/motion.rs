//! Motion model: odometry control plus Gaussian process noise.

use crate::geometry::{heading_between, Dimension, Pose};
use nalgebra::Vector3;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rilo_env::{LocalizationError, Result};
use serde::{Deserialize, Serialize};

/// Control input for one step: the commanded displacement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub translation: Vector3<f64>,
}

impl Control {
    pub fn new(translation: Vector3<f64>) -> Self {
        Self { translation }
    }

    /// No motion.
    pub fn zero() -> Self {
        Self::new(Vector3::zeros())
    }

    /// Odometry between two consecutive waypoints.
    pub fn between(from: &Pose, to: &Pose) -> Self {
        Self::new(to.position - from.position)
    }
}

/// Per-axis process noise standard deviations `[σx, σy, σz]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionNoise(pub [f64; 3]);

impl MotionNoise {
    pub fn zero() -> Self {
        Self([0.0; 3])
    }

    /// Random fractions of the noise scale `su`: `[U·su, U·su, U·su/2]`.
    pub fn from_scale<R: Rng + ?Sized>(su: f64, rng: &mut R) -> Self {
        Self([
            rng.gen::<f64>() * su,
            rng.gen::<f64>() * su,
            rng.gen::<f64>() * 0.5 * su,
        ])
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(LocalizationError::config(format!(
                "motion noise must be finite and non-negative, got {:?}",
                self.0
            )));
        }
        Ok(())
    }
}

/// Applies a noisy control to a pose.
#[derive(Debug, Clone)]
pub struct MotionModel {
    dimension: Dimension,
    axes: [Option<Normal<f64>>; 3],
    noise: MotionNoise,
}

impl MotionModel {
    pub fn new(dimension: Dimension, noise: MotionNoise) -> Result<Self> {
        noise.validate()?;
        let axis = |std_dev: f64| -> Result<Option<Normal<f64>>> {
            if std_dev == 0.0 {
                return Ok(None);
            }
            Normal::new(0.0, std_dev)
                .map(Some)
                .map_err(|e| LocalizationError::config(format!("motion noise: {}", e)))
        };
        Ok(Self {
            dimension,
            axes: [axis(noise.0[0])?, axis(noise.0[1])?, axis(noise.0[2])?],
            noise,
        })
    }

    pub fn noise(&self) -> MotionNoise {
        self.noise
    }

    /// Propagates one pose. Each call draws fresh, independent noise.
    pub fn propagate<R: Rng + ?Sized>(&self, pose: &Pose, control: &Control, rng: &mut R) -> Pose {
        let mut displacement = control.translation;
        for (axis, normal) in self.axes.iter().enumerate() {
            if let Some(normal) = normal {
                displacement[axis] += normal.sample(rng);
            }
        }
        let displacement = self.dimension.project(&displacement);

        let position = pose.position + displacement;
        let heading = heading_between(&pose.position, &position).unwrap_or(pose.heading);
        Pose::new(position, heading)
    }
}
