//! Poses and dimension handling shared by every stage.

use nalgebra::Vector3;
use rilo_env::{LocalizationError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Dimensionality of the localization problem.
///
/// Positions are always stored as `Vector3`; in `Two` the z component is
/// projected away before any distance or visibility computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Two,
    Three,
}

impl Dimension {
    /// Number of positional axes.
    pub fn axes(&self) -> usize {
        match self {
            Dimension::Two => 2,
            Dimension::Three => 3,
        }
    }

    /// Drops the z component in 2D.
    pub fn project(&self, v: &Vector3<f64>) -> Vector3<f64> {
        match self {
            Dimension::Two => Vector3::new(v.x, v.y, 0.0),
            Dimension::Three => *v,
        }
    }

    /// Euclidean distance in this dimension.
    pub fn distance(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
        self.project(&(a - b)).norm()
    }
}

impl TryFrom<u8> for Dimension {
    type Error = LocalizationError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(Dimension::Two),
            3 => Ok(Dimension::Three),
            other => Err(LocalizationError::config(format!(
                "dimension must be 2 or 3, got {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}D", self.axes())
    }
}

/// Position plus one orientation angle (yaw, radians).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3<f64>,
    pub heading: f64,
}

impl Pose {
    pub fn new(position: Vector3<f64>, heading: f64) -> Self {
        Self {
            position,
            heading: normalize_angle(heading),
        }
    }

    /// Pose at a position with zero heading.
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self::new(Vector3::new(x, y, z), 0.0)
    }

    /// Distance between two poses' positions.
    pub fn distance_to(&self, other: &Pose, dimension: Dimension) -> f64 {
        dimension.distance(&self.position, &other.position)
    }
}

/// Wraps an angle to [-pi, pi].
pub fn normalize_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return 0.0;
    }
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// Planar direction of travel from `from` to `to`, if they differ in x/y.
pub fn heading_between(from: &Vector3<f64>, to: &Vector3<f64>) -> Option<f64> {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    if dx.abs() < f64::EPSILON && dy.abs() < f64::EPSILON {
        None
    } else {
        Some(dy.atan2(dx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_projection_drops_z_in_2d() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(3.0, 4.0, 12.0);

        assert_relative_eq!(Dimension::Two.distance(&a, &b), 5.0, epsilon = 1e-12);
        assert_relative_eq!(Dimension::Three.distance(&a, &b), 13.0, epsilon = 1e-12);
    }

    #[test]
    fn test_dimension_from_u8() {
        assert_eq!(Dimension::try_from(2).unwrap(), Dimension::Two);
        assert_eq!(Dimension::try_from(3).unwrap(), Dimension::Three);
        assert!(Dimension::try_from(4).is_err());
    }

    #[test]
    fn test_normalize_angle() {
        assert_relative_eq!(normalize_angle(3.0 * PI), PI, epsilon = 1e-9);
        assert_relative_eq!(normalize_angle(-PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle(2.0 * PI), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_heading_between() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 2.0, 1.0);
        assert_relative_eq!(heading_between(&a, &b).unwrap(), PI / 2.0, epsilon = 1e-12);

        // Pure vertical motion has no planar heading
        let c = Vector3::new(0.0, 0.0, 1.0);
        assert!(heading_between(&a, &c).is_none());
    }
}
