//! The environment map: obstacle geometry, access points, free-space tests.
//!
//! Obstacles are extruded polygons: a 2D footprint (via `geo`) plus a
//! vertical extent. In 2D maps the extent is ignored and every obstacle
//! behaves as an infinitely tall wall.

use crate::geometry::Dimension;
use geo::{Intersects, Line, LineString, Point, Polygon, Rect};
use nalgebra::Vector3;
use rand::Rng;
use rilo_env::{ApId, LocalizationError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Axis-aligned workspace bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl Bounds {
    pub fn new(min: Vector3<f64>, max: Vector3<f64>) -> Self {
        Self { min, max }
    }

    /// Extent along each axis.
    pub fn size(&self) -> Vector3<f64> {
        self.max - self.min
    }
}

/// An extruded polygonal obstacle.
#[derive(Debug, Clone, PartialEq)]
pub struct Obstacle {
    /// Footprint in the x/y plane
    pub footprint: Polygon<f64>,
    /// Lower edge of the obstacle (ignored in 2D)
    pub z_min: f64,
    /// Upper edge of the obstacle (ignored in 2D)
    pub z_max: f64,
}

impl Obstacle {
    pub fn new(footprint: Polygon<f64>, z_min: f64, z_max: f64) -> Self {
        Self {
            footprint,
            z_min: z_min.min(z_max),
            z_max: z_max.max(z_min),
        }
    }

    /// Axis-aligned box obstacle.
    pub fn rect(x0: f64, y0: f64, x1: f64, y1: f64, z_min: f64, z_max: f64) -> Self {
        let footprint = Rect::new((x0, y0), (x1, y1)).to_polygon();
        Self::new(footprint, z_min, z_max)
    }

    /// True if the point lies inside (or on the boundary of) the obstacle.
    pub fn occupies(&self, p: &Vector3<f64>, dimension: Dimension) -> bool {
        if dimension == Dimension::Three && (p.z < self.z_min || p.z > self.z_max) {
            return false;
        }
        Point::new(p.x, p.y).intersects(&self.footprint)
    }

    /// True if the straight segment `a -> b` passes through the obstacle.
    pub fn blocks(&self, a: &Vector3<f64>, b: &Vector3<f64>, dimension: Dimension) -> bool {
        let (t0, t1) = match dimension {
            Dimension::Two => (0.0, 1.0),
            Dimension::Three => match self.slab_interval(a, b) {
                Some(interval) => interval,
                None => return false,
            },
        };

        let p0 = a + (b - a) * t0;
        let p1 = a + (b - a) * t1;
        if (p1.x - p0.x).abs() < f64::EPSILON && (p1.y - p0.y).abs() < f64::EPSILON {
            return Point::new(p0.x, p0.y).intersects(&self.footprint);
        }
        self.footprint
            .intersects(&Line::new((p0.x, p0.y), (p1.x, p1.y)))
    }

    /// Parameter interval of the segment that lies within `[z_min, z_max]`.
    fn slab_interval(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> Option<(f64, f64)> {
        let dz = b.z - a.z;
        if dz.abs() < f64::EPSILON {
            return if a.z >= self.z_min && a.z <= self.z_max {
                Some((0.0, 1.0))
            } else {
                None
            };
        }

        let ta = (self.z_min - a.z) / dz;
        let tb = (self.z_max - a.z) / dz;
        let lo = ta.min(tb).max(0.0);
        let hi = ta.max(tb).min(1.0);
        if lo > hi {
            None
        } else {
            Some((lo, hi))
        }
    }
}

/// A fixed radio access point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub id: ApId,
    pub position: Vector3<f64>,
    /// Optional class label (e.g. a known NLOS-bias signature)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// The environment map.
///
/// Constructed once, read-only afterwards.
#[derive(Debug, Clone)]
pub struct EnvironmentMap {
    dimension: Dimension,
    bounds: Bounds,
    obstacles: Vec<Obstacle>,
    access_points: Vec<AccessPoint>,
}

impl EnvironmentMap {
    /// Creates an empty map with the given bounds.
    pub fn new(dimension: Dimension, bounds: Bounds) -> Result<Self> {
        let size = dimension.project(&bounds.size());
        let degenerate_z = dimension == Dimension::Three && size.z <= 0.0;
        if size.x <= 0.0 || size.y <= 0.0 || degenerate_z {
            return Err(LocalizationError::degenerate(format!(
                "bounds {:?} -> {:?} enclose no volume",
                bounds.min, bounds.max
            )));
        }

        Ok(Self {
            dimension,
            bounds,
            obstacles: Vec::new(),
            access_points: Vec::new(),
        })
    }

    /// Adds an obstacle.
    pub fn with_obstacle(mut self, obstacle: Obstacle) -> Self {
        self.obstacles.push(obstacle);
        self
    }

    /// Adds an access point; ids are assigned densely in insertion order.
    pub fn with_access_point(mut self, position: Vector3<f64>, label: Option<String>) -> Self {
        let id = ApId(self.access_points.len() as u32);
        self.access_points.push(AccessPoint {
            id,
            position: self.dimension.project(&position),
            label,
        });
        self
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn access_points(&self) -> &[AccessPoint] {
        &self.access_points
    }

    /// True positions of all access points, in id order.
    pub fn access_point_positions(&self) -> Vec<Vector3<f64>> {
        self.access_points.iter().map(|ap| ap.position).collect()
    }

    /// True if the point is inside the workspace bounds.
    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        let in_plane = p.x >= self.bounds.min.x
            && p.x <= self.bounds.max.x
            && p.y >= self.bounds.min.y
            && p.y <= self.bounds.max.y;
        match self.dimension {
            Dimension::Two => in_plane,
            Dimension::Three => in_plane && p.z >= self.bounds.min.z && p.z <= self.bounds.max.z,
        }
    }

    /// True if the point is inside the bounds and inside no obstacle.
    pub fn is_free(&self, p: &Vector3<f64>) -> bool {
        self.contains(p) && !self.obstacles.iter().any(|o| o.occupies(p, self.dimension))
    }

    /// True if the straight segment between two points crosses no obstacle.
    pub fn segment_is_free(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
        !self.obstacles.iter().any(|o| o.blocks(a, b, self.dimension))
    }

    /// Number of obstacles the straight segment crosses.
    pub fn obstructions(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> usize {
        self.obstacles
            .iter()
            .filter(|o| o.blocks(a, b, self.dimension))
            .count()
    }

    /// Rejects start/goal configurations outside free space.
    pub fn validate_endpoints(&self, start: &Vector3<f64>, goal: &Vector3<f64>) -> Result<()> {
        for (name, p) in [("start", start), ("goal", goal)] {
            if !self.is_free(p) {
                return Err(LocalizationError::degenerate(format!(
                    "{} ({:.2}, {:.2}, {:.2}) is not in free space",
                    name, p.x, p.y, p.z
                )));
            }
        }
        Ok(())
    }

    /// Samples a uniformly random point inside the bounds.
    pub fn sample_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Vector3<f64> {
        let b = &self.bounds;
        let p = Vector3::new(
            rng.gen_range(b.min.x..=b.max.x),
            rng.gen_range(b.min.y..=b.max.y),
            rng.gen_range(b.min.z.min(b.max.z)..=b.max.z.max(b.min.z)),
        );
        self.dimension.project(&p)
    }

    /// Samples a random free point, giving up after `attempts` draws.
    pub fn sample_free_point<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        attempts: usize,
    ) -> Option<Vector3<f64>> {
        (0..attempts)
            .map(|_| self.sample_point(rng))
            .find(|p| self.is_free(p))
    }

    /// Generates a random map: random bounds, box obstacles and APs.
    pub fn random<R: Rng + ?Sized>(dimension: Dimension, max_height: f64, rng: &mut R) -> Result<Self> {
        let size = Vector3::new(rng.gen_range(30.0..80.0), rng.gen_range(30.0..80.0), max_height.max(1.0));
        Self::random_within(dimension, size, rng, |_| true)
    }

    /// Random map spanning `[0, size]`. Obstacles rejected by `keep` are
    /// not placed; APs land in free space.
    pub fn random_within<R, F>(dimension: Dimension, size: Vector3<f64>, rng: &mut R, keep: F) -> Result<Self>
    where
        R: Rng + ?Sized,
        F: Fn(&Obstacle) -> bool,
    {
        let (width, depth, height) = (size.x, size.y, size.z.max(1.0));
        if !(width > 5.0 && depth > 5.0) {
            return Err(LocalizationError::degenerate(format!(
                "random map needs more than 5 m per side, got {:.1}x{:.1}",
                width, depth
            )));
        }
        let bounds = Bounds::new(Vector3::zeros(), Vector3::new(width, depth, height));
        let mut map = Self::new(dimension, bounds)?;

        let num_obstacles = rng.gen_range(4..=10);
        let mut dropped = 0;
        for _ in 0..num_obstacles {
            let w = rng.gen_range(1.0..width / 5.0);
            let d = rng.gen_range(1.0..depth / 5.0);
            let x = rng.gen_range(0.0..width - w);
            let y = rng.gen_range(0.0..depth - d);
            let obstacle = Obstacle::rect(x, y, x + w, y + d, 0.0, height);
            if keep(&obstacle) {
                map = map.with_obstacle(obstacle);
            } else {
                dropped += 1;
            }
        }

        let num_aps = rng.gen_range(3..=6);
        for _ in 0..num_aps {
            if let Some(p) = map.sample_free_point(rng, 1000) {
                map = map.with_access_point(p, None);
            }
        }

        if map.access_points.is_empty() {
            return Err(LocalizationError::degenerate("random map has no free space for access points"));
        }
        debug!(
            "Random map {:.0}x{:.0} m: {} obstacles ({} dropped), {} APs",
            width,
            depth,
            map.obstacles.len(),
            dropped,
            map.access_points.len()
        );
        Ok(map)
    }
}

/// Map collaborator: resolves a blueprint descriptor into a map.
///
/// An empty descriptor asks for a randomly generated map.
pub trait MapProvider {
    fn build(&self, descriptor: &str, dimension: Dimension, max_height: f64) -> Result<EnvironmentMap>;
}

/// On-disk JSON blueprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintFile {
    #[serde(default)]
    pub name: Option<String>,
    pub min: [f64; 3],
    pub max: [f64; 3],
    #[serde(default)]
    pub obstacles: Vec<BlueprintObstacle>,
    pub access_points: Vec<BlueprintAccessPoint>,
}

/// Obstacle entry of a blueprint: a closed ring of x/y vertices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintObstacle {
    pub ring: Vec<[f64; 2]>,
    #[serde(default)]
    pub z_min: f64,
    pub z_max: f64,
}

/// Access point entry of a blueprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintAccessPoint {
    pub position: [f64; 3],
    #[serde(default)]
    pub label: Option<String>,
}

impl BlueprintFile {
    /// Reads and parses a blueprint file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Parses a blueprint from a JSON string.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| LocalizationError::Blueprint(e.to_string()))
    }

    /// Validates the blueprint and builds the map.
    pub fn into_map(self, dimension: Dimension) -> Result<EnvironmentMap> {
        let bounds = Bounds::new(Vector3::from(self.min), Vector3::from(self.max));
        let mut map = EnvironmentMap::new(dimension, bounds)?;

        for (i, obstacle) in self.obstacles.into_iter().enumerate() {
            if obstacle.ring.len() < 3 {
                return Err(LocalizationError::Blueprint(format!(
                    "obstacle {} has {} vertices, need at least 3",
                    i,
                    obstacle.ring.len()
                )));
            }
            let ring: Vec<(f64, f64)> = obstacle.ring.iter().map(|v| (v[0], v[1])).collect();
            let footprint = Polygon::new(LineString::from(ring), vec![]);
            map = map.with_obstacle(Obstacle::new(footprint, obstacle.z_min, obstacle.z_max));
        }

        if self.access_points.is_empty() {
            return Err(LocalizationError::Blueprint("blueprint declares no access points".into()));
        }
        for ap in self.access_points {
            map = map.with_access_point(Vector3::from(ap.position), ap.label);
        }

        Ok(map)
    }
}
