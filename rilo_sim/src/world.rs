//! Procedural map provider - the map collaborator of the harness.
//!
//! Named blueprints resolve to a synthetic floor plan: a grid of rooms
//! separated by walls with doorways, one access point per room. The layout
//! depends only on the blueprint name, so every run of a map id sees the
//! same building. Anchors (start and goal) are always kept in free space.

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rilo_core::environment::{BlueprintFile, Bounds, EnvironmentMap, MapProvider, Obstacle};
use rilo_core::geometry::Dimension;
use rilo_env::{LocalizationError, Result};
use std::path::Path;
use tracing::{debug, info};

/// Layout parameters for generated floor plans.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutConfig {
    /// Nominal room edge length (meters)
    pub room_size: f64,
    pub wall_thickness: f64,
    pub door_width: f64,
    /// Free margin around the anchors (meters)
    pub margin: f64,
    /// Probability that a wall is a half-height partition (3D only)
    pub partition_probability: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            room_size: 15.0,
            wall_thickness: 0.3,
            door_width: 2.5,
            margin: 5.0,
            partition_probability: 0.25,
        }
    }
}

/// Builds maps from blueprint descriptors.
///
/// - `""` → a random map drawn from `seed`
/// - `*.json` → a `BlueprintFile` on disk
/// - anything else → a generated floor plan keyed by the name
#[derive(Debug, Clone)]
pub struct ProceduralMapProvider {
    seed: u64,
    anchors: Vec<Vector3<f64>>,
    layout: LayoutConfig,
}

impl ProceduralMapProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            anchors: Vec::new(),
            layout: LayoutConfig::default(),
        }
    }

    /// Points the generated plan must enclose and keep free.
    pub fn with_anchors(mut self, anchors: &[Vector3<f64>]) -> Self {
        self.anchors = anchors.to_vec();
        self
    }

    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    /// FNV-1a over the name, so layouts are stable across runs and seeds.
    fn name_seed(name: &str) -> u64 {
        name.bytes().fold(0xcbf29ce484222325u64, |hash, b| {
            (hash ^ b as u64).wrapping_mul(0x100000001b3)
        })
    }

    fn extent(&self, max_height: f64) -> Vector3<f64> {
        let margin = self.layout.margin;
        let reach = |axis: usize| {
            self.anchors
                .iter()
                .map(|a| a[axis])
                .fold(0.0, f64::max)
        };
        Vector3::new(
            (reach(0) + margin).max(4.0 * margin),
            (reach(1) + margin).max(4.0 * margin),
            max_height.max(reach(2) + 0.1).max(1.0),
        )
    }

    fn blocks_anchor(&self, obstacle: &Obstacle, dimension: Dimension) -> bool {
        let clearance = self.layout.wall_thickness + 0.5;
        self.anchors.iter().any(|a| {
            let a = dimension.project(a);
            [(0.0, 0.0), (clearance, 0.0), (-clearance, 0.0), (0.0, clearance), (0.0, -clearance)]
                .iter()
                .any(|(dx, dy)| obstacle.occupies(&(a + Vector3::new(*dx, *dy, 0.0)), dimension))
        })
    }

    /// Splits one wall span into two segments around a doorway.
    ///
    /// `along` is the axis position range of the span, `at` the fixed
    /// coordinate of the wall line.
    fn wall_with_door<R: Rng + ?Sized>(
        &self,
        vertical: bool,
        at: f64,
        along: (f64, f64),
        height: f64,
        rng: &mut R,
    ) -> Vec<Obstacle> {
        let half = self.layout.wall_thickness / 2.0;
        let door = self.layout.door_width.min((along.1 - along.0) * 0.5);
        let door_start = rng.gen_range(along.0 + 0.5..(along.1 - door - 0.5).max(along.0 + 0.6));
        let pieces = [(along.0, door_start), (door_start + door, along.1)];

        pieces
            .iter()
            .filter(|(a, b)| b - a > 0.1)
            .map(|&(a, b)| {
                if vertical {
                    Obstacle::rect(at - half, a, at + half, b, 0.0, height)
                } else {
                    Obstacle::rect(a, at - half, b, at + half, 0.0, height)
                }
            })
            .collect()
    }

    /// Generated floor plan for a named blueprint.
    pub fn floor_plan(&self, name: &str, dimension: Dimension, max_height: f64) -> Result<EnvironmentMap> {
        let mut rng = ChaCha8Rng::seed_from_u64(Self::name_seed(name));
        let extent = self.extent(max_height);
        let bounds = Bounds::new(Vector3::zeros(), extent);
        let mut map = EnvironmentMap::new(dimension, bounds)?;

        let columns = (extent.x / self.layout.room_size).ceil().max(1.0) as usize;
        let rows = (extent.y / self.layout.room_size).ceil().max(1.0) as usize;
        let cell = Vector3::new(extent.x / columns as f64, extent.y / rows as f64, 0.0);

        let mut walls = Vec::new();
        let wall_height = |rng: &mut ChaCha8Rng| {
            if dimension == Dimension::Three && rng.gen_bool(self.layout.partition_probability) {
                extent.z * 0.5
            } else {
                extent.z
            }
        };
        for c in 1..columns {
            for r in 0..rows {
                let height = wall_height(&mut rng);
                let at = c as f64 * cell.x;
                let span = (r as f64 * cell.y, (r + 1) as f64 * cell.y);
                walls.extend(self.wall_with_door(true, at, span, height, &mut rng));
            }
        }
        for r in 1..rows {
            for c in 0..columns {
                let height = wall_height(&mut rng);
                let at = r as f64 * cell.y;
                let span = (c as f64 * cell.x, (c + 1) as f64 * cell.x);
                walls.extend(self.wall_with_door(false, at, span, height, &mut rng));
            }
        }

        let total = walls.len();
        for wall in walls.into_iter().filter(|w| !self.blocks_anchor(w, dimension)) {
            map = map.with_obstacle(wall);
        }
        debug!("{}: {} wall segments, {} dropped to free anchors", name, total, total - map.obstacles().len());

        for r in 0..rows {
            for c in 0..columns {
                let jitter = Vector3::new(
                    rng.gen_range(-0.25..0.25) * cell.x,
                    rng.gen_range(-0.25..0.25) * cell.y,
                    0.0,
                );
                let center = Vector3::new((c as f64 + 0.5) * cell.x, (r as f64 + 0.5) * cell.y, 0.0) + jitter;
                let position = Vector3::new(center.x, center.y, rng.gen_range(0.5..=1.0) * extent.z);
                if map.is_free(&dimension.project(&position)) {
                    let label = format!("{}-r{}c{}", name, r, c);
                    map = map.with_access_point(position, Some(label));
                }
            }
        }

        if map.access_points().is_empty() {
            return Err(LocalizationError::degenerate(format!(
                "floor plan '{}' has no free cell for an access point",
                name
            )));
        }
        info!(
            "Built floor plan '{}' ({}): {:.0}x{:.0}x{:.1} m, {}x{} rooms, {} APs",
            name,
            dimension,
            extent.x,
            extent.y,
            extent.z,
            columns,
            rows,
            map.access_points().len()
        );
        Ok(map)
    }
}

impl MapProvider for ProceduralMapProvider {
    fn build(&self, descriptor: &str, dimension: Dimension, max_height: f64) -> Result<EnvironmentMap> {
        let descriptor = descriptor.trim();
        if descriptor.is_empty() {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
            info!("Empty blueprint descriptor, generating a random map");
            return EnvironmentMap::random_within(dimension, self.extent(max_height), &mut rng, |obstacle| {
                !self.blocks_anchor(obstacle, dimension)
            });
        }
        if descriptor.ends_with(".json") {
            info!("Loading blueprint file {}", descriptor);
            return BlueprintFile::from_path(Path::new(descriptor))?.into_map(dimension);
        }
        self.floor_plan(descriptor, dimension, max_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::MapId;

    fn provider_for(id: u8) -> ProceduralMapProvider {
        let entry = MapId::new(id).unwrap().entry();
        ProceduralMapProvider::new(7).with_anchors(&[entry.start(), entry.goal()])
    }

    #[test]
    fn test_layout_is_stable() {
        let provider = provider_for(1);
        let a = provider.build("defstr", Dimension::Two, 2.0).unwrap();
        let b = provider.build("defstr", Dimension::Two, 2.0).unwrap();
        assert_eq!(a.obstacles(), b.obstacles());
        assert_eq!(a.access_point_positions(), b.access_point_positions());
    }

    #[test]
    fn test_anchors_are_free_on_every_map() {
        for id in MapId::all() {
            let entry = id.entry();
            let provider = provider_for(id.get());
            for dimension in [Dimension::Two, Dimension::Three] {
                let map = provider.build(entry.blueprint, dimension, 2.0).unwrap();
                let start = dimension.project(&entry.start());
                let goal = dimension.project(&entry.goal());
                assert!(map.validate_endpoints(&start, &goal).is_ok(), "map {} {}", id, dimension);
                assert!(!map.access_points().is_empty());
            }
        }
    }

    #[test]
    fn test_floor_plan_has_walls() {
        let map = provider_for(3).build("11Dbibli", Dimension::Two, 2.0).unwrap();
        assert!(!map.obstacles().is_empty());
        // 140 m long building => several rooms, many APs
        assert!(map.access_points().len() >= 4);
    }

    #[test]
    fn test_empty_descriptor_is_random() {
        let map = ProceduralMapProvider::new(3).build("", Dimension::Three, 2.0).unwrap();
        assert_eq!(map.dimension(), Dimension::Three);
        assert!(!map.access_points().is_empty());
    }

    #[test]
    fn test_random_map_keeps_anchors_free() {
        for id in MapId::all() {
            let entry = id.entry();
            for seed in [1, 2, 3] {
                let provider = ProceduralMapProvider::new(seed).with_anchors(&[entry.start(), entry.goal()]);
                for dimension in [Dimension::Two, Dimension::Three] {
                    let map = provider.build("", dimension, 2.0).unwrap();
                    let start = dimension.project(&entry.start());
                    let goal = dimension.project(&entry.goal());
                    assert!(
                        map.validate_endpoints(&start, &goal).is_ok(),
                        "map {} seed {} {}",
                        id,
                        seed,
                        dimension
                    );
                }
            }
        }
    }

    #[test]
    fn test_missing_blueprint_file() {
        let result = ProceduralMapProvider::new(1).build("/nonexistent/plan.json", Dimension::Two, 2.0);
        assert!(matches!(result, Err(LocalizationError::Io(_))));
    }
}
