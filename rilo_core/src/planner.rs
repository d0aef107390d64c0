//! The ground-truth path generator - Rapidly-exploring Random Tree.
//!
//! Grows a tree from the start configuration through free space until a
//! node lands within one step of the goal, then walks the parent links
//! back to produce the waypoint sequence.

use crate::environment::EnvironmentMap;
use crate::geometry::{heading_between, Pose};
use nalgebra::Vector3;
use rand::Rng;
use rilo_env::{LocalizationError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Configuration for the RRT planner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RrtConfig {
    /// Extension length of every new edge (meters)
    pub step_size: f64,
    /// Iteration budget; exhausting it is a planning failure
    pub max_iterations: usize,
    /// Every n-th sample is the goal itself (0 disables goal biasing)
    pub goal_sample_period: usize,
}

impl Default for RrtConfig {
    fn default() -> Self {
        Self {
            step_size: 3.0,
            max_iterations: 10_000, // 10^4
            goal_sample_period: 10,
        }
    }
}

impl RrtConfig {
    /// Budget given as a power of ten, as the CLI expresses it.
    pub fn with_iteration_exponent(mut self, exponent: u32) -> Self {
        self.max_iterations = 10usize.saturating_pow(exponent);
        self
    }

    pub fn with_step_size(mut self, step_size: f64) -> Self {
        self.step_size = step_size;
        self
    }
}

/// A node of the search tree.
#[derive(Debug, Clone, Copy)]
struct TreeNode {
    position: Vector3<f64>,
    parent: Option<usize>,
}

/// Search statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStats {
    pub iterations: usize,
    pub tree_size: usize,
}

/// RRT planner over an `EnvironmentMap`.
#[derive(Debug, Clone)]
pub struct RrtPlanner {
    config: RrtConfig,
    last_stats: PlanStats,
}

impl RrtPlanner {
    pub fn new(config: RrtConfig) -> Result<Self> {
        if !(config.step_size.is_finite() && config.step_size > 0.0) {
            return Err(LocalizationError::config(format!(
                "step size must be positive, got {}",
                config.step_size
            )));
        }
        Ok(Self {
            config,
            last_stats: PlanStats::default(),
        })
    }

    pub fn config(&self) -> &RrtConfig {
        &self.config
    }

    /// Statistics of the most recent `plan` call.
    pub fn stats(&self) -> PlanStats {
        self.last_stats
    }

    /// Plans a path from `start` to `goal`.
    ///
    /// Returns at least two waypoints (`[start, ..., goal]`). Endpoints
    /// outside free space fail with `DegenerateMap` before any growth; an
    /// exhausted budget fails with `PlanningFailure`.
    pub fn plan<R: Rng + ?Sized>(
        &mut self,
        start: Pose,
        goal: Pose,
        map: &EnvironmentMap,
        rng: &mut R,
    ) -> Result<Vec<Pose>> {
        let dimension = map.dimension();
        let start_pos = dimension.project(&start.position);
        let goal_pos = dimension.project(&goal.position);
        map.validate_endpoints(&start_pos, &goal_pos)?;

        let step = self.config.step_size;
        self.last_stats = PlanStats::default();

        // Direct connection, which also covers start == goal
        if dimension.distance(&start_pos, &goal_pos) <= step && map.segment_is_free(&start_pos, &goal_pos) {
            self.last_stats.tree_size = 1;
            debug!("Goal within one step of start, no search needed");
            return Ok(Self::to_waypoints(start, &[start_pos, goal_pos]));
        }

        let mut tree = vec![TreeNode {
            position: start_pos,
            parent: None,
        }];

        for iteration in 1..=self.config.max_iterations {
            let sample = if self.config.goal_sample_period > 0
                && iteration % self.config.goal_sample_period == 0
            {
                goal_pos
            } else {
                map.sample_point(rng)
            };

            let nearest = Self::nearest(&tree, &sample, map);
            let from = tree[nearest].position;
            let direction = dimension.project(&(sample - from));
            let length = direction.norm();
            if length < f64::EPSILON {
                continue;
            }

            let candidate = from + direction * (step / length);
            if !map.is_free(&candidate) || !map.segment_is_free(&from, &candidate) {
                continue;
            }

            tree.push(TreeNode {
                position: candidate,
                parent: Some(nearest),
            });
            let new_index = tree.len() - 1;

            if dimension.distance(&candidate, &goal_pos) <= step
                && map.segment_is_free(&candidate, &goal_pos)
            {
                tree.push(TreeNode {
                    position: goal_pos,
                    parent: Some(new_index),
                });
                self.last_stats = PlanStats {
                    iterations: iteration,
                    tree_size: tree.len(),
                };

                let positions = Self::extract(&tree);
                info!(
                    "RRT reached goal after {} iterations ({} nodes, {} waypoints)",
                    iteration,
                    tree.len(),
                    positions.len()
                );
                return Ok(Self::to_waypoints(start, &positions));
            }
        }

        self.last_stats = PlanStats {
            iterations: self.config.max_iterations,
            tree_size: tree.len(),
        };
        warn!(
            "RRT failed: goal unreached after {} iterations ({} nodes)",
            self.config.max_iterations,
            tree.len()
        );
        Err(LocalizationError::PlanningFailure {
            iterations: self.config.max_iterations,
        })
    }

    fn nearest(tree: &[TreeNode], target: &Vector3<f64>, map: &EnvironmentMap) -> usize {
        let dimension = map.dimension();
        let mut best = 0;
        let mut best_dist = f64::MAX;
        for (i, node) in tree.iter().enumerate() {
            let d = dimension.distance(&node.position, target);
            if d < best_dist {
                best_dist = d;
                best = i;
            }
        }
        best
    }

    /// Walks parent links from the last node (the goal) back to the root.
    fn extract(tree: &[TreeNode]) -> Vec<Vector3<f64>> {
        let mut positions = Vec::new();
        let mut cursor = Some(tree.len() - 1);
        while let Some(i) = cursor {
            positions.push(tree[i].position);
            cursor = tree[i].parent;
        }
        positions.reverse();
        positions
    }

    /// Attaches headings: direction of travel into each waypoint.
    fn to_waypoints(start: Pose, positions: &[Vector3<f64>]) -> Vec<Pose> {
        let mut heading = start.heading;
        let mut waypoints = Vec::with_capacity(positions.len());
        for (i, position) in positions.iter().enumerate() {
            if i > 0 {
                if let Some(h) = heading_between(&positions[i - 1], position) {
                    heading = h;
                }
            }
            waypoints.push(Pose::new(*position, heading));
        }
        waypoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{Bounds, Obstacle};
    use crate::geometry::Dimension;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn open_map() -> EnvironmentMap {
        EnvironmentMap::new(
            Dimension::Two,
            Bounds::new(Vector3::zeros(), Vector3::new(40.0, 40.0, 0.0)),
        )
        .unwrap()
        .with_access_point(Vector3::new(20.0, 20.0, 0.0), None)
    }

    fn wall_map() -> EnvironmentMap {
        open_map().with_obstacle(Obstacle::rect(18.0, 0.0, 22.0, 30.0, 0.0, 2.0))
    }

    fn assert_path_is_feasible(path: &[Pose], map: &EnvironmentMap, step: f64) {
        for pair in path.windows(2) {
            let a = &pair[0].position;
            let b = &pair[1].position;
            assert!(map.is_free(b));
            assert!(map.segment_is_free(a, b));
            assert!(map.dimension().distance(a, b) <= step + 1e-9);
        }
    }

    #[test]
    fn test_start_equals_goal_is_trivial() {
        let map = open_map();
        let mut planner = RrtPlanner::new(RrtConfig::default()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let p = Pose::at(5.0, 5.0, 0.0);

        let path = planner.plan(p, p, &map, &mut rng).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].position, path[1].position);
        assert_eq!(planner.stats().iterations, 0);
    }

    #[test]
    fn test_start_in_obstacle_fails_before_search() {
        let map = wall_map();
        let mut planner = RrtPlanner::new(RrtConfig::default()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let result = planner.plan(Pose::at(20.0, 10.0, 0.0), Pose::at(35.0, 5.0, 0.0), &map, &mut rng);
        assert!(matches!(result, Err(LocalizationError::DegenerateMap(_))));
        assert_eq!(planner.stats().tree_size, 0);
    }

    #[test]
    fn test_zero_iterations_fails() {
        let map = open_map();
        let config = RrtConfig {
            max_iterations: 0,
            ..Default::default()
        };
        let mut planner = RrtPlanner::new(config).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let result = planner.plan(Pose::at(2.0, 2.0, 0.0), Pose::at(35.0, 35.0, 0.0), &map, &mut rng);
        assert!(matches!(
            result,
            Err(LocalizationError::PlanningFailure { iterations: 0 })
        ));
    }

    #[test]
    fn test_plans_around_wall() {
        let map = wall_map();
        let config = RrtConfig::default().with_step_size(2.0);
        let mut planner = RrtPlanner::new(config).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let start = Pose::at(5.0, 5.0, 0.0);
        let goal = Pose::at(35.0, 5.0, 0.0);
        let path = planner.plan(start, goal, &map, &mut rng).unwrap();

        assert_relative_eq!(path[0].position.x, 5.0);
        assert_relative_eq!(path.last().unwrap().position.x, 35.0);
        assert!(path.len() > 2);
        assert_path_is_feasible(&path, &map, 2.0);
        // Has to go over the wall's open end
        assert!(path.iter().any(|p| p.position.y > 30.0));
    }

    #[test]
    fn test_climbs_over_half_height_wall_in_3d() {
        // Wall spans the whole y range but only z in [0, 1]
        let map = |dimension| {
            EnvironmentMap::new(dimension, Bounds::new(Vector3::zeros(), Vector3::new(40.0, 40.0, 3.0)))
                .unwrap()
                .with_obstacle(Obstacle::rect(18.0, 0.0, 22.0, 40.0, 0.0, 1.0))
                .with_access_point(Vector3::new(20.0, 20.0, 2.5), None)
        };
        let start = Pose::at(5.0, 20.0, 0.5);
        let goal = Pose::at(35.0, 20.0, 0.5);
        let config = RrtConfig::default().with_step_size(2.0);

        let map_3d = map(Dimension::Three);
        let mut planner = RrtPlanner::new(config).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let path = planner.plan(start, goal, &map_3d, &mut rng).unwrap();

        assert_path_is_feasible(&path, &map_3d, 2.0);
        assert_relative_eq!(path[0].position.z, 0.5);
        assert_relative_eq!(path.last().unwrap().position.z, 0.5);
        assert!(path.iter().any(|p| p.position.z > 1.0));

        // Flattened, the same wall is a closed barrier
        let map_2d = map(Dimension::Two);
        let mut planner = RrtPlanner::new(config.with_iteration_exponent(3)).unwrap();
        let result = planner.plan(start, goal, &map_2d, &mut rng);
        assert!(matches!(result, Err(LocalizationError::PlanningFailure { .. })));
    }

    #[test]
    fn test_headings_follow_travel() {
        let map = open_map();
        let mut planner = RrtPlanner::new(RrtConfig::default().with_step_size(1.5)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let path = planner
            .plan(Pose::at(5.0, 5.0, 0.0), Pose::at(15.0, 5.0, 0.0), &map, &mut rng)
            .unwrap();
        for pair in path.windows(2) {
            let expected = heading_between(&pair[0].position, &pair[1].position).unwrap();
            assert_relative_eq!(pair[1].heading, expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_invalid_step_size() {
        let config = RrtConfig {
            step_size: 0.0,
            ..Default::default()
        };
        assert!(RrtPlanner::new(config).is_err());
    }

    #[test]
    fn test_iteration_exponent() {
        assert_eq!(RrtConfig::default().with_iteration_exponent(3).max_iterations, 1000);
    }
}
