//! Weighted particle population: normalization, ESS, resampling, estimates.

use crate::geometry::{normalize_angle, Pose};
use nalgebra::Vector3;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One pose hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub pose: Pose,
    /// Normalized weight
    pub weight: f64,
}

/// Outcome of a log-weight normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightNormalization {
    /// Every weight underflowed; weights were reset to uniform
    pub collapsed: bool,
    /// log Σ exp(wᵢ) of the input, `-inf` on collapse
    pub log_normalizer: f64,
}

/// Turns log-weights into normalized linear weights in place.
///
/// Uses max subtraction so very negative log-likelihoods survive. Non-finite
/// entries count as zero weight. If nothing survives the weights are reset
/// to uniform and `collapsed` is set.
pub fn normalize_log_weights(weights: &mut [f64]) -> WeightNormalization {
    let n = weights.len();
    if n == 0 {
        return WeightNormalization {
            collapsed: false,
            log_normalizer: 0.0,
        };
    }

    for w in weights.iter_mut() {
        if !w.is_finite() {
            *w = f64::NEG_INFINITY;
        }
    }
    let max = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        weights.iter_mut().for_each(|w| *w = 1.0 / n as f64);
        return WeightNormalization {
            collapsed: true,
            log_normalizer: f64::NEG_INFINITY,
        };
    }

    let mut sum = 0.0;
    for w in weights.iter_mut() {
        *w = (*w - max).exp();
        sum += *w;
    }
    // sum >= 1 since the max entry maps to exp(0)
    weights.iter_mut().for_each(|w| *w /= sum);
    WeightNormalization {
        collapsed: false,
        log_normalizer: max + sum.ln(),
    }
}

/// Effective sample size `1 / Σw²` of normalized weights.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0.0 {
        1.0 / sum_sq
    } else {
        0.0
    }
}

/// How ancestors are drawn from the weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResamplingScheme {
    /// One uniform offset, N evenly spaced pointers (low variance)
    #[default]
    Systematic,
    /// N independent categorical draws
    Multinomial,
}

impl ResamplingScheme {
    /// Draws `weights.len()` ancestor indices. Weights must be normalized.
    pub fn resample_indices<R: Rng + ?Sized>(&self, weights: &[f64], rng: &mut R) -> Vec<usize> {
        let n = weights.len();
        if n == 0 {
            return Vec::new();
        }
        let cumulative = cumulative_sum(weights);
        let last = n - 1;

        match self {
            ResamplingScheme::Systematic => {
                let step = 1.0 / n as f64;
                let offset = rng.gen::<f64>() * step;
                let mut indices = Vec::with_capacity(n);
                let mut j = 0;
                for i in 0..n {
                    let u = offset + i as f64 * step;
                    while j < last && cumulative[j] < u {
                        j += 1;
                    }
                    indices.push(j);
                }
                indices
            }
            ResamplingScheme::Multinomial => (0..n)
                .map(|_| {
                    let u = rng.gen::<f64>();
                    cumulative.partition_point(|&c| c < u).min(last)
                })
                .collect(),
        }
    }
}

fn cumulative_sum(weights: &[f64]) -> Vec<f64> {
    let mut acc = 0.0;
    weights
        .iter()
        .map(|w| {
            acc += w;
            acc
        })
        .collect()
}

/// How one pose is read off the population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointEstimate {
    /// Weighted mean position, circular mean heading
    #[default]
    WeightedMean,
    /// The single highest-weight particle
    MaxWeight,
}

impl PointEstimate {
    pub fn estimate(&self, particles: &[Particle]) -> Option<Pose> {
        match self {
            PointEstimate::WeightedMean => weighted_mean(particles),
            PointEstimate::MaxWeight => best_index(particles).map(|i| particles[i].pose),
        }
    }
}

/// Index of the highest-weight particle.
pub fn best_index(particles: &[Particle]) -> Option<usize> {
    particles
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.weight.total_cmp(&b.weight))
        .map(|(i, _)| i)
}

fn weighted_mean(particles: &[Particle]) -> Option<Pose> {
    let total: f64 = particles.iter().map(|p| p.weight).sum();
    if particles.is_empty() || total <= 0.0 {
        return None;
    }

    let mut position = Vector3::zeros();
    let (mut sin, mut cos) = (0.0, 0.0);
    for p in particles {
        let w = p.weight / total;
        position += p.pose.position * w;
        sin += w * p.pose.heading.sin();
        cos += w * p.pose.heading.cos();
    }
    let heading = if sin == 0.0 && cos == 0.0 {
        particles[0].pose.heading
    } else {
        normalize_angle(sin.atan2(cos))
    };
    Some(Pose::new(position, heading))
}

/// Fixed-size particle set.
#[derive(Debug, Clone, Default)]
pub struct Population {
    particles: Vec<Particle>,
}

impl Population {
    /// Equal weights `1/N` on the given poses.
    pub fn uniform(poses: Vec<Pose>) -> Self {
        let w = 1.0 / poses.len().max(1) as f64;
        Self {
            particles: poses.into_iter().map(|pose| Particle { pose, weight: w }).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }

    /// Overwrites weights, in particle order.
    pub fn set_weights(&mut self, weights: &[f64]) {
        for (p, w) in self.particles.iter_mut().zip(weights) {
            p.weight = *w;
        }
    }

    /// Replaces the population with the given ancestors at uniform weight.
    pub fn gather(&mut self, ancestors: &[usize]) {
        let w = 1.0 / ancestors.len().max(1) as f64;
        self.particles = ancestors
            .iter()
            .map(|&i| Particle {
                pose: self.particles[i].pose,
                weight: w,
            })
            .collect();
    }

    pub fn effective_sample_size(&self) -> f64 {
        effective_sample_size(&self.weights())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn line_population(n: usize) -> Population {
        Population::uniform((0..n).map(|i| Pose::at(i as f64, 0.0, 0.0)).collect())
    }

    #[test]
    fn test_normalization_handles_huge_negatives() {
        let mut w = vec![-1000.0, -1001.0, -1002.0];
        let result = normalize_log_weights(&mut w);
        assert!(!result.collapsed);
        assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(w[0] > w[1] && w[1] > w[2]);
    }

    #[test]
    fn test_collapse_resets_uniform() {
        let mut w = vec![f64::NEG_INFINITY, f64::NAN, f64::NEG_INFINITY, f64::NEG_INFINITY];
        let result = normalize_log_weights(&mut w);
        assert!(result.collapsed);
        for x in &w {
            assert_relative_eq!(*x, 0.25);
        }
    }

    #[test]
    fn test_nan_entry_gets_zero_weight() {
        let mut w = vec![0.0, f64::NAN];
        normalize_log_weights(&mut w);
        assert_relative_eq!(w[0], 1.0);
        assert_relative_eq!(w[1], 0.0);
    }

    #[test]
    fn test_ess_bounds() {
        assert_relative_eq!(effective_sample_size(&[0.25; 4]), 4.0, epsilon = 1e-12);
        assert_relative_eq!(effective_sample_size(&[1.0, 0.0, 0.0]), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_uniform_resampling_keeps_everyone() {
        // Systematic pointers land exactly once in each equal-width bin
        let weights = vec![0.1; 10];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let indices = ResamplingScheme::Systematic.resample_indices(&weights, &mut rng);
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_uniform_multinomial_is_spread() {
        let n = 1000;
        let weights = vec![1.0 / n as f64; n];
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let indices = ResamplingScheme::Multinomial.resample_indices(&weights, &mut rng);

        assert_eq!(indices.len(), n);
        let mean = indices.iter().sum::<usize>() as f64 / n as f64;
        assert_relative_eq!(mean, (n - 1) as f64 / 2.0, epsilon = 40.0);
    }

    #[test]
    fn test_concentrated_weight_dominates() {
        let mut weights = vec![1e-6; 100];
        weights[37] = 1.0 - 99.0 * 1e-6;
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        for scheme in [ResamplingScheme::Systematic, ResamplingScheme::Multinomial] {
            let indices = scheme.resample_indices(&weights, &mut rng);
            let hits = indices.iter().filter(|&&i| i == 37).count();
            assert!(hits >= 95, "{:?} kept {} copies", scheme, hits);
        }
    }

    #[test]
    fn test_gather_resets_weights() {
        let mut pop = line_population(4);
        pop.set_weights(&[0.7, 0.1, 0.1, 0.1]);
        pop.gather(&[0, 0, 0, 2]);

        assert_eq!(pop.len(), 4);
        assert_relative_eq!(pop.particles()[3].pose.position.x, 2.0);
        assert!(pop.particles().iter().all(|p| p.weight == 0.25));
    }

    #[test]
    fn test_weighted_mean_and_max() {
        let mut pop = line_population(3);
        pop.set_weights(&[0.2, 0.2, 0.6]);

        let mean = PointEstimate::WeightedMean.estimate(pop.particles()).unwrap();
        assert_relative_eq!(mean.position.x, 1.4, epsilon = 1e-12);

        let best = PointEstimate::MaxWeight.estimate(pop.particles()).unwrap();
        assert_relative_eq!(best.position.x, 2.0);
    }

    #[test]
    fn test_circular_heading_mean() {
        use std::f64::consts::PI;
        let particles = vec![
            Particle {
                pose: Pose::new(Vector3::zeros(), PI - 0.1),
                weight: 0.5,
            },
            Particle {
                pose: Pose::new(Vector3::zeros(), -PI + 0.1),
                weight: 0.5,
            },
        ];
        let est = PointEstimate::WeightedMean.estimate(&particles).unwrap();
        // Wraps through ±π rather than averaging to zero
        assert_relative_eq!(est.heading.abs(), PI, epsilon = 1e-9);
    }

    proptest! {
        #[test]
        fn prop_normalized_weights_sum_to_one(
            log_weights in prop::collection::vec(-1e4f64..10.0, 1..200)
        ) {
            let mut w = log_weights.clone();
            normalize_log_weights(&mut w);
            let sum: f64 = w.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-9);
            prop_assert!(w.iter().all(|x| *x >= 0.0 && x.is_finite()));
        }

        #[test]
        fn prop_resampling_preserves_length(
            log_weights in prop::collection::vec(-50.0f64..0.0, 1..100),
            seed in any::<u64>(),
        ) {
            let mut w = log_weights.clone();
            normalize_log_weights(&mut w);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            for scheme in [ResamplingScheme::Systematic, ResamplingScheme::Multinomial] {
                let indices = scheme.resample_indices(&w, &mut rng);
                prop_assert_eq!(indices.len(), w.len());
                prop_assert!(indices.iter().all(|&i| i < w.len()));
            }
        }
    }
}
