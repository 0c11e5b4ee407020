//! Online accumulation of marginal-contribution observations.
//!
//! Each feature receives exactly one observation per sampled permutation. The
//! number of permutations is not known in advance when convergence detection
//! is enabled, so the statistics are maintained incrementally with Welford's
//! update and combined across independent shards with the pairwise formula of
//! Chan, Golub and LeVeque.

use crate::sampler::SageValues;
use ndarray::Array1;

/// Running count, mean and sum of squared deviations for one scalar stream.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one observation in O(1) time and memory.
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta_after = value - self.mean;
        self.m2 += delta * delta_after;
    }

    /// Folds the statistics of an independent stream into this one.
    pub fn merge(&mut self, other: &RunningStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let total = self.count + other.count;
        let delta = other.mean - self.mean;
        let self_n = self.count as f64;
        let other_n = other.count as f64;
        let total_n = total as f64;
        self.mean += delta * other_n / total_n;
        self.m2 += other.m2 + delta * delta * self_n * other_n / total_n;
        self.count = total;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Unbiased sample variance. Zero until two observations are available.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Standard error of the mean, `sqrt(variance / count)`.
    pub fn std_error(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.variance() / self.count as f64).sqrt()
        }
    }
}

/// Per-feature accumulators, index-aligned with the explicand's columns.
#[derive(Clone, Debug)]
pub struct ImportanceTracker {
    stats: Vec<RunningStats>,
}

impl ImportanceTracker {
    pub fn new(num_features: usize) -> Self {
        Self {
            stats: vec![RunningStats::new(); num_features],
        }
    }

    pub fn num_features(&self) -> usize {
        self.stats.len()
    }

    /// Number of permutations absorbed so far.
    pub fn count(&self) -> u64 {
        self.stats.first().map_or(0, RunningStats::count)
    }

    /// Records one permutation's worth of contributions, one per feature.
    ///
    /// # Panics
    /// Panics if `contributions` does not hold one value per feature; the
    /// sampler always produces full-length vectors.
    pub fn update(&mut self, contributions: &[f64]) {
        assert_eq!(
            contributions.len(),
            self.stats.len(),
            "contribution vector must cover every feature"
        );
        for (stats, &value) in self.stats.iter_mut().zip(contributions) {
            stats.push(value);
        }
    }

    pub fn merge(&mut self, other: &ImportanceTracker) {
        for (stats, other_stats) in self.stats.iter_mut().zip(&other.stats) {
            stats.merge(other_stats);
        }
    }

    pub fn feature(&self, index: usize) -> Option<&RunningStats> {
        self.stats.get(index)
    }

    /// Largest standard error across features; the width used for convergence.
    pub fn max_std_error(&self) -> f64 {
        self.stats
            .iter()
            .map(RunningStats::std_error)
            .fold(0.0_f64, f64::max)
    }

    pub fn finalize(&self, converged: bool) -> SageValues {
        SageValues {
            values: self.stats.iter().map(RunningStats::mean).collect::<Array1<f64>>(),
            std_errors: self
                .stats
                .iter()
                .map(RunningStats::std_error)
                .collect::<Array1<f64>>(),
            n_permutations: self.count(),
            converged,
        }
    }
}
