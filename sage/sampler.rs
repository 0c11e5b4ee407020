//! # SAGE Estimation by Permutation Sampling
//!
//! A feature's SAGE value is its average reduction in predictive loss when it
//! is revealed to the model, averaged over every order in which features can
//! be revealed. Exact computation needs all `d!` orders; this module draws
//! random orders instead.
//!
//! For each sampled permutation the loss is first evaluated with every feature
//! held out (imputed from the background), then features are revealed one at
//! a time in permutation order. The loss drop at each step is one observation
//! of the revealed feature's contribution. The contributions of a permutation
//! telescope, so their sum is exactly the loss with nothing revealed minus the
//! loss with everything revealed.
//!
//! ## Loss of a feature subset
//!
//! The explicand rows are processed in batches of `batch_size`. For each batch
//! the held-out columns are imputed `m_samples` times, the predictions are
//! averaged across those draws, and only then is the pointwise loss applied.
//! Batch sums are divided once by the total row count so that every row carries
//! the same weight however unevenly the last batch is filled.
//!
//! ## Randomness and shards
//!
//! Permutations are grouped into shards of `shard_size`. Each shard owns a
//! `StdRng` seeded from the run seed and the shard index, and consumes it for
//! both permutation draws and background draws. Shards are merged in index
//! order, which makes the sequential and parallel paths produce identical
//! estimates for the same seed.

use crate::config::SageConfig;
use crate::data::Dataset;
use crate::imputation::{ImputationError, Imputer};
use crate::predictor::{Predictor, PredictorError};
use crate::progress::{BarProgress, NoopProgress, SamplingProgress};
use crate::tracker::ImportanceTracker;
use ndarray::{Array1, ArrayView1, ArrayView2, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("The predictor failed, aborting the estimate: {0}")]
    PredictorFailure(#[source] PredictorError),
    #[error("Non-finite value ({value}) encountered while computing {context}.")]
    NumericalInstability { context: String, value: f64 },
    #[error("Imputation failed: {0}")]
    Imputation(#[from] ImputationError),
}

/// Finalized SAGE values, index-aligned with the explicand's feature columns.
#[derive(Debug, Clone, PartialEq)]
pub struct SageValues {
    /// Mean contribution per feature. Positive values reduce the loss.
    pub values: Array1<f64>,
    /// Standard error of each mean.
    pub std_errors: Array1<f64>,
    /// Number of permutations that entered the estimate.
    pub n_permutations: u64,
    /// Whether sampling stopped early because the estimate converged.
    pub converged: bool,
}

impl SageValues {
    /// Sum of all values; estimates the loss with no features revealed minus
    /// the loss with all features revealed.
    pub fn sum(&self) -> f64 {
        self.values.sum()
    }

    /// Feature indices ordered from most to least important.
    pub fn ranking(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.values.len()).collect();
        order.sort_by(|&a, &b| self.values[b].total_cmp(&self.values[a]));
        order
    }
}

/// A contiguous group of permutations sharing one random stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Shard {
    index: u64,
    permutations: usize,
}

fn plan_shards(n_samples: usize, shard_size: usize) -> Vec<Shard> {
    (0..n_samples)
        .step_by(shard_size)
        .enumerate()
        .map(|(index, start)| Shard {
            index: index as u64,
            permutations: shard_size.min(n_samples - start),
        })
        .collect()
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn shard_seed(run_seed: u64, shard_index: u64) -> u64 {
    splitmix64(run_seed ^ splitmix64(shard_index))
}

fn batch_ranges(n_rows: usize, batch_size: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..n_rows)
        .step_by(batch_size)
        .map(move |start| (start, (start + batch_size).min(n_rows)))
}

fn check_finite(value: f64, context: &str) -> Result<f64, EstimationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EstimationError::NumericalInstability {
            context: context.to_string(),
            value,
        })
    }
}

/// Estimates SAGE values of one predictor on one explicand dataset.
///
/// Construction validates the configuration and every shape, and probes the
/// predictor once on the unmodified explicand, so that a misconfigured run
/// fails before any sampling starts.
pub struct SageEstimator<'a, P, I> {
    predictor: &'a P,
    imputer: &'a I,
    features: ArrayView2<'a, f64>,
    targets: ArrayView1<'a, f64>,
    config: SageConfig,
    m_samples: usize,
    batch_size: usize,
    full_loss: f64,
    mean_prediction: f64,
}

impl<'a, P: Predictor, I: Imputer> SageEstimator<'a, P, I> {
    pub fn new(
        predictor: &'a P,
        imputer: &'a I,
        features: ArrayView2<'a, f64>,
        targets: ArrayView1<'a, f64>,
        config: SageConfig,
    ) -> Result<Self, EstimationError> {
        config
            .validate()
            .map_err(EstimationError::InvalidConfiguration)?;

        let n_rows = features.nrows();
        if n_rows == 0 {
            return Err(EstimationError::InvalidConfiguration(
                "the explicand dataset contains no rows".to_string(),
            ));
        }
        if features.ncols() == 0 {
            return Err(EstimationError::InvalidConfiguration(
                "the explicand dataset contains no feature columns".to_string(),
            ));
        }
        if targets.len() != n_rows {
            return Err(EstimationError::InvalidConfiguration(format!(
                "the explicand has {} rows but {} targets",
                n_rows,
                targets.len()
            )));
        }
        if imputer.num_features() != features.ncols() {
            return Err(EstimationError::InvalidConfiguration(format!(
                "the imputation background has {} columns but the explicand has {}",
                imputer.num_features(),
                features.ncols()
            )));
        }

        let m_samples = if imputer.is_deterministic() && config.m_samples != 1 {
            log::warn!(
                "Imputation is deterministic; using m_samples = 1 instead of {}",
                config.m_samples
            );
            1
        } else {
            config.m_samples
        };
        let batch_size = if config.batch_size > n_rows {
            log::debug!(
                "batch_size {} exceeds the {} explicand rows; using {}",
                config.batch_size,
                n_rows,
                n_rows
            );
            n_rows
        } else {
            config.batch_size
        };

        let mut estimator = Self {
            predictor,
            imputer,
            features,
            targets,
            config,
            m_samples,
            batch_size,
            full_loss: f64::NAN,
            mean_prediction: f64::NAN,
        };
        estimator.probe()?;
        Ok(estimator)
    }

    pub fn num_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn config(&self) -> &SageConfig {
        &self.config
    }

    /// Imputation draws per evaluated subset after adjustment for the imputer.
    pub fn m_samples(&self) -> usize {
        self.m_samples
    }

    /// Rows per predictor call after clamping to the explicand size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Mean loss with every feature revealed.
    pub fn full_loss(&self) -> f64 {
        self.full_loss
    }

    /// Runs the predictor on the unmodified explicand to validate its output
    /// shape and cache the full-information loss and mean prediction.
    fn probe(&mut self) -> Result<(), EstimationError> {
        let n_rows = self.features.nrows();
        let mut loss_sum = 0.0;
        let mut prediction_sum = 0.0;
        for (start, end) in batch_ranges(n_rows, self.batch_size) {
            let predictions = self.predict(self.features.slice(s![start..end, ..]))?;
            prediction_sum += predictions.sum();
            loss_sum += self
                .config
                .loss
                .sum(predictions.view(), self.targets.slice(s![start..end]));
        }
        self.full_loss = check_finite(loss_sum / n_rows as f64, "the loss with all features")?;
        self.mean_prediction =
            check_finite(prediction_sum / n_rows as f64, "the mean prediction")?;
        Ok(())
    }

    fn predict(&self, batch: ArrayView2<f64>) -> Result<Array1<f64>, EstimationError> {
        let predictions = self
            .predictor
            .predict(batch)
            .map_err(EstimationError::PredictorFailure)?;
        if predictions.len() != batch.nrows() {
            return Err(EstimationError::InvalidConfiguration(format!(
                "the predictor returned {} predictions for a batch of {} rows",
                predictions.len(),
                batch.nrows()
            )));
        }
        Ok(predictions)
    }

    /// Mean loss over all explicand rows when only the `known` features are
    /// revealed and the rest are imputed.
    pub fn evaluate_loss(&self, known: &[bool], rng: &mut StdRng) -> Result<f64, EstimationError> {
        if known.len() != self.num_features() {
            return Err(ImputationError::MaskLengthMismatch {
                found: known.len(),
                expected: self.num_features(),
            }
            .into());
        }
        if known.iter().all(|&k| k) {
            return Ok(self.full_loss);
        }

        let n_rows = self.features.nrows();
        let mut loss_sum = 0.0;
        for (start, end) in batch_ranges(n_rows, self.batch_size) {
            let batch = self.features.slice(s![start..end, ..]);
            let mut mean_prediction = Array1::<f64>::zeros(end - start);
            for _ in 0..self.m_samples {
                let imputed = self.imputer.impute(batch, known, rng)?;
                mean_prediction += &self.predict(imputed.view())?;
            }
            mean_prediction /= self.m_samples as f64;
            loss_sum += self
                .config
                .loss
                .sum(mean_prediction.view(), self.targets.slice(s![start..end]));
        }
        check_finite(loss_sum / n_rows as f64, "the loss of a feature subset")
    }

    /// Loss of always predicting the mean prediction, minus the model's loss.
    ///
    /// This is the total predictive value the SAGE values distribute, and the
    /// reference against which convergence is judged.
    pub fn estimate_total(&self) -> Result<f64, EstimationError> {
        let constant = Array1::from_elem(self.targets.len(), self.mean_prediction);
        let marginal_loss = self.config.loss.mean(constant.view(), self.targets);
        check_finite(marginal_loss - self.full_loss, "the total value to explain")
    }

    /// Draws one permutation and returns each feature's loss reduction along it.
    fn sample_permutation(&self, rng: &mut StdRng) -> Result<Vec<f64>, EstimationError> {
        let d = self.num_features();
        let mut order: Vec<usize> = (0..d).collect();
        order.shuffle(rng);

        let mut known = vec![false; d];
        let mut contributions = vec![0.0; d];
        let mut previous = self.evaluate_loss(&known, rng)?;
        for &feature in &order {
            known[feature] = true;
            let current = self.evaluate_loss(&known, rng)?;
            contributions[feature] = previous - current;
            previous = current;
        }
        Ok(contributions)
    }

    fn run_shard(
        &self,
        shard: Shard,
        run_seed: u64,
        mut on_permutation: impl FnMut(),
    ) -> Result<ImportanceTracker, EstimationError> {
        let mut rng = StdRng::seed_from_u64(shard_seed(run_seed, shard.index));
        let mut tracker = ImportanceTracker::new(self.num_features());
        for _ in 0..shard.permutations {
            let contributions = self.sample_permutation(&mut rng)?;
            tracker.update(&contributions);
            on_permutation();
        }
        Ok(tracker)
    }

    /// The convergence reference, or `None` when it cannot be used.
    fn convergence_reference(&self) -> Result<Option<f64>, EstimationError> {
        let total = self.estimate_total()?;
        if total > 0.0 {
            Ok(Some(total))
        } else {
            log::warn!(
                "Total value to explain is {total:.6}; convergence detection is disabled for this run"
            );
            Ok(None)
        }
    }
}

impl<P, I> SageEstimator<'_, P, I>
where
    P: Predictor + Sync,
    I: Imputer + Sync,
{
    /// Estimates SAGE values by unrolling `n_samples` random permutations.
    ///
    /// With `parallel` set, each round evaluates one shard per rayon thread.
    /// With `detect_convergence` set, sampling stops after the first round in
    /// which the widest standard error drops below `convergence_threshold`
    /// times the total value to explain.
    pub fn permutation_sampling(
        &self,
        progress: &mut dyn SamplingProgress,
    ) -> Result<SageValues, EstimationError> {
        let run_seed = self.config.seed.unwrap_or_else(rand::random);
        let shards = plan_shards(self.config.n_samples, self.config.shard_size);
        let round_size = if self.config.parallel {
            rayon::current_num_threads().max(1)
        } else {
            1
        };
        let reference = if self.config.detect_convergence {
            self.convergence_reference()?
        } else {
            None
        };

        log::info!(
            "Sampling {} permutations of {} features (seed {}, {} rows, batch {} x {} draws)",
            self.config.n_samples,
            self.num_features(),
            run_seed,
            self.features.nrows(),
            self.batch_size,
            self.m_samples
        );

        let mut tracker = ImportanceTracker::new(self.num_features());
        let mut converged = false;
        progress.on_start(self.config.n_samples as u64);

        for round in shards.chunks(round_size) {
            if self.config.parallel {
                // Workers report each permutation through one shared counter.
                let observer = Mutex::new((tracker.count(), &mut *progress));
                let shard_trackers = round
                    .par_iter()
                    .map(|&shard| {
                        self.run_shard(shard, run_seed, || {
                            let mut guard =
                                observer.lock().unwrap_or_else(PoisonError::into_inner);
                            let (completed, sink) = &mut *guard;
                            *completed += 1;
                            sink.on_advance(*completed);
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                for shard_tracker in &shard_trackers {
                    tracker.merge(shard_tracker);
                }
            } else {
                for &shard in round {
                    let completed = tracker.count();
                    let mut in_shard = 0;
                    let shard_tracker = self.run_shard(shard, run_seed, || {
                        in_shard += 1;
                        progress.on_advance(completed + in_shard);
                    })?;
                    tracker.merge(&shard_tracker);
                }
            }

            // A standard error needs at least two observations.
            if let Some(total) = reference.filter(|_| tracker.count() >= 2) {
                let ratio = tracker.max_std_error() / total;
                log::debug!(
                    "After {} permutations: max std error {:.6}, total {:.6}, ratio {:.4}",
                    tracker.count(),
                    tracker.max_std_error(),
                    total,
                    ratio
                );
                if ratio < self.config.convergence_threshold {
                    log::info!("Converged after {} permutations; stopping early", tracker.count());
                    converged = true;
                    break;
                }
            }
        }
        progress.on_finish();

        let result = tracker.finalize(converged);
        for (j, &value) in result.values.iter().enumerate() {
            check_finite(value, &format!("the SAGE value of feature {j}"))?;
        }
        log::info!(
            "SAGE values sum to {:.6} over {} permutations",
            result.sum(),
            result.n_permutations
        );
        Ok(result)
    }
}

/// Estimates SAGE values for `dataset` in one call, drawing a progress bar when
/// `config.bar` is set.
pub fn permutation_sampling<P, I>(
    predictor: &P,
    imputer: &I,
    dataset: &Dataset,
    config: &SageConfig,
) -> Result<SageValues, EstimationError>
where
    P: Predictor + Sync,
    I: Imputer + Sync,
{
    let estimator = SageEstimator::new(
        predictor,
        imputer,
        dataset.features.view(),
        dataset.targets.view(),
        config.clone(),
    )?;
    if config.bar {
        estimator.permutation_sampling(&mut BarProgress::new())
    } else {
        estimator.permutation_sampling(&mut NoopProgress)
    }
}
