//! Synthetic datasets shared by the integration tests.

use ndarray::{Array1, Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use sage::predictor::PredictorError;
use sage::{Dataset, FnPredictor, Predictor};

/// Builder for datasets whose target is a fixed linear combination of
/// independent standard normal features.
pub struct SyntheticDataBuilder {
    n_samples: usize,
    coefficients: Vec<f64>,
    noise_sd: f64,
    seed: u64,
}

impl SyntheticDataBuilder {
    /// Three features `A`, `B`, `C` with `y = A + 2B` and no noise.
    pub fn new(n_samples: usize) -> Self {
        Self {
            n_samples,
            coefficients: vec![1.0, 2.0, 0.0],
            noise_sd: 0.0,
            seed: 42,
        }
    }

    pub fn with_noise(mut self, sd: f64) -> Self {
        self.noise_sd = sd;
        self
    }

    pub fn seed(mut self, s: u64) -> Self {
        self.seed = s;
        self
    }

    pub fn build(self) -> Dataset {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let d = self.coefficients.len();
        let features =
            Array2::from_shape_fn((self.n_samples, d), |_| rng.sample::<f64, _>(StandardNormal));
        let beta = Array1::from(self.coefficients);
        let noise: Array1<f64> = (0..self.n_samples)
            .map(|_| self.noise_sd * rng.sample::<f64, _>(StandardNormal))
            .collect();
        let targets = features.dot(&beta) + noise;
        let names = (0..d)
            .map(|j| ((b'A' + j as u8) as char).to_string())
            .collect();
        Dataset::new(features, targets, names).unwrap()
    }
}

/// The data-generating function `y = A + 2B`, reading `A` and `B` from the
/// given column positions.
pub fn true_model(a: usize, b: usize) -> impl Predictor + Sync {
    FnPredictor::new(move |batch: ArrayView2<f64>| -> Result<Array1<f64>, PredictorError> {
        Ok(batch.column(a).to_owned() + &(batch.column(b).to_owned() * 2.0))
    })
}
