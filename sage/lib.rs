#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod config;
pub mod data;
pub mod imputation;
pub mod loss;
pub mod model;
pub mod predictor;
pub mod progress;
pub mod report;
pub mod sampler;
pub mod tracker;

pub use config::SageConfig;
pub use data::Dataset;
pub use imputation::{Imputer, MarginalImputation, ReferenceImputation};
pub use loss::Loss;
pub use model::LinearModel;
pub use predictor::{FnPredictor, Predictor, PredictorError};
pub use sampler::{EstimationError, SageEstimator, SageValues, permutation_sampling};
