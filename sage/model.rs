use crate::data::Dataset;
use crate::predictor::{Predictor, PredictorError};
use ndarray::{Array1, Array2, ArrayView2, Axis, concatenate};
use ndarray_linalg::LeastSquaresSvd;
use ndarray_linalg::error::LinalgError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Ordinary least squares model `y = intercept + x . coefficients`.
///
/// Serves as the reference predictor of the command-line tool. The estimator
/// itself only sees it through [`Predictor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    /// Defines the canonical column order the coefficients apply to.
    pub feature_names: Vec<String>,
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Least squares solve failed: {0}")]
    LinalgError(#[from] LinalgError),
    #[error("Data has {found} feature columns, but the model was trained on {expected}.")]
    MismatchedFeatureCount { found: usize, expected: usize },
    #[error(
        "Model file lists {names} feature names but {coefficients} coefficients; the file is corrupt."
    )]
    InconsistentModel { names: usize, coefficients: usize },
}

impl LinearModel {
    /// Fits intercept and coefficients by least squares (SVD based, so a rank
    /// deficient design still yields the minimum-norm solution).
    pub fn fit(data: &Dataset) -> Result<Self, ModelError> {
        let n = data.n_rows();
        let design = concatenate(
            Axis(1),
            &[Array2::<f64>::ones((n, 1)).view(), data.features.view()],
        )
        .map_err(LinalgError::from)?;

        let solution = design.least_squares(&data.targets)?.solution;
        log::info!(
            "Fitted linear model on {} rows and {} features",
            n,
            data.n_features()
        );

        Ok(Self {
            feature_names: data.feature_names.clone(),
            intercept: solution[0],
            coefficients: solution.iter().skip(1).copied().collect(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let text = fs::read_to_string(path)?;
        let model: Self = toml::from_str(&text)?;
        if model.feature_names.len() != model.coefficients.len() {
            return Err(ModelError::InconsistentModel {
                names: model.feature_names.len(),
                coefficients: model.coefficients.len(),
            });
        }
        Ok(model)
    }

    pub fn predict_checked(&self, batch: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        if batch.ncols() != self.coefficients.len() {
            return Err(ModelError::MismatchedFeatureCount {
                found: batch.ncols(),
                expected: self.coefficients.len(),
            });
        }
        let beta = Array1::from(self.coefficients.clone());
        Ok(batch.dot(&beta) + self.intercept)
    }
}

impl Predictor for LinearModel {
    fn predict(&self, batch: ArrayView2<f64>) -> Result<Array1<f64>, PredictorError> {
        Ok(self.predict_checked(batch)?)
    }
}
