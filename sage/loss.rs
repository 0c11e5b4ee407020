use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Probabilities are kept away from 0 and 1 before taking logarithms.
const PROBABILITY_CLAMP: f64 = 1e-12;

/// Pointwise loss comparing a prediction with its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    /// Squared error, `(prediction - target)^2`.
    #[default]
    Mse,
    /// Binary log loss on a predicted probability of the positive class.
    CrossEntropy,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown loss '{0}'. Expected one of: mse, cross entropy.")]
pub struct UnknownLoss(pub String);

impl FromStr for Loss {
    type Err = UnknownLoss;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "mse" | "squared error" => Ok(Loss::Mse),
            "cross entropy" | "bce" | "log loss" => Ok(Loss::CrossEntropy),
            _ => Err(UnknownLoss(s.to_string())),
        }
    }
}

impl fmt::Display for Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loss::Mse => f.write_str("mse"),
            Loss::CrossEntropy => f.write_str("cross entropy"),
        }
    }
}

impl Loss {
    pub fn pointwise(self, prediction: f64, target: f64) -> f64 {
        match self {
            Loss::Mse => {
                let residual = prediction - target;
                residual * residual
            }
            Loss::CrossEntropy => {
                let p = prediction.clamp(PROBABILITY_CLAMP, 1.0 - PROBABILITY_CLAMP);
                -(target * p.ln() + (1.0 - target) * (1.0 - p).ln())
            }
        }
    }

    /// Unnormalised sum of pointwise losses.
    ///
    /// Callers that evaluate a dataset in uneven batches add these sums and
    /// divide once by the total row count, so every row carries equal weight.
    pub fn sum(self, predictions: ArrayView1<f64>, targets: ArrayView1<f64>) -> f64 {
        predictions
            .iter()
            .zip(targets.iter())
            .map(|(&p, &t)| self.pointwise(p, t))
            .sum()
    }

    pub fn mean(self, predictions: ArrayView1<f64>, targets: ArrayView1<f64>) -> f64 {
        if predictions.is_empty() {
            return 0.0;
        }
        self.sum(predictions, targets) / predictions.len() as f64
    }
}
