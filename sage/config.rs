use crate::loss::Loss;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Tuning knobs for one SAGE estimate.
///
/// Serialized as TOML. Missing keys take their defaults; unknown keys are an
/// error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SageConfig {
    /// Number of feature permutations to evaluate.
    pub n_samples: usize,
    /// Imputation draws averaged per evaluated feature subset.
    pub m_samples: usize,
    /// Explicand rows per predictor call.
    pub batch_size: usize,
    pub loss: Loss,
    /// Seed for every permutation and background draw. `None` draws one at
    /// random; it is logged so that the run can be repeated.
    pub seed: Option<u64>,
    /// Show a progress bar.
    pub bar: bool,
    /// Evaluate permutation shards on the rayon thread pool.
    pub parallel: bool,
    /// Permutations per independently seeded shard.
    pub shard_size: usize,
    /// Stop once the widest standard error falls below
    /// `convergence_threshold` times the total value to explain.
    pub detect_convergence: bool,
    pub convergence_threshold: f64,
}

impl Default for SageConfig {
    fn default() -> Self {
        Self {
            n_samples: 512,
            m_samples: 2,
            batch_size: 512,
            loss: Loss::Mse,
            seed: None,
            bar: false,
            parallel: false,
            shard_size: 16,
            detect_convergence: false,
            convergence_threshold: 0.01,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

impl SageConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Checks every hyperparameter, returning a description of the first
    /// violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.n_samples == 0 {
            return Err("n_samples must be a positive integer".to_string());
        }
        if self.m_samples == 0 {
            return Err("m_samples must be a positive integer".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be a positive integer".to_string());
        }
        if self.shard_size == 0 {
            return Err("shard_size must be a positive integer".to_string());
        }
        if !(self.convergence_threshold.is_finite() && self.convergence_threshold > 0.0) {
            return Err(format!(
                "convergence_threshold must be finite and positive, got {}",
                self.convergence_threshold
            ));
        }
        Ok(())
    }
}
