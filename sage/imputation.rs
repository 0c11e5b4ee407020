//! Filling in held-out features.
//!
//! Removing a feature from a model that requires every input is approximated by
//! replacing the feature's value with a draw from a background distribution.
//!
//! [`MarginalImputation`] samples one background row per output row per call and
//! copies all held-out columns of the output row from it. Held-out columns of a
//! single output row therefore keep the joint structure of the background row
//! they came from, while staying independent of the row's known columns.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ImputationError {
    #[error("The background dataset contains no rows.")]
    EmptyBackground,
    #[error("Mask covers {found} columns but the background dataset has {expected}.")]
    MaskLengthMismatch { found: usize, expected: usize },
    #[error("Batch has {found} columns but the background dataset has {expected}.")]
    BatchWidthMismatch { found: usize, expected: usize },
    #[error("Reference vector has {found} values but the imputer expects {expected}.")]
    ReferenceLengthMismatch { found: usize, expected: usize },
    #[error("Reference value for column {0} is not finite.")]
    NonFiniteReference(usize),
}

/// Replaces held-out columns of a batch.
///
/// `known[j] == true` means column `j` passes through unchanged; every other
/// column is imputed. Implementations draw all randomness from `rng`.
pub trait Imputer {
    fn num_features(&self) -> usize;

    /// Whether repeated calls with the same inputs always return the same batch.
    fn is_deterministic(&self) -> bool;

    fn impute<R: Rng + ?Sized>(
        &self,
        batch: ArrayView2<f64>,
        known: &[bool],
        rng: &mut R,
    ) -> Result<Array2<f64>, ImputationError>;
}

fn check_shapes(
    expected: usize,
    batch: &ArrayView2<f64>,
    known: &[bool],
) -> Result<(), ImputationError> {
    if known.len() != expected {
        return Err(ImputationError::MaskLengthMismatch {
            found: known.len(),
            expected,
        });
    }
    if batch.ncols() != expected {
        return Err(ImputationError::BatchWidthMismatch {
            found: batch.ncols(),
            expected,
        });
    }
    Ok(())
}

fn hidden_columns(known: &[bool]) -> Vec<usize> {
    known
        .iter()
        .enumerate()
        .filter(|(_, is_known)| !**is_known)
        .map(|(j, _)| j)
        .collect()
}

/// Samples held-out values from the empirical distribution of a background set.
#[derive(Debug, Clone)]
pub struct MarginalImputation {
    background: Array2<f64>,
}

impl MarginalImputation {
    pub fn new(background: Array2<f64>) -> Result<Self, ImputationError> {
        if background.nrows() == 0 {
            return Err(ImputationError::EmptyBackground);
        }
        Ok(Self { background })
    }

    pub fn background(&self) -> ArrayView2<f64> {
        self.background.view()
    }
}

impl Imputer for MarginalImputation {
    fn num_features(&self) -> usize {
        self.background.ncols()
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn impute<R: Rng + ?Sized>(
        &self,
        batch: ArrayView2<f64>,
        known: &[bool],
        rng: &mut R,
    ) -> Result<Array2<f64>, ImputationError> {
        check_shapes(self.num_features(), &batch, known)?;

        let mut output = batch.to_owned();
        let hidden = hidden_columns(known);
        if hidden.is_empty() {
            return Ok(output);
        }

        let n_background = self.background.nrows();
        for mut row in output.rows_mut() {
            let source = self.background.row(rng.gen_range(0..n_background));
            for &j in &hidden {
                row[j] = source[j];
            }
        }
        Ok(output)
    }
}

/// Fills held-out columns with one fixed reference vector.
///
/// There is no randomness, so averaging several imputation draws is pointless;
/// the sampler evaluates a single draw per subset for this imputer.
#[derive(Debug, Clone)]
pub struct ReferenceImputation {
    reference: Array1<f64>,
}

impl ReferenceImputation {
    pub fn new(reference: Array1<f64>) -> Result<Self, ImputationError> {
        if let Some(j) = reference.iter().position(|v| !v.is_finite()) {
            return Err(ImputationError::NonFiniteReference(j));
        }
        Ok(Self { reference })
    }

    /// Uses the column means of `background` as the reference.
    pub fn from_background_mean(background: ArrayView2<f64>) -> Result<Self, ImputationError> {
        let mean = background
            .mean_axis(Axis(0))
            .ok_or(ImputationError::EmptyBackground)?;
        Self::new(mean)
    }

    pub fn reference(&self) -> &Array1<f64> {
        &self.reference
    }
}

impl Imputer for ReferenceImputation {
    fn num_features(&self) -> usize {
        self.reference.len()
    }

    fn is_deterministic(&self) -> bool {
        true
    }

    fn impute<R: Rng + ?Sized>(
        &self,
        batch: ArrayView2<f64>,
        known: &[bool],
        rng: &mut R,
    ) -> Result<Array2<f64>, ImputationError> {
        // The generator is part of the shared signature only.
        let _ = rng;
        check_shapes(self.num_features(), &batch, known)?;

        let mut output = batch.to_owned();
        for j in hidden_columns(known) {
            output.column_mut(j).fill(self.reference[j]);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// Background rows satisfy `col1 == 10 * col0` and `col2 == -col0`.
    fn linked_background() -> Array2<f64> {
        Array2::from_shape_fn((40, 3), |(i, j)| {
            let base = (i + 1) as f64;
            match j {
                0 => base,
                1 => 10.0 * base,
                _ => -base,
            }
        })
    }

    #[test]
    fn known_columns_pass_through_unchanged() {
        let imputer = MarginalImputation::new(linked_background()).unwrap();
        let batch = array![[0.5, 0.25, 0.125], [7.0, 8.0, 9.0]];
        let mut rng = StdRng::seed_from_u64(1);
        let out = imputer
            .impute(batch.view(), &[true, false, true], &mut rng)
            .unwrap();
        assert_eq!(out.column(0), batch.column(0));
        assert_eq!(out.column(2), batch.column(2));
        for &v in out.column(1).iter() {
            assert!(v >= 10.0 && v <= 400.0 && (v / 10.0).fract() == 0.0);
        }
    }

    #[test]
    fn held_out_columns_share_one_background_row() {
        let imputer = MarginalImputation::new(linked_background()).unwrap();
        let batch = Array2::<f64>::zeros((200, 3));
        let mut rng = StdRng::seed_from_u64(2);
        let out = imputer
            .impute(batch.view(), &[false, false, false], &mut rng)
            .unwrap();
        for row in out.rows() {
            assert_eq!(row[1], 10.0 * row[0]);
            assert_eq!(row[2], -row[0]);
        }
        // Rows draw independently, so 200 draws from 40 rows are not all equal.
        let first = out[[0, 0]];
        assert!(out.column(0).iter().any(|&v| v != first));
    }

    #[test]
    fn all_known_mask_returns_the_batch() {
        let imputer = MarginalImputation::new(linked_background()).unwrap();
        assert_eq!(imputer.background(), linked_background().view());
        assert_eq!(imputer.num_features(), 3);
        let batch = array![[1.5, 2.5, 3.5]];
        let mut rng = StdRng::seed_from_u64(3);
        let out = imputer
            .impute(batch.view(), &[true, true, true], &mut rng)
            .unwrap();
        assert_eq!(out, batch);
    }

    #[test]
    fn same_seed_gives_same_draws() {
        let imputer = MarginalImputation::new(linked_background()).unwrap();
        let batch = Array2::<f64>::zeros((25, 3));
        let mask = [false, true, false];
        let a = imputer
            .impute(batch.view(), &mask, &mut StdRng::seed_from_u64(9))
            .unwrap();
        let b = imputer
            .impute(batch.view(), &mask, &mut StdRng::seed_from_u64(9))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn mask_and_batch_widths_are_checked() {
        let imputer = MarginalImputation::new(linked_background()).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let batch = Array2::<f64>::zeros((2, 3));
        assert_eq!(
            imputer.impute(batch.view(), &[true, false], &mut rng),
            Err(ImputationError::MaskLengthMismatch {
                found: 2,
                expected: 3
            })
        );
        let narrow = Array2::<f64>::zeros((2, 2));
        assert_eq!(
            imputer.impute(narrow.view(), &[true, false, true], &mut rng),
            Err(ImputationError::BatchWidthMismatch {
                found: 2,
                expected: 3
            })
        );
    }

    #[test]
    fn empty_background_is_rejected() {
        assert_eq!(
            MarginalImputation::new(Array2::zeros((0, 3))).unwrap_err(),
            ImputationError::EmptyBackground
        );
    }

    #[test]
    fn reference_imputation_uses_column_means() {
        let background = array![[1.0, 10.0], [3.0, 30.0]];
        let imputer = ReferenceImputation::from_background_mean(background.view()).unwrap();
        assert_eq!(imputer.reference(), &array![2.0, 20.0]);
        assert!(imputer.is_deterministic());

        let batch = array![[5.0, 6.0], [7.0, 8.0]];
        let mut rng = StdRng::seed_from_u64(5);
        let out = imputer.impute(batch.view(), &[true, false], &mut rng).unwrap();
        assert_eq!(out, array![[5.0, 20.0], [7.0, 20.0]]);
    }

    #[test]
    fn reference_must_be_finite() {
        assert_eq!(
            ReferenceImputation::new(array![0.0, f64::INFINITY]).unwrap_err(),
            ImputationError::NonFiniteReference(1)
        );
    }
}
