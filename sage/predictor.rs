//! The prediction capability the estimator explains.
//!
//! The estimator never inspects a model. Anything that can turn a 2-D batch
//! (rows are examples, columns are features) into one prediction per row can
//! be explained: a fitted [`crate::model::LinearModel`], a closure, or a
//! wrapper around an external inference backend.

use ndarray::{Array1, ArrayView2};
use std::error::Error;

/// Error raised by a predictor. The estimator aborts on the first one.
pub type PredictorError = Box<dyn Error + Send + Sync>;

pub trait Predictor {
    fn predict(&self, batch: ArrayView2<f64>) -> Result<Array1<f64>, PredictorError>;
}

impl<P: Predictor + ?Sized> Predictor for &P {
    fn predict(&self, batch: ArrayView2<f64>) -> Result<Array1<f64>, PredictorError> {
        (**self).predict(batch)
    }
}

/// Adapts a closure into a [`Predictor`].
pub struct FnPredictor<F>(pub F);

impl<F> FnPredictor<F>
where
    F: Fn(ArrayView2<f64>) -> Result<Array1<f64>, PredictorError>,
{
    pub fn new(predict: F) -> Self {
        Self(predict)
    }
}

impl<F> Predictor for FnPredictor<F>
where
    F: Fn(ArrayView2<f64>) -> Result<Array1<f64>, PredictorError>,
{
    fn predict(&self, batch: ArrayView2<f64>) -> Result<Array1<f64>, PredictorError> {
        (self.0)(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Axis, array};

    #[test]
    fn closure_predictor_sees_the_whole_batch() {
        let predictor = FnPredictor::new(|batch| Ok(batch.sum_axis(Axis(1))));
        let batch = array![[1.0, 2.0], [3.0, 4.0]];
        let preds = predictor.predict(batch.view()).unwrap();
        assert_eq!(preds, array![3.0, 7.0]);
    }

    #[test]
    fn predictor_errors_propagate() {
        let predictor =
            FnPredictor::new(|batch| Err(format!("cannot score {} rows", batch.nrows()).into()));
        let batch = array![[1.0]];
        let err = predictor.predict(batch.view()).unwrap_err();
        assert_eq!(err.to_string(), "cannot score 1 rows");
    }
}
