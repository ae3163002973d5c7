//! Classical learners, model selection and ensembling.
//!
//! Every learner follows the same two-step shape: an [`Estimator`] holds an
//! unfitted configuration and produces an immutable fitted [`Classifier`].
//! Fitted models are `Send + Sync` so combiners can share them through `Arc`.

pub mod bank;
pub mod boosting;
pub mod cv;
pub mod ensemble;
pub mod forest;
mod linalg;
pub mod mixture;
pub mod pca;
pub mod svm;
pub mod tree;

use ndarray::{Array2, ArrayView2};

use crate::error::{ClassifierError, Result};

/// A fitted model producing class probabilities.
pub trait Classifier: Send + Sync {
    fn n_classes(&self) -> usize;

    /// One row per sample, one column per class; rows sum to one.
    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64>;

    fn predict(&self, x: ArrayView2<'_, f64>) -> Vec<usize> {
        argmax_rows(&self.predict_proba(x))
    }
}

/// An unfitted model configuration.
pub trait Estimator: Send + Sync {
    type Model: Classifier + 'static;

    fn fit(&self, x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize) -> Result<Self::Model>;

    /// Hyperparameters in `name=value` form.
    fn describe(&self) -> String;
}

/// Object-safe view of [`Estimator`] for heterogeneous collections.
pub trait Refit: Send + Sync {
    fn refit(
        &self,
        x: ArrayView2<'_, f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<Box<dyn Classifier>>;
}

impl<E: Estimator> Refit for E {
    fn refit(
        &self,
        x: ArrayView2<'_, f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<Box<dyn Classifier>> {
        Ok(Box::new(self.fit(x, y, n_classes)?))
    }
}

/// Index of the largest entry in each row; the first wins ties.
pub fn argmax_rows(scores: &Array2<f64>) -> Vec<usize> {
    scores
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, &v)| {
                    if v > best.1 {
                        (i, v)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect()
}

pub(crate) fn validate_training_set(
    x: ArrayView2<'_, f64>,
    y: &[usize],
    n_classes: usize,
) -> Result<()> {
    if x.nrows() == 0 {
        return Err(ClassifierError::invalid("training set is empty"));
    }
    if x.nrows() != y.len() {
        return Err(ClassifierError::DimensionMismatch {
            expected: x.nrows(),
            got: y.len(),
        });
    }
    if n_classes == 0 {
        return Err(ClassifierError::invalid("at least one class is required"));
    }
    if let Some(&label) = y.iter().find(|&&label| label >= n_classes) {
        return Err(ClassifierError::invalid(format!(
            "label {label} outside 0..{n_classes}"
        )));
    }
    Ok(())
}

/// Rescales each row to sum to one; an all-zero row becomes uniform.
pub(crate) fn normalize_rows(mut proba: Array2<f64>) -> Array2<f64> {
    let width = proba.ncols().max(1) as f64;
    for mut row in proba.rows_mut() {
        let total: f64 = row.sum();
        if total > 0.0 && total.is_finite() {
            row.mapv_inplace(|v| v / total);
        } else {
            row.fill(1.0 / width);
        }
    }
    proba
}
