use std::sync::Arc;

use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use tracing::{info, warn};

use super::cv::StratifiedKFold;
use super::forest::{RandomForest, RandomForestModel};
use super::{validate_training_set, Classifier, Estimator, Refit};
use crate::error::{ClassifierError, Result};

/// A base learner taking part in stacking.
///
/// `estimator` is the selected configuration, refit on each fold to build
/// out-of-fold meta features; `fitted` is the instance trained on the full
/// training set and used at prediction time.
#[derive(Clone)]
pub struct StackMember {
    pub name: String,
    pub estimator: Arc<dyn Refit>,
    pub fitted: Arc<dyn Classifier>,
}

impl std::fmt::Debug for StackMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackMember").field("name", &self.name).finish()
    }
}

/// Meta-learner over the class probabilities of several base models.
#[derive(Debug, Clone)]
pub struct Stacking {
    pub members: Vec<StackMember>,
    pub final_estimator: RandomForest,
    pub folds: usize,
}

pub struct StackingModel {
    members: Vec<Arc<dyn Classifier>>,
    final_model: RandomForestModel,
    n_classes: usize,
}

fn member_features(members: &[Arc<dyn Classifier>], x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
    let blocks: Vec<Array2<f64>> = members.par_iter().map(|m| m.predict_proba(x)).collect();
    let views: Vec<ArrayView2<'_, f64>> = blocks.iter().map(|b| b.view()).collect();
    concatenate(Axis(1), &views).map_err(|err| ClassifierError::invalid(err.to_string()))
}

impl Estimator for Stacking {
    type Model = StackingModel;

    fn fit(&self, x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize) -> Result<StackingModel> {
        validate_training_set(x, y, n_classes)?;
        if self.members.is_empty() {
            return Err(ClassifierError::invalid("stacking needs at least one member"));
        }
        if let Some(member) = self.members.iter().find(|m| m.fitted.n_classes() != n_classes) {
            return Err(ClassifierError::DimensionMismatch {
                expected: n_classes,
                got: member.fitted.n_classes(),
            });
        }
        let folds = StratifiedKFold::new(self.folds).split(y)?;
        let width = n_classes;
        let mut meta = Array2::<f64>::zeros((x.nrows(), self.members.len() * width));

        let jobs: Vec<(usize, usize)> = (0..folds.len())
            .flat_map(|f| (0..self.members.len()).map(move |m| (f, m)))
            .collect();
        let blocks = jobs
            .par_iter()
            .map(|&(f, m)| {
                let (train, valid) = &folds[f];
                let train_y: Vec<usize> = train.iter().map(|&r| y[r]).collect();
                let model = self.members[m].estimator.refit(
                    x.select(Axis(0), train).view(),
                    &train_y,
                    n_classes,
                )?;
                Ok((f, m, model.predict_proba(x.select(Axis(0), valid).view())))
            })
            .collect::<Result<Vec<_>>>()?;
        for (f, m, proba) in blocks {
            for (row, values) in folds[f].1.iter().zip(proba.rows()) {
                meta.slice_mut(s![*row, m * width..(m + 1) * width])
                    .assign(&values);
            }
        }

        info!(
            members = self.members.len(),
            folds = folds.len(),
            "fitting stacking meta learner"
        );
        let final_model = self.final_estimator.fit(meta.view(), y, n_classes)?;
        Ok(StackingModel {
            members: self.members.iter().map(|m| Arc::clone(&m.fitted)).collect(),
            final_model,
            n_classes,
        })
    }

    fn describe(&self) -> String {
        let names: Vec<&str> = self.members.iter().map(|m| m.name.as_str()).collect();
        format!("members={} final=random_forest", names.join("+"))
    }
}

impl Classifier for StackingModel {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        match member_features(&self.members, x) {
            Ok(meta) => self.final_model.predict_proba(meta.view()),
            Err(err) => {
                warn!(%err, "stacking members disagree, predicting uniform probabilities");
                Array2::from_elem((x.nrows(), self.n_classes), 1.0 / self.n_classes as f64)
            }
        }
    }
}

/// Averages the probabilities of already-fitted models.
pub struct SoftVoting {
    members: Vec<Arc<dyn Classifier>>,
    n_classes: usize,
}

impl SoftVoting {
    pub fn new(members: Vec<Arc<dyn Classifier>>) -> Result<Self> {
        let Some(first) = members.first() else {
            return Err(ClassifierError::invalid("voting needs at least one member"));
        };
        let n_classes = first.n_classes();
        if let Some(other) = members.iter().find(|m| m.n_classes() != n_classes) {
            return Err(ClassifierError::DimensionMismatch {
                expected: n_classes,
                got: other.n_classes(),
            });
        }
        Ok(Self { members, n_classes })
    }
}

impl Classifier for SoftVoting {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut total = Array2::<f64>::zeros((x.nrows(), self.n_classes));
        for member in &self.members {
            total += &member.predict_proba(x);
        }
        total / self.members.len() as f64
    }
}
