use ndarray::{ArrayView2, Axis};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Classifier, Estimator};
use crate::error::{ClassifierError, Result};

/// Train/validation row indices for one fold.
pub type Fold = (Vec<usize>, Vec<usize>);

/// K folds that keep each class's share roughly constant.
///
/// Rows are dealt to folds round-robin, class by class, without shuffling.
/// The deal continues across classes instead of restarting at fold 0, so
/// fold sizes differ by at most one and no fold is empty while there are at
/// least as many rows as folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StratifiedKFold {
    pub n_splits: usize,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize) -> Self {
        Self { n_splits }
    }

    pub fn split(&self, y: &[usize]) -> Result<Vec<Fold>> {
        let k = self.n_splits;
        if k < 2 {
            return Err(ClassifierError::invalid("cross validation needs at least 2 folds"));
        }
        if y.len() < k {
            return Err(ClassifierError::invalid(format!(
                "cannot split {} samples into {k} folds",
                y.len()
            )));
        }

        let n_classes = y.iter().copied().max().map_or(0, |m| m + 1);
        let mut seen = vec![0usize; n_classes];
        for &label in y {
            seen[label] += 1;
        }
        let mut fold_of = vec![0usize; y.len()];
        let mut dealt = 0;
        for class in 0..n_classes {
            for row in (0..y.len()).filter(|&row| y[row] == class) {
                fold_of[row] = dealt % k;
                dealt += 1;
            }
        }
        if let Some(smallest) = seen.iter().copied().filter(|&c| c > 0).min() {
            if smallest < k {
                warn!(smallest, folds = k, "least populated class has fewer members than folds");
            }
        }

        Ok((0..k)
            .map(|fold| {
                (0..y.len()).partition(|&row| fold_of[row] != fold)
            })
            .collect())
    }
}

pub(crate) fn accuracy(truth: &[usize], predicted: &[usize]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = truth.iter().zip(predicted).filter(|(a, b)| a == b).count();
    correct as f64 / truth.len() as f64
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateScore {
    pub params: String,
    pub mean_accuracy: f64,
}

/// Result of an exhaustive search; `model` is the best candidate refit on
/// the whole training set.
#[derive(Debug)]
pub struct SearchOutcome<E: Estimator> {
    pub best: E,
    pub best_score: f64,
    pub model: E::Model,
    pub scores: Vec<CandidateScore>,
}

/// Exhaustive hyperparameter search scored by mean fold accuracy.
#[derive(Debug, Clone)]
pub struct GridSearch<E> {
    pub candidates: Vec<E>,
    pub folds: StratifiedKFold,
}

impl<E: Estimator + Clone> GridSearch<E> {
    pub fn new(candidates: Vec<E>, n_splits: usize) -> Self {
        Self {
            candidates,
            folds: StratifiedKFold::new(n_splits),
        }
    }

    pub fn fit(
        &self,
        x: ArrayView2<'_, f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<SearchOutcome<E>> {
        if self.candidates.is_empty() {
            return Err(ClassifierError::invalid("grid search has no candidates"));
        }
        let folds = self.folds.split(y)?;
        let jobs: Vec<(usize, &Fold)> = (0..self.candidates.len())
            .flat_map(|c| folds.iter().map(move |fold| (c, fold)))
            .collect();

        let fold_scores = jobs
            .par_iter()
            .map(|&(candidate, (train, valid))| {
                if valid.is_empty() {
                    return Ok(None);
                }
                let train_x = x.select(Axis(0), train);
                let train_y: Vec<usize> = train.iter().map(|&r| y[r]).collect();
                let model = self.candidates[candidate].fit(train_x.view(), &train_y, n_classes)?;
                let predicted = model.predict(x.select(Axis(0), valid).view());
                let truth: Vec<usize> = valid.iter().map(|&r| y[r]).collect();
                Ok(Some((candidate, accuracy(&truth, &predicted))))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut totals = vec![(0.0, 0usize); self.candidates.len()];
        for (candidate, score) in fold_scores.into_iter().flatten() {
            totals[candidate].0 += score;
            totals[candidate].1 += 1;
        }
        let scores: Vec<CandidateScore> = self
            .candidates
            .iter()
            .zip(&totals)
            .map(|(candidate, &(total, scored))| CandidateScore {
                params: candidate.describe(),
                mean_accuracy: if scored == 0 { 0.0 } else { total / scored as f64 },
            })
            .collect();
        for score in &scores {
            debug!(params = %score.params, mean_accuracy = score.mean_accuracy, "candidate scored");
        }

        let (best_index, best_score) = scores
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, s)| {
                if s.mean_accuracy > best.1 {
                    (i, s.mean_accuracy)
                } else {
                    best
                }
            });
        let best = self.candidates[best_index].clone();
        info!(params = %best.describe(), best_score, "refitting best candidate");
        let model = best.fit(x, y, n_classes)?;
        Ok(SearchOutcome {
            best,
            best_score,
            model,
            scores,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tree::DecisionTree;
    use ndarray::Array2;

    #[test]
    fn folds_are_stratified_and_disjoint() {
        let y = [0, 0, 0, 1, 1, 1, 0, 1, 0];
        let folds = StratifiedKFold::new(3).split(&y).unwrap();
        assert_eq!(folds.len(), 3);
        let mut covered = Vec::new();
        for (train, valid) in &folds {
            assert_eq!(train.len() + valid.len(), y.len());
            assert!(valid.iter().any(|&r| y[r] == 0));
            assert!(valid.iter().any(|&r| y[r] == 1));
            covered.extend(valid.iter().copied());
        }
        covered.sort_unstable();
        assert_eq!(covered, (0..y.len()).collect::<Vec<_>>());
    }

    #[test]
    fn small_classes_still_fill_every_fold() {
        let y = [0, 0, 1, 1];
        let folds = StratifiedKFold::new(3).split(&y).unwrap();
        assert!(folds.iter().all(|(_, valid)| !valid.is_empty()));
        let sizes: Vec<usize> = folds.iter().map(|(_, valid)| valid.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
    }

    #[test]
    fn separable_small_classes_score_perfectly() {
        let x = Array2::from_shape_vec((4, 1), vec![0.0, 0.1, 5.0, 5.1]).unwrap();
        let y = [0, 0, 1, 1];
        let outcome = GridSearch::new(vec![DecisionTree::default()], 3)
            .fit(x.view(), &y, 2)
            .unwrap();
        assert_eq!(outcome.best_score, 1.0);
    }

    #[test]
    fn rejects_degenerate_fold_counts() {
        assert!(StratifiedKFold::new(1).split(&[0, 1]).is_err());
        assert!(StratifiedKFold::new(5).split(&[0, 1]).is_err());
    }

    #[test]
    fn search_prefers_first_of_equal_candidates() {
        let x = Array2::from_shape_fn((12, 1), |(r, _)| if r % 2 == 0 { 0.0 } else { 1.0 });
        let y: Vec<usize> = (0..12).map(|r| r % 2).collect();
        let candidates = vec![
            DecisionTree {
                max_depth: Some(0),
                ..DecisionTree::default()
            },
            DecisionTree {
                max_depth: Some(3),
                ..DecisionTree::default()
            },
            DecisionTree {
                max_depth: Some(5),
                ..DecisionTree::default()
            },
        ];
        let outcome = GridSearch::new(candidates, 3).fit(x.view(), &y, 2).unwrap();
        assert_eq!(outcome.best.max_depth, Some(3));
        assert_eq!(outcome.best_score, 1.0);
        assert_eq!(outcome.scores.len(), 3);
        assert_eq!(outcome.model.predict(x.view()), y);
    }
}
