use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::tree::{depth_label, DecisionTree, FittedTree, MaxFeatures};
use super::{normalize_rows, validate_training_set, Classifier, Estimator};
use crate::error::Result;

/// Bagged ensemble of randomised CART trees.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomForest {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RandomForestModel {
    trees: Vec<FittedTree>,
    n_classes: usize,
}

impl RandomForestModel {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Estimator for RandomForest {
    type Model = RandomForestModel;

    fn fit(
        &self,
        x: ArrayView2<'_, f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<RandomForestModel> {
        validate_training_set(x, y, n_classes)?;
        let template = DecisionTree {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            max_features: self.max_features,
            seed: self.seed,
        };
        let n = x.nrows();
        let trees = (0..self.n_estimators.max(1))
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let rows = if self.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                template.grow(x, y, n_classes, rows, rng)
            })
            .collect();
        Ok(RandomForestModel { trees, n_classes })
    }

    fn describe(&self) -> String {
        format!(
            "n_estimators={} max_depth={} min_samples_split={}",
            self.n_estimators,
            depth_label(self.max_depth),
            self.min_samples_split
        )
    }
}

impl Classifier for RandomForestModel {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut proba = Array2::<f64>::zeros((x.nrows(), self.n_classes));
        for (sample, mut out) in x.rows().into_iter().zip(proba.rows_mut()) {
            for tree in &self.trees {
                for (slot, &p) in out.iter_mut().zip(tree.leaf_distribution(sample)) {
                    *slot += p;
                }
            }
        }
        normalize_rows(proba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn blobs() -> (Array2<f64>, Vec<usize>) {
        let x = Array2::from_shape_fn((30, 4), |(r, c)| {
            let class = r % 3;
            class as f64 * 10.0 + ((r * 7 + c * 3) % 5) as f64 * 0.1
        });
        let y = (0..30).map(|r| r % 3).collect();
        (x, y)
    }

    #[test]
    fn forest_learns_separable_blobs() {
        let (x, y) = blobs();
        let forest = RandomForest {
            n_estimators: 15,
            ..RandomForest::default()
        };
        let model = forest.fit(x.view(), &y, 3).unwrap();
        assert_eq!(model.n_trees(), 15);
        assert_eq!(model.predict(x.view()), y);
        let proba = model.predict_proba(x.view());
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn same_seed_gives_same_forest() {
        let (x, y) = blobs();
        let forest = RandomForest {
            n_estimators: 5,
            ..RandomForest::default()
        };
        let a = forest.fit(x.view(), &y, 3).unwrap().predict_proba(x.view());
        let b = forest.fit(x.view(), &y, 3).unwrap().predict_proba(x.view());
        assert_eq!(a, b);
    }
}
