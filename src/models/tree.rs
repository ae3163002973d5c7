use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::{normalize_rows, validate_training_set, Classifier, Estimator};
use crate::error::Result;

/// How many candidate features a split considers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    All,
    Sqrt,
}

impl MaxFeatures {
    fn resolve(self, n_features: usize) -> usize {
        match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => ((n_features as f64).sqrt() as usize).max(1),
        }
        .min(n_features)
        .max(1)
    }
}

/// CART classification tree grown with Gini impurity.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub max_features: MaxFeatures,
    pub seed: u64,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            max_features: MaxFeatures::All,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
pub struct FittedTree {
    nodes: Vec<Node>,
    n_classes: usize,
}

struct Grower<'a> {
    x: ArrayView2<'a, f64>,
    y: &'a [usize],
    n_classes: usize,
    params: &'a DecisionTree,
    max_features: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl DecisionTree {
    /// Grows a tree on the rows listed in `rows` (duplicates allowed).
    pub(crate) fn grow(
        &self,
        x: ArrayView2<'_, f64>,
        y: &[usize],
        n_classes: usize,
        rows: Vec<usize>,
        rng: StdRng,
    ) -> FittedTree {
        let mut grower = Grower {
            x: x.view(),
            y,
            n_classes,
            params: self,
            max_features: self.max_features.resolve(x.ncols()),
            rng,
            nodes: Vec::new(),
        };
        grower.build(rows, 0);
        FittedTree {
            nodes: grower.nodes,
            n_classes,
        }
    }
}

impl Estimator for DecisionTree {
    type Model = FittedTree;

    fn fit(&self, x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize) -> Result<FittedTree> {
        validate_training_set(x, y, n_classes)?;
        let rng = StdRng::seed_from_u64(self.seed);
        Ok(self.grow(x, y, n_classes, (0..x.nrows()).collect(), rng))
    }

    fn describe(&self) -> String {
        format!(
            "max_depth={} min_samples_split={}",
            depth_label(self.max_depth),
            self.min_samples_split
        )
    }
}

pub(crate) fn depth_label(depth: Option<usize>) -> String {
    depth.map_or_else(|| "none".to_string(), |d| d.to_string())
}

impl Grower<'_> {
    fn build(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let counts = self.class_counts(&rows);
        let is_pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        let too_small = rows.len() < self.params.min_samples_split.max(2);

        let split = if is_pure || depth_reached || too_small {
            None
        } else {
            self.best_split(&rows, &counts)
        };

        let Some(split) = split else {
            return self.push_leaf(&counts, rows.len());
        };
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&r| self.x[[r, split.feature]] <= split.threshold);
        if left_rows.is_empty() || right_rows.is_empty() {
            return self.push_leaf(&counts, rows.len());
        }

        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            distribution: Vec::new(),
        });
        let left = self.build(left_rows, depth + 1);
        let right = self.build(right_rows, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn push_leaf(&mut self, counts: &[usize], total: usize) -> usize {
        let total = total.max(1) as f64;
        let distribution = counts.iter().map(|&c| c as f64 / total).collect();
        self.nodes.push(Node::Leaf { distribution });
        self.nodes.len() - 1
    }

    fn class_counts(&self, rows: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &r in rows {
            counts[self.y[r]] += 1;
        }
        counts
    }

    fn best_split(&mut self, rows: &[usize], counts: &[usize]) -> Option<SplitCandidate> {
        let n_features = self.x.ncols();
        if n_features == 0 {
            return None;
        }
        let features = index::sample(&mut self.rng, n_features, self.max_features);
        let parent = gini(counts, rows.len());
        let mut best: Option<SplitCandidate> = None;
        let mut ordered: Vec<(f64, usize)> = Vec::with_capacity(rows.len());

        for feature in features.iter() {
            ordered.clear();
            ordered.extend(rows.iter().map(|&r| (self.x[[r, feature]], self.y[r])));
            ordered.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left = vec![0usize; self.n_classes];
            let mut right = counts.to_vec();
            for i in 0..ordered.len() - 1 {
                let (value, class) = ordered[i];
                left[class] += 1;
                right[class] -= 1;
                let next = ordered[i + 1].0;
                if next <= value {
                    continue;
                }
                let n_left = i + 1;
                let n_right = ordered.len() - n_left;
                let impurity = (n_left as f64 * gini(&left, n_left)
                    + n_right as f64 * gini(&right, n_right))
                    / ordered.len() as f64;
                if impurity < parent - 1e-12
                    && best.as_ref().map_or(true, |b| impurity < b.impurity)
                {
                    let midpoint = value + (next - value) / 2.0;
                    best = Some(SplitCandidate {
                        feature,
                        threshold: if midpoint < next { midpoint } else { value },
                        impurity,
                    });
                }
            }
        }
        best
    }
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

impl FittedTree {
    pub(crate) fn leaf_distribution(&self, sample: ArrayView1<'_, f64>) -> &[f64] {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if sample[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Classifier for FittedTree {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut proba = Array2::zeros((x.nrows(), self.n_classes));
        for (sample, mut out) in x.rows().into_iter().zip(proba.rows_mut()) {
            for (slot, &p) in out.iter_mut().zip(self.leaf_distribution(sample)) {
                *slot = p;
            }
        }
        normalize_rows(proba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn separates_threshold_data() {
        let x = array![[0.0, 5.0], [1.0, 5.0], [2.0, 5.0], [10.0, 5.0], [11.0, 5.0]];
        let y = [0, 0, 0, 1, 1];
        let tree = DecisionTree::default().fit(x.view(), &y, 2).unwrap();
        assert_eq!(tree.predict(x.view()), y.to_vec());
        assert_eq!(tree.predict(array![[6.5, 0.0]].view()), vec![1]);
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn depth_limit_yields_mixed_leaf() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = [0, 1, 0, 1];
        let stump = DecisionTree {
            max_depth: Some(0),
            ..DecisionTree::default()
        }
        .fit(x.view(), &y, 2)
        .unwrap();
        let proba = stump.predict_proba(x.view());
        assert!(proba.iter().all(|&p| (p - 0.5).abs() < 1e-12));
    }

    #[test]
    fn constant_features_produce_single_leaf() {
        let x = Array2::zeros((6, 3));
        let y = [0, 1, 2, 0, 1, 2];
        let tree = DecisionTree::default().fit(x.view(), &y, 3).unwrap();
        assert_eq!(tree.node_count(), 1);
    }
}
