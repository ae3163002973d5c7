use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use tracing::debug;

use super::{validate_training_set, Classifier, Estimator};
use crate::error::{ClassifierError, Result};

const MIN_HESSIAN: f64 = 1e-16;

/// Softmax gradient boosting over histogram-binned features.
///
/// Each round grows one regression tree per class on the second-order
/// expansion of the multinomial log loss.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientBoosting {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// L2 penalty on leaf weights.
    pub lambda: f64,
    /// Minimum loss reduction to keep a split.
    pub gamma: f64,
    pub min_child_weight: f64,
    pub max_bins: usize,
}

impl Default for GradientBoosting {
    fn default() -> Self {
        Self {
            n_rounds: 100,
            learning_rate: 0.3,
            max_depth: 6,
            lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
            max_bins: 64,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        weight: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn value(&self, sample: ArrayView1<'_, f64>) -> f64 {
        let mut id = 0;
        loop {
            match self.nodes[id] {
                Node::Leaf { weight } => return weight,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => id = if sample[feature] <= threshold { left } else { right },
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradientBoostingModel {
    /// `rounds[r][k]` is the tree for class `k` in round `r`.
    rounds: Vec<Vec<RegressionTree>>,
    learning_rate: f64,
    n_classes: usize,
}

impl GradientBoostingModel {
    pub fn n_rounds(&self) -> usize {
        self.rounds.len()
    }

    fn margins(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut margins = Array2::<f64>::zeros((x.nrows(), self.n_classes));
        margins
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(x.axis_iter(Axis(0)).into_par_iter())
            .for_each(|(mut out, sample)| {
                for round in &self.rounds {
                    for (slot, tree) in out.iter_mut().zip(round) {
                        *slot += self.learning_rate * tree.value(sample);
                    }
                }
            });
        margins
    }
}

/// Per-feature cut points; a value goes to bin `b` when it is at most
/// `cuts[b]` and above `cuts[b - 1]`.
struct BinnedMatrix {
    cuts: Vec<Vec<f64>>,
    /// Feature-major bin indices, shape `(features, rows)`.
    bins: Array2<u8>,
}

impl BinnedMatrix {
    fn build(x: ArrayView2<'_, f64>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, 256);
        let cuts: Vec<Vec<f64>> = x
            .axis_iter(Axis(1))
            .into_par_iter()
            .map(|column| feature_cuts(column, max_bins))
            .collect();
        let mut bins = Array2::<u8>::zeros((x.ncols(), x.nrows()));
        bins.axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(x.axis_iter(Axis(1)).into_par_iter())
            .zip(cuts.par_iter())
            .for_each(|((mut out, column), cuts)| {
                for (slot, &value) in out.iter_mut().zip(column.iter()) {
                    *slot = cuts.partition_point(|&c| c < value) as u8;
                }
            });
        Self { cuts, bins }
    }
}

fn feature_cuts(column: ArrayView1<'_, f64>, max_bins: usize) -> Vec<f64> {
    let mut sorted: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    let mut unique = sorted.clone();
    unique.dedup();
    if unique.len() <= 1 {
        return Vec::new();
    }
    if unique.len() <= max_bins {
        unique.pop();
        return unique;
    }
    let mut cuts: Vec<f64> = (1..max_bins)
        .map(|q| sorted[q * sorted.len() / max_bins])
        .collect();
    cuts.dedup();
    if cuts.last() == unique.last() {
        cuts.pop();
    }
    cuts
}

struct TreeBuilder<'a> {
    params: &'a GradientBoosting,
    data: &'a BinnedMatrix,
    grad: &'a [f64],
    hess: &'a [f64],
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    bin: usize,
    gain: f64,
}

impl TreeBuilder<'_> {
    fn build(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();
        let split = if depth < self.params.max_depth && rows.len() > 1 {
            self.best_split(&rows, g, h)
        } else {
            None
        };
        let Some(split) = split else {
            self.nodes.push(Node::Leaf {
                weight: -g / (h + self.params.lambda),
            });
            return self.nodes.len() - 1;
        };

        let bins = self.data.bins.row(split.feature);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&r| bins[r] as usize <= split.bin);
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { weight: 0.0 });
        let left = self.build(left_rows, depth + 1);
        let right = self.build(right_rows, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: self.data.cuts[split.feature][split.bin],
            left,
            right,
        };
        id
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<BestSplit> {
        let lambda = self.params.lambda;
        let parent = g * g / (h + lambda);
        (0..self.data.cuts.len())
            .into_par_iter()
            .filter_map(|feature| {
                let cuts = &self.data.cuts[feature];
                if cuts.is_empty() {
                    return None;
                }
                let bins = self.data.bins.row(feature);
                let mut hist = vec![(0.0f64, 0.0f64); cuts.len() + 1];
                for &r in rows {
                    let slot = &mut hist[bins[r] as usize];
                    slot.0 += self.grad[r];
                    slot.1 += self.hess[r];
                }
                let (mut gl, mut hl) = (0.0, 0.0);
                let mut best: Option<BestSplit> = None;
                for (bin, &(bg, bh)) in hist.iter().enumerate().take(cuts.len()) {
                    gl += bg;
                    hl += bh;
                    let (gr, hr) = (g - gl, h - hl);
                    if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                        continue;
                    }
                    let gain = 0.5 * (gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent)
                        - self.params.gamma;
                    if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                        best = Some(BestSplit { feature, bin, gain });
                    }
                }
                best
            })
            .reduce_with(|a, b| {
                if b.gain > a.gain || (b.gain == a.gain && b.feature < a.feature) {
                    b
                } else {
                    a
                }
            })
    }
}

fn softmax_rows(mut margins: Array2<f64>) -> Array2<f64> {
    for mut row in margins.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row.mapv_inplace(|v| v / total);
    }
    margins
}

impl Estimator for GradientBoosting {
    type Model = GradientBoostingModel;

    fn fit(
        &self,
        x: ArrayView2<'_, f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<GradientBoostingModel> {
        validate_training_set(x, y, n_classes)?;
        if self.learning_rate <= 0.0 || self.lambda < 0.0 {
            return Err(ClassifierError::invalid(
                "learning rate must be positive and lambda non-negative",
            ));
        }
        let data = BinnedMatrix::build(x, self.max_bins);
        let n = x.nrows();
        let mut margins = Array2::<f64>::zeros((n, n_classes));
        let mut rounds = Vec::with_capacity(self.n_rounds);

        for round in 0..self.n_rounds {
            let proba = softmax_rows(margins.clone());
            let mut trees = Vec::with_capacity(n_classes);
            for class in 0..n_classes {
                let column = proba.column(class);
                let grad: Vec<f64> = (0..n)
                    .map(|r| column[r] - if y[r] == class { 1.0 } else { 0.0 })
                    .collect();
                let hess: Vec<f64> = column
                    .iter()
                    .map(|&p| (2.0 * p * (1.0 - p)).max(MIN_HESSIAN))
                    .collect();
                let mut builder = TreeBuilder {
                    params: self,
                    data: &data,
                    grad: &grad,
                    hess: &hess,
                    nodes: Vec::new(),
                };
                builder.build((0..n).collect(), 0);
                let tree = RegressionTree {
                    nodes: builder.nodes,
                };
                for (r, sample) in x.rows().into_iter().enumerate() {
                    margins[[r, class]] += self.learning_rate * tree.value(sample);
                }
                trees.push(tree);
            }
            rounds.push(trees);
            if round % 25 == 0 {
                debug!(round, "boosting round finished");
            }
        }

        Ok(GradientBoostingModel {
            rounds,
            learning_rate: self.learning_rate,
            n_classes,
        })
    }

    fn describe(&self) -> String {
        format!(
            "n_rounds={} learning_rate={} max_depth={}",
            self.n_rounds, self.learning_rate, self.max_depth
        )
    }
}

impl Classifier for GradientBoostingModel {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        softmax_rows(self.margins(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn cuts_cover_distinct_values() {
        let column = array![3.0, 1.0, 2.0, 2.0, 1.0];
        assert_eq!(feature_cuts(column.view(), 64), vec![1.0, 2.0]);
        assert!(feature_cuts(array![4.0, 4.0].view(), 64).is_empty());
    }

    #[test]
    fn many_values_are_quantised() {
        let column = ndarray::Array1::from_iter((0..1000).map(|v| v as f64));
        let cuts = feature_cuts(column.view(), 16);
        assert_eq!(cuts.len(), 15);
        assert!(cuts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn boosting_fits_three_classes() {
        let x = Array2::from_shape_fn((30, 2), |(r, c)| (r % 3) as f64 * 5.0 + c as f64 * 0.1);
        let y: Vec<usize> = (0..30).map(|r| r % 3).collect();
        let booster = GradientBoosting {
            n_rounds: 20,
            ..GradientBoosting::default()
        };
        let model = booster.fit(x.view(), &y, 3).unwrap();
        assert_eq!(model.n_rounds(), 20);
        assert_eq!(model.predict(x.view()), y);
        let proba = model.predict_proba(x.view());
        assert!(proba[[0, 0]] > 0.9);
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn constant_input_predicts_class_prior() {
        let x = Array2::zeros((4, 3));
        let y = [0, 0, 0, 1];
        let model = GradientBoosting {
            n_rounds: 50,
            ..GradientBoosting::default()
        }
        .fit(x.view(), &y, 2)
        .unwrap();
        assert_eq!(model.predict(x.view()), vec![0; 4]);
    }
}
