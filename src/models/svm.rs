use std::sync::Arc;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{normalize_rows, validate_training_set, Classifier, Estimator};
use crate::error::Result;

const SMO_TOLERANCE: f64 = 1e-3;
const TAU: f64 = 1e-12;
const PLATT_MAX_ITER: usize = 100;
const PLATT_MIN_STEP: f64 = 1e-10;
const PLATT_SIGMA: f64 = 1e-12;

/// Width of the RBF kernel, `exp(-gamma * |a - b|²)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gamma {
    /// `1 / (n_features * Var(X))`, falling back to 1 for constant input.
    Scale,
    Fixed(f64),
}

impl Gamma {
    fn resolve(self, x: ArrayView2<'_, f64>) -> f64 {
        match self {
            Gamma::Fixed(value) => value,
            Gamma::Scale => {
                let n = x.len().max(1) as f64;
                let mean = x.sum() / n;
                let variance = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                if variance > 0.0 {
                    1.0 / (x.ncols().max(1) as f64 * variance)
                } else {
                    1.0
                }
            }
        }
    }

    fn label(self) -> String {
        match self {
            Gamma::Scale => "scale".to_string(),
            Gamma::Fixed(value) => value.to_string(),
        }
    }
}

/// RBF support vector classifier, one machine per class against the rest.
///
/// Each machine is calibrated with a Platt sigmoid so the model can emit
/// class probabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct Svc {
    pub c: f64,
    pub gamma: Gamma,
    pub max_iter: usize,
}

impl Default for Svc {
    fn default() -> Self {
        Self {
            c: 1.0,
            gamma: Gamma::Scale,
            max_iter: 100_000,
        }
    }
}

#[derive(Debug, Clone)]
struct BinaryMachine {
    /// `(training row, alpha * y)` for every support vector.
    support: Vec<(usize, f64)>,
    rho: f64,
    /// Constant decision value when training data held a single side.
    constant: Option<f64>,
    platt_a: f64,
    platt_b: f64,
}

#[derive(Debug, Clone)]
pub struct SvcModel {
    train: Arc<Array2<f64>>,
    gamma: f64,
    machines: Vec<BinaryMachine>,
}

impl Estimator for Svc {
    type Model = SvcModel;

    fn fit(&self, x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize) -> Result<SvcModel> {
        validate_training_set(x, y, n_classes)?;
        let gamma = self.gamma.resolve(x);
        let kernel = kernel_matrix(x, x, gamma);
        let machines = (0..n_classes)
            .into_par_iter()
            .map(|class| {
                let signs: Vec<f64> = y
                    .iter()
                    .map(|&label| if label == class { 1.0 } else { -1.0 })
                    .collect();
                self.train_machine(&kernel, &signs)
            })
            .collect();
        Ok(SvcModel {
            train: Arc::new(x.to_owned()),
            gamma,
            machines,
        })
    }

    fn describe(&self) -> String {
        format!("C={} gamma={}", self.c, self.gamma.label())
    }
}

impl Svc {
    fn train_machine(&self, kernel: &Array2<f64>, y: &[f64]) -> BinaryMachine {
        let positives = y.iter().filter(|&&s| s > 0.0).count();
        if positives == 0 || positives == y.len() {
            let side = if positives == 0 { -1.0 } else { 1.0 };
            let decisions = vec![side; y.len()];
            let (platt_a, platt_b) = platt_scale(&decisions, y);
            return BinaryMachine {
                support: Vec::new(),
                rho: 0.0,
                constant: Some(side),
                platt_a,
                platt_b,
            };
        }

        let (alpha, rho) = solve_smo(kernel, y, self.c, self.max_iter);
        let support: Vec<(usize, f64)> = alpha
            .iter()
            .enumerate()
            .filter(|&(_, &a)| a > 0.0)
            .map(|(i, &a)| (i, a * y[i]))
            .collect();
        let decisions: Vec<f64> = (0..y.len())
            .map(|i| support.iter().map(|&(j, coef)| coef * kernel[[j, i]]).sum::<f64>() - rho)
            .collect();
        let (platt_a, platt_b) = platt_scale(&decisions, y);
        BinaryMachine {
            support,
            rho,
            constant: None,
            platt_a,
            platt_b,
        }
    }
}

fn rbf(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>, gamma: f64) -> f64 {
    let distance: f64 = a.iter().zip(b.iter()).map(|(p, q)| (p - q).powi(2)).sum();
    (-gamma * distance).exp()
}

fn kernel_matrix(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>, gamma: f64) -> Array2<f64> {
    let mut kernel = Array2::zeros((a.nrows(), b.nrows()));
    kernel
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row)| {
            for (j, slot) in row.iter_mut().enumerate() {
                *slot = rbf(a.row(i), b.row(j), gamma);
            }
        });
    kernel
}

/// Dual coordinate descent over maximal violating pairs.
///
/// Returns the dual coefficients and the offset `rho` of the decision
/// function `Σ αᵢ yᵢ K(xᵢ, x) − rho`.
fn solve_smo(kernel: &Array2<f64>, y: &[f64], c: f64, max_iter: usize) -> (Vec<f64>, f64) {
    let n = y.len();
    let mut alpha = vec![0.0; n];
    let mut grad = vec![-1.0; n];
    let mut gap = (f64::NEG_INFINITY, f64::INFINITY);

    for iteration in 0..max_iter {
        let mut up = (usize::MAX, f64::NEG_INFINITY);
        let mut low = (usize::MAX, f64::INFINITY);
        for t in 0..n {
            let score = -y[t] * grad[t];
            let in_up = (y[t] > 0.0 && alpha[t] < c) || (y[t] < 0.0 && alpha[t] > 0.0);
            let in_low = (y[t] > 0.0 && alpha[t] > 0.0) || (y[t] < 0.0 && alpha[t] < c);
            if in_up && score > up.1 {
                up = (t, score);
            }
            if in_low && score < low.1 {
                low = (t, score);
            }
        }
        gap = (up.1, low.1);
        if up.0 == usize::MAX || low.0 == usize::MAX || up.1 - low.1 < SMO_TOLERANCE {
            debug!(iteration, "smo converged");
            break;
        }

        let (i, j) = (up.0, low.0);
        let eta = (kernel[[i, i]] + kernel[[j, j]] - 2.0 * kernel[[i, j]]).max(TAU);
        let mut step = (up.1 - low.1) / eta;
        step = step.min(if y[i] > 0.0 { c - alpha[i] } else { alpha[i] });
        step = step.min(if y[j] > 0.0 { alpha[j] } else { c - alpha[j] });

        alpha[i] += y[i] * step;
        alpha[j] -= y[j] * step;
        alpha[i] = alpha[i].clamp(0.0, c);
        alpha[j] = alpha[j].clamp(0.0, c);
        for (t, g) in grad.iter_mut().enumerate() {
            *g += y[t] * step * (kernel[[t, i]] - kernel[[t, j]]);
        }
    }

    let rho = match gap {
        (m, big_m) if m.is_finite() && big_m.is_finite() => -(m + big_m) / 2.0,
        (m, _) if m.is_finite() => -m,
        (_, big_m) if big_m.is_finite() => -big_m,
        _ => 0.0,
    };
    (alpha, rho)
}

/// Fits `P(y = 1 | f) = 1 / (1 + exp(A f + B))` by Newton's method with
/// backtracking, using regularised targets.
fn platt_scale(decisions: &[f64], y: &[f64]) -> (f64, f64) {
    let prior1 = y.iter().filter(|&&s| s > 0.0).count() as f64;
    let prior0 = y.len() as f64 - prior1;
    let hi_target = (prior1 + 1.0) / (prior1 + 2.0);
    let lo_target = 1.0 / (prior0 + 2.0);
    let targets: Vec<f64> = y
        .iter()
        .map(|&s| if s > 0.0 { hi_target } else { lo_target })
        .collect();

    let objective = |a: f64, b: f64| -> f64 {
        decisions
            .iter()
            .zip(&targets)
            .map(|(&f, &t)| {
                let z = f * a + b;
                if z >= 0.0 {
                    t * z + (-z).exp().ln_1p()
                } else {
                    (t - 1.0) * z + z.exp().ln_1p()
                }
            })
            .sum()
    };

    let mut a = 0.0;
    let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
    let mut value = objective(a, b);
    for _ in 0..PLATT_MAX_ITER {
        let (mut h11, mut h22, mut h21, mut g1, mut g2) = (PLATT_SIGMA, PLATT_SIGMA, 0.0, 0.0, 0.0);
        for (&f, &t) in decisions.iter().zip(&targets) {
            let z = f * a + b;
            let (p, q) = if z >= 0.0 {
                let e = (-z).exp();
                (e / (1.0 + e), 1.0 / (1.0 + e))
            } else {
                let e = z.exp();
                (1.0 / (1.0 + e), e / (1.0 + e))
            };
            let d2 = p * q;
            h11 += f * f * d2;
            h22 += d2;
            h21 += f * d2;
            let d1 = t - p;
            g1 += f * d1;
            g2 += d1;
        }
        if g1.abs() < 1e-5 && g2.abs() < 1e-5 {
            break;
        }

        let det = h11 * h22 - h21 * h21;
        let da = -(h22 * g1 - h21 * g2) / det;
        let db = -(-h21 * g1 + h11 * g2) / det;
        let descent = g1 * da + g2 * db;
        let mut step = 1.0;
        while step >= PLATT_MIN_STEP {
            let (na, nb) = (a + step * da, b + step * db);
            let candidate = objective(na, nb);
            if candidate < value + 1e-4 * step * descent {
                a = na;
                b = nb;
                value = candidate;
                break;
            }
            step /= 2.0;
        }
        if step < PLATT_MIN_STEP {
            break;
        }
    }
    (a, b)
}

fn sigmoid_probability(decision: f64, a: f64, b: f64) -> f64 {
    let z = decision * a + b;
    if z >= 0.0 {
        let e = (-z).exp();
        e / (1.0 + e)
    } else {
        1.0 / (1.0 + z.exp())
    }
}

impl SvcModel {
    /// Raw one-vs-rest decision values, one column per class.
    pub fn decision_function(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let kernel = kernel_matrix(x, self.train.view(), self.gamma);
        let mut decisions = Array2::zeros((x.nrows(), self.machines.len()));
        for (class, machine) in self.machines.iter().enumerate() {
            for (row, kernel_row) in kernel.rows().into_iter().enumerate() {
                decisions[[row, class]] = match machine.constant {
                    Some(side) => side,
                    None => {
                        machine
                            .support
                            .iter()
                            .map(|&(j, coef)| coef * kernel_row[j])
                            .sum::<f64>()
                            - machine.rho
                    }
                };
            }
        }
        decisions
    }

    pub fn support_vector_count(&self) -> usize {
        self.machines.iter().map(|m| m.support.len()).sum()
    }
}

impl Classifier for SvcModel {
    fn n_classes(&self) -> usize {
        self.machines.len()
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut proba = self.decision_function(x);
        for (class, mut column) in proba.columns_mut().into_iter().enumerate() {
            let machine = &self.machines[class];
            column.mapv_inplace(|d| sigmoid_probability(d, machine.platt_a, machine.platt_b));
        }
        normalize_rows(proba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn scale_gamma_uses_feature_variance() {
        let x = array![[0.0, 0.0], [1.0, 1.0]];
        assert!((Gamma::Scale.resolve(x.view()) - 2.0).abs() < 1e-12);
        assert_eq!(Gamma::Scale.resolve(Array2::zeros((3, 2)).view()), 1.0);
        assert_eq!(Gamma::Fixed(0.01).resolve(x.view()), 0.01);
    }

    #[test]
    fn separates_two_clusters() {
        let x = array![
            [0.0, 0.1],
            [0.2, 0.0],
            [0.1, 0.2],
            [3.0, 3.1],
            [3.2, 2.9],
            [2.9, 3.0]
        ];
        let y = [0, 0, 0, 1, 1, 1];
        let model = Svc::default().fit(x.view(), &y, 2).unwrap();
        assert_eq!(model.predict(x.view()), y.to_vec());
        assert_eq!(model.predict(array![[0.1, 0.1], [3.1, 3.0]].view()), vec![0, 1]);
        let proba = model.predict_proba(x.view());
        assert!(proba[[0, 0]] > 0.5 && proba[[5, 1]] > 0.5);
    }

    #[test]
    fn class_missing_from_training_gets_low_probability() {
        let x = array![[0.0], [0.1], [5.0], [5.1]];
        let y = [0, 0, 1, 1];
        let model = Svc::default().fit(x.view(), &y, 3).unwrap();
        let proba = model.predict_proba(x.view());
        for row in proba.rows() {
            assert!(row[2] < row[0].max(row[1]));
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn platt_sigmoid_orders_decisions() {
        let decisions = [-2.0, -1.5, -1.0, 1.0, 1.5, 2.0];
        let y = [-1.0, -1.0, -1.0, 1.0, 1.0, 1.0];
        let (a, b) = platt_scale(&decisions, &y);
        assert!(a < 0.0);
        assert!(sigmoid_probability(2.0, a, b) > sigmoid_probability(-2.0, a, b));
    }
}
