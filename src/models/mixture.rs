use std::f64::consts::PI;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::linalg::{cholesky, lower_solve_norm_sq};
use crate::error::{ClassifierError, Result};

const KMEANS_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceType {
    Diagonal,
    Full,
}

impl CovarianceType {
    pub fn name(self) -> &'static str {
        match self {
            CovarianceType::Diagonal => "diag",
            CovarianceType::Full => "full",
        }
    }
}

/// Gaussian mixture density fitted by expectation maximisation.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianMixture {
    pub n_components: usize,
    pub covariance: CovarianceType,
    /// Added to every variance for numerical stability.
    pub reg_covar: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub seed: u64,
}

impl Default for GaussianMixture {
    fn default() -> Self {
        Self {
            n_components: 1,
            covariance: CovarianceType::Full,
            reg_covar: 1e-6,
            max_iter: 100,
            tol: 1e-3,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
enum Shape {
    /// Variances, one row per component.
    Diagonal(Array2<f64>),
    /// Cholesky factors of the covariances.
    Full(Vec<Array2<f64>>),
}

#[derive(Debug, Clone)]
pub struct FittedMixture {
    weights: Array1<f64>,
    means: Array2<f64>,
    shape: Shape,
    converged: bool,
    n_iter: usize,
}

impl GaussianMixture {
    pub fn fit(&self, x: ArrayView2<'_, f64>) -> Result<FittedMixture> {
        let (n, d) = x.dim();
        if self.n_components == 0 || d == 0 {
            return Err(ClassifierError::invalid(
                "mixture needs at least one component and one feature",
            ));
        }
        if n < self.n_components {
            return Err(ClassifierError::invalid(format!(
                "{n} samples cannot support {} mixture components",
                self.n_components
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let assignment = kmeans(x, self.n_components, &mut rng);
        let mut resp = Array2::<f64>::zeros((n, self.n_components));
        for (row, &cluster) in assignment.iter().enumerate() {
            resp[[row, cluster]] = 1.0;
        }
        let mut model = self.m_step(x, &resp)?;

        let mut lower_bound = f64::NEG_INFINITY;
        for iteration in 1..=self.max_iter {
            let (log_resp, mean_log_likelihood) = model.e_step(x);
            resp = log_resp.mapv(f64::exp);
            model = self.m_step(x, &resp)?;
            model.n_iter = iteration;
            let change = mean_log_likelihood - lower_bound;
            lower_bound = mean_log_likelihood;
            if change.abs() < self.tol {
                model.converged = true;
                break;
            }
        }
        debug!(
            components = self.n_components,
            covariance = self.covariance.name(),
            iterations = model.n_iter,
            converged = model.converged,
            "mixture fitted"
        );
        Ok(model)
    }

    fn m_step(&self, x: ArrayView2<'_, f64>, resp: &Array2<f64>) -> Result<FittedMixture> {
        let (n, d) = x.dim();
        let counts = resp.sum_axis(Axis(0)).mapv(|c| c + 10.0 * f64::EPSILON);
        let means = resp.t().dot(&x) / &counts.view().insert_axis(Axis(1));
        let weights = &counts / n as f64;

        let shape = match self.covariance {
            CovarianceType::Diagonal => {
                let mut variances = Array2::<f64>::zeros((self.n_components, d));
                for k in 0..self.n_components {
                    let mean = means.row(k);
                    let mut row = variances.row_mut(k);
                    for (sample, &r) in x.rows().into_iter().zip(resp.column(k)) {
                        for ((slot, &v), &m) in row.iter_mut().zip(sample).zip(mean) {
                            *slot += r * (v - m) * (v - m);
                        }
                    }
                    row.mapv_inplace(|v| v / counts[k] + self.reg_covar);
                }
                Shape::Diagonal(variances)
            }
            CovarianceType::Full => {
                let mut factors = Vec::with_capacity(self.n_components);
                for k in 0..self.n_components {
                    let diff = &x - &means.row(k);
                    let weighted = &diff * &resp.column(k).insert_axis(Axis(1));
                    let mut covariance = weighted.t().dot(&diff) / counts[k];
                    for i in 0..d {
                        covariance[[i, i]] += self.reg_covar;
                    }
                    factors.push(cholesky(covariance.view())?);
                }
                Shape::Full(factors)
            }
        };

        Ok(FittedMixture {
            weights,
            means,
            shape,
            converged: false,
            n_iter: 0,
        })
    }
}

fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(p, q)| (p - q).powi(2)).sum()
}

/// k-means++ seeding followed by a few Lloyd iterations.
fn kmeans(x: ArrayView2<'_, f64>, k: usize, rng: &mut StdRng) -> Vec<usize> {
    let n = x.nrows();
    let mut centers = Array2::<f64>::zeros((k, x.ncols()));
    centers.row_mut(0).assign(&x.row(rng.gen_range(0..n)));
    let mut nearest: Vec<f64> = x
        .rows()
        .into_iter()
        .map(|row| squared_distance(row, centers.row(0)))
        .collect();
    for c in 1..k {
        let total: f64 = nearest.iter().sum();
        let chosen = if total > 0.0 {
            let mut target = rng.gen_range(0.0..total);
            nearest
                .iter()
                .position(|&dist| {
                    target -= dist;
                    target < 0.0
                })
                .unwrap_or(n - 1)
        } else {
            rng.gen_range(0..n)
        };
        centers.row_mut(c).assign(&x.row(chosen));
        for (slot, row) in nearest.iter_mut().zip(x.rows()) {
            *slot = slot.min(squared_distance(row, centers.row(c)));
        }
    }

    let mut assignment = vec![0; n];
    for _ in 0..KMEANS_ITERATIONS {
        let mut changed = false;
        for (slot, row) in assignment.iter_mut().zip(x.rows()) {
            let best = (0..k)
                .map(|c| (c, squared_distance(row, centers.row(c))))
                .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
                .0;
            changed |= *slot != best;
            *slot = best;
        }
        for c in 0..k {
            let members: Vec<usize> = (0..n).filter(|&i| assignment[i] == c).collect();
            if members.is_empty() {
                continue;
            }
            let mean = x
                .select(Axis(0), &members)
                .mean_axis(Axis(0))
                .unwrap_or_else(|| centers.row(c).to_owned());
            centers.row_mut(c).assign(&mean);
        }
        if !changed {
            break;
        }
    }
    assignment
}

fn log_sum_exp(values: ArrayView1<'_, f64>) -> f64 {
    let max = values.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

impl FittedMixture {
    /// Weighted log densities, shape `(rows, components)`.
    fn weighted_log_prob(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let k = self.weights.len();
        let d = self.means.ncols() as f64;
        let mut out = Array2::<f64>::zeros((x.nrows(), k));
        for c in 0..k {
            let mean = self.means.row(c);
            let log_weight = self.weights[c].ln();
            match &self.shape {
                Shape::Diagonal(variances) => {
                    let var = variances.row(c);
                    let log_det: f64 = var.iter().map(|v| v.ln()).sum();
                    for (row, sample) in x.rows().into_iter().enumerate() {
                        let mahalanobis: f64 = sample
                            .iter()
                            .zip(mean)
                            .zip(var)
                            .map(|((v, m), s)| (v - m) * (v - m) / s)
                            .sum();
                        out[[row, c]] =
                            log_weight - 0.5 * (d * (2.0 * PI).ln() + log_det + mahalanobis);
                    }
                }
                Shape::Full(factors) => {
                    let l = &factors[c];
                    let log_det: f64 = 2.0 * l.diag().iter().map(|v| v.ln()).sum::<f64>();
                    for (row, sample) in x.rows().into_iter().enumerate() {
                        let diff = &sample - &mean;
                        let mahalanobis = lower_solve_norm_sq(l.view(), diff.view());
                        out[[row, c]] =
                            log_weight - 0.5 * (d * (2.0 * PI).ln() + log_det + mahalanobis);
                    }
                }
            }
        }
        out
    }

    fn e_step(&self, x: ArrayView2<'_, f64>) -> (Array2<f64>, f64) {
        let mut weighted = self.weighted_log_prob(x);
        let mut total = 0.0;
        for mut row in weighted.rows_mut() {
            let norm = log_sum_exp(row.view());
            total += norm;
            row.mapv_inplace(|v| v - norm);
        }
        (weighted, total / x.nrows().max(1) as f64)
    }

    /// Log-likelihood of each row under the mixture.
    pub fn score_samples(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.means.ncols() {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.means.ncols(),
                got: x.ncols(),
            });
        }
        let weighted = self.weighted_log_prob(x);
        Ok(weighted.rows().into_iter().map(log_sum_exp).collect())
    }

    pub fn n_components(&self) -> usize {
        self.weights.len()
    }

    pub fn converged(&self) -> bool {
        self.converged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_clusters() -> Array2<f64> {
        Array2::from_shape_fn((40, 2), |(r, c)| {
            let offset = if r < 20 { -5.0 } else { 5.0 };
            offset + ((r * 3 + c * 5) % 7) as f64 * 0.1
        })
    }

    #[test]
    fn log_sum_exp_is_stable() {
        let values = array![1000.0, 1000.0];
        assert!((log_sum_exp(values.view()) - (1000.0 + 2.0f64.ln())).abs() < 1e-9);
        let empty = array![f64::NEG_INFINITY, f64::NEG_INFINITY];
        assert_eq!(log_sum_exp(empty.view()), f64::NEG_INFINITY);
    }

    #[test]
    fn both_covariance_types_fit_clusters() {
        let x = two_clusters();
        for covariance in [CovarianceType::Diagonal, CovarianceType::Full] {
            let model = GaussianMixture {
                n_components: 2,
                covariance,
                ..GaussianMixture::default()
            }
            .fit(x.view())
            .unwrap();
            assert_eq!(model.n_components(), 2);
            let mut weights = model.weights.to_vec();
            weights.sort_by(f64::total_cmp);
            assert!((weights[0] - 0.5).abs() < 1e-6);

            let scores = model.score_samples(array![[-4.7, -4.7], [40.0, 40.0]].view()).unwrap();
            assert!(scores[0] > scores[1]);
        }
    }

    #[test]
    fn duplicate_points_still_fit() {
        let x = Array2::zeros((5, 3));
        let model = GaussianMixture {
            n_components: 2,
            covariance: CovarianceType::Diagonal,
            ..GaussianMixture::default()
        }
        .fit(x.view())
        .unwrap();
        let scores = model.score_samples(x.view()).unwrap();
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn rejects_too_few_samples() {
        let x = Array2::zeros((3, 2));
        let mixture = GaussianMixture {
            n_components: 4,
            ..GaussianMixture::default()
        };
        assert!(mixture.fit(x.view()).is_err());
    }
}
