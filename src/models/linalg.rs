//! Small dense routines the learners need beyond `ndarray`'s products.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{ClassifierError, Result};

const JACOBI_SWEEPS: usize = 100;
const JACOBI_TOL: f64 = 1e-12;

/// Lower-triangular `L` with `L Lᵀ = a`.
pub(crate) fn cholesky(a: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(ClassifierError::DimensionMismatch {
            expected: n,
            got: a.ncols(),
        });
    }
    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut diag = a[[j, j]];
        for k in 0..j {
            diag -= l[[j, k]] * l[[j, k]];
        }
        if !diag.is_finite() || diag <= 0.0 {
            return Err(ClassifierError::numerical(
                "covariance matrix is not positive definite",
            ));
        }
        let pivot = diag.sqrt();
        l[[j, j]] = pivot;
        for i in j + 1..n {
            let mut value = a[[i, j]];
            for k in 0..j {
                value -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = value / pivot;
        }
    }
    Ok(l)
}

/// Squared norm of `L⁻¹ b` by forward substitution.
pub(crate) fn lower_solve_norm_sq(l: ArrayView2<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    let n = b.len();
    let mut z = vec![0.0; n];
    let mut norm = 0.0;
    for i in 0..n {
        let mut value = b[i];
        for k in 0..i {
            value -= l[[i, k]] * z[k];
        }
        z[i] = value / l[[i, i]];
        norm += z[i] * z[i];
    }
    norm
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Eigenvalues come back in descending order with eigenvectors as columns.
pub(crate) fn symmetric_eigen(a: ArrayView2<'_, f64>) -> (Array1<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut m = a.to_owned();
    let mut v = Array2::<f64>::eye(n);
    for _ in 0..JACOBI_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|p| (p + 1..n).map(move |q| (p, q)))
            .map(|(p, q)| m[[p, q]] * m[[p, q]])
            .sum();
        if off.sqrt() < JACOBI_TOL {
            break;
        }
        for p in 0..n {
            for q in p + 1..n {
                if m[[p, q]].abs() < f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (m[[q, q]] - m[[p, p]]) / (2.0 * m[[p, q]]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                rotate(&mut m, &mut v, p, q, c, s);
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| m[[j, j]].total_cmp(&m[[i, i]]));
    let values = order.iter().map(|&i| m[[i, i]]).collect();
    let vectors = v.select(Axis(1), &order);
    (values, vectors)
}

fn rotate(m: &mut Array2<f64>, v: &mut Array2<f64>, p: usize, q: usize, c: f64, s: f64) {
    let n = m.nrows();
    for k in 0..n {
        let mkp = m[[k, p]];
        let mkq = m[[k, q]];
        m[[k, p]] = c * mkp - s * mkq;
        m[[k, q]] = s * mkp + c * mkq;
    }
    for k in 0..n {
        let mpk = m[[p, k]];
        let mqk = m[[q, k]];
        m[[p, k]] = c * mpk - s * mqk;
        m[[q, k]] = s * mpk + c * mqk;
    }
    for k in 0..n {
        let vkp = v[[k, p]];
        let vkq = v[[k, q]];
        v[[k, p]] = c * vkp - s * vkq;
        v[[k, q]] = s * vkp + c * vkq;
    }
}

/// Modified Gram–Schmidt on the columns of `a`, in place.
///
/// Columns that are numerically dependent on earlier ones are zeroed.
pub(crate) fn orthonormalize_columns(a: &mut Array2<f64>) {
    let cols = a.ncols();
    let scale = a
        .columns()
        .into_iter()
        .map(|c| c.dot(&c).sqrt())
        .fold(0.0, f64::max)
        .max(f64::MIN_POSITIVE);
    for j in 0..cols {
        for k in 0..j {
            let previous = a.column(k).to_owned();
            let projection = previous.dot(&a.column(j));
            a.column_mut(j).scaled_add(-projection, &previous);
        }
        let norm = a.column(j).dot(&a.column(j)).sqrt();
        if norm > 1e-10 * scale {
            a.column_mut(j).mapv_inplace(|x| x / norm);
        } else {
            a.column_mut(j).fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn cholesky_reconstructs_matrix() {
        let a = array![[4.0, 2.0, 0.6], [2.0, 5.0, 1.0], [0.6, 1.0, 3.0]];
        let l = cholesky(a.view()).unwrap();
        let rebuilt = l.dot(&l.t());
        for (x, y) in rebuilt.iter().zip(a.iter()) {
            assert!((x - y).abs() < 1e-10);
        }
    }

    #[test]
    fn cholesky_rejects_indefinite_matrix() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(cholesky(a.view()).is_err());
    }

    #[test]
    fn solve_norm_matches_mahalanobis() {
        let a = array![[4.0, 0.0], [0.0, 9.0]];
        let l = cholesky(a.view()).unwrap();
        let norm = lower_solve_norm_sq(l.view(), array![2.0, 3.0].view());
        assert!((norm - 2.0).abs() < 1e-12);
    }

    #[test]
    fn jacobi_recovers_known_spectrum() {
        let a = array![[2.0, 1.0, 0.0], [1.0, 2.0, 0.0], [0.0, 0.0, 5.0]];
        let (values, vectors) = symmetric_eigen(a.view());
        assert!((values[0] - 5.0).abs() < 1e-9);
        assert!((values[1] - 3.0).abs() < 1e-9);
        assert!((values[2] - 1.0).abs() < 1e-9);
        for k in 0..3 {
            let v = vectors.column(k);
            let av = a.dot(&v);
            for i in 0..3 {
                assert!((av[i] - values[k] * v[i]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn gram_schmidt_zeroes_dependent_columns() {
        let mut a = array![[1.0, 2.0, 0.0], [0.0, 0.0, 1.0], [1.0, 2.0, 0.0]];
        orthonormalize_columns(&mut a);
        assert!((a.column(0).dot(&a.column(0)) - 1.0).abs() < 1e-12);
        assert!(a.column(1).iter().all(|&x| x == 0.0));
        assert!(a.column(0).dot(&a.column(2)).abs() < 1e-12);
    }
}
