use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use super::linalg::{orthonormalize_columns, symmetric_eigen};
use crate::error::{ClassifierError, Result};

const OVERSAMPLE: usize = 10;
const POWER_ITERATIONS: usize = 12;

/// Principal component analysis by randomised block subspace iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Pca {
    pub n_components: usize,
    pub seed: u64,
}

impl Default for Pca {
    fn default() -> Self {
        Self {
            n_components: 50,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PcaModel {
    mean: Array1<f64>,
    /// One component per row.
    components: Array2<f64>,
    explained_variance: Array1<f64>,
}

impl Pca {
    pub fn fit(&self, x: ArrayView2<'_, f64>) -> Result<PcaModel> {
        let (n, d) = x.dim();
        if n == 0 || d == 0 {
            return Err(ClassifierError::invalid("cannot fit PCA on an empty matrix"));
        }
        if self.n_components == 0 {
            return Err(ClassifierError::invalid("PCA needs at least one component"));
        }
        let k = self.n_components.min(n).min(d);
        if k < self.n_components {
            warn!(
                requested = self.n_components,
                used = k,
                rows = n,
                features = d,
                "reducing PCA components to fit the data"
            );
        }

        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let centered = &x - &mean;
        let width = (k + OVERSAMPLE).min(d);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut basis = Array2::from_shape_fn((d, width), |_| rng.gen_range(-1.0..1.0));
        orthonormalize_columns(&mut basis);
        for _ in 0..POWER_ITERATIONS {
            let projected = centered.dot(&basis);
            basis = centered.t().dot(&projected);
            orthonormalize_columns(&mut basis);
        }

        let projected = centered.dot(&basis);
        let small = projected.t().dot(&projected);
        let (values, vectors) = symmetric_eigen(small.view());
        let mut components = basis.dot(&vectors.slice(s![.., ..k])).reversed_axes();
        for mut component in components.rows_mut() {
            let pivot = component
                .iter()
                .copied()
                .fold(0.0f64, |best, v| if v.abs() > best.abs() { v } else { best });
            if pivot < 0.0 {
                component.mapv_inplace(|v| -v);
            }
        }
        let denominator = (n.max(2) - 1) as f64;
        let explained_variance = values
            .slice(s![..k])
            .mapv(|v| v.max(0.0) / denominator);

        Ok(PcaModel {
            mean,
            components,
            explained_variance,
        })
    }
}

impl PcaModel {
    /// Projects rows onto the fitted components.
    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.mean.len() {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.mean.len(),
                got: x.ncols(),
            });
        }
        Ok((&x - &self.mean).dot(&self.components.t()))
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.explained_variance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn finds_dominant_direction() {
        let x = Array2::from_shape_fn((40, 3), |(r, c)| {
            let t = r as f64 - 20.0;
            match c {
                0 => t,
                1 => t,
                _ => ((r * 7) % 3) as f64 * 0.01,
            }
        });
        let model = Pca {
            n_components: 1,
            seed: 1,
        }
        .fit(x.view())
        .unwrap();
        let axis = model.components.row(0);
        let expected = 1.0 / 2.0f64.sqrt();
        assert!((axis[0] - expected).abs() < 1e-6);
        assert!((axis[1] - expected).abs() < 1e-6);
        assert!(axis[2].abs() < 1e-3);
    }

    #[test]
    fn clamps_components_to_rank_bounds() {
        let x = array![[1.0, 2.0, 3.0, 4.0], [2.0, 1.0, 0.0, 1.0], [0.0, 0.0, 1.0, 1.0]];
        let model = Pca::default().fit(x.view()).unwrap();
        assert_eq!(model.n_components(), 3);
        let projected = model.transform(x.view()).unwrap();
        assert_eq!(projected.dim(), (3, 3));
    }

    #[test]
    fn projections_are_centered() {
        let x = Array2::from_shape_fn((10, 4), |(r, c)| (r * (c + 1)) as f64);
        let model = Pca {
            n_components: 2,
            seed: 3,
        }
        .fit(x.view())
        .unwrap();
        let projected = model.transform(x.view()).unwrap();
        for column in projected.columns() {
            assert!(column.sum().abs() < 1e-8);
        }
        assert!(model.transform(Array2::zeros((1, 3)).view()).is_err());
    }
}
