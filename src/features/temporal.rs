use ndarray::{concatenate, s, Array1, Array2, ArrayView2, Axis};

/// Half-width of the delta regression window (9 frames in total).
pub const DELTA_HALF_WIDTH: usize = 4;

/// Regression delta of a `features × frames` matrix along the time axis.
///
/// Frames beyond either edge repeat the boundary frame.
pub fn delta(input: ArrayView2<'_, f64>, half_width: usize) -> Array2<f64> {
    let (rows, frames) = input.dim();
    let mut output = Array2::zeros((rows, frames));
    if frames == 0 || half_width == 0 {
        return output;
    }
    let denominator = 2.0 * (1..=half_width).map(|n| (n * n) as f64).sum::<f64>();
    for t in 0..frames {
        let mut column = output.column_mut(t);
        for n in 1..=half_width {
            let prev = input.column(t.saturating_sub(n));
            let next = input.column((t + n).min(frames - 1));
            column.scaled_add(n as f64, &(&next - &prev));
        }
        column.mapv_inplace(|v| v / denominator);
    }
    output
}

/// Stacks coefficients with their first and second order deltas.
pub fn stack_with_deltas(coefficients: ArrayView2<'_, f64>) -> Array2<f64> {
    let first = delta(coefficients, DELTA_HALF_WIDTH);
    let second = delta(first.view(), DELTA_HALF_WIDTH);
    concatenate(Axis(0), &[coefficients.view(), first.view(), second.view()])
        .unwrap_or_else(|_| Array2::zeros((coefficients.nrows() * 3, coefficients.ncols())))
}

/// Right-pads with zero columns or truncates trailing columns to `frames`.
pub fn fix_length(matrix: ArrayView2<'_, f64>, frames: usize) -> Array2<f64> {
    let mut fixed = Array2::zeros((matrix.nrows(), frames));
    let keep = matrix.ncols().min(frames);
    fixed
        .slice_mut(s![.., ..keep])
        .assign(&matrix.slice(s![.., ..keep]));
    fixed
}

/// Row-major flattening.
pub fn flatten(matrix: ArrayView2<'_, f64>) -> Array1<f64> {
    matrix.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn delta_of_linear_ramp_is_constant_in_interior() {
        let ramp = Array2::from_shape_fn((1, 20), |(_, t)| t as f64 * 2.0);
        let d = delta(ramp.view(), DELTA_HALF_WIDTH);
        for t in DELTA_HALF_WIDTH..20 - DELTA_HALF_WIDTH {
            assert!((d[[0, t]] - 2.0).abs() < 1e-12);
        }
        assert!(d[[0, 0]] < 2.0);
    }

    #[test]
    fn delta_of_constant_is_zero() {
        let constant = Array2::from_elem((3, 7), 5.0);
        assert!(delta(constant.view(), 2).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn stacking_triples_rows() {
        let coeffs = Array2::from_shape_fn((13, 40), |(r, c)| (r * c) as f64);
        let stacked = stack_with_deltas(coeffs.view());
        assert_eq!(stacked.dim(), (39, 40));
        assert_eq!(stacked.slice(s![..13, ..]), coeffs);
    }

    #[test]
    fn pads_short_matrix_with_zero_columns() {
        let matrix = Array2::from_elem((39, 100), 1.5);
        let fixed = fix_length(matrix.view(), 150);
        assert_eq!(fixed.dim(), (39, 150));
        assert!(fixed.slice(s![.., ..100]).iter().all(|&v| v == 1.5));
        assert!(fixed.slice(s![.., 100..]).iter().all(|&v| v == 0.0));
        assert_eq!(fixed.slice(s![.., 100..]).ncols(), 50);
    }

    #[test]
    fn truncates_long_matrix_to_leading_columns() {
        let matrix = Array2::from_shape_fn((39, 200), |(_, c)| c as f64);
        let fixed = fix_length(matrix.view(), 150);
        assert_eq!(fixed.dim(), (39, 150));
        assert_eq!(fixed, matrix.slice(s![.., ..150]));
    }

    #[test]
    fn flattens_row_major() {
        let matrix = array![[1.0, 2.0], [3.0, 4.0]];
        assert_eq!(flatten(matrix.view()).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }
}
