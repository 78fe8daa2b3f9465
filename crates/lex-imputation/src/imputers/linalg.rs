//! Small dense linear algebra for the normal equations and information
//! matrices of the imputation models.

use ndarray::{Array1, Array2};

/// Relative pivot tolerance: a pivot below this fraction of its diagonal
/// entry marks the column as linearly dependent on earlier ones.
const PIVOT_TOLERANCE: f64 = 1e-10;

/// Cholesky factor `L` (lower triangular) of a symmetric positive-definite
/// matrix, `A = L L'`.
///
/// Returns `Err(column)` with the first column whose pivot collapses.
pub(crate) fn cholesky(a: &Array2<f64>) -> Result<Array2<f64>, usize> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }

            if i == j {
                let diag = a[[i, i]] - sum;
                let floor = PIVOT_TOLERANCE * a[[i, i]].abs().max(f64::MIN_POSITIVE);
                if !diag.is_finite() || diag <= floor {
                    return Err(i);
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    Ok(l)
}

/// Forward substitution: solve `L y = b`.
pub(crate) fn solve_lower(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }
    y
}

/// Backward substitution: solve `L' x = y`.
pub(crate) fn solve_upper_t(l: &Array2<f64>, y: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }
    x
}

/// Solve `A x = b` given the Cholesky factor of `A`.
pub(crate) fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    solve_upper_t(l, &solve_lower(l, b))
}

/// Diagonal of `A⁻¹` given the Cholesky factor of `A`.
pub(crate) fn inverse_diagonal(l: &Array2<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut diag = Array1::zeros(n);
    for i in 0..n {
        let mut e = Array1::zeros(n);
        e[i] = 1.0;
        diag[i] = cholesky_solve(l, &e)[i];
    }
    diag
}
