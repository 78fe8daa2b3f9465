//! Multivariate Rubin's rules for coefficient vectors.

use crate::error::PoolingError;
use crate::pooling::rubin::{PooledEstimate, pool_scalar};
use ndarray::{Array1, Array2};

/// Pooled inference for a vector estimand.
#[derive(Debug, Clone, PartialEq)]
pub struct PooledVector {
    pub m: usize,
    pub qbar: Array1<f64>,
    pub ubar: Array2<f64>,
    /// Between-imputation covariance (zero when `m = 1`)
    pub b: Array2<f64>,
    /// Total covariance `Ubar + (1 + 1/m) B`
    pub t: Array2<f64>,
    /// Scalar summaries per component, from the diagonals
    pub components: Vec<PooledEstimate>,
}

impl PooledVector {
    pub fn dim(&self) -> usize {
        self.qbar.len()
    }
}

/// Pool `m` estimate vectors with their covariance matrices.
pub fn pool_vector(
    estimates: &[Array1<f64>],
    covariances: &[Array2<f64>],
    complete_data_df: Option<f64>,
) -> Result<PooledVector, PoolingError> {
    let Some(first) = estimates.first() else {
        return Err(PoolingError::NoImputations);
    };
    if estimates.len() != covariances.len() {
        return Err(PoolingError::LengthMismatch {
            estimates: estimates.len(),
            variances: covariances.len(),
        });
    }

    let p = first.len();
    for (i, (q, u)) in estimates.iter().zip(covariances).enumerate() {
        if q.len() != p {
            return Err(PoolingError::DimensionMismatch {
                imputation: i + 1,
                expected: p,
                actual: q.len(),
            });
        }
        if u.nrows() != p || u.ncols() != p {
            return Err(PoolingError::DimensionMismatch {
                imputation: i + 1,
                expected: p,
                actual: if u.nrows() != p { u.nrows() } else { u.ncols() },
            });
        }
        if let Some(&value) = u.iter().find(|v| !v.is_finite()) {
            return Err(PoolingError::InvalidVariance { index: i, value });
        }
    }

    let components = (0..p)
        .map(|j| {
            let q: Vec<f64> = estimates.iter().map(|q| q[j]).collect();
            let u: Vec<f64> = covariances.iter().map(|u| u[[j, j]]).collect();
            pool_scalar(&q, &u, complete_data_df)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let m = estimates.len();
    let mf = m as f64;
    let mut qbar = Array1::<f64>::zeros(p);
    let mut ubar = Array2::<f64>::zeros((p, p));
    for (q, u) in estimates.iter().zip(covariances) {
        qbar += q;
        ubar += u;
    }
    qbar /= mf;
    ubar /= mf;

    let mut b = Array2::<f64>::zeros((p, p));
    if m > 1 {
        for q in estimates {
            let d = q - &qbar;
            for r in 0..p {
                for c in 0..p {
                    b[[r, c]] += d[r] * d[c];
                }
            }
        }
        b /= mf - 1.0;
    }
    let t = &ubar + &(&b * (1.0 + 1.0 / mf));

    Ok(PooledVector {
        m,
        qbar,
        ubar,
        b,
        t,
        components,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_pool_vector_matches_scalar_diagonal() {
        let q = vec![array![1.0, 0.1], array![2.0, 0.2], array![3.0, 0.3]];
        let u = vec![
            array![[0.5, 0.1], [0.1, 0.01]],
            array![[0.5, 0.1], [0.1, 0.01]],
            array![[0.5, 0.1], [0.1, 0.01]],
        ];
        let pooled = pool_vector(&q, &u, None).unwrap();

        assert_eq!(pooled.dim(), 2);
        assert!((pooled.qbar[0] - 2.0).abs() < 1e-12);
        assert!((pooled.b[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((pooled.b[[0, 1]] - 0.1).abs() < 1e-12);
        assert!((pooled.b[[1, 0]] - pooled.b[[0, 1]]).abs() < 1e-15);
        for j in 0..2 {
            assert!((pooled.t[[j, j]] - pooled.components[j].t).abs() < 1e-12);
        }
        assert!((pooled.t[[0, 1]] - (0.1 + 4.0 / 3.0 * 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_pool_vector_dimension_mismatch() {
        let q = vec![array![1.0, 2.0], array![1.0]];
        let u = vec![Array2::eye(2), Array2::eye(2)];
        assert_eq!(
            pool_vector(&q, &u, None),
            Err(PoolingError::DimensionMismatch {
                imputation: 2,
                expected: 2,
                actual: 1
            })
        );

        let q = vec![array![1.0, 2.0]];
        let u = vec![Array2::eye(3)];
        assert!(matches!(
            pool_vector(&q, &u, None),
            Err(PoolingError::DimensionMismatch { .. })
        ));
        assert_eq!(pool_vector(&[], &[], None), Err(PoolingError::NoImputations));
    }

    #[test]
    fn test_single_imputation_has_zero_between_covariance() {
        let pooled = pool_vector(&[array![1.0, 2.0]], &[Array2::eye(2)], None).unwrap();
        assert!(pooled.b.iter().all(|v| *v == 0.0));
        assert_eq!(pooled.t, Array2::<f64>::eye(2));
        assert!(pooled.components.iter().all(|c| !c.between_variance_defined));
    }
}
