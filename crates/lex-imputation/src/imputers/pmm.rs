//! Predictive mean matching.
//!
//! A Bayesian linear regression draw supplies `β*`; observed cases are
//! matched on `Xβ̂` and missing cases on `Xβ*`. The imputed value is the
//! observed value of a donor picked uniformly from the `d` closest matches.

use crate::imputers::{FitFailure, standard_normals};
use crate::imputers::linalg::{cholesky, cholesky_solve, solve_upper_t};
use ndarray::{Array1, Array2};
use rand::Rng;
use rand::distributions::Distribution;
use rand::seq::SliceRandom;
use statrs::distribution::ChiSquared;

/// Fitted PMM model for one variable in one iteration.
#[derive(Debug, Clone)]
pub(crate) struct PmmModel {
    beta_hat: Array1<f64>,
    beta_star: Array1<f64>,
    /// `(fitted value, observed value)` for every training case, in a
    /// random order so equal distances resolve at random.
    donors: Vec<(f64, f64)>,
    pool_size: usize,
}

impl PmmModel {
    pub(crate) fn coefficients(&self) -> &Array1<f64> {
        &self.beta_hat
    }

    /// Impute one case from its design row.
    pub(crate) fn draw<R: Rng + ?Sized>(&self, row: &[f64], rng: &mut R) -> f64 {
        let target: f64 = row.iter().zip(self.beta_star.iter()).map(|(x, b)| x * b).sum();

        let mut distances: Vec<(f64, usize)> = self
            .donors
            .iter()
            .enumerate()
            .map(|(i, (fitted, _))| ((fitted - target).abs(), i))
            .collect();
        let d = self.pool_size.min(distances.len()).max(1);
        if d < distances.len() {
            distances.select_nth_unstable_by(d - 1, |a, b| a.0.total_cmp(&b.0));
        }

        let pick = distances[rng.gen_range(0..d)].1;
        self.donors[pick].1
    }
}

/// Fit the PMM model on `x` (intercept included) and observed values `y`.
pub(crate) fn fit_pmm<R: Rng + ?Sized>(
    x: &Array2<f64>,
    y: &[f64],
    ridge: f64,
    donors: usize,
    rng: &mut R,
) -> Result<PmmModel, FitFailure> {
    let (n, p) = x.dim();
    let y = Array1::from(y.to_vec());

    let xtx = x.t().dot(x);
    let mut penalized = xtx.clone();
    for j in 0..p {
        penalized[[j, j]] += ridge * xtx[[j, j]];
    }
    let l = cholesky(&penalized).map_err(|column| FitFailure::Collinear { column })?;

    let beta_hat = cholesky_solve(&l, &x.t().dot(&y));
    let residuals = &y - &x.dot(&beta_hat);
    let rss: f64 = residuals.iter().map(|r| r * r).sum();

    let df = n.saturating_sub(p).max(1) as f64;
    let chi2 = ChiSquared::new(df).map_err(|_| FitFailure::InsufficientData)?;
    let sigma_star = (rss / chi2.sample(rng)).sqrt();

    let z = standard_normals(p, rng)?;
    let beta_star = &beta_hat + &(solve_upper_t(&l, &z) * sigma_star);

    if beta_star.iter().chain(beta_hat.iter()).any(|b| !b.is_finite()) {
        return Err(FitFailure::NonConvergence { column: None });
    }

    let fitted = x.dot(&beta_hat);
    let mut pool: Vec<(f64, f64)> = fitted.iter().copied().zip(y.iter().copied()).collect();
    pool.shuffle(rng);

    Ok(PmmModel {
        beta_hat,
        beta_star,
        donors: pool,
        pool_size: donors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn design(values: &[f64]) -> Array2<f64> {
        let mut x = Array2::ones((values.len(), 2));
        for (i, v) in values.iter().enumerate() {
            x[[i, 1]] = *v;
        }
        x
    }

    #[test]
    fn test_pmm_recovers_linear_trend() {
        let xs: Vec<f64> = (1..=20).map(f64::from).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 + 2.0 * x).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let model = fit_pmm(&design(&xs), &ys, 1e-5, 5, &mut rng).unwrap();

        let beta = model.coefficients();
        assert!((beta[1] - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_pmm_draws_observed_values() {
        let xs: Vec<f64> = (1..=10).map(f64::from).collect();
        let ys: Vec<f64> = vec![1.0, 3.0, 2.0, 5.0, 4.0, 6.0, 8.0, 7.0, 10.0, 9.0];
        let mut rng = StdRng::seed_from_u64(11);
        let model = fit_pmm(&design(&xs), &ys, 1e-5, 3, &mut rng).unwrap();

        for _ in 0..50 {
            let value = model.draw(&[1.0, 5.5], &mut rng);
            assert!(ys.contains(&value));
        }
    }

    #[test]
    fn test_pmm_detects_duplicate_column() {
        let mut x = Array2::ones((6, 3));
        for i in 0..6 {
            x[[i, 1]] = i as f64;
            x[[i, 2]] = i as f64;
        }
        let y = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut rng = StdRng::seed_from_u64(1);
        assert!(fit_pmm(&x, &y, 0.0, 5, &mut rng).is_err());
    }
}
