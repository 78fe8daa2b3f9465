//! Logistic regression for binary targets.
//!
//! Fitted by iteratively reweighted least squares on the augmented training
//! data; imputation draws `β* = β̂ + L⁻ᵀz` from the approximate posterior and
//! then a Bernoulli outcome with probability `logit⁻¹(xβ*)`.

use crate::imputers::design::{Augmented, augment};
use crate::imputers::linalg::{cholesky, cholesky_solve, solve_upper_t};
use crate::imputers::{
    CONVERGENCE_TOLERANCE, FitFailure, MAX_STEP_HALVINGS, largest_standardized, standard_normals,
};
use ndarray::{Array1, Array2};
use rand::Rng;

/// Fitted logistic model for one variable in one iteration.
#[derive(Debug, Clone)]
pub(crate) struct LogisticModel {
    beta_hat: Array1<f64>,
    beta_star: Array1<f64>,
}

impl LogisticModel {
    pub(crate) fn coefficients(&self) -> &Array1<f64> {
        &self.beta_hat
    }

    /// Draw a level code (0 or 1) for one case.
    pub(crate) fn draw<R: Rng + ?Sized>(&self, row: &[f64], rng: &mut R) -> f64 {
        let eta: f64 = row.iter().zip(self.beta_star.iter()).map(|(x, b)| x * b).sum();
        if rng.gen_bool(sigmoid(eta).clamp(0.0, 1.0)) {
            1.0
        } else {
            0.0
        }
    }
}

pub(crate) fn fit_logistic<R: Rng + ?Sized>(
    x: &Array2<f64>,
    y: &[f64],
    max_iterations: usize,
    rng: &mut R,
) -> Result<LogisticModel, FitFailure> {
    let data = augment(x, y, 2);
    let (beta_hat, l) = irls(&data, max_iterations)?;

    let z = standard_normals(beta_hat.len(), rng)?;
    let beta_star = &beta_hat + &solve_upper_t(&l, &z);
    if beta_star.iter().any(|b| !b.is_finite()) {
        return Err(FitFailure::NonConvergence {
            column: largest_standardized(&beta_hat, &l, beta_hat.len()),
        });
    }

    Ok(LogisticModel {
        beta_hat,
        beta_star,
    })
}

fn sigmoid(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta).exp())
}

fn fitted_probability(row: ndarray::ArrayView1<f64>, beta: &Array1<f64>) -> f64 {
    sigmoid(row.dot(beta)).clamp(1e-10, 1.0 - 1e-10)
}

/// Information matrix `X'WX` and score `X'w(y - π)` at `beta`.
fn information(data: &Augmented, beta: &Array1<f64>) -> (Array2<f64>, Array1<f64>) {
    let p = data.x.ncols();
    let mut info = Array2::zeros((p, p));
    let mut score = Array1::zeros(p);

    for (i, row) in data.x.rows().into_iter().enumerate() {
        let pi = fitted_probability(row, beta);
        let w = data.weights[i] * pi * (1.0 - pi);
        let r = data.weights[i] * (data.y[i] - pi);
        for a in 0..p {
            score[a] += row[a] * r;
            for b in 0..=a {
                info[[a, b]] += w * row[a] * row[b];
            }
        }
    }
    for a in 0..p {
        for b in 0..a {
            info[[b, a]] = info[[a, b]];
        }
    }
    (info, score)
}

fn deviance(data: &Augmented, beta: &Array1<f64>) -> f64 {
    data.x
        .rows()
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let pi = fitted_probability(row, beta);
            let y = data.y[i];
            -2.0 * data.weights[i] * (y * pi.ln() + (1.0 - y) * (1.0 - pi).ln())
        })
        .sum()
}

/// Returns the estimate and the Cholesky factor of the information matrix
/// at the estimate.
fn irls(data: &Augmented, max_iterations: usize) -> Result<(Array1<f64>, Array2<f64>), FitFailure> {
    let mut beta = Array1::zeros(data.x.ncols());
    let mut dev_old = deviance(data, &beta);
    let mut converged = false;

    for _ in 0..max_iterations {
        let (info, score) = information(data, &beta);
        let l = cholesky(&info).map_err(|column| FitFailure::Collinear { column })?;
        let step = cholesky_solve(&l, &score);
        let mut candidate = &beta + &step;
        let mut dev = deviance(data, &candidate);
        let mut scale = 1.0;
        for _ in 0..MAX_STEP_HALVINGS {
            if dev <= dev_old {
                break;
            }
            scale *= 0.5;
            candidate = &beta + &(&step * scale);
            dev = deviance(data, &candidate);
        }
        beta = candidate;

        if beta.iter().any(|v| !v.is_finite()) {
            return Err(FitFailure::NonConvergence {
                column: largest_standardized(&beta, &l, beta.len()),
            });
        }

        if (dev - dev_old).abs() / (dev.abs() + 0.1) < CONVERGENCE_TOLERANCE {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    let (info, _) = information(data, &beta);
    let l = cholesky(&info).map_err(|column| FitFailure::Collinear { column })?;
    if !converged {
        return Err(FitFailure::NonConvergence {
            column: largest_standardized(&beta, &l, beta.len()),
        });
    }
    Ok((beta, l))
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
    fn test_logistic_slope_sign() {
        let xs: Vec<f64> = (1..=12).map(f64::from).collect();
        let ys = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let mut rng = StdRng::seed_from_u64(3);
        let model = fit_logistic(&design(&xs), &ys, 25, &mut rng).unwrap();
        assert!(model.coefficients()[1] > 0.0);
    }

    #[test]
    fn test_logistic_finite_under_separation() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let ys = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut rng = StdRng::seed_from_u64(5);
        let model = fit_logistic(&design(&xs), &ys, 25, &mut rng).unwrap();

        assert!(model.coefficients().iter().all(|b| b.is_finite()));
        assert!(model.coefficients()[1] > 0.0);
        for _ in 0..20 {
            let code = model.draw(&[1.0, 3.5], &mut rng);
            assert!(code == 0.0 || code == 1.0);
        }
    }
}
