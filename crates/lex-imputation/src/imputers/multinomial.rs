//! Multinomial logistic regression for categorical targets.
//!
//! Level 0 is the reference. Parameters are stacked per non-reference level,
//! `θ = [β₁; β₂; ...; β_{K-1}]`, and fitted by Newton-Raphson on the
//! augmented training data.

use crate::imputers::design::{Augmented, augment};
use crate::imputers::linalg::{cholesky, cholesky_solve, solve_upper_t};
use crate::imputers::{
    CONVERGENCE_TOLERANCE, FitFailure, MAX_STEP_HALVINGS, largest_standardized, standard_normals,
};
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;

#[derive(Debug, Clone)]
pub(crate) struct MultinomialModel {
    n_levels: usize,
    ncols: usize,
    theta_hat: Array1<f64>,
    theta_star: Array1<f64>,
}

impl MultinomialModel {
    /// Stacked estimates, `ncols` per non-reference level.
    pub(crate) fn coefficients(&self) -> &Array1<f64> {
        &self.theta_hat
    }

    pub(crate) fn n_levels(&self) -> usize {
        self.n_levels
    }

    pub(crate) fn draw<R: Rng + ?Sized>(&self, row: &[f64], rng: &mut R) -> f64 {
        let row = ArrayView1::from(row);
        let probs = probabilities(row, &self.theta_star, self.n_levels, self.ncols);
        let u: f64 = rng.gen_range(0.0..1.0);
        let mut cumulative = 0.0;
        for (level, p) in probs.iter().enumerate() {
            cumulative += p;
            if u < cumulative {
                return level as f64;
            }
        }
        (self.n_levels - 1) as f64
    }
}

pub(crate) fn fit_multinomial<R: Rng + ?Sized>(
    x: &Array2<f64>,
    y: &[f64],
    n_levels: usize,
    max_iterations: usize,
    rng: &mut R,
) -> Result<MultinomialModel, FitFailure> {
    if n_levels < 2 {
        return Err(FitFailure::InsufficientData);
    }
    let ncols = x.ncols();
    let data = augment(x, y, n_levels);
    let (theta_hat, l) = newton(&data, n_levels, max_iterations)?;

    let z = standard_normals(theta_hat.len(), rng)?;
    let theta_star = &theta_hat + &solve_upper_t(&l, &z);
    if theta_star.iter().any(|t| !t.is_finite()) {
        return Err(FitFailure::NonConvergence {
            column: largest_standardized(&theta_hat, &l, ncols),
        });
    }

    Ok(MultinomialModel {
        n_levels,
        ncols,
        theta_hat,
        theta_star,
    })
}

/// Level probabilities for one design row.
fn probabilities(row: ArrayView1<f64>, theta: &Array1<f64>, n_levels: usize, ncols: usize) -> Vec<f64> {
    let mut eta = vec![0.0; n_levels];
    for (c, value) in eta.iter_mut().enumerate().skip(1) {
        let offset = (c - 1) * ncols;
        *value = (0..ncols).map(|j| row[j] * theta[offset + j]).sum();
    }
    let max = eta.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = eta.iter().map(|e| (e - max).exp()).collect();
    let total: f64 = exp.iter().sum();
    exp.into_iter()
        .map(|e| (e / total).clamp(1e-12, 1.0))
        .collect()
}

fn information(data: &Augmented, theta: &Array1<f64>, n_levels: usize) -> (Array2<f64>, Array1<f64>) {
    let ncols = data.x.ncols();
    let q = n_levels - 1;
    let dim = q * ncols;
    let mut info = Array2::zeros((dim, dim));
    let mut score = Array1::zeros(dim);

    for (i, row) in data.x.rows().into_iter().enumerate() {
        let probs = probabilities(row, theta, n_levels, ncols);
        let w = data.weights[i];
        let observed = data.y[i] as usize;

        for c in 1..n_levels {
            let indicator = if observed == c { 1.0 } else { 0.0 };
            let residual = w * (indicator - probs[c]);
            for a in 0..ncols {
                score[(c - 1) * ncols + a] += residual * row[a];
            }
            for d in 1..n_levels {
                let delta = if c == d { 1.0 } else { 0.0 };
                let weight = w * probs[c] * (delta - probs[d]);
                for a in 0..ncols {
                    for b in 0..ncols {
                        info[[(c - 1) * ncols + a, (d - 1) * ncols + b]] += weight * row[a] * row[b];
                    }
                }
            }
        }
    }
    (info, score)
}

fn deviance(data: &Augmented, theta: &Array1<f64>, n_levels: usize) -> f64 {
    let ncols = data.x.ncols();
    data.x
        .rows()
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let probs = probabilities(row, theta, n_levels, ncols);
            -2.0 * data.weights[i] * probs[data.y[i] as usize].ln()
        })
        .sum()
}

fn newton(
    data: &Augmented,
    n_levels: usize,
    max_iterations: usize,
) -> Result<(Array1<f64>, Array2<f64>), FitFailure> {
    let ncols = data.x.ncols();
    let collinear = |index: usize| FitFailure::Collinear {
        column: index % ncols,
    };

    let mut theta = Array1::zeros((n_levels - 1) * ncols);
    let mut dev_old = deviance(data, &theta, n_levels);
    let mut converged = false;

    for _ in 0..max_iterations {
        let (info, score) = information(data, &theta, n_levels);
        let l = cholesky(&info).map_err(collinear)?;
        let step = cholesky_solve(&l, &score);
        let mut candidate = &theta + &step;
        let mut dev = deviance(data, &candidate, n_levels);
        let mut scale = 1.0;
        for _ in 0..MAX_STEP_HALVINGS {
            if dev <= dev_old {
                break;
            }
            scale *= 0.5;
            candidate = &theta + &(&step * scale);
            dev = deviance(data, &candidate, n_levels);
        }
        theta = candidate;

        if theta.iter().any(|v| !v.is_finite()) {
            return Err(FitFailure::NonConvergence {
                column: largest_standardized(&theta, &l, ncols),
            });
        }

        if (dev - dev_old).abs() / (dev.abs() + 0.1) < CONVERGENCE_TOLERANCE {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    let (info, _) = information(data, &theta, n_levels);
    let l = cholesky(&info).map_err(collinear)?;
    if !converged {
        return Err(FitFailure::NonConvergence {
            column: largest_standardized(&theta, &l, ncols),
        });
    }
    Ok((theta, l))
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
    fn test_multinomial_orders_levels_along_predictor() {
        let xs: Vec<f64> = (1..=15).map(f64::from).collect();
        let ys = [
            0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 2.0, 2.0, 2.0, 2.0, 2.0,
        ];
        let mut rng = StdRng::seed_from_u64(9);
        let model = fit_multinomial(&design(&xs), &ys, 3, 25, &mut rng).unwrap();

        let theta = model.coefficients();
        assert_eq!(theta.len(), 4);
        // slope of level 2 against the reference exceeds level 1's
        assert!(theta[3] > theta[1]);
        assert!(theta[1] > 0.0);

        for _ in 0..30 {
            let code = model.draw(&[1.0, 8.0], &mut rng);
            assert!(code < model.n_levels() as f64);
            assert_eq!(code.fract(), 0.0);
        }
    }

    #[test]
    fn test_multinomial_handles_unobserved_level() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let ys = [0.0, 0.0, 1.0, 0.0, 1.0, 1.0];
        let mut rng = StdRng::seed_from_u64(2);
        let model = fit_multinomial(&design(&xs), &ys, 3, 25, &mut rng).unwrap();
        assert!(model.coefficients().iter().all(|t| t.is_finite()));
    }
}
