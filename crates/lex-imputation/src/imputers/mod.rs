//! Conditional imputation models and the per-variable method registry.
//!
//! Three model families are available: predictive mean matching for
//! continuous variables, logistic regression for binary variables and
//! multinomial logistic regression for categorical variables. All of them
//! draw their parameters from an approximate posterior before imputing, so
//! between-imputation variability reflects parameter uncertainty.

mod design;
mod linalg;
mod logistic;
mod marginal;
mod multinomial;
mod pmm;
mod registry;

pub(crate) use design::DesignLayout;
pub(crate) use marginal::MarginalSampler;
pub use registry::{MethodEntry, MethodRegistry};

use crate::data::{Dataset, PassiveFormula, VariableType};
use linalg::{cholesky, inverse_diagonal};
use logistic::LogisticModel;
use multinomial::MultinomialModel;
use ndarray::{Array1, Array2};
use pmm::PmmModel;
use rand::Rng;
use rand::distributions::Distribution;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

/// Relative deviance change below which a Newton fit has converged.
pub(crate) const CONVERGENCE_TOLERANCE: f64 = 1e-8;

/// Step halvings tried when a Newton step increases the deviance.
pub(crate) const MAX_STEP_HALVINGS: usize = 10;

// =============================================================================
// Methods
// =============================================================================

/// How a variable is imputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ImputationMethod {
    /// Predictive mean matching
    Pmm,
    /// Binary logistic regression
    Logistic,
    /// Multinomial logistic regression
    MultinomialLogistic,
    /// Deterministic recomputation from other variables
    Passive { formula: PassiveFormula },
    /// Not imputed
    None,
}

impl ImputationMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pmm => "pmm",
            Self::Logistic => "logistic",
            Self::MultinomialLogistic => "multinomial_logistic",
            Self::Passive { .. } => "passive",
            Self::None => "none",
        }
    }

    /// True for the fitted model families.
    pub fn is_model(&self) -> bool {
        matches!(self, Self::Pmm | Self::Logistic | Self::MultinomialLogistic)
    }

    /// Whether this method can impute a variable of the given type.
    pub fn supports(&self, var_type: VariableType) -> bool {
        match self {
            Self::Pmm => matches!(var_type, VariableType::Continuous | VariableType::Binary),
            Self::Logistic => var_type == VariableType::Binary,
            Self::MultinomialLogistic => var_type.is_discrete(),
            Self::Passive { .. } | Self::None => true,
        }
    }

    /// Default model family for a variable type.
    pub fn default_for(var_type: VariableType) -> Self {
        match var_type {
            VariableType::Continuous => Self::Pmm,
            VariableType::Binary => Self::Logistic,
            VariableType::Categorical => Self::MultinomialLogistic,
        }
    }
}

impl std::fmt::Display for ImputationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Fit Failures
// =============================================================================

/// Why a model could not be fitted. Always recovered inside the chain.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FitFailure {
    /// Design column linearly dependent on earlier columns
    Collinear { column: usize },
    /// Estimates did not settle; `column` is the design column with the
    /// largest standardized coefficient
    NonConvergence { column: Option<usize> },
    /// Fewer training rows than parameters
    InsufficientData,
}

impl FitFailure {
    /// Predictor variable to drop before retrying, if any.
    pub(crate) fn offending_predictor(&self, layout: &DesignLayout) -> Option<usize> {
        match self {
            Self::Collinear { column } => layout.owner(*column),
            Self::NonConvergence { column } => column.and_then(|c| layout.owner(c)),
            Self::InsufficientData => layout.predictors().last().copied(),
        }
    }

    pub(crate) fn describe(&self, dataset: &Dataset, layout: &DesignLayout) -> String {
        let culprit = self
            .offending_predictor(layout)
            .map(|var| format!(" ('{}')", dataset.name(var)))
            .unwrap_or_default();
        match self {
            Self::Collinear { .. } => format!("collinear predictor{}", culprit),
            Self::NonConvergence { .. } => format!("fit did not converge{}", culprit),
            Self::InsufficientData => format!("too few training rows{}", culprit),
        }
    }
}

/// `n` independent standard normal draws.
pub(crate) fn standard_normals<R: Rng + ?Sized>(
    n: usize,
    rng: &mut R,
) -> Result<Array1<f64>, FitFailure> {
    let normal = Normal::new(0.0, 1.0).map_err(|_| FitFailure::InsufficientData)?;
    Ok((0..n).map(|_| normal.sample(rng)).collect())
}

/// Design column (never the intercept) with the largest `|θ| / se(θ)`.
///
/// `theta` may stack several blocks of `ncols` coefficients; the returned
/// index is the column within a block.
pub(crate) fn largest_standardized(
    theta: &Array1<f64>,
    information_factor: &Array2<f64>,
    ncols: usize,
) -> Option<usize> {
    let variances = inverse_diagonal(information_factor);
    theta
        .iter()
        .enumerate()
        .filter(|(i, _)| i % ncols != 0)
        .map(|(i, t)| {
            let se = variances[i].abs().sqrt();
            let z = if se > 0.0 { t.abs() / se } else { t.abs() };
            (i % ncols, if z.is_finite() { z } else { f64::INFINITY })
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(col, _)| col)
}

// =============================================================================
// Fitting
// =============================================================================

/// Numerical settings shared by every fit in a run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FitSettings {
    pub ridge: f64,
    pub donors: usize,
    pub max_fit_iterations: usize,
}

#[derive(Debug, Clone)]
pub(crate) enum FittedModel {
    Pmm(PmmModel),
    Logistic(LogisticModel),
    Multinomial(MultinomialModel),
}

impl FittedModel {
    /// Draw an imputed value (or level code) for one design row.
    pub(crate) fn draw<R: Rng + ?Sized>(&self, row: &[f64], rng: &mut R) -> f64 {
        match self {
            Self::Pmm(model) => model.draw(row, rng),
            Self::Logistic(model) => model.draw(row, rng),
            Self::Multinomial(model) => model.draw(row, rng),
        }
    }

    /// Named point estimates. Multinomial terms are prefixed with the level
    /// they belong to.
    pub(crate) fn coefficients(&self, labels: &[String], levels: &[String]) -> Vec<Coefficient> {
        let named = |values: &Array1<f64>| -> Vec<Coefficient> {
            labels
                .iter()
                .zip(values.iter())
                .map(|(term, &estimate)| Coefficient {
                    term: term.clone(),
                    estimate,
                })
                .collect()
        };
        match self {
            Self::Pmm(model) => named(model.coefficients()),
            Self::Logistic(model) => named(model.coefficients()),
            Self::Multinomial(model) => {
                let ncols = labels.len();
                model
                    .coefficients()
                    .iter()
                    .enumerate()
                    .map(|(i, &estimate)| {
                        let level = levels.get(i / ncols + 1).map_or("?", String::as_str);
                        Coefficient {
                            term: format!("{}:{}", level, labels[i % ncols]),
                            estimate,
                        }
                    })
                    .collect()
            }
        }
    }
}

/// Fit `method` on design `x` and observed responses `y`.
///
/// Linear dependence among the design columns is checked on the raw
/// training rows first, so augmentation cannot hide a duplicated predictor.
pub(crate) fn fit_model<R: Rng + ?Sized>(
    method: &ImputationMethod,
    x: &Array2<f64>,
    y: &[f64],
    n_levels: usize,
    settings: &FitSettings,
    rng: &mut R,
) -> Result<FittedModel, FitFailure> {
    if x.nrows() < x.ncols() {
        return Err(FitFailure::InsufficientData);
    }
    cholesky(&x.t().dot(x)).map_err(|column| FitFailure::Collinear { column })?;

    match method {
        ImputationMethod::Pmm => {
            pmm::fit_pmm(x, y, settings.ridge, settings.donors, rng).map(FittedModel::Pmm)
        }
        ImputationMethod::Logistic => {
            logistic::fit_logistic(x, y, settings.max_fit_iterations, rng)
                .map(FittedModel::Logistic)
        }
        ImputationMethod::MultinomialLogistic => multinomial::fit_multinomial(
            x,
            y,
            n_levels,
            settings.max_fit_iterations,
            rng,
        )
        .map(FittedModel::Multinomial),
        ImputationMethod::Passive { .. } | ImputationMethod::None => {
            Err(FitFailure::InsufficientData)
        }
    }
}

// =============================================================================
// Summaries
// =============================================================================

/// One estimated coefficient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub term: String,
    pub estimate: f64,
}

/// Model used for a variable in the last completed iteration of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub variable: String,
    pub method: String,
    pub predictors: Vec<String>,
    pub coefficients: Vec<Coefficient>,
    pub training_rows: usize,
    /// True when every predictor was dropped and the marginal was used
    pub marginal: bool,
}

impl ModelSummary {
    /// Estimate for a named term, e.g. `"age"` or `"(intercept)"`.
    pub fn coefficient(&self, term: &str) -> Option<f64> {
        self.coefficients
            .iter()
            .find(|c| c.term == term)
            .map(|c| c.estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    // =========================================================================
    // Method Tests
    // =========================================================================

    #[test]
    fn test_default_methods() {
        assert_eq!(
            ImputationMethod::default_for(VariableType::Continuous),
            ImputationMethod::Pmm
        );
        assert_eq!(
            ImputationMethod::default_for(VariableType::Binary),
            ImputationMethod::Logistic
        );
        assert_eq!(
            ImputationMethod::default_for(VariableType::Categorical),
            ImputationMethod::MultinomialLogistic
        );
    }

    #[test]
    fn test_supports() {
        assert!(ImputationMethod::Pmm.supports(VariableType::Continuous));
        assert!(!ImputationMethod::Pmm.supports(VariableType::Categorical));
        assert!(!ImputationMethod::Logistic.supports(VariableType::Continuous));
        assert!(ImputationMethod::MultinomialLogistic.supports(VariableType::Binary));
    }

    #[test]
    fn test_method_serde() {
        let json = serde_json::to_string(&ImputationMethod::MultinomialLogistic).unwrap();
        assert_eq!(json, r#"{"method":"multinomial_logistic"}"#);

        let parsed: ImputationMethod = serde_json::from_str(
            r#"{"method":"passive","formula":{"op":"var","name":"x"}}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            ImputationMethod::Passive {
                formula: PassiveFormula::var("x")
            }
        );
    }

    // =========================================================================
    // Fit Tests
    // =========================================================================

    #[test]
    fn test_fit_model_detects_duplicate_predictor() {
        let mut x = Array2::ones((8, 3));
        for i in 0..8 {
            x[[i, 1]] = i as f64;
            x[[i, 2]] = i as f64;
        }
        let y = [0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        let settings = FitSettings {
            ridge: 1e-5,
            donors: 5,
            max_fit_iterations: 25,
        };
        let mut rng = StdRng::seed_from_u64(4);

        for method in [ImputationMethod::Pmm, ImputationMethod::Logistic] {
            let err = fit_model(&method, &x, &y, 2, &settings, &mut rng).unwrap_err();
            assert_eq!(err, FitFailure::Collinear { column: 2 });
        }
    }

    #[test]
    fn test_fit_model_insufficient_rows() {
        let x = Array2::ones((1, 2));
        let settings = FitSettings {
            ridge: 1e-5,
            donors: 5,
            max_fit_iterations: 25,
        };
        let mut rng = StdRng::seed_from_u64(4);
        let err = fit_model(&ImputationMethod::Pmm, &x, &[1.0], 0, &settings, &mut rng);
        assert_eq!(err.unwrap_err(), FitFailure::InsufficientData);
    }
}
