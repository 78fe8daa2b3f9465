//! Analysis plug-in contract and pooled analyses.
//!
//! An [`Analysis`] turns one completed dataset into an (estimate, variance)
//! pair. It never sees which values were imputed. [`pool_analysis`] runs it
//! on every completed dataset and combines the results with Rubin's rules.

use crate::data::{Dataset, VariableType};
use crate::error::{ImputationError, Result, ResultExt};
use crate::pipeline::ImputationResult;
use crate::pooling::rubin::{PooledEstimate, pool_scalar};
use crate::utils::{mean, sample_variance};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Complete-data result of one analysis on one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub estimate: f64,
    /// Squared standard error
    pub variance: f64,
    /// Complete-data degrees of freedom, enabling the small-sample correction
    pub complete_data_df: Option<f64>,
}

impl Estimate {
    pub fn new(estimate: f64, variance: f64) -> Self {
        Self {
            estimate,
            variance,
            complete_data_df: None,
        }
    }

    pub fn with_df(mut self, df: f64) -> Self {
        self.complete_data_df = Some(df);
        self
    }
}

/// A named estimand computed from a single completed dataset.
pub trait Analysis: Send + Sync {
    fn estimand(&self) -> &str;

    fn analyze(&self, dataset: &Dataset) -> Result<Estimate>;
}

/// [`Analysis`] backed by a closure.
pub struct ClosureAnalysis<F>
where
    F: Fn(&Dataset) -> Result<Estimate> + Send + Sync,
{
    estimand: String,
    analyze: F,
}

impl<F> ClosureAnalysis<F>
where
    F: Fn(&Dataset) -> Result<Estimate> + Send + Sync,
{
    pub fn new(estimand: impl Into<String>, analyze: F) -> Self {
        Self {
            estimand: estimand.into(),
            analyze,
        }
    }
}

impl<F> Analysis for ClosureAnalysis<F>
where
    F: Fn(&Dataset) -> Result<Estimate> + Send + Sync,
{
    fn estimand(&self) -> &str {
        &self.estimand
    }

    fn analyze(&self, dataset: &Dataset) -> Result<Estimate> {
        (self.analyze)(dataset)
    }
}

/// Mean of a continuous variable, with variance `s²/n` and `n - 1`
/// complete-data degrees of freedom.
#[derive(Debug, Clone)]
pub struct MeanAnalysis {
    variable: String,
    estimand: String,
}

impl MeanAnalysis {
    pub fn new(variable: impl Into<String>) -> Self {
        let variable = variable.into();
        Self {
            estimand: format!("mean({})", variable),
            variable,
        }
    }
}

impl Analysis for MeanAnalysis {
    fn estimand(&self) -> &str {
        &self.estimand
    }

    fn analyze(&self, dataset: &Dataset) -> Result<Estimate> {
        let var = dataset.index_of(&self.variable)?;
        if dataset.var_type(var) != VariableType::Continuous {
            return Err(ImputationError::AnalysisFailed {
                estimand: self.estimand.clone(),
                reason: format!("'{}' is not continuous", self.variable),
            });
        }

        let values = dataset.observed_values(var);
        let n = values.len() as f64;
        match (mean(&values), sample_variance(&values)) {
            (Some(m), Some(s2)) => Ok(Estimate::new(m, s2 / n).with_df(n - 1.0)),
            _ => Err(ImputationError::AnalysisFailed {
                estimand: self.estimand.clone(),
                reason: format!("'{}' has fewer than two values", self.variable),
            }),
        }
    }
}

/// Per-imputation estimates and their pooled combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PooledAnalysis {
    pub estimand: String,
    /// One entry per completed dataset, in imputation order
    pub estimates: Vec<Estimate>,
    pub pooled: PooledEstimate,
}

/// Run `analysis` on every completed dataset of `result` and pool.
///
/// Datasets are analyzed on the rayon pool when the run was parallel. The
/// complete-data df is the smallest one reported, when every dataset
/// reports one.
pub fn pool_analysis<A>(result: &ImputationResult, analysis: &A) -> Result<PooledAnalysis>
where
    A: Analysis + ?Sized,
{
    let estimand = analysis.estimand();
    let run = |imputed: &crate::pipeline::ImputedDataset| {
        analysis
            .analyze(&imputed.data)
            .map_err(|e| ImputationError::AnalysisFailed {
                estimand: estimand.to_string(),
                reason: format!("imputation {}: {}", imputed.imputation, e),
            })
    };

    let estimates: Vec<Estimate> = if result.config.parallel {
        result.datasets.par_iter().map(run).collect::<Result<Vec<_>>>()?
    } else {
        result.datasets.iter().map(run).collect::<Result<Vec<_>>>()?
    };
    debug!("Analysis '{}' ran on {} datasets", estimand, estimates.len());

    let q: Vec<f64> = estimates.iter().map(|e| e.estimate).collect();
    let u: Vec<f64> = estimates.iter().map(|e| e.variance).collect();
    let df = estimates
        .iter()
        .map(|e| e.complete_data_df)
        .collect::<Option<Vec<f64>>>()
        .and_then(|dfs| dfs.into_iter().reduce(f64::min));

    let pooled = pool_scalar(&q, &u, df).context(format!("Pooling {}", estimand))?;
    info!(
        "Pooled {}: estimate={:.6}, se={:.6}, m={}",
        estimand,
        pooled.qbar,
        pooled.std_error(),
        pooled.m
    );

    Ok(PooledAnalysis {
        estimand: estimand.to_string(),
        estimates,
        pooled,
    })
}
