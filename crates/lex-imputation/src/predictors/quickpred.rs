//! Quick predictor selection.
//!
//! A predictor is selected for a target when either the correlation of the
//! two variables' values, or the correlation of the target's missingness
//! indicator with the predictor's values, exceeds `mincor` in absolute value
//! and enough target-missing cases have the predictor observed.

use crate::config::PredictorConfig;
use crate::data::{Dataset, VariableRole};
use crate::error::{ImputationError, Result};
use crate::missingness::{MissingnessAnalyzer, PairCounts};
use crate::predictors::PredictorMatrix;
use crate::utils::pairwise_correlation;
use std::collections::HashSet;
use tracing::{debug, info};

/// Builds a [`PredictorMatrix`] from correlation and usable-case thresholds.
pub struct PredictorMatrixBuilder {
    config: PredictorConfig,
}

impl PredictorMatrixBuilder {
    pub fn new(config: PredictorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Build the matrix for `dataset`.
    ///
    /// Only fails when a force-include or force-exclude name is not a
    /// declared variable. A target with no selected predictors is imputed
    /// from its marginal distribution.
    pub fn build(&self, dataset: &Dataset) -> Result<PredictorMatrix> {
        self.config.validate()?;
        let include = resolve_names(dataset, &self.config.include, "include")?;
        let exclude = resolve_names(dataset, &self.config.exclude, "exclude")?;

        let report = MissingnessAnalyzer::analyze(dataset);
        let mut matrix = PredictorMatrix::for_dataset(dataset);
        let p = dataset.ncols();

        for target in (0..p).filter(|&t| is_target(dataset, t)) {
            let indicator: Vec<Option<f64>> = (0..dataset.nrows())
                .map(|row| Some(if dataset.is_missing(target, row) { 1.0 } else { 0.0 }))
                .collect();

            for predictor in (0..p).filter(|&k| k != target && can_predict(dataset, k)) {
                let selected = self.passes_correlation(dataset, target, predictor, &indicator)
                    && self.passes_usable_cases(&report.pairs, target, predictor);
                matrix.set(target, predictor, selected);
            }

            for &k in &exclude {
                matrix.set(target, k, false);
            }
            for &k in include.iter().filter(|&&k| k != target && can_predict(dataset, k)) {
                matrix.set(target, k, true);
            }

            // Formula inputs are forced in only where the passive variable
            // itself was selected; an unselected passive adds nothing.
            substitute_passive(dataset, &mut matrix, target);
            debug!(
                "Predictors for '{}': {}",
                dataset.name(target),
                matrix.row_count(target)
            );
        }

        info!(
            "Predictor matrix built: {} targets, {} links",
            (0..p).filter(|&t| matrix.row_count(t) > 0).count(),
            (0..p).map(|t| matrix.row_count(t)).sum::<usize>()
        );
        Ok(matrix)
    }

    fn passes_correlation(
        &self,
        dataset: &Dataset,
        target: usize,
        predictor: usize,
        indicator: &[Option<f64>],
    ) -> bool {
        let values = dataset.column(predictor);
        let direct = pairwise_correlation(dataset.column(target), values).unwrap_or(0.0);
        let response = pairwise_correlation(indicator, values).unwrap_or(0.0);
        direct.abs().max(response.abs()) > self.config.mincor
    }

    fn passes_usable_cases(&self, pairs: &PairCounts, target: usize, predictor: usize) -> bool {
        pairs
            .usable_cases(target, predictor)
            .is_none_or(|puc| puc >= self.config.minpuc)
    }
}

fn is_target(dataset: &Dataset, var: usize) -> bool {
    dataset.role(var) == VariableRole::Target && dataset.missing_count(var) > 0
}

fn can_predict(dataset: &Dataset, var: usize) -> bool {
    dataset.role(var) != VariableRole::Excluded
}

fn resolve_names(dataset: &Dataset, names: &[String], option: &str) -> Result<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            dataset.schema().index_of(name).ok_or_else(|| {
                ImputationError::DataValidation(format!(
                    "Force-{} names unknown variable '{}'",
                    option, name
                ))
            })
        })
        .collect()
}

/// Replace every passive predictor of `target` with its formula inputs,
/// following passive inputs down to modeled or observed variables.
fn substitute_passive(dataset: &Dataset, matrix: &mut PredictorMatrix, target: usize) {
    let passive: Vec<usize> = matrix
        .predictors_of(target)
        .into_iter()
        .filter(|&k| dataset.role(k) == VariableRole::Passive)
        .collect();

    for k in passive {
        matrix.set(target, k, false);
        let mut seen = HashSet::new();
        for input in passive_inputs(dataset, k, &mut seen) {
            if input != target && can_predict(dataset, input) {
                matrix.set(target, input, true);
            }
        }
    }
}

fn passive_inputs(dataset: &Dataset, var: usize, seen: &mut HashSet<usize>) -> Vec<usize> {
    let mut inputs = Vec::new();
    if !seen.insert(var) {
        return inputs;
    }
    let Some(formula) = &dataset.spec(var).formula else {
        return inputs;
    };
    for name in formula.inputs() {
        let Some(input) = dataset.schema().index_of(name) else {
            continue;
        };
        if dataset.role(input) == VariableRole::Passive {
            inputs.extend(passive_inputs(dataset, input, seen));
        } else if !inputs.contains(&input) {
            inputs.push(input);
        }
    }
    inputs
}
