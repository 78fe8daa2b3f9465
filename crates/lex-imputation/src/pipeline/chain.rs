//! One chain of the chained-equations sampler.
//!
//! A chain owns a private working copy of the dataset and its own RNG.
//! It starts from marginal draws, then runs `max_iterations` sweeps over
//! the visit sequence, refitting each variable's model on its observed cases
//! and redrawing its missing cases.

use crate::data::{Dataset, VariableRole};
use crate::error::{ImputationError, Result};
use crate::imputers::{
    DesignLayout, FitSettings, FittedModel, ImputationMethod, MarginalSampler, MethodRegistry,
    ModelSummary, fit_model,
};
use crate::pipeline::progress::CancellationToken;
use crate::pipeline::trace::{ConvergenceTrace, FitWarning, TraceEntry, TraceStatistic};
use crate::pipeline::visit::VisitSequence;
use crate::predictors::PredictorMatrix;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, warn};

/// Read-only inputs shared by every chain of a run.
pub(crate) struct ChainPlan<'a> {
    pub original: &'a Dataset,
    pub matrix: &'a PredictorMatrix,
    pub registry: &'a MethodRegistry,
    pub visit: &'a VisitSequence,
    pub monitored: &'a [usize],
    pub samplers: &'a [Option<MarginalSampler>],
    pub settings: FitSettings,
    pub max_iterations: usize,
}

/// What a chain hands back.
pub(crate) struct ChainOutcome {
    pub iterations: usize,
    pub data: Dataset,
    pub models: Vec<ModelSummary>,
    pub trace: ConvergenceTrace,
}

/// Result of updating one variable in one iteration.
struct VariableUpdate {
    summary: ModelSummary,
    warning: Option<FitWarning>,
}

/// Run chain `chain` (1-based) to completion or cancellation.
pub(crate) fn run_chain<P>(
    plan: &ChainPlan<'_>,
    chain: usize,
    seed: u64,
    token: &CancellationToken,
    on_iteration: P,
) -> Result<ChainOutcome>
where
    P: Fn(usize, usize),
{
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = plan.original.clone();

    initialize(plan, &mut data, &mut rng)?;

    let mut trace = ConvergenceTrace::default();
    let mut models = Vec::new();
    let mut iterations = 0;

    for iteration in 1..=plan.max_iterations {
        if token.is_cancelled() {
            debug!("Chain {} cancelled before iteration {}", chain, iteration);
            break;
        }

        let mut sweep_models = Vec::new();
        let mut degraded = Vec::new();
        for &var in plan.visit.indices() {
            match plan.registry.method(var) {
                ImputationMethod::Passive { .. } => data.recompute_passive(var)?,
                method if method.is_model() => {
                    let update = update_variable(plan, &mut data, var, chain, iteration, &mut rng)?;
                    if let Some(warning) = update.warning {
                        warn!("Recovered fit failure: {}", warning);
                        degraded.push(var);
                        trace.warnings.push(warning);
                    }
                    sweep_models.push(update.summary);
                }
                _ => {}
            }
        }

        for &var in plan.monitored {
            trace.entries.push(TraceEntry {
                chain,
                iteration,
                variable: plan.original.name(var).to_string(),
                statistic: TraceStatistic::summarize(&data, var, &trace_rows(plan.original, var)),
                degraded: degraded.contains(&var),
            });
        }

        models = sweep_models;
        iterations = iteration;
        on_iteration(chain, iteration);
    }

    Ok(ChainOutcome {
        iterations,
        data,
        models,
        trace,
    })
}

/// Fill every modeled variable's missing cells from its observed marginal,
/// then bring passive variables up to date.
fn initialize(plan: &ChainPlan<'_>, data: &mut Dataset, rng: &mut StdRng) -> Result<()> {
    for &var in plan.visit.indices() {
        if !plan.registry.method(var).is_model() {
            continue;
        }
        let sampler = sampler_for(plan, var)?;
        for row in plan.original.missing_rows(var) {
            data.set(var, row, Some(sampler.draw(rng)));
        }
    }
    for &var in plan.visit.indices() {
        if matches!(plan.registry.method(var), ImputationMethod::Passive { .. }) {
            data.recompute_passive(var)?;
        }
    }
    Ok(())
}

fn sampler_for<'a>(plan: &'a ChainPlan<'_>, var: usize) -> Result<&'a MarginalSampler> {
    plan.samplers[var].as_ref().ok_or_else(|| {
        ImputationError::Internal(format!(
            "No observed values to sample for '{}'",
            plan.original.name(var)
        ))
    })
}

/// Imputed cells for targets, the whole column for passive variables.
fn trace_rows(original: &Dataset, var: usize) -> Vec<usize> {
    if original.role(var) == VariableRole::Passive {
        (0..original.nrows()).collect()
    } else {
        original.missing_rows(var)
    }
}

/// Refit the model for `var` and redraw its originally missing cells.
///
/// A failed fit drops the offending predictor and retries; when nothing is
/// left to drop the missing cells are drawn from the marginal.
fn update_variable(
    plan: &ChainPlan<'_>,
    data: &mut Dataset,
    var: usize,
    chain: usize,
    iteration: usize,
    rng: &mut StdRng,
) -> Result<VariableUpdate> {
    let original = plan.original;
    let method = plan.registry.method(var);
    let mut predictors = plan.matrix.predictors_of(var);
    let mut dropped = Vec::new();
    let mut reasons = Vec::new();

    let fitted: Option<(FittedModel, DesignLayout, usize)> = loop {
        let layout = DesignLayout::new(data, &predictors);
        let (rows, y): (Vec<usize>, Vec<f64>) = (0..original.nrows())
            .filter(|&row| layout.is_complete(data, row))
            .filter_map(|row| original.value(var, row).map(|v| (row, v)))
            .unzip();
        let x = layout.matrix(data, &rows);

        match fit_model(method, &x, &y, original.n_levels(var), &plan.settings, rng) {
            Ok(model) => break Some((model, layout, rows.len())),
            Err(failure) => {
                reasons.push(failure.describe(data, &layout));
                match failure.offending_predictor(&layout) {
                    Some(culprit) => {
                        predictors.retain(|&k| k != culprit);
                        dropped.push(original.name(culprit).to_string());
                    }
                    None => break None,
                }
            }
        }
    };

    let sampler = sampler_for(plan, var)?;
    let mut marginal_rows = 0;
    for row in original.missing_rows(var) {
        let design_row = fitted.as_ref().and_then(|(_, layout, _)| layout.row(data, row));
        let value = match (&fitted, design_row) {
            (Some((model, _, _)), Some(x)) => model.draw(&x, rng),
            _ => {
                marginal_rows += 1;
                sampler.draw(rng)
            }
        };
        data.set(var, row, Some(value));
    }

    let name = original.name(var).to_string();
    if fitted.is_some() && marginal_rows > 0 {
        debug!(
            "'{}': {} cases with missing predictors drawn from the marginal",
            name, marginal_rows
        );
    }

    let summary = match &fitted {
        Some((model, layout, training_rows)) => ModelSummary {
            variable: name.clone(),
            method: method.name().to_string(),
            predictors: layout
                .predictors()
                .iter()
                .map(|&k| original.name(k).to_string())
                .collect(),
            coefficients: model.coefficients(&layout.labels(), original.levels(var)),
            training_rows: *training_rows,
            marginal: false,
        },
        None => ModelSummary {
            variable: name.clone(),
            method: method.name().to_string(),
            predictors: Vec::new(),
            coefficients: Vec::new(),
            training_rows: original.nrows() - original.missing_count(var),
            marginal: true,
        },
    };
    debug!(
        "Chain {} iteration {}: '{}' fitted with {} predictors on {} rows",
        chain,
        iteration,
        name,
        summary.predictors.len(),
        summary.training_rows
    );

    let warning = (!reasons.is_empty()).then(|| FitWarning {
        chain,
        iteration,
        variable: name,
        dropped_predictors: dropped,
        marginal_fallback: fitted.is_none(),
        reasons,
    });

    Ok(VariableUpdate { summary, warning })
}
