//! The imputation engine and its builder.

use crate::config::{ConfigValidationError, ImputationConfig, PredictorConfig};
use crate::data::{Dataset, VariableRole};
use crate::error::{ImputationError, Result, ResultExt};
use crate::imputers::{
    FitSettings, ImputationMethod, MarginalSampler, MethodRegistry, ModelSummary,
};
use crate::pipeline::chain::{ChainOutcome, ChainPlan, run_chain};
use crate::pipeline::progress::{
    CancellationToken, ClosureProgressReporter, ImputationStage, ProgressReporter, ProgressUpdate,
};
use crate::pipeline::trace::{ConvergenceTrace, FitWarning};
use crate::pipeline::visit::VisitSequence;
use crate::predictors::{PredictorMatrix, PredictorMatrixBuilder};
use crate::utils::chain_seed;
use polars::prelude::*;
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{error, info};

/// Multiple imputation by chained equations.
///
/// Use [`Imputer::builder()`] to configure a run.
///
/// # Example
///
/// ```rust,ignore
/// use lex_imputation::{Imputer, ImputationConfig};
///
/// let result = Imputer::builder()
///     .config(ImputationConfig::builder().imputations(10).seed(1).build()?)
///     .on_progress(|update| println!("[{:.0}%] {}", update.progress * 100.0, update.message))
///     .build()?
///     .impute(&dataset)?;
///
/// for completed in &result.datasets {
///     println!("imputation {} ran {} iterations", completed.imputation, completed.iterations);
/// }
/// ```
pub struct Imputer {
    config: ImputationConfig,
    predictor_config: PredictorConfig,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: CancellationToken,
}

static_assertions::assert_impl_all!(Imputer: Send, Sync);

/// Predictor matrix, methods and visit sequence for one run.
///
/// Obtain the defaults from [`Imputer::plan`], adjust, then pass to
/// [`Imputer::run`]. The plan is validated before any chain starts.
#[derive(Debug, Clone)]
pub struct ImputationPlan {
    pub matrix: PredictorMatrix,
    pub registry: MethodRegistry,
    pub visit: VisitSequence,
}

impl ImputationPlan {
    /// Check the plan against `dataset`.
    pub fn validate(&self, dataset: &Dataset) -> Result<()> {
        self.registry.validate(dataset)?;
        self.matrix.validate(dataset, &self.registry)?;
        self.visit.validate(dataset, &self.registry)?;

        for var in 0..dataset.ncols() {
            if dataset.role(var) == VariableRole::Excluded || dataset.missing_count(var) == 0 {
                continue;
            }
            let method = self.registry.method(var);
            if !method.is_model() && !matches!(method, ImputationMethod::Passive { .. }) {
                return Err(ImputationError::DataValidation(format!(
                    "Variable '{}' has {} missing values but nothing resolves them; \
                     make it a target or exclude it",
                    dataset.name(var),
                    dataset.missing_count(var)
                )));
            }
        }

        for &var in self.visit.indices() {
            if !self.registry.method(var).is_model() {
                continue;
            }
            let name = dataset.name(var);
            if dataset.missing_count(var) == dataset.nrows() {
                return Err(ImputationError::DataValidation(format!(
                    "Variable '{}' has no observed values to impute from",
                    name
                )));
            }
            if dataset.var_type(var).is_discrete() && dataset.n_levels(var) < 2 {
                return Err(ImputationError::DataValidation(format!(
                    "Variable '{}' needs at least two levels to be imputed",
                    name
                )));
            }
        }
        Ok(())
    }
}

impl Imputer {
    pub fn builder() -> ImputerBuilder {
        ImputerBuilder::default()
    }

    pub fn config(&self) -> &ImputationConfig {
        &self.config
    }

    /// Default plan: quick predictor selection, default methods and the
    /// configured visit order.
    pub fn plan(&self, dataset: &Dataset) -> Result<ImputationPlan> {
        let matrix = PredictorMatrixBuilder::new(self.predictor_config.clone()).build(dataset)?;
        let registry = MethodRegistry::from_dataset(dataset);
        let visit = VisitSequence::default_for(dataset, &registry, self.config.visit_order);
        Ok(ImputationPlan {
            matrix,
            registry,
            visit,
        })
    }

    /// Impute `dataset` with the default plan.
    pub fn impute(&self, dataset: &Dataset) -> Result<ImputationResult> {
        self.report_progress(ProgressUpdate::new(
            ImputationStage::Initializing,
            0.0,
            "Building imputation plan...",
        ));
        let plan = self.plan(dataset).inspect_err(|e| self.fail(e))?;
        self.run(dataset, plan)
    }

    /// Impute `dataset` with an explicit plan.
    ///
    /// A cancelled run is not an error: the result has `cancelled` set and
    /// every dataset records the iterations its chain completed.
    pub fn run(&self, dataset: &Dataset, plan: ImputationPlan) -> Result<ImputationResult> {
        match self.run_internal(dataset, plan) {
            Ok(result) => {
                if result.cancelled {
                    self.report_progress(ProgressUpdate::cancelled(&result.iterations()));
                } else {
                    self.report_progress(ProgressUpdate::complete("Imputation complete"));
                }
                Ok(result)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn fail(&self, e: &ImputationError) {
        error!("Imputation error: {}", e);
        self.report_progress(ProgressUpdate::failed(e.to_string()));
    }

    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }

    fn run_internal(&self, dataset: &Dataset, plan: ImputationPlan) -> Result<ImputationResult> {
        let start_time = Instant::now();
        let config = &self.config;

        self.report_progress(ProgressUpdate::new(
            ImputationStage::Validating,
            0.0,
            "Validating imputation plan...",
        ));
        config.validate()?;
        plan.validate(dataset).context("Invalid imputation plan")?;
        let monitored = self.monitored(dataset, &plan)?;

        let seed = config.seed.unwrap_or_else(rand::random);
        info!(
            "Imputing {} variables: m={}, maxit={}, seed={}",
            plan.visit.len(),
            config.imputations,
            config.max_iterations,
            seed
        );

        let samplers: Vec<Option<MarginalSampler>> = (0..dataset.ncols())
            .map(|var| MarginalSampler::from_observed(dataset, var))
            .collect();
        let chain_plan = ChainPlan {
            original: dataset,
            matrix: &plan.matrix,
            registry: &plan.registry,
            visit: &plan.visit,
            monitored: &monitored,
            samplers: &samplers,
            settings: FitSettings {
                ridge: config.ridge,
                donors: config.donors,
                max_fit_iterations: config.max_fit_iterations,
            },
            max_iterations: config.max_iterations,
        };

        let total = config.imputations * config.max_iterations;
        let completed = AtomicUsize::new(0);
        let on_iteration = |chain: usize, iteration: usize| {
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            self.report_progress(ProgressUpdate::with_items(
                ImputationStage::Imputing,
                format!("Chain {}, iteration {}", chain, iteration),
                done,
                total,
                format!("Completed iteration {} of chain {}", iteration, chain),
            ));
        };
        let token = &self.cancellation_token;
        let run_one = |chain: usize| {
            run_chain(&chain_plan, chain, chain_seed(seed, chain - 1), token, on_iteration)
        };

        let outcomes: Vec<Result<ChainOutcome>> = if config.parallel {
            (1..=config.imputations).into_par_iter().map(run_one).collect()
        } else {
            (1..=config.imputations).map(run_one).collect()
        };

        let mut datasets = Vec::with_capacity(config.imputations);
        let mut trace = ConvergenceTrace::default();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let outcome = outcome.context(format!("Chain {}", index + 1))?;
            trace.extend(outcome.trace);
            datasets.push(ImputedDataset {
                imputation: index + 1,
                iterations: outcome.iterations,
                data: outcome.data,
                models: outcome.models,
            });
        }

        let cancelled = datasets.iter().any(|d| d.iterations < config.max_iterations);
        info!(
            "Imputation finished in {:?}: {} datasets, {} fit warnings{}",
            start_time.elapsed(),
            datasets.len(),
            trace.warnings.len(),
            if cancelled { " (cancelled)" } else { "" }
        );

        Ok(ImputationResult {
            datasets,
            trace,
            predictor_matrix: plan.matrix,
            methods: plan.registry,
            visit_sequence: plan.visit,
            config: config.clone(),
            seed,
            cancelled,
            duration_ms: start_time.elapsed().as_millis() as u64,
            original: dataset.clone(),
        })
    }

    fn monitored(&self, dataset: &Dataset, plan: &ImputationPlan) -> Result<Vec<usize>> {
        match &self.config.monitored {
            Some(names) => names.iter().map(|name| dataset.index_of(name)).collect(),
            None => Ok(plan.visit.indices().to_vec()),
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// One completed copy of the dataset.
#[derive(Debug, Clone)]
pub struct ImputedDataset {
    /// 1-based imputation index
    pub imputation: usize,
    /// Iterations the chain completed
    pub iterations: usize,
    pub data: Dataset,
    /// Models from the last completed iteration, in visit order
    pub models: Vec<ModelSummary>,
}

impl ImputedDataset {
    pub fn model(&self, variable: &str) -> Option<&ModelSummary> {
        self.models.iter().find(|m| m.variable == variable)
    }
}

/// One record of the long representation.
#[derive(Debug, Clone, PartialEq)]
pub struct LongRecord {
    /// 0 for the original data, 1..m for completed copies
    pub imputation: usize,
    pub case_id: String,
    /// Values in column order; level codes for discrete variables
    pub values: Vec<Option<f64>>,
}

/// Output of an imputation run.
#[derive(Debug, Clone)]
pub struct ImputationResult {
    pub datasets: Vec<ImputedDataset>,
    pub trace: ConvergenceTrace,
    pub predictor_matrix: PredictorMatrix,
    pub methods: MethodRegistry,
    pub visit_sequence: VisitSequence,
    pub config: ImputationConfig,
    /// Master seed actually used
    pub seed: u64,
    pub cancelled: bool,
    pub duration_ms: u64,
    pub original: Dataset,
}

static_assertions::assert_impl_all!(ImputationResult: Send, Sync);

impl ImputationResult {
    pub fn m(&self) -> usize {
        self.datasets.len()
    }

    /// Completed dataset by 1-based imputation index.
    pub fn dataset(&self, imputation: usize) -> Option<&ImputedDataset> {
        self.datasets.iter().find(|d| d.imputation == imputation)
    }

    /// Iterations completed per chain.
    pub fn iterations(&self) -> Vec<usize> {
        self.datasets.iter().map(|d| d.iterations).collect()
    }

    pub fn warnings(&self) -> &[FitWarning] {
        &self.trace.warnings
    }

    /// Stacked records of every completed dataset, tagged with imputation
    /// index and case identifier.
    pub fn long_records(&self) -> Vec<LongRecord> {
        self.datasets
            .iter()
            .flat_map(|imputed| {
                let data = &imputed.data;
                (0..data.nrows()).map(move |row| LongRecord {
                    imputation: imputed.imputation,
                    case_id: data.case_ids()[row].clone(),
                    values: (0..data.ncols()).map(|var| data.value(var, row)).collect(),
                })
            })
            .collect()
    }

    /// Long-format frame with `.imp` and `.id` columns followed by every
    /// variable. With `include_original` the unimputed data is stacked
    /// first as `.imp = 0`.
    pub fn to_long_dataframe(&self, include_original: bool) -> Result<DataFrame> {
        let mut stack: Vec<(usize, &Dataset)> = Vec::with_capacity(self.datasets.len() + 1);
        if include_original {
            stack.push((0, &self.original));
        }
        stack.extend(self.datasets.iter().map(|d| (d.imputation, &d.data)));

        let imp: Vec<u32> = stack
            .iter()
            .flat_map(|(index, data)| std::iter::repeat_n(*index as u32, data.nrows()))
            .collect();
        let ids: Vec<String> = stack
            .iter()
            .flat_map(|(_, data)| data.case_ids().iter().cloned())
            .collect();

        let mut columns = vec![
            Series::new(".imp".into(), imp).into_column(),
            Series::new(".id".into(), ids).into_column(),
        ];
        for var in 0..self.original.ncols() {
            let name: PlSmallStr = self.original.name(var).into();
            let column = if self.original.var_type(var).is_discrete() {
                let labels: Vec<Option<String>> = stack
                    .iter()
                    .flat_map(|(_, data)| (0..data.nrows()).map(move |row| data.label(var, row)))
                    .collect();
                Series::new(name, labels).into_column()
            } else {
                let values: Vec<Option<f64>> = stack
                    .iter()
                    .flat_map(|(_, data)| data.column(var).iter().copied())
                    .collect();
                Series::new(name, values).into_column()
            };
            columns.push(column);
        }

        DataFrame::new(columns).context("Building long-format frame")
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Imputer`].
#[derive(Default)]
pub struct ImputerBuilder {
    config: Option<ImputationConfig>,
    predictor_config: Option<PredictorConfig>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: Option<CancellationToken>,
}

static_assertions::assert_impl_all!(ImputerBuilder: Send);

impl ImputerBuilder {
    pub fn config(mut self, config: ImputationConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn predictor_config(mut self, config: PredictorConfig) -> Self {
        self.predictor_config = Some(config);
        self
    }

    /// Custom progress reporter, e.g. one forwarding to a UI event bus.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Progress callback. Invoked from chain worker threads.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Token checked by every chain before each iteration.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    pub fn build(self) -> std::result::Result<Imputer, ConfigValidationError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let predictor_config = self.predictor_config.unwrap_or_default();
        predictor_config.validate()?;

        Ok(Imputer {
            config,
            predictor_config,
            progress_reporter: self.progress_reporter,
            cancellation_token: self.cancellation_token.unwrap_or_default(),
        })
    }
}
