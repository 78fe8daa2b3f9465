//! Multiple Imputation by Chained Equations
//!
//! Fully conditional specification imputation of missing values over `m`
//! independently completed copies of a dataset, followed by Rubin's-rules
//! pooling of per-copy estimates.
//!
//! # Overview
//!
//! - **Missingness Analysis**: per-variable and per-case counts, pairwise
//!   response patterns, usable-case proportions, influx/outflux
//! - **Predictor Selection**: correlation and usable-case driven predictor
//!   matrix with force-include/exclude overrides
//! - **Method Registry**: predictive mean matching, logistic and multinomial
//!   logistic regression, passive derivation
//! - **Chained Equations**: `m` seeded chains, optionally in parallel, with a
//!   convergence trace, progress reporting and cancellation
//! - **Pooling**: Rubin's rules for scalar and vector estimands, with the
//!   Barnard-Rubin small-sample correction
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lex_imputation::{Dataset, Imputer, ImputationConfig, MeanAnalysis, Schema, pool_analysis};
//!
//! let schema = Schema::from_json(&std::fs::read_to_string("schema.json")?)?;
//! let dataset = Dataset::from_dataframe(&df, schema)?;
//!
//! let result = Imputer::builder()
//!     .config(ImputationConfig::builder().imputations(20).seed(2024).build()?)
//!     .on_progress(|update| println!("[{:.0}%] {}", update.progress * 100.0, update.message))
//!     .build()?
//!     .impute(&dataset)?;
//!
//! let pooled = pool_analysis(&result, &MeanAnalysis::new("chl"))?;
//! let (lo, hi) = pooled.pooled.confidence_interval(0.95)?;
//! println!("mean(chl) = {:.2} [{:.2}, {:.2}]", pooled.pooled.qbar, lo, hi);
//! ```
//!
//! # Custom Plans
//!
//! [`Imputer::plan`] returns the default predictor matrix, method registry
//! and visit sequence. Adjust any of them and pass the plan to
//! [`Imputer::run`]; the plan is validated against the dataset first.
//!
//! ```rust,ignore
//! let imputer = Imputer::builder().build()?;
//! let mut plan = imputer.plan(&dataset)?;
//! plan.matrix.set_by_name("bmi", "chl", false)?;
//! plan.registry.set(&dataset, "hyp", ImputationMethod::Logistic)?;
//! let result = imputer.run(&dataset, plan)?;
//! ```
//!
//! # Reproducibility
//!
//! Each chain draws from its own `StdRng`, seeded from the master seed and
//! the chain index, so a fixed seed gives identical output whether chains
//! run sequentially or in parallel.

pub mod config;
pub mod data;
pub mod error;
pub mod imputers;
pub mod missingness;
pub mod pipeline;
pub mod pooling;
pub mod predictors;
pub mod reporting;
pub mod utils;

// Re-export main types for convenience
pub use config::{
    ConfigValidationError, ImputationConfig, ImputationConfigBuilder, PredictorConfig,
    PredictorConfigBuilder, VisitOrder,
};
pub use data::{
    Dataset, MissingSentinel, PassiveFormula, Schema, VariableRole, VariableSpec, VariableType,
};
pub use error::{ImputationError, PoolingError, Result, ResultExt};
pub use imputers::{Coefficient, ImputationMethod, MethodEntry, MethodRegistry, ModelSummary};
pub use missingness::{MissingnessAnalyzer, MissingnessReport};
pub use pipeline::{
    CancellationToken, ClosureProgressReporter, ConvergenceTrace, FitWarning, ImputationPlan,
    ImputationResult, ImputationStage, ImputedDataset, Imputer, ImputerBuilder, LongRecord,
    ProgressReporter, ProgressUpdate, TraceStatistic, VisitSequence,
};
pub use pooling::{
    Analysis, ClosureAnalysis, Estimate, MeanAnalysis, PooledAnalysis, PooledEstimate,
    PooledVector, pool_analysis, pool_scalar, pool_vector,
};
pub use predictors::{PredictorMatrix, PredictorMatrixBuilder, PredictorRow};
pub use reporting::{DiagnosticsReport, ReportGenerator};
