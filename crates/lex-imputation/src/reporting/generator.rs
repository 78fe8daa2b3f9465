use crate::config::ImputationConfig;
use crate::error::{Result, ResultExt};
use crate::imputers::{MethodEntry, ModelSummary};
use crate::missingness::{FluxStats, MissingnessAnalyzer, VariableMissingness};
use crate::pipeline::{ConvergenceTrace, FitWarning, ImputationResult};
use crate::pooling::PooledAnalysis;
use crate::predictors::PredictorRow;
use chrono::Local;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

// ============================================================================
// Diagnostics Report Types
// ============================================================================

/// Diagnostics for one imputation run.
///
/// Bundles everything needed to audit a run after the fact: the realized
/// predictor matrix, method assignments and visit sequence, the convergence
/// trace with recovered fit failures, and the missingness of the input.
///
/// Used for both JSON output (`--json`) and the report file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    /// Timestamp when the report was generated
    pub generated_at: String,
    /// Path to the input file
    pub input_file: String,
    /// Path to the long-format output (if written)
    pub output_file: Option<String>,

    pub summary: RunSummary,
    pub config: ImputationConfig,

    /// Non-empty predictor matrix rows
    pub predictor_matrix: Vec<PredictorRow>,
    /// Method per registered variable
    pub methods: Vec<MethodEntry>,
    pub visit_sequence: Vec<String>,

    pub missingness: MissingnessSummary,
    pub trace: ConvergenceTrace,
    /// Variables with at least one degraded fit
    pub degraded_variables: Vec<String>,
    /// Final models of the first completed dataset
    pub models: Vec<ModelSummary>,
    pub pooled: Vec<PooledAnalysis>,
}

/// Headline numbers of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub duration_ms: u64,
    pub n_cases: usize,
    pub n_variables: usize,
    pub imputations: usize,
    /// Iterations completed per chain
    pub iterations: Vec<usize>,
    pub seed: u64,
    pub cancelled: bool,
    pub missing_cells: usize,
    pub fit_warnings: usize,
}

/// Missingness of the input data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingnessSummary {
    pub proportion_missing_cells: f64,
    pub proportion_incomplete_variables: f64,
    pub proportion_incomplete_cases: f64,
    pub complete_cases: usize,
    pub patterns: usize,
    pub variables: Vec<VariableMissingness>,
    pub flux: Vec<FluxStats>,
}

// ============================================================================
// Report Generator
// ============================================================================

pub struct ReportGenerator {
    output_dir: PathBuf,
    output_name: Option<String>,
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./outputs"),
            output_name: None,
        }
    }
}

impl ReportGenerator {
    /// Create a new ReportGenerator with custom output settings.
    pub fn new(output_dir: PathBuf, output_name: Option<String>) -> Self {
        Self {
            output_dir,
            output_name,
        }
    }

    /// Build the diagnostics report for a finished run.
    pub fn build_report(
        input_file: &str,
        output_file: Option<&str>,
        result: &ImputationResult,
        pooled: Vec<PooledAnalysis>,
    ) -> DiagnosticsReport {
        let analysis = MissingnessAnalyzer::analyze(&result.original);
        let missingness = MissingnessSummary {
            proportion_missing_cells: analysis.proportion_missing_cells,
            proportion_incomplete_variables: analysis.proportion_incomplete_variables,
            proportion_incomplete_cases: analysis.proportion_incomplete_cases,
            complete_cases: analysis.patterns.complete_cases(),
            patterns: analysis.patterns.len(),
            variables: analysis.variables,
            flux: analysis.flux,
        };

        let summary = RunSummary {
            duration_ms: result.duration_ms,
            n_cases: result.original.nrows(),
            n_variables: result.original.ncols(),
            imputations: result.m(),
            iterations: result.iterations(),
            seed: result.seed,
            cancelled: result.cancelled,
            missing_cells: result.original.total_missing(),
            fit_warnings: result.warnings().len(),
        };

        DiagnosticsReport {
            generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            input_file: input_file.to_string(),
            output_file: output_file.map(String::from),
            summary,
            config: result.config.clone(),
            predictor_matrix: result.predictor_matrix.rows(),
            methods: result.methods.entries(),
            visit_sequence: result.visit_sequence.variables().to_vec(),
            missingness,
            trace: result.trace.clone(),
            degraded_variables: result
                .trace
                .degraded_variables()
                .into_iter()
                .map(String::from)
                .collect(),
            models: result
                .datasets
                .first()
                .map(|d| d.models.clone())
                .unwrap_or_default(),
            pooled,
        }
    }

    /// Write the stacked completed datasets as CSV.
    ///
    /// The file is `<name>_imputed.csv` with `.imp` and `.id` leading columns.
    pub fn write_long_csv(
        &self,
        result: &ImputationResult,
        include_original: bool,
        base_name: &str,
    ) -> Result<PathBuf> {
        let mut long = result.to_long_dataframe(include_original)?;

        let file_name = self
            .output_name
            .clone()
            .unwrap_or_else(|| format!("{}_imputed", base_name));
        fs::create_dir_all(&self.output_dir)?;
        let output_path = self.output_dir.join(format!("{}.csv", file_name));
        let mut file = File::create(&output_path)?;

        CsvWriter::new(&mut file)
            .include_header(true)
            .with_separator(b',')
            .with_quote_char(b'"')
            .finish(&mut long)
            .context(format!("Writing {}", output_path.display()))?;

        info!(
            "Imputed datasets saved: {} ({} rows)",
            output_path.display(),
            long.height()
        );
        Ok(output_path)
    }

    /// Write a diagnostics report to a JSON file.
    ///
    /// For example, if `report_base_name` is "nhanes", the file will be
    /// "nhanes_report.json".
    pub fn write_report_to_file(
        &self,
        report: &DiagnosticsReport,
        report_base_name: &str,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;

        let report_path = self
            .output_dir
            .join(format!("{}_report.json", report_base_name));
        let mut file = File::create(&report_path)?;
        file.write_all(serde_json::to_string_pretty(report)?.as_bytes())?;

        info!("Report saved: {}", report_path.display());

        Ok(report_path)
    }
}
