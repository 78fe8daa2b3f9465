//! CLI entry point for multiple imputation.

use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};
use lex_imputation::{
    Dataset, DiagnosticsReport, ImputationConfig, ImputationResult, Imputer, MeanAnalysis,
    MissingnessAnalyzer, PooledAnalysis, PredictorConfig, PredictorMatrixBuilder,
    ReportGenerator, Schema, VisitOrder, pool_analysis,
};
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// CLI-compatible visit order enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliVisitOrder {
    /// Declared column order
    Column,
    /// Fewest missing values first
    Increasing,
    /// Most missing values first
    Decreasing,
}

impl From<CliVisitOrder> for VisitOrder {
    fn from(cli: CliVisitOrder) -> Self {
        match cli {
            CliVisitOrder::Column => VisitOrder::ColumnOrder,
            CliVisitOrder::Increasing => VisitOrder::IncreasingMissingness,
            CliVisitOrder::Decreasing => VisitOrder::DecreasingMissingness,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author = "Lex Machina Team",
    version,
    about = "Multiple imputation by chained equations",
    long_about = "Imputes missing values in a CSV file m times with chained equations \
                  and writes the completed datasets in long format.\n\n\
                  EXAMPLES:\n  \
                  # Impute with an inferred schema\n  \
                  lex-imputation -i nhanes.csv\n\n  \
                  # Declared schema, 20 imputations, pooled mean of chl\n  \
                  lex-imputation -i nhanes.csv --schema nhanes.json -m 20 --seed 1 --pool-mean chl\n\n  \
                  # Inspect missingness and the predictor matrix only\n  \
                  lex-imputation -i nhanes.csv --dry-run"
)]
struct Args {
    /// Path to the CSV file to impute
    #[arg(short, long)]
    input: String,

    /// JSON schema declaring variable types, roles and missing sentinels
    ///
    /// If not specified, the schema is inferred from the column types
    #[arg(long)]
    schema: Option<String>,

    /// Output directory for results
    #[arg(short, long, default_value = "./outputs")]
    output: String,

    /// Number of imputations
    #[arg(short = 'm', long = "imputations", default_value = "5")]
    imputations: usize,

    /// Iterations per chain
    #[arg(long, default_value = "5")]
    maxit: usize,

    /// Master seed (drawn at random and logged if omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Donor pool size for predictive mean matching
    #[arg(long, default_value = "5")]
    donors: usize,

    /// Minimum absolute correlation for predictor selection
    #[arg(long, default_value = "0.1")]
    mincor: f64,

    /// Minimum proportion of usable cases for predictor selection
    #[arg(long, default_value = "0.0")]
    minpuc: f64,

    /// Always use this variable as a predictor (repeatable)
    #[arg(long)]
    include: Vec<String>,

    /// Never use this variable as a predictor (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    /// Default order in which variables are visited
    #[arg(long, value_enum, default_value = "column")]
    visit_order: CliVisitOrder,

    /// Run chains one after another instead of in parallel
    #[arg(long)]
    sequential: bool,

    /// Pool the mean of this continuous variable with Rubin's rules (repeatable)
    #[arg(long)]
    pool_mean: Vec<String>,

    /// Stack the original data as imputation 0 in the long output
    #[arg(long)]
    include_original: bool,

    /// Print missingness and the predictor matrix without imputing
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show errors and final result)
    #[arg(short, long)]
    quiet: bool,

    /// Output JSON to stdout instead of human-readable summary
    ///
    /// Disables all progress logs; only outputs the final JSON report.
    #[arg(long)]
    json: bool,

    /// Write the diagnostics report to the output directory
    ///
    /// The report will be saved as <input_name>_report.json
    #[arg(short = 'r', long)]
    emit_report: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled to ensure
/// only JSON is written to stdout.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.quiet, args.json);

    if !Path::new(&args.input).exists() {
        return Err(anyhow!("Input file not found: {}", args.input));
    }

    info!("Loading dataset from: {}", args.input);
    let schema = load_schema(&args)?;
    let df = read_csv(&args.input, schema.as_ref())?;
    let dataset = build_dataset(&df, schema)?;
    info!(
        "Dataset loaded: {} cases, {} variables, {} missing cells",
        dataset.nrows(),
        dataset.ncols(),
        dataset.total_missing()
    );

    let predictor_config = build_predictor_config(&args)?;

    if args.dry_run {
        return run_dry_run(&args, &dataset, predictor_config);
    }

    let config = ImputationConfig::builder()
        .imputations(args.imputations)
        .max_iterations(args.maxit)
        .donors(args.donors)
        .visit_order(args.visit_order.into())
        .parallel(!args.sequential);
    let config = match args.seed {
        Some(seed) => config.seed(seed),
        None => config,
    }
    .build()?;

    let mut builder = Imputer::builder()
        .config(config)
        .predictor_config(predictor_config);
    if !args.quiet {
        builder = builder.on_progress(|update| {
            info!(
                "[{:.0}%] {}: {}",
                update.progress * 100.0,
                update.stage.display_name(),
                update.message
            );
        });
    }
    let imputer = builder.build()?;

    info!("{}", "=".repeat(80));
    info!("Starting multiple imputation...");
    info!("{}", "=".repeat(80));

    let result = imputer.impute(&dataset).map_err(|e| {
        error!("Imputation failed: {}", e);
        anyhow!("Imputation failed: {}", e)
    })?;

    handle_output(&result, &args)
}

/// Build the dataset from the frame and the declared or inferred schema.
fn load_schema(args: &Args) -> Result<Option<Schema>> {
    let Some(path) = &args.schema else {
        return Ok(None);
    };
    debug!("Reading schema from: {}", path);
    Ok(Some(Schema::from_json(&std::fs::read_to_string(path)?)?))
}

fn build_dataset(df: &DataFrame, schema: Option<Schema>) -> Result<Dataset> {
    let schema = match schema {
        Some(schema) => schema,
        None => {
            info!("No schema given; inferring variable types from the data");
            Schema::infer(df)?
        }
    };
    Ok(Dataset::from_dataframe(df, schema)?)
}

fn build_predictor_config(args: &Args) -> Result<PredictorConfig> {
    let mut builder = PredictorConfig::builder()
        .mincor(args.mincor)
        .minpuc(args.minpuc);
    for name in &args.include {
        builder = builder.include(name);
    }
    for name in &args.exclude {
        builder = builder.exclude(name);
    }
    Ok(builder.build()?)
}

/// Run dry-run mode - show missingness and predictor selection only.
///
/// Note: This function uses `println!` intentionally for user-facing CLI output.
fn run_dry_run(args: &Args, dataset: &Dataset, predictor_config: PredictorConfig) -> Result<()> {
    let report = MissingnessAnalyzer::analyze(dataset);

    println!("\n{}", "=".repeat(80));
    println!("DRY RUN - Missingness and predictor selection");
    println!("{}\n", "=".repeat(80));

    println!("DATASET OVERVIEW");
    println!("{}", "-".repeat(40));
    println!("  File: {}", args.input);
    println!("  Cases: {}", report.n_cases);
    println!("  Variables: {}", report.n_variables);
    println!(
        "  Missing cells: {:.1}%",
        report.proportion_missing_cells * 100.0
    );
    println!(
        "  Incomplete cases: {:.1}% ({} patterns, {} complete cases)",
        report.proportion_incomplete_cases * 100.0,
        report.patterns.len(),
        report.patterns.complete_cases()
    );
    println!();

    println!("MISSINGNESS");
    println!("{}", "-".repeat(40));
    println!(
        "{:<20} {:<12} {:<8} {:<10} {:<8} {:<8}",
        "Variable", "Type", "Missing", "Missing %", "Influx", "Outflux"
    );
    println!("{}", "-".repeat(70));
    for (var, stats) in report.variables.iter().enumerate() {
        let flux = report.flux_of(&stats.variable);
        println!(
            "{:<20} {:<12} {:<8} {:<10.1} {:<8.3} {:<8.3}",
            truncate_str(&stats.variable, 19),
            dataset.var_type(var).to_string(),
            stats.missing_count,
            stats.missing_proportion * 100.0,
            flux.map_or(0.0, |f| f.influx),
            flux.map_or(0.0, |f| f.outflux)
        );
    }
    println!();

    println!("PREDICTOR MATRIX");
    println!("{}", "-".repeat(40));
    let matrix = PredictorMatrixBuilder::new(predictor_config).build(dataset)?;
    let rows = matrix.rows();
    if rows.is_empty() {
        println!("  No variable needs imputation");
    } else {
        for row in &rows {
            println!("  {} <- {}", row.target, row.predictors.join(", "));
        }
    }
    println!();

    println!("{}", "=".repeat(80));
    println!("To impute, run without --dry-run");
    println!("{}", "=".repeat(80));

    Ok(())
}

/// Truncate to `max_len` characters, ending with an ellipsis when cut.
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// Handle imputation output based on CLI flags.
///
/// Output behavior:
/// - Default: Print human-readable summary to stdout
/// - `--json`: Print JSON to stdout only (no logs)
/// - `--emit-report`: Write JSON report to file
fn handle_output(result: &ImputationResult, args: &Args) -> Result<()> {
    let input_stem = extract_file_stem(&args.input);
    let generator = ReportGenerator::new(PathBuf::from(&args.output), None);

    let csv_path = generator.write_long_csv(result, args.include_original, &input_stem)?;

    let pooled = args
        .pool_mean
        .iter()
        .map(|name| pool_analysis(result, &MeanAnalysis::new(name)))
        .collect::<lex_imputation::Result<Vec<PooledAnalysis>>>()?;

    let report = ReportGenerator::build_report(
        &args.input,
        Some(&csv_path.to_string_lossy()),
        result,
        pooled,
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if args.emit_report {
        let report_path = generator.write_report_to_file(&report, &input_stem)?;
        info!("Report written to: {}", report_path.display());
    }

    print_human_readable_summary(&report);

    Ok(())
}

/// Extract the file stem (name without extension) from a path.
fn extract_file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string()
}

/// Print a human-readable summary of the imputation run.
fn print_human_readable_summary(report: &DiagnosticsReport) {
    let summary = &report.summary;

    println!();
    println!("{}", "=".repeat(80));
    if summary.cancelled {
        println!("IMPUTATION CANCELLED");
    } else {
        println!("IMPUTATION COMPLETE");
    }
    println!("{}", "=".repeat(80));
    println!();

    println!(
        "Input:  {} ({} cases x {} variables, {} missing cells)",
        report.input_file, summary.n_cases, summary.n_variables, summary.missing_cells
    );
    if let Some(ref output_file) = report.output_file {
        println!("Output: {}", output_file);
    }
    println!();

    println!("Run Summary:");
    println!("  Duration: {}ms", summary.duration_ms);
    println!("  Imputations: {}", summary.imputations);
    println!("  Iterations: {:?}", summary.iterations);
    println!("  Seed: {}", summary.seed);
    println!();

    println!("Imputation Model:");
    for entry in &report.methods {
        let predictors = report
            .predictor_matrix
            .iter()
            .find(|row| row.target == entry.variable)
            .map(|row| row.predictors.join(", "))
            .unwrap_or_default();
        if predictors.is_empty() {
            println!("  - {} [{}]", entry.variable, entry.method);
        } else {
            println!("  - {} [{}] <- {}", entry.variable, entry.method, predictors);
        }
    }
    println!("  Visit sequence: {}", report.visit_sequence.join(" -> "));
    println!();

    if !report.pooled.is_empty() {
        println!("Pooled Estimates:");
        for analysis in &report.pooled {
            let pooled = &analysis.pooled;
            let interval = pooled
                .confidence_interval(0.95)
                .map(|(lo, hi)| format!("[{:.4}, {:.4}]", lo, hi))
                .unwrap_or_else(|e| format!("(no interval: {})", e));
            let fmi = pooled
                .fmi()
                .map(|f| format!("{:.3}", f))
                .unwrap_or_else(|_| "n/a".to_string());
            println!(
                "  {}: {:.4} (se {:.4}) 95% CI {} fmi {}",
                analysis.estimand,
                pooled.qbar,
                pooled.std_error(),
                interval,
                fmi
            );
        }
        println!();
    }

    if !report.trace.warnings.is_empty() {
        println!("Warnings:");
        for warning in report.trace.warnings.iter().take(10) {
            println!("  ! {}", warning);
        }
        if report.trace.warnings.len() > 10 {
            println!("  ... and {} more", report.trace.warnings.len() - 10);
        }
        println!();
    }

    println!("Use --json for machine-readable output");
    println!("Use --emit-report to save the diagnostics report");
    println!("{}", "=".repeat(80));
}

/// Read the input CSV.
///
/// With a declared schema every column is read as text and parsed per
/// variable during ingestion, so level labels and sentinels stay verbatim.
/// Without one, column types are inferred from the whole file.
fn read_csv(path: &str, schema: Option<&Schema>) -> Result<DataFrame> {
    let infer_length = if schema.is_some() { Some(0) } else { None };
    let df = CsvReadOptions::default()
        .with_infer_schema_length(infer_length)
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_quote_char(Some(b'"')))
        .try_into_reader_with_file_path(Some(PathBuf::from(path)))?
        .finish()
        .inspect_err(|e| error!("Could not parse '{}': {}", path, e))?;
    debug!("Read {} rows x {} columns", df.height(), df.width());
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_keeps_short_names() {
        assert_eq!(truncate_str("bmi", 19), "bmi");
        assert_eq!(truncate_str("ééé", 3), "ééé");
    }

    #[test]
    fn test_truncate_str_cuts_on_char_boundaries() {
        let name = "aéééééééééé";
        assert_eq!(name.len(), 21);
        assert_eq!(truncate_str(name, 8), "aéééé...");
        assert_eq!(truncate_str("abcdefghijklmnopqrstuvwxyz", 19), "abcdefghijklmnop...");
    }

    #[test]
    fn test_truncate_str_multibyte_within_limit() {
        // 11 characters but 21 bytes
        let name = "aéééééééééé";
        assert_eq!(truncate_str(name, 19), name);
    }
}
