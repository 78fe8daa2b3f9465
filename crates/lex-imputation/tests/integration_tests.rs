//! Integration tests for the imputation engine.
//!
//! These tests verify end-to-end behavior of chained equations imputation and
//! Rubin's-rules pooling on small datasets.

use lex_imputation::{
    CancellationToken, Dataset, ImputationConfig, ImputationResult, ImputationStage, Imputer,
    MeanAnalysis, MissingnessAnalyzer, PassiveFormula, PoolingError, PredictorConfig,
    ProgressUpdate, Schema, TraceStatistic, VariableSpec, VariableType, pool_analysis,
    pool_scalar,
};
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

// ============================================================================
// Helper Functions
// ============================================================================

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load_csv(filename: &str) -> DataFrame {
    let path = fixtures_path().join(filename);
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path))
        .expect("Failed to create CSV reader")
        .finish()
        .expect("Failed to read CSV file")
}

fn load_nhanes() -> Dataset {
    let df = load_csv("nhanes.csv");
    let json = std::fs::read_to_string(fixtures_path().join("nhanes_schema.json"))
        .expect("Failed to read schema");
    let schema = Schema::from_json(&json).expect("Invalid schema");
    Dataset::from_dataframe(&df, schema).expect("Failed to ingest nhanes")
}

fn config(m: usize, maxit: usize, seed: u64) -> ImputationConfig {
    ImputationConfig::builder()
        .imputations(m)
        .max_iterations(maxit)
        .seed(seed)
        .build()
        .unwrap()
}

fn impute(dataset: &Dataset, config: ImputationConfig) -> ImputationResult {
    Imputer::builder()
        .config(config)
        .build()
        .unwrap()
        .impute(dataset)
        .unwrap()
}

/// x = 1..20 fully observed, y = 3x + noise with every fourth value missing.
fn linear_dataset() -> Dataset {
    let schema = Schema::new(vec![
        VariableSpec::continuous("x"),
        VariableSpec::continuous("y"),
    ]);
    let noise = [0.3, -0.2, 0.5, -0.4, 0.1, -0.1, 0.2, -0.3, 0.4, -0.5];
    let x: Vec<Option<f64>> = (1..=20).map(|i| Some(i as f64)).collect();
    let y: Vec<Option<f64>> = (1..=20)
        .map(|i| (i % 4 != 0).then(|| 3.0 * i as f64 + noise[i % 10]))
        .collect();
    Dataset::new(schema, vec![x, y]).unwrap()
}

fn observed_range(dataset: &Dataset, var: usize) -> (f64, f64) {
    let values = dataset.observed_values(var);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (min, max)
}

// ============================================================================
// End-to-End Tests
// ============================================================================

#[test]
fn test_nhanes_end_to_end() {
    let dataset = load_nhanes();
    assert_eq!(dataset.nrows(), 25);
    assert_eq!(dataset.missing_count(1), 9);
    assert_eq!(dataset.missing_count(2), 8);
    assert_eq!(dataset.missing_count(3), 10);

    let result = impute(&dataset, config(5, 5, 2024));

    assert_eq!(result.m(), 5);
    assert!(!result.cancelled);
    for imputed in &result.datasets {
        assert_eq!(imputed.iterations, 5);
        assert_eq!(imputed.data.total_missing(), 0);
        // predictor-only age is never touched
        assert_eq!(imputed.data.column(0), dataset.column(0));

        for row in 0..imputed.data.nrows() {
            let bmi = imputed.data.value(1, row).unwrap();
            let obese = imputed.data.value(4, row).unwrap();
            assert_eq!(obese, if bmi > 30.0 { 1.0 } else { 0.0 });
        }
    }

    let pooled = pool_analysis(&result, &MeanAnalysis::new("chl")).unwrap();
    assert_eq!(pooled.estimates.len(), 5);
    let (lo, hi) = observed_range(&dataset, 3);
    assert!(pooled.pooled.qbar > lo && pooled.pooled.qbar < hi);
    assert!(pooled.pooled.degrees_of_freedom().unwrap() <= 24.0);

    let long = result.to_long_dataframe(true).unwrap();
    assert_eq!(long.height(), 25 * 6);
    assert_eq!(long.column("hyp").unwrap().dtype(), &DataType::String);
}

#[test]
fn test_complete_variables_unchanged() {
    let dataset = linear_dataset();
    let result = impute(&dataset, config(3, 4, 1));

    for imputed in &result.datasets {
        assert_eq!(imputed.data.column(0), dataset.column(0));
        for row in 0..dataset.nrows() {
            if let Some(v) = dataset.value(1, row) {
                assert_eq!(imputed.data.value(1, row), Some(v));
            }
        }
        assert!(imputed.model("x").is_none());
    }
    assert!(result.methods.method_of("x").is_some_and(|m| !m.is_model()));
}

#[test]
fn test_pmm_imputes_observed_values_within_range() {
    let dataset = linear_dataset();
    let observed = dataset.observed_values(1);
    let (min, max) = observed_range(&dataset, 1);

    let result = impute(&dataset, config(5, 5, 99));
    for imputed in &result.datasets {
        for row in dataset.missing_rows(1) {
            let value = imputed.data.value(1, row).unwrap();
            assert!(observed.contains(&value), "{} is not an observed value", value);
            assert!(value >= min && value <= max);
        }
        let slope = imputed.model("y").unwrap().coefficient("x").unwrap();
        assert!((slope - 3.0).abs() < 0.2, "slope {}", slope);
    }
}

#[test]
fn test_zero_iterations_keep_initial_fill() {
    let dataset = linear_dataset();
    let observed = dataset.observed_values(1);

    let result = impute(&dataset, config(2, 0, 7));
    assert_eq!(result.iterations(), vec![0, 0]);
    assert!(!result.cancelled);
    assert!(result.trace.is_empty());

    // A run cancelled before its first iteration stops at the same fill.
    let token = CancellationToken::new();
    token.cancel();
    let cancelled = Imputer::builder()
        .config(config(2, 5, 7))
        .cancellation_token(token)
        .build()
        .unwrap()
        .impute(&dataset)
        .unwrap();

    for (a, b) in result.datasets.iter().zip(&cancelled.datasets) {
        assert_eq!(a.data, b.data);
        assert_eq!(a.data.total_missing(), 0);
        for row in dataset.missing_rows(1) {
            assert!(observed.contains(&a.data.value(1, row).unwrap()));
        }
    }
}

#[test]
fn test_cancellation_before_first_iteration() {
    let dataset = linear_dataset();
    let token = CancellationToken::new();
    token.cancel();

    let updates: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    let result = Imputer::builder()
        .config(config(3, 5, 11))
        .cancellation_token(token)
        .on_progress(move |update| sink.lock().unwrap().push(update))
        .build()
        .unwrap()
        .impute(&dataset)
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.iterations(), vec![0, 0, 0]);
    assert!(result.datasets.iter().all(|d| d.data.total_missing() == 0));

    let updates = updates.lock().unwrap();
    let last = updates.last().unwrap();
    assert_eq!(last.stage, ImputationStage::Cancelled);
}

// ============================================================================
// Reproducibility Tests
// ============================================================================

#[test]
fn test_sequential_and_parallel_runs_match() {
    let dataset = load_nhanes();
    let parallel = impute(&dataset, config(4, 3, 31));

    let sequential_config = ImputationConfig {
        parallel: false,
        ..config(4, 3, 31)
    };
    let sequential = impute(&dataset, sequential_config);

    for (a, b) in parallel.datasets.iter().zip(&sequential.datasets) {
        assert_eq!(a.imputation, b.imputation);
        assert_eq!(a.data, b.data);
    }
    assert_eq!(parallel.trace.entries, sequential.trace.entries);
}

#[test]
fn test_chains_differ_and_seed_is_recorded() {
    let dataset = load_nhanes();
    let result = impute(&dataset, config(3, 2, 5));
    assert_eq!(result.seed, 5);
    assert_ne!(result.datasets[0].data, result.datasets[1].data);

    let unseeded = Imputer::builder()
        .config(ImputationConfig::builder().imputations(1).max_iterations(1).build().unwrap())
        .build()
        .unwrap()
        .impute(&dataset)
        .unwrap();
    let replay = impute(&dataset, config(1, 1, unseeded.seed));
    assert_eq!(replay.datasets[0].data, unseeded.datasets[0].data);
}

// ============================================================================
// Model Fit Tests
// ============================================================================

#[test]
fn test_binary_target_coefficient_sign() {
    let schema = Schema::new(vec![
        VariableSpec::continuous("A"),
        VariableSpec::binary("B"),
    ]);
    let a: Vec<Option<f64>> = (1..=10).map(|i| Some(i as f64)).collect();
    let b = vec![
        Some(0.0),
        None,
        Some(1.0),
        None,
        Some(0.0),
        None,
        Some(1.0),
        None,
        Some(1.0),
        None,
    ];
    let dataset = Dataset::new(schema, vec![a.clone(), b.clone()]).unwrap();

    let observed: Vec<(f64, f64)> = a
        .iter()
        .zip(&b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    let n = observed.len() as f64;
    let mx = observed.iter().map(|p| p.0).sum::<f64>() / n;
    let my = observed.iter().map(|p| p.1).sum::<f64>() / n;
    let covariance: f64 = observed.iter().map(|(x, y)| (x - mx) * (y - my)).sum();
    assert!(covariance > 0.0);

    let result = impute(&dataset, config(5, 5, 3));
    assert_eq!(result.m(), 5);
    for imputed in &result.datasets {
        assert_eq!(imputed.data.missing_count(1), 0);
        let model = imputed.model("B").unwrap();
        assert_eq!(model.method, "logistic");
        let slope = model.coefficient("A").unwrap();
        assert_eq!(slope.signum(), covariance.signum());
    }
}

#[test]
fn test_categorical_target_imputed_with_multinomial_model() {
    let schema = Schema::new(vec![
        VariableSpec::continuous("x"),
        VariableSpec::categorical("c").with_levels(["low", "mid", "high"]),
    ]);
    let x: Vec<Option<f64>> = (1..=30).map(|i| Some(i as f64)).collect();
    let c: Vec<Option<f64>> = (1..=30)
        .map(|i| {
            let code = match i {
                1..=9 => 0.0,
                10..=11 => (i % 2) as f64,
                12..=19 => 1.0,
                20..=21 => 1.0 + (i % 2) as f64,
                _ => 2.0,
            };
            (i % 5 != 0).then_some(code)
        })
        .collect();
    let dataset = Dataset::new(schema, vec![x, c]).unwrap();
    assert_eq!(dataset.missing_count(1), 6);

    let result = impute(&dataset, config(3, 4, 29));
    assert!(!result.cancelled);

    for imputed in &result.datasets {
        assert_eq!(imputed.data.missing_count(1), 0);
        for row in dataset.missing_rows(1) {
            let code = imputed.data.value(1, row).unwrap();
            assert_eq!(code.fract(), 0.0);
            assert!((0.0..3.0).contains(&code));
        }

        let model = imputed.model("c").unwrap();
        assert_eq!(model.method, "multinomial_logistic");
        assert!(!model.marginal);
        assert_eq!(model.predictors, vec!["x".to_string()]);
        for term in ["mid:(intercept)", "mid:x", "high:(intercept)", "high:x"] {
            assert!(model.coefficient(term).is_some_and(f64::is_finite), "{}", term);
        }
        assert!(model.coefficient("low:x").is_none());
    }

    let entries: Vec<_> = result
        .trace
        .entries
        .iter()
        .filter(|e| e.variable == "c")
        .collect();
    assert_eq!(entries.len(), 3 * 4);
    for entry in entries {
        let TraceStatistic::Categorical { frequencies } = &entry.statistic else {
            panic!("expected level frequencies for 'c'");
        };
        assert_eq!(frequencies.len(), 3);
        let total: f64 = frequencies.iter().map(|f| f.proportion).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    let long = result.to_long_dataframe(false).unwrap();
    let labels = long.column("c").unwrap().as_materialized_series().str().unwrap();
    assert_eq!(labels.null_count(), 0);
    assert!(
        labels
            .into_iter()
            .flatten()
            .all(|label| ["low", "mid", "high"].contains(&label))
    );
}

#[test]
fn test_duplicate_predictor_is_dropped_with_warning() {
    let schema = Schema::new(vec![
        VariableSpec::continuous("x"),
        VariableSpec::continuous("x_copy"),
        VariableSpec::continuous("y"),
    ]);
    let base = linear_dataset();
    let x = base.column(0).to_vec();
    let dataset = Dataset::new(schema, vec![x.clone(), x, base.column(1).to_vec()]).unwrap();

    let result = Imputer::builder()
        .config(ImputationConfig {
            ridge: 0.0,
            ..config(2, 2, 13)
        })
        .predictor_config(PredictorConfig::default())
        .build()
        .unwrap()
        .impute(&dataset)
        .unwrap();

    assert!(!result.warnings().is_empty());
    assert!(result.warnings().iter().all(|w| w.variable == "y"));
    assert_eq!(result.trace.degraded_variables(), vec!["y"]);
    for imputed in &result.datasets {
        assert_eq!(imputed.data.total_missing(), 0);
        let model = imputed.model("y").unwrap();
        assert_eq!(model.predictors.len(), 1);
        assert!(!model.marginal);
    }
}

// ============================================================================
// Passive Variable Tests
// ============================================================================

#[test]
fn test_passive_variables_follow_imputed_inputs() {
    let schema = Schema::new(vec![
        VariableSpec::continuous("hgt"),
        VariableSpec::continuous("wgt"),
        VariableSpec::passive(
            "bmi",
            VariableType::Continuous,
            PassiveFormula::div(
                PassiveFormula::var("wgt"),
                PassiveFormula::pow(
                    PassiveFormula::div(PassiveFormula::var("hgt"), PassiveFormula::constant(100.0)),
                    2.0,
                ),
            ),
        ),
        VariableSpec::passive(
            "bmi_class",
            VariableType::Categorical,
            PassiveFormula::cut(PassiveFormula::var("bmi"), vec![18.5, 25.0]),
        ),
    ]);
    let hgt = vec![
        Some(160.0),
        Some(165.0),
        Some(170.0),
        Some(175.0),
        Some(180.0),
        Some(185.0),
        Some(190.0),
        Some(172.0),
        Some(168.0),
        Some(178.0),
    ];
    let wgt = vec![
        Some(50.0),
        None,
        Some(68.0),
        Some(75.0),
        None,
        Some(95.0),
        Some(92.0),
        None,
        Some(60.0),
        Some(80.0),
    ];
    let dataset = Dataset::new(schema, vec![hgt, wgt, vec![None; 10], vec![None; 10]]).unwrap();
    assert_eq!(dataset.missing_count(2), 3);

    let result = impute(&dataset, config(3, 3, 21));
    assert!(result.visit_sequence.variables().iter().position(|v| v == "wgt")
        < result.visit_sequence.variables().iter().position(|v| v == "bmi"));

    for imputed in &result.datasets {
        let data = &imputed.data;
        assert_eq!(data.total_missing(), 0);
        for row in 0..data.nrows() {
            let h = data.value(0, row).unwrap() / 100.0;
            let bmi = data.value(2, row).unwrap();
            assert!((bmi - data.value(1, row).unwrap() / (h * h)).abs() < 1e-9);

            let class = data.value(3, row).unwrap();
            let expected = if bmi <= 18.5 {
                0.0
            } else if bmi <= 25.0 {
                1.0
            } else {
                2.0
            };
            assert_eq!(class, expected);
        }
        assert_eq!(data.levels(3), ["<=18.5", "(18.5,25]", ">25"]);
    }
}

// ============================================================================
// Missingness Tests
// ============================================================================

#[test]
fn test_usable_case_proportion() {
    let schema = Schema::new(vec![
        VariableSpec::continuous("target"),
        VariableSpec::continuous("predictor"),
    ]);
    let target = vec![
        None,
        None,
        None,
        None,
        Some(1.0),
        Some(2.0),
        Some(3.0),
        Some(4.0),
        Some(5.0),
        Some(6.0),
    ];
    let predictor = vec![
        Some(1.0),
        Some(2.0),
        Some(3.0),
        None,
        Some(5.0),
        Some(6.0),
        Some(7.0),
        Some(8.0),
        Some(9.0),
        Some(10.0),
    ];
    let dataset = Dataset::new(schema, vec![target, predictor]).unwrap();

    let report = MissingnessAnalyzer::analyze(&dataset);
    assert_eq!(report.pairs.usable_cases(0, 1), Some(0.75));
    assert_eq!(report.variables[0].missing_count, 4);
}

// ============================================================================
// Pooling Tests
// ============================================================================

#[test]
fn test_pooling_three_imputations() {
    let pooled = pool_scalar(&[0.1, 0.2, 0.3], &[0.01; 3], None).unwrap();
    assert!((pooled.qbar - 0.2).abs() < 1e-12);
    assert!((pooled.ubar - 0.01).abs() < 1e-12);
    assert!((pooled.b - 0.01).abs() < 1e-12);
    assert!((pooled.t - 0.0233).abs() < 1e-4);
    assert_eq!(pooled.q, vec![0.1, 0.2, 0.3]);
}

#[test]
fn test_pooling_equal_estimates() {
    let pooled = pool_scalar(&[4.5; 5], &[0.25; 5], Some(50.0)).unwrap();
    assert_eq!(pooled.qbar, 4.5);
    assert_eq!(pooled.b, 0.0);
    assert_eq!(pooled.t, 0.25);
    assert!(pooled.degrees_of_freedom().unwrap() <= 50.0);
}

#[test]
fn test_pooling_single_imputation_is_flagged() {
    let dataset = linear_dataset();
    let result = impute(&dataset, config(1, 2, 8));
    let pooled = pool_analysis(&result, &MeanAnalysis::new("y")).unwrap();

    assert!(!pooled.pooled.between_variance_defined);
    assert_eq!(
        pooled.pooled.confidence_interval(0.95),
        Err(PoolingError::BetweenVarianceUndefined)
    );
}

#[test]
fn test_pool_analysis_failure_names_estimand() {
    let dataset = load_nhanes();
    let result = impute(&dataset, config(2, 1, 4));
    let err = pool_analysis(&result, &MeanAnalysis::new("hyp")).unwrap_err();
    assert_eq!(err.error_code(), "ANALYSIS_FAILED");
    assert!(err.to_string().contains("mean(hyp)"));
}
