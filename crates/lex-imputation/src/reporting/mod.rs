//! Diagnostics reporting and export.
//!
//! [`ReportGenerator`] writes the stacked completed datasets as a long CSV
//! and a JSON [`DiagnosticsReport`] describing the run.
//!
//! # Example
//!
//! ```rust,ignore
//! use lex_imputation::reporting::ReportGenerator;
//!
//! let generator = ReportGenerator::new(PathBuf::from("output"), None);
//! let csv = generator.write_long_csv(&result, false, "nhanes")?;
//!
//! let report = ReportGenerator::build_report("nhanes.csv", Some(&csv.to_string_lossy()), &result, pooled);
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! generator.write_report_to_file(&report, "nhanes")?;
//! ```

mod generator;

pub use generator::{DiagnosticsReport, MissingnessSummary, ReportGenerator, RunSummary};
