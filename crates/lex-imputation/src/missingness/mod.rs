//! Missingness pattern analysis.
//!
//! Per-variable and per-case missing counts, pairwise response counts,
//! usable-case and outbound proportions, influx/outflux and the pattern
//! table. Everything here is a pure function of the dataset and is used to
//! inform predictor selection.

mod analyzer;
pub mod flux;
pub mod pairs;
pub mod patterns;

pub use analyzer::{MissingnessAnalyzer, MissingnessReport, VariableMissingness};
pub use flux::FluxStats;
pub use pairs::PairCounts;
pub use patterns::{MissingPattern, PatternTable};
