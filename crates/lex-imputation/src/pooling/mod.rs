//! Rubin's-rules pooling.
//!
//! Estimates are pooled on the scale they are supplied on; transform to an
//! approximately normal scale first and back-transform the pooled result.

pub mod analysis;
pub mod rubin;
pub mod vector;

pub use analysis::{Analysis, ClosureAnalysis, Estimate, MeanAnalysis, PooledAnalysis, pool_analysis};
pub use rubin::{PooledEstimate, pool_scalar};
pub use vector::{PooledVector, pool_vector};
