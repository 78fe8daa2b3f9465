//! Predictor selection: which variables feed the model of each target.

mod matrix;
mod quickpred;

pub use matrix::{PredictorMatrix, PredictorRow};
pub use quickpred::PredictorMatrixBuilder;
