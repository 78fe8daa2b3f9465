//! Error types for the imputation engine.
//!
//! Fatal problems (invalid data, invalid plans, pooling misuse) surface as
//! [`ImputationError`]. Model-fit degradation inside a chain is recovered
//! locally and reported through the convergence trace instead.
//!
//! Errors serialize as `{ code, message }` so they can be forwarded to a
//! frontend or written into a JSON report unchanged.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for the imputation engine.
#[derive(Error, Debug)]
pub enum ImputationError {
    /// Run was cancelled before it could produce any result.
    #[error("Imputation cancelled")]
    Cancelled,

    /// Input data or schema is inconsistent.
    #[error("Data validation failed: {0}")]
    DataValidation(String),

    /// Variable was not declared in the schema.
    #[error("Variable '{0}' not found in dataset")]
    VariableNotFound(String),

    /// Invalid configuration or imputation plan.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A passive formula produced a non-finite value.
    #[error("Passive formula for '{variable}' failed at case {case}: {reason}")]
    PassiveFormula {
        variable: String,
        case: usize,
        reason: String,
    },

    /// Rubin's-rules pooling was called with unusable input.
    #[error("Pooling failed: {0}")]
    Pooling(#[from] PoolingError),

    /// A downstream analysis function failed on one completed dataset.
    #[error("Analysis '{estimand}' failed: {reason}")]
    AnalysisFailed { estimand: String, reason: String },

    /// Internal error (e.g., worker thread failure).
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ImputationError>,
    },
}

/// Errors raised by the Rubin's-rules pooling engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolingError {
    #[error("At least one imputation is required")]
    NoImputations,

    #[error("Got {estimates} estimates but {variances} variances")]
    LengthMismatch { estimates: usize, variances: usize },

    #[error("Dimension mismatch in imputation {imputation}: expected {expected}, got {actual}")]
    DimensionMismatch {
        imputation: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Variance of imputation {index} is invalid: {value}")]
    InvalidVariance { index: usize, value: f64 },

    #[error("Estimate of imputation {index} is not finite")]
    NonFiniteEstimate { index: usize },

    #[error("Complete-data degrees of freedom must be positive, got {0}")]
    InvalidCompleteDataDf(f64),

    #[error("Between-imputation variance is undefined for m = 1")]
    BetweenVarianceUndefined,

    #[error("Degrees of freedom are not positive ({0}); no reference distribution")]
    DegenerateDf(f64),

    #[error("Confidence level must be in (0, 1), got {0}")]
    InvalidConfidenceLevel(f64),
}

impl ImputationError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ImputationError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Stable error code for programmatic handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::DataValidation(_) => "DATA_VALIDATION",
            Self::VariableNotFound(_) => "VARIABLE_NOT_FOUND",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::PassiveFormula { .. } => "PASSIVE_FORMULA_FAILED",
            Self::Pooling(_) => "POOLING_ERROR",
            Self::AnalysisFailed { .. } => "ANALYSIS_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::WithContext { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Check if the caller can retry after fixing its input or plan.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::InvalidConfig(_) | Self::VariableNotFound(_)
        )
    }
}

impl From<crate::config::ConfigValidationError> for ImputationError {
    fn from(err: crate::config::ConfigValidationError) -> Self {
        ImputationError::InvalidConfig(err.to_string())
    }
}

impl Serialize for ImputationError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("ImputationError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for imputation operations.
pub type Result<T> = std::result::Result<T, ImputationError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ImputationError::Polars(e).with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PoolingError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ImputationError::Pooling(e).with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(ImputationError::Cancelled.error_code(), "CANCELLED");
        assert_eq!(
            ImputationError::VariableNotFound("age".to_string()).error_code(),
            "VARIABLE_NOT_FOUND"
        );
        assert_eq!(
            ImputationError::from(PoolingError::NoImputations).error_code(),
            "POOLING_ERROR"
        );
    }

    #[test]
    fn test_is_cancelled() {
        assert!(ImputationError::Cancelled.is_cancelled());
        assert!(
            ImputationError::Cancelled
                .with_context("chain 2")
                .is_cancelled()
        );
        assert!(!ImputationError::Internal("x".to_string()).is_cancelled());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(ImputationError::InvalidConfig("m".to_string()).is_recoverable());
        assert!(!ImputationError::DataValidation("bad".to_string()).is_recoverable());
    }

    #[test]
    fn test_error_serialization() {
        let error = ImputationError::PassiveFormula {
            variable: "bmi".to_string(),
            case: 3,
            reason: "division by zero".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("PASSIVE_FORMULA_FAILED"));
        assert!(json.contains("bmi"));
    }

    #[test]
    fn test_with_context() {
        let error = ImputationError::VariableNotFound("hgt".to_string())
            .with_context("While building predictor matrix");
        assert!(error.to_string().contains("While building predictor matrix"));
        assert_eq!(error.error_code(), "VARIABLE_NOT_FOUND");
    }

    #[test]
    fn test_pooling_result_context() {
        let result: std::result::Result<(), PoolingError> =
            Err(PoolingError::BetweenVarianceUndefined);
        let err = result.context("Pooling mean(age)").unwrap_err();
        assert_eq!(err.error_code(), "POOLING_ERROR");
        assert!(err.to_string().contains("mean(age)"));
    }
}
