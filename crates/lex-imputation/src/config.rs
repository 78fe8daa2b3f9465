//! Configuration types for the imputation engine.
//!
//! Two configuration objects exist: [`ImputationConfig`] drives the chained
//! equations run, and [`PredictorConfig`] drives quick predictor selection.
//! Both follow the builder pattern and validate on `build()`.

use serde::{Deserialize, Serialize};

/// Default ordering of variables within one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VisitOrder {
    /// Declared column order
    #[default]
    ColumnOrder,
    /// Fewest missing values first
    IncreasingMissingness,
    /// Most missing values first
    DecreasingMissingness,
}

/// Configuration for a chained equations run.
///
/// # Example
///
/// ```rust,ignore
/// use lex_imputation::config::ImputationConfig;
///
/// let config = ImputationConfig::builder()
///     .imputations(10)
///     .max_iterations(20)
///     .seed(2024)
///     .build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputationConfig {
    /// Number of completed datasets (independent chains).
    /// Default: 5
    pub imputations: usize,

    /// Number of iterations per chain. Zero leaves the initial marginal fill.
    /// Default: 5
    pub max_iterations: usize,

    /// Master seed. Each chain derives its own stream from (seed, chain index).
    /// If None, a seed is drawn once per run and logged.
    /// Default: None
    pub seed: Option<u64>,

    /// Donor pool size for predictive mean matching.
    /// Default: 5
    pub donors: usize,

    /// Ridge penalty, relative to the diagonal of X'X, for linear fits.
    /// Default: 1e-5
    pub ridge: f64,

    /// Newton/IRLS iteration cap for logistic and multinomial fits.
    /// Default: 25
    pub max_fit_iterations: usize,

    /// Default visit order when no explicit sequence is supplied.
    /// Default: ColumnOrder
    pub visit_order: VisitOrder,

    /// Run chains on the rayon thread pool.
    /// Default: true
    pub parallel: bool,

    /// Variables summarized in the convergence trace. None monitors every
    /// visited variable.
    /// Default: None
    pub monitored: Option<Vec<String>>,
}

impl Default for ImputationConfig {
    fn default() -> Self {
        Self {
            imputations: 5,
            max_iterations: 5,
            seed: None,
            donors: 5,
            ridge: 1e-5,
            max_fit_iterations: 25,
            visit_order: VisitOrder::default(),
            parallel: true,
            monitored: None,
        }
    }
}

impl ImputationConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ImputationConfigBuilder {
        ImputationConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.imputations == 0 {
            return Err(ConfigValidationError::InvalidCount {
                field: "imputations".to_string(),
                value: self.imputations,
            });
        }

        if self.donors == 0 {
            return Err(ConfigValidationError::InvalidCount {
                field: "donors".to_string(),
                value: self.donors,
            });
        }

        if self.max_fit_iterations == 0 {
            return Err(ConfigValidationError::InvalidCount {
                field: "max_fit_iterations".to_string(),
                value: self.max_fit_iterations,
            });
        }

        if !self.ridge.is_finite() || self.ridge < 0.0 {
            return Err(ConfigValidationError::InvalidRidge(self.ridge));
        }

        Ok(())
    }
}

/// Configuration for quick predictor selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Minimum absolute correlation for a predictor to be selected.
    /// Default: 0.1
    pub mincor: f64,

    /// Minimum proportion of usable cases.
    /// Default: 0.0
    pub minpuc: f64,

    /// Variables always used as predictors.
    /// Default: empty
    #[serde(default)]
    pub include: Vec<String>,

    /// Variables never used as predictors (unless also included).
    /// Default: empty
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            mincor: 0.1,
            minpuc: 0.0,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl PredictorConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PredictorConfigBuilder {
        PredictorConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(0.0..=1.0).contains(&self.mincor) {
            return Err(ConfigValidationError::InvalidThreshold {
                field: "mincor".to_string(),
                value: self.mincor,
            });
        }

        if !(0.0..=1.0).contains(&self.minpuc) {
            return Err(ConfigValidationError::InvalidThreshold {
                field: "minpuc".to_string(),
                value: self.minpuc,
            });
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid threshold for '{field}': {value} (must be between 0.0 and 1.0)")]
    InvalidThreshold { field: String, value: f64 },

    #[error("Invalid value for '{field}': {value} (must be at least 1)")]
    InvalidCount { field: String, value: usize },

    #[error("Invalid ridge penalty: {0} (must be finite and non-negative)")]
    InvalidRidge(f64),
}

/// Builder for [`ImputationConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct ImputationConfigBuilder {
    imputations: Option<usize>,
    max_iterations: Option<usize>,
    seed: Option<u64>,
    donors: Option<usize>,
    ridge: Option<f64>,
    max_fit_iterations: Option<usize>,
    visit_order: Option<VisitOrder>,
    parallel: Option<bool>,
    monitored: Option<Vec<String>>,
}

impl ImputationConfigBuilder {
    /// Set the number of imputations (m).
    pub fn imputations(mut self, m: usize) -> Self {
        self.imputations = Some(m);
        self
    }

    /// Set the number of iterations per chain (maxit).
    pub fn max_iterations(mut self, maxit: usize) -> Self {
        self.max_iterations = Some(maxit);
        self
    }

    /// Set the master seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the PMM donor pool size.
    pub fn donors(mut self, donors: usize) -> Self {
        self.donors = Some(donors);
        self
    }

    /// Set the ridge penalty used by linear fits.
    pub fn ridge(mut self, ridge: f64) -> Self {
        self.ridge = Some(ridge);
        self
    }

    /// Set the iteration cap for logistic and multinomial fits.
    pub fn max_fit_iterations(mut self, iterations: usize) -> Self {
        self.max_fit_iterations = Some(iterations);
        self
    }

    /// Set the default visit order.
    pub fn visit_order(mut self, order: VisitOrder) -> Self {
        self.visit_order = Some(order);
        self
    }

    /// Enable or disable parallel chains.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    /// Restrict the convergence trace to the named variables.
    pub fn monitored<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.monitored = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<ImputationConfig, ConfigValidationError> {
        let defaults = ImputationConfig::default();
        let config = ImputationConfig {
            imputations: self.imputations.unwrap_or(defaults.imputations),
            max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
            seed: self.seed,
            donors: self.donors.unwrap_or(defaults.donors),
            ridge: self.ridge.unwrap_or(defaults.ridge),
            max_fit_iterations: self
                .max_fit_iterations
                .unwrap_or(defaults.max_fit_iterations),
            visit_order: self.visit_order.unwrap_or_default(),
            parallel: self.parallel.unwrap_or(defaults.parallel),
            monitored: self.monitored,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Builder for [`PredictorConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct PredictorConfigBuilder {
    mincor: Option<f64>,
    minpuc: Option<f64>,
    include: Vec<String>,
    exclude: Vec<String>,
}

impl PredictorConfigBuilder {
    /// Set the minimum absolute correlation.
    pub fn mincor(mut self, mincor: f64) -> Self {
        self.mincor = Some(mincor);
        self
    }

    /// Set the minimum proportion of usable cases.
    pub fn minpuc(mut self, minpuc: f64) -> Self {
        self.minpuc = Some(minpuc);
        self
    }

    /// Force a variable in as predictor for every target.
    pub fn include(mut self, name: impl Into<String>) -> Self {
        self.include.push(name.into());
        self
    }

    /// Force a variable out as predictor for every target.
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.exclude.push(name.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<PredictorConfig, ConfigValidationError> {
        let config = PredictorConfig {
            mincor: self.mincor.unwrap_or(0.1),
            minpuc: self.minpuc.unwrap_or(0.0),
            include: self.include,
            exclude: self.exclude,
        };

        config.validate()?;
        Ok(config)
    }
}
