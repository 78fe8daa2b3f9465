//! Convergence diagnostics collected while chains iterate.

use crate::data::Dataset;
use crate::utils::{mean, sample_sd};
use serde::{Deserialize, Serialize};

/// Share of one level among the summarized cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelFrequency {
    pub level: String,
    pub proportion: f64,
}

/// Summary of a monitored variable after one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceStatistic {
    Continuous {
        mean: Option<f64>,
        sd: Option<f64>,
    },
    Categorical {
        frequencies: Vec<LevelFrequency>,
    },
}

impl TraceStatistic {
    /// Summarize `rows` of `var` in the current state of `dataset`.
    pub(crate) fn summarize(dataset: &Dataset, var: usize, rows: &[usize]) -> Self {
        let values: Vec<f64> = rows.iter().filter_map(|&r| dataset.value(var, r)).collect();

        if !dataset.var_type(var).is_discrete() {
            return Self::Continuous {
                mean: mean(&values),
                sd: sample_sd(&values),
            };
        }

        let total = values.len().max(1) as f64;
        let frequencies = dataset
            .levels(var)
            .iter()
            .enumerate()
            .map(|(code, level)| LevelFrequency {
                level: level.clone(),
                proportion: values.iter().filter(|&&v| v as usize == code).count() as f64 / total,
            })
            .collect();
        Self::Categorical { frequencies }
    }

    pub fn mean(&self) -> Option<f64> {
        match self {
            Self::Continuous { mean, .. } => *mean,
            Self::Categorical { .. } => None,
        }
    }

    pub fn proportion(&self, level: &str) -> Option<f64> {
        match self {
            Self::Continuous { .. } => None,
            Self::Categorical { frequencies } => frequencies
                .iter()
                .find(|f| f.level == level)
                .map(|f| f.proportion),
        }
    }
}

/// One trace point: (chain, iteration, variable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// 1-based chain (imputation) index
    pub chain: usize,
    /// 1-based iteration
    pub iteration: usize,
    pub variable: String,
    pub statistic: TraceStatistic,
    /// True when the model for this variable lost predictors or fell back
    /// to the marginal in this iteration
    pub degraded: bool,
}

/// A model-fit failure that was recovered by dropping predictors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitWarning {
    pub chain: usize,
    pub iteration: usize,
    pub variable: String,
    pub dropped_predictors: Vec<String>,
    pub marginal_fallback: bool,
    pub reasons: Vec<String>,
}

impl std::fmt::Display for FitWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chain {} iteration {} '{}': {}",
            self.chain,
            self.iteration,
            self.variable,
            self.reasons.join("; ")
        )?;
        if self.marginal_fallback {
            write!(f, " (marginal draw)")?;
        }
        Ok(())
    }
}

/// Trace for a whole run, chains in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceTrace {
    pub entries: Vec<TraceEntry>,
    pub warnings: Vec<FitWarning>,
}

impl ConvergenceTrace {
    pub(crate) fn extend(&mut self, other: ConvergenceTrace) {
        self.entries.extend(other.entries);
        self.warnings.extend(other.warnings);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of one variable in one chain, by iteration.
    pub fn series(&self, variable: &str, chain: usize) -> Vec<&TraceEntry> {
        self.entries
            .iter()
            .filter(|e| e.variable == variable && e.chain == chain)
            .collect()
    }

    /// Variables degraded in at least one (chain, iteration).
    pub fn degraded_variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for entry in self.entries.iter().filter(|e| e.degraded) {
            if !names.contains(&entry.variable.as_str()) {
                names.push(&entry.variable);
            }
        }
        names
    }
}
