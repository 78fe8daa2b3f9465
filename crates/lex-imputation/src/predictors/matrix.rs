//! The predictor relation.

use crate::data::{Dataset, VariableRole};
use crate::error::{ImputationError, Result};
use crate::imputers::MethodRegistry;
use serde::{Deserialize, Serialize};

/// Square boolean relation: `get(target, predictor)` is true when
/// `predictor` is used in the model for `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictorMatrix {
    names: Vec<String>,
    matrix: Vec<Vec<bool>>,
}

/// One row of the matrix, by name, for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictorRow {
    pub target: String,
    pub predictors: Vec<String>,
}

impl PredictorMatrix {
    /// All-false matrix over `names`.
    pub fn empty(names: Vec<String>) -> Self {
        let p = names.len();
        Self {
            names,
            matrix: vec![vec![false; p]; p],
        }
    }

    /// All-false matrix over the variables of a dataset.
    pub fn for_dataset(dataset: &Dataset) -> Self {
        Self::empty(dataset.names().into_iter().map(str::to_string).collect())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, target: usize, predictor: usize) -> bool {
        self.matrix[target][predictor]
    }

    pub fn set(&mut self, target: usize, predictor: usize, value: bool) {
        self.matrix[target][predictor] = value;
    }

    /// Set an entry by variable names.
    pub fn set_by_name(&mut self, target: &str, predictor: &str, value: bool) -> Result<()> {
        let t = self.position(target)?;
        let p = self.position(predictor)?;
        self.set(t, p, value);
        Ok(())
    }

    /// Indices of the predictors of `target`, in column order.
    pub fn predictors_of(&self, target: usize) -> Vec<usize> {
        self.matrix[target]
            .iter()
            .enumerate()
            .filter_map(|(k, &used)| used.then_some(k))
            .collect()
    }

    pub fn row_count(&self, target: usize) -> usize {
        self.matrix[target].iter().filter(|&&used| used).count()
    }

    /// Named rows for diagnostics export. Empty rows are skipped.
    pub fn rows(&self) -> Vec<PredictorRow> {
        (0..self.len())
            .filter(|&t| self.row_count(t) > 0)
            .map(|t| PredictorRow {
                target: self.names[t].clone(),
                predictors: self
                    .predictors_of(t)
                    .into_iter()
                    .map(|k| self.names[k].clone())
                    .collect(),
            })
            .collect()
    }

    /// Check the matrix against a dataset and method registry.
    ///
    /// The diagonal is false, passive and excluded variables are never
    /// predictors, and only variables with a model method have predictors.
    pub fn validate(&self, dataset: &Dataset, registry: &MethodRegistry) -> Result<()> {
        if self.names.iter().map(String::as_str).ne(dataset.names()) {
            return Err(ImputationError::InvalidConfig(
                "Predictor matrix variables do not match the dataset".to_string(),
            ));
        }

        for t in 0..self.len() {
            if self.matrix[t][t] {
                return Err(ImputationError::InvalidConfig(format!(
                    "Variable '{}' cannot predict itself",
                    self.names[t]
                )));
            }
            if self.row_count(t) > 0 && !registry.method(t).is_model() {
                return Err(ImputationError::InvalidConfig(format!(
                    "Variable '{}' has predictors but no model method",
                    self.names[t]
                )));
            }
            for k in self.predictors_of(t) {
                match dataset.role(k) {
                    VariableRole::Passive => {
                        return Err(ImputationError::InvalidConfig(format!(
                            "Passive variable '{}' cannot predict '{}'",
                            self.names[k], self.names[t]
                        )));
                    }
                    VariableRole::Excluded => {
                        return Err(ImputationError::InvalidConfig(format!(
                            "Excluded variable '{}' cannot predict '{}'",
                            self.names[k], self.names[t]
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| ImputationError::VariableNotFound(name.to_string()))
    }
}
