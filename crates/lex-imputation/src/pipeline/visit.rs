//! Order in which a chain visits variables within an iteration.

use crate::config::VisitOrder;
use crate::data::Dataset;
use crate::error::{ImputationError, Result};
use crate::imputers::{ImputationMethod, MethodRegistry};
use serde::Serialize;
use std::collections::HashSet;

/// Validated, duplicate-free visit order over exactly the variables with a
/// model or passive method. Passive variables come after their inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitSequence {
    variables: Vec<String>,
    #[serde(skip)]
    indices: Vec<usize>,
}

impl VisitSequence {
    /// Default order for a registry.
    ///
    /// Modeled variables are ordered by `order`; ties in missingness keep
    /// column order. Each passive variable is placed right after the last
    /// of its visited inputs.
    pub fn default_for(dataset: &Dataset, registry: &MethodRegistry, order: VisitOrder) -> Self {
        let mut modeled: Vec<usize> = (0..dataset.ncols())
            .filter(|&var| registry.method(var).is_model())
            .collect();
        match order {
            VisitOrder::ColumnOrder => {}
            VisitOrder::IncreasingMissingness => {
                modeled.sort_by_key(|&var| dataset.missing_count(var));
            }
            VisitOrder::DecreasingMissingness => {
                modeled.sort_by_key(|&var| std::cmp::Reverse(dataset.missing_count(var)));
            }
        }

        let mut indices = modeled;
        for var in crate::data::passive_order(dataset.schema()) {
            if !matches!(registry.method(var), ImputationMethod::Passive { .. }) {
                continue;
            }
            let position = input_indices(dataset, var)
                .iter()
                .filter_map(|input| indices.iter().position(|v| v == input))
                .max()
                .map_or(0, |p| p + 1);
            indices.insert(position, var);
        }

        Self::from_indices(dataset, indices)
    }

    /// Caller-supplied order, validated against the registry.
    pub fn custom<S: AsRef<str>>(
        dataset: &Dataset,
        registry: &MethodRegistry,
        names: &[S],
    ) -> Result<Self> {
        let indices = names
            .iter()
            .map(|name| dataset.index_of(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let sequence = Self::from_indices(dataset, indices);
        sequence.validate(dataset, registry)?;
        Ok(sequence)
    }

    fn from_indices(dataset: &Dataset, indices: Vec<usize>) -> Self {
        Self {
            variables: indices.iter().map(|&v| dataset.name(v).to_string()).collect(),
            indices,
        }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn validate(&self, dataset: &Dataset, registry: &MethodRegistry) -> Result<()> {
        let invalid = |msg: String| Err(ImputationError::InvalidConfig(msg));

        let mut seen = HashSet::new();
        for (position, &var) in self.indices.iter().enumerate() {
            if var >= dataset.ncols() {
                return invalid(format!("Visit sequence index {} out of range", var));
            }
            let name = dataset.name(var);
            if !seen.insert(var) {
                return invalid(format!("Variable '{}' is visited twice", name));
            }
            match registry.method(var) {
                ImputationMethod::None => {
                    return invalid(format!(
                        "Variable '{}' is visited but has no imputation method",
                        name
                    ));
                }
                ImputationMethod::Passive { .. } => {
                    for input in input_indices(dataset, var) {
                        let later = self.indices[position..].contains(&input);
                        if later {
                            return invalid(format!(
                                "Passive variable '{}' is visited before its input '{}'",
                                name,
                                dataset.name(input)
                            ));
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(missing) = registry.registered().into_iter().find(|v| !seen.contains(v)) {
            return invalid(format!(
                "Variable '{}' has a method but is not visited",
                dataset.name(missing)
            ));
        }
        Ok(())
    }
}

fn input_indices(dataset: &Dataset, var: usize) -> Vec<usize> {
    dataset
        .spec(var)
        .formula
        .as_ref()
        .map(|formula| {
            formula
                .inputs()
                .into_iter()
                .filter_map(|name| dataset.schema().index_of(name))
                .collect()
        })
        .unwrap_or_default()
}
