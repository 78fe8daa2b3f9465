//! Per-variable imputation methods.

use crate::data::{Dataset, VariableRole};
use crate::error::{ImputationError, Result};
use crate::imputers::ImputationMethod;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Method assigned to one variable, for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodEntry {
    pub variable: String,
    #[serde(flatten)]
    pub method: ImputationMethod,
}

/// Exactly one [`ImputationMethod`] per variable, in column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodRegistry {
    names: Vec<String>,
    methods: Vec<ImputationMethod>,
}

impl MethodRegistry {
    /// Default assignment.
    ///
    /// Targets with missing values get the model family for their type.
    /// Passive variables get their formula when they or one of their inputs
    /// has missing values. Everything else is `none`.
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let methods = (0..dataset.ncols())
            .map(|var| {
                let method = default_method(dataset, var);
                debug!("Method for '{}': {}", dataset.name(var), method);
                method
            })
            .collect();
        Self {
            names: dataset.names().into_iter().map(str::to_string).collect(),
            methods,
        }
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn method(&self, var: usize) -> &ImputationMethod {
        &self.methods[var]
    }

    pub fn method_of(&self, name: &str) -> Option<&ImputationMethod> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|var| &self.methods[var])
    }

    /// Override the method of one variable.
    pub fn set(&mut self, dataset: &Dataset, name: &str, method: ImputationMethod) -> Result<()> {
        let var = dataset.index_of(name)?;
        check_method(dataset, var, &method)?;
        self.methods[var] = method;
        Ok(())
    }

    /// Indices of variables with a method other than `none`.
    pub fn registered(&self) -> Vec<usize> {
        self.methods
            .iter()
            .enumerate()
            .filter(|(_, m)| **m != ImputationMethod::None)
            .map(|(var, _)| var)
            .collect()
    }

    /// Named entries for diagnostics export.
    pub fn entries(&self) -> Vec<MethodEntry> {
        self.names
            .iter()
            .zip(&self.methods)
            .map(|(variable, method)| MethodEntry {
                variable: variable.clone(),
                method: method.clone(),
            })
            .collect()
    }

    /// Check every assignment against the dataset.
    pub fn validate(&self, dataset: &Dataset) -> Result<()> {
        if self.names.iter().map(String::as_str).ne(dataset.names()) {
            return Err(ImputationError::InvalidConfig(
                "Method registry variables do not match the dataset".to_string(),
            ));
        }
        for (var, method) in self.methods.iter().enumerate() {
            check_method(dataset, var, method)?;
        }
        Ok(())
    }
}

fn default_method(dataset: &Dataset, var: usize) -> ImputationMethod {
    match dataset.role(var) {
        VariableRole::Target if dataset.missing_count(var) > 0 => {
            ImputationMethod::default_for(dataset.var_type(var))
        }
        VariableRole::Passive if passive_needs_update(dataset, var) => {
            match &dataset.spec(var).formula {
                Some(formula) => ImputationMethod::Passive {
                    formula: formula.clone(),
                },
                None => ImputationMethod::None,
            }
        }
        _ => ImputationMethod::None,
    }
}

fn passive_needs_update(dataset: &Dataset, var: usize) -> bool {
    if dataset.missing_count(var) > 0 {
        return true;
    }
    dataset.spec(var).formula.as_ref().is_some_and(|formula| {
        formula.inputs().into_iter().any(|input| {
            dataset
                .schema()
                .index_of(input)
                .is_some_and(|i| dataset.missing_count(i) > 0)
        })
    })
}

fn check_method(dataset: &Dataset, var: usize, method: &ImputationMethod) -> Result<()> {
    let name = dataset.name(var);
    let reject = |reason: &str| {
        Err(ImputationError::InvalidConfig(format!(
            "Method '{}' for '{}': {}",
            method, name, reason
        )))
    };

    if !method.supports(dataset.var_type(var)) {
        return reject(&format!("not applicable to {} variables", dataset.var_type(var)));
    }

    match (dataset.role(var), method) {
        (_, ImputationMethod::None) => Ok(()),
        (VariableRole::Passive, ImputationMethod::Passive { formula }) => {
            if Some(formula) != dataset.spec(var).formula.as_ref() {
                return reject("formula differs from the declared one");
            }
            Ok(())
        }
        (_, ImputationMethod::Passive { .. }) => reject("only passive variables are derived"),
        (VariableRole::Target, _) if dataset.missing_count(var) == 0 => {
            reject("variable has no missing values")
        }
        (VariableRole::Target, _) => Ok(()),
        (role, _) => reject(&format!("role {:?} cannot be modeled", role)),
    }
}
