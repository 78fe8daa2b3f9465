//! Variable declarations.
//!
//! A [`Schema`] lists every variable with its semantic type, its role in the
//! imputation run and how missing values are encoded in the raw input.

use crate::data::passive::PassiveFormula;
use crate::error::{ImputationError, Result};
use crate::utils::{is_numeric_dtype, is_text_dtype};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Semantic type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Continuous,
    Binary,
    /// More than two unordered levels
    Categorical,
}

impl VariableType {
    /// True for binary and categorical variables, which are stored as level codes.
    pub fn is_discrete(&self) -> bool {
        !matches!(self, Self::Continuous)
    }
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Continuous => "continuous",
            Self::Binary => "binary",
            Self::Categorical => "categorical",
        };
        write!(f, "{}", name)
    }
}

/// Role of a variable in the imputation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VariableRole {
    /// Imputed when it has missing values, usable as predictor
    #[default]
    Target,
    /// Usable as predictor, never imputed; must be fully observed to run
    PredictorOnly,
    /// Recomputed from a formula
    Passive,
    /// Neither imputed nor used as predictor
    Excluded,
}

/// How missing values are encoded in the raw column.
///
/// Native nulls are always treated as missing; a sentinel adds one more
/// encoding on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MissingSentinel {
    #[default]
    Null,
    /// Numeric code such as `-99`
    Value(f64),
    /// Text code such as `"NA"`
    Text(String),
}

/// Declaration of one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub var_type: VariableType,

    #[serde(default)]
    pub role: VariableRole,

    /// Level labels for binary and categorical variables. Observed labels
    /// outside this list are rejected. Inferred from the data when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub levels: Option<Vec<String>>,

    #[serde(default)]
    pub missing: MissingSentinel,

    /// Derivation rule, required for passive variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<PassiveFormula>,
}

impl VariableSpec {
    pub fn new(name: impl Into<String>, var_type: VariableType) -> Self {
        Self {
            name: name.into(),
            var_type,
            role: VariableRole::Target,
            levels: None,
            missing: MissingSentinel::Null,
            formula: None,
        }
    }

    pub fn continuous(name: impl Into<String>) -> Self {
        Self::new(name, VariableType::Continuous)
    }

    pub fn binary(name: impl Into<String>) -> Self {
        Self::new(name, VariableType::Binary)
    }

    pub fn categorical(name: impl Into<String>) -> Self {
        Self::new(name, VariableType::Categorical)
    }

    /// Declare a passive variable derived from `formula`.
    pub fn passive(name: impl Into<String>, var_type: VariableType, formula: PassiveFormula) -> Self {
        Self {
            role: VariableRole::Passive,
            formula: Some(formula),
            ..Self::new(name, var_type)
        }
    }

    pub fn with_role(mut self, role: VariableRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_levels<I, S>(mut self, levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.levels = Some(levels.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_missing(mut self, missing: MissingSentinel) -> Self {
        self.missing = missing;
        self
    }
}

/// Ordered collection of variable declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub variables: Vec<VariableSpec>,
}

impl Schema {
    pub fn new(variables: Vec<VariableSpec>) -> Self {
        Self { variables }
    }

    /// Parse a schema from JSON: either `{"variables": [...]}` or a bare array.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let schema = if value.is_array() {
            Schema::new(serde_json::from_value(value)?)
        } else {
            serde_json::from_value(value)?
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Infer a schema from a frame: numeric columns become continuous,
    /// boolean and two-label text columns binary, other text columns
    /// categorical. Every variable gets the target role.
    pub fn infer(df: &DataFrame) -> Result<Self> {
        let mut variables = Vec::with_capacity(df.width());
        for column in df.get_columns() {
            let name = column.name().to_string();
            let dtype = column.dtype();
            let var_type = if is_numeric_dtype(dtype) {
                VariableType::Continuous
            } else if matches!(dtype, DataType::Boolean) {
                VariableType::Binary
            } else if is_text_dtype(dtype) {
                let distinct = column.as_materialized_series().drop_nulls().n_unique()?;
                if distinct <= 2 {
                    VariableType::Binary
                } else {
                    VariableType::Categorical
                }
            } else {
                return Err(ImputationError::DataValidation(format!(
                    "Column '{}' has unsupported type {}",
                    name, dtype
                )));
            };
            variables.push(VariableSpec::new(name, var_type));
        }
        Ok(Schema::new(variables))
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name.as_str()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&VariableSpec> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Check internal consistency of the declarations.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for spec in &self.variables {
            if spec.name.is_empty() {
                return Err(ImputationError::DataValidation(
                    "Variable with empty name".to_string(),
                ));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ImputationError::DataValidation(format!(
                    "Variable '{}' declared twice",
                    spec.name
                )));
            }
        }

        for spec in &self.variables {
            self.validate_levels(spec)?;
            self.validate_formula(spec)?;
        }

        self.check_passive_cycles()
    }

    fn validate_levels(&self, spec: &VariableSpec) -> Result<()> {
        match (spec.var_type, &spec.levels) {
            (VariableType::Continuous, Some(_)) => Err(ImputationError::DataValidation(format!(
                "Continuous variable '{}' cannot declare levels",
                spec.name
            ))),
            (VariableType::Binary, Some(levels)) if levels.len() != 2 => {
                Err(ImputationError::DataValidation(format!(
                    "Binary variable '{}' must declare exactly 2 levels, got {}",
                    spec.name,
                    levels.len()
                )))
            }
            (VariableType::Categorical, Some(levels)) if levels.len() <= 2 => {
                Err(ImputationError::DataValidation(format!(
                    "Categorical variable '{}' must declare more than 2 levels, got {}",
                    spec.name,
                    levels.len()
                )))
            }
            (_, Some(levels)) => {
                let distinct: HashSet<&String> = levels.iter().collect();
                if distinct.len() != levels.len() {
                    return Err(ImputationError::DataValidation(format!(
                        "Variable '{}' declares duplicate levels",
                        spec.name
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn validate_formula(&self, spec: &VariableSpec) -> Result<()> {
        let formula = match (&spec.role, &spec.formula) {
            (VariableRole::Passive, Some(formula)) => formula,
            (VariableRole::Passive, None) => {
                return Err(ImputationError::DataValidation(format!(
                    "Passive variable '{}' has no formula",
                    spec.name
                )));
            }
            (_, Some(_)) => {
                return Err(ImputationError::DataValidation(format!(
                    "Variable '{}' has a formula but is not passive",
                    spec.name
                )));
            }
            (_, None) => return Ok(()),
        };

        formula.validate().map_err(|reason| {
            ImputationError::DataValidation(format!(
                "Invalid formula for '{}': {}",
                spec.name, reason
            ))
        })?;

        for input in formula.inputs() {
            let Some(input_spec) = self.get(input) else {
                return Err(ImputationError::DataValidation(format!(
                    "Passive formula for '{}' references undeclared input '{}'",
                    spec.name, input
                )));
            };
            if input == spec.name {
                return Err(ImputationError::DataValidation(format!(
                    "Passive formula for '{}' references itself",
                    spec.name
                )));
            }
            if input_spec.role == VariableRole::Excluded {
                return Err(ImputationError::DataValidation(format!(
                    "Passive formula for '{}' references excluded variable '{}'",
                    spec.name, input
                )));
            }
        }

        match (spec.var_type, formula.level_count()) {
            (VariableType::Continuous, Some(_)) => Err(ImputationError::DataValidation(format!(
                "Passive variable '{}' is continuous but its formula is a cut",
                spec.name
            ))),
            (VariableType::Continuous, None) => Ok(()),
            (_, None) => Err(ImputationError::DataValidation(format!(
                "Passive variable '{}' is {} and needs a cut formula",
                spec.name, spec.var_type
            ))),
            (var_type, Some(count)) => {
                let type_ok = match var_type {
                    VariableType::Binary => count == 2,
                    _ => count > 2,
                };
                let levels_ok = spec.levels.as_ref().is_none_or(|l| l.len() == count);
                if type_ok && levels_ok {
                    Ok(())
                } else {
                    Err(ImputationError::DataValidation(format!(
                        "Passive variable '{}' produces {} levels, inconsistent with its declaration",
                        spec.name, count
                    )))
                }
            }
        }
    }

    /// Passive variables may depend on other passive variables, but not in a cycle.
    fn check_passive_cycles(&self) -> Result<()> {
        let deps: HashMap<&str, Vec<&str>> = self
            .variables
            .iter()
            .filter_map(|v| v.formula.as_ref().map(|f| (v.name.as_str(), f.inputs())))
            .collect();

        fn visit<'a>(
            node: &'a str,
            deps: &HashMap<&'a str, Vec<&'a str>>,
            stack: &mut Vec<&'a str>,
            done: &mut HashSet<&'a str>,
        ) -> std::result::Result<(), String> {
            if done.contains(node) {
                return Ok(());
            }
            if stack.contains(&node) {
                return Err(node.to_string());
            }
            stack.push(node);
            for dep in deps.get(node).into_iter().flatten() {
                visit(dep, deps, stack, done)?;
            }
            stack.pop();
            done.insert(node);
            Ok(())
        }

        let mut done = HashSet::new();
        for name in deps.keys() {
            visit(name, &deps, &mut Vec::new(), &mut done).map_err(|node| {
                ImputationError::DataValidation(format!(
                    "Passive formulas form a cycle through '{}'",
                    node
                ))
            })?;
        }
        Ok(())
    }
}
