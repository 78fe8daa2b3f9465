//! Columnar dataset with declared variable semantics.
//!
//! Values are stored per variable as `Option<f64>`: continuous variables
//! keep their value, binary and categorical variables store a level code
//! `0..k` into their level table. `None` is the single in-memory encoding
//! of a missing value, whatever sentinel the raw input used.

use crate::data::schema::{MissingSentinel, Schema, VariableRole, VariableSpec, VariableType};
use crate::error::{ImputationError, Result, ResultExt};
use crate::utils::{format_level_label, is_numeric_dtype, is_text_dtype};
use polars::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// An ordered set of records over declared variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    schema: Schema,
    levels: Vec<Vec<String>>,
    columns: Vec<Vec<Option<f64>>>,
    case_ids: Vec<String>,
}

static_assertions::assert_impl_all!(Dataset: Send, Sync);

impl Dataset {
    /// Build a dataset from already-coded columns, one per schema variable.
    ///
    /// Discrete variables must hold integer level codes. Their level table is
    /// the declared one, or `"0".."k-1"` when none is declared. Passive
    /// variables are recomputed from their formulas.
    pub fn new(schema: Schema, columns: Vec<Vec<Option<f64>>>) -> Result<Self> {
        schema.validate()?;
        if columns.len() != schema.len() {
            return Err(ImputationError::DataValidation(format!(
                "Schema declares {} variables but {} columns were supplied",
                schema.len(),
                columns.len()
            )));
        }

        let nrows = columns.first().map_or(0, Vec::len);
        let mut levels = Vec::with_capacity(schema.len());
        for (spec, column) in schema.variables.iter().zip(&columns) {
            if column.len() != nrows {
                return Err(ImputationError::DataValidation(format!(
                    "Column '{}' has {} rows, expected {}",
                    spec.name,
                    column.len(),
                    nrows
                )));
            }
            levels.push(coded_levels(spec, column)?);
        }

        let mut dataset = Self {
            schema,
            levels,
            columns,
            case_ids: default_case_ids(nrows),
        };
        dataset.derive_passive()?;
        Ok(dataset)
    }

    /// Ingest a polars frame according to `schema`.
    ///
    /// Native nulls are always missing; the declared sentinel is applied on
    /// top. Passive variables do not need a column: they are derived from
    /// their formulas.
    pub fn from_dataframe(df: &DataFrame, schema: Schema) -> Result<Self> {
        schema.validate()?;

        let nrows = df.height();
        let mut levels = Vec::with_capacity(schema.len());
        let mut columns = Vec::with_capacity(schema.len());

        for spec in &schema.variables {
            if spec.role == VariableRole::Passive {
                levels.push(passive_levels(spec));
                columns.push(vec![None; nrows]);
                continue;
            }

            let column = df
                .column(&spec.name)
                .map_err(|_| ImputationError::VariableNotFound(spec.name.clone()))?;
            let series = column.as_materialized_series();

            let (column_levels, values) = if spec.var_type.is_discrete() {
                read_discrete(spec, series)?
            } else {
                (Vec::new(), read_continuous(spec, series)?)
            };
            debug!(
                "Ingested '{}' ({}): {} missing of {}",
                spec.name,
                spec.var_type,
                values.iter().filter(|v| v.is_none()).count(),
                nrows
            );
            levels.push(column_levels);
            columns.push(values);
        }

        let mut dataset = Self {
            schema,
            levels,
            columns,
            case_ids: default_case_ids(nrows),
        };
        dataset.derive_passive()?;
        Ok(dataset)
    }

    /// Replace the default case identifiers (`"1".."n"`).
    pub fn with_case_ids(mut self, case_ids: Vec<String>) -> Result<Self> {
        if case_ids.len() != self.nrows() {
            return Err(ImputationError::DataValidation(format!(
                "Got {} case identifiers for {} records",
                case_ids.len(),
                self.nrows()
            )));
        }
        let distinct: HashSet<&String> = case_ids.iter().collect();
        if distinct.len() != case_ids.len() {
            return Err(ImputationError::DataValidation(
                "Case identifiers must be unique".to_string(),
            ));
        }
        self.case_ids = case_ids;
        Ok(self)
    }

    /// Convert back to a polars frame: continuous variables as `f64`,
    /// discrete variables as their level labels.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let columns: Vec<Column> = (0..self.ncols()).map(|var| self.to_column(var)).collect();
        DataFrame::new(columns).context("Building frame from dataset")
    }

    pub(crate) fn to_column(&self, var: usize) -> Column {
        let name = PlSmallStr::from(self.schema.variables[var].name.as_str());
        if self.var_type(var).is_discrete() {
            let labels: Vec<Option<String>> =
                (0..self.nrows()).map(|row| self.label(var, row)).collect();
            Series::new(name, labels).into_column()
        } else {
            Series::new(name, self.columns[var].clone()).into_column()
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn nrows(&self) -> usize {
        self.case_ids.len()
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn names(&self) -> Vec<&str> {
        self.schema.names()
    }

    pub fn name(&self, var: usize) -> &str {
        &self.schema.variables[var].name
    }

    pub fn spec(&self, var: usize) -> &VariableSpec {
        &self.schema.variables[var]
    }

    pub fn var_type(&self, var: usize) -> VariableType {
        self.schema.variables[var].var_type
    }

    pub fn role(&self, var: usize) -> VariableRole {
        self.schema.variables[var].role
    }

    pub fn case_ids(&self) -> &[String] {
        &self.case_ids
    }

    /// Index of a variable by name.
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.schema
            .index_of(name)
            .ok_or_else(|| ImputationError::VariableNotFound(name.to_string()))
    }

    pub fn column(&self, var: usize) -> &[Option<f64>] {
        &self.columns[var]
    }

    pub fn column_by_name(&self, name: &str) -> Result<&[Option<f64>]> {
        Ok(self.column(self.index_of(name)?))
    }

    pub fn value(&self, var: usize, row: usize) -> Option<f64> {
        self.columns[var][row]
    }

    pub fn levels(&self, var: usize) -> &[String] {
        &self.levels[var]
    }

    pub fn n_levels(&self, var: usize) -> usize {
        self.levels[var].len()
    }

    /// Display label of a cell: the level label for discrete variables,
    /// the formatted number otherwise.
    pub fn label(&self, var: usize, row: usize) -> Option<String> {
        let value = self.columns[var][row]?;
        if self.var_type(var).is_discrete() {
            self.levels[var].get(value as usize).cloned()
        } else {
            Some(value.to_string())
        }
    }

    pub fn is_missing(&self, var: usize, row: usize) -> bool {
        self.columns[var][row].is_none()
    }

    pub fn missing_count(&self, var: usize) -> usize {
        self.columns[var].iter().filter(|v| v.is_none()).count()
    }

    pub fn missing_rows(&self, var: usize) -> Vec<usize> {
        self.columns[var]
            .iter()
            .enumerate()
            .filter_map(|(row, v)| v.is_none().then_some(row))
            .collect()
    }

    pub fn observed_values(&self, var: usize) -> Vec<f64> {
        self.columns[var].iter().flatten().copied().collect()
    }

    /// Total number of missing cells.
    pub fn total_missing(&self) -> usize {
        (0..self.ncols()).map(|var| self.missing_count(var)).sum()
    }

    // -------------------------------------------------------------------------
    // Mutation (imputation working copies only)
    // -------------------------------------------------------------------------

    pub(crate) fn set(&mut self, var: usize, row: usize, value: Option<f64>) {
        self.columns[var][row] = value;
    }

    /// Recompute one passive variable for every record.
    pub(crate) fn recompute_passive(&mut self, var: usize) -> Result<()> {
        let Some(formula) = self.schema.variables[var].formula.clone() else {
            return Ok(());
        };
        let index: HashMap<&str, usize> = self
            .schema
            .variables
            .iter()
            .enumerate()
            .map(|(i, v)| (v.name.as_str(), i))
            .collect();

        let mut values = Vec::with_capacity(self.nrows());
        for row in 0..self.nrows() {
            let lookup = |name: &str| index.get(name).and_then(|&i| self.columns[i][row]);
            let value = formula
                .evaluate(&lookup)
                .map_err(|reason| ImputationError::PassiveFormula {
                    variable: self.schema.variables[var].name.clone(),
                    case: row,
                    reason,
                })?;
            values.push(value);
        }
        self.columns[var] = values;
        Ok(())
    }

    fn derive_passive(&mut self) -> Result<()> {
        for var in passive_order(&self.schema) {
            self.recompute_passive(var)?;
        }
        Ok(())
    }
}

/// Passive variables ordered so every passive input comes before its dependents.
pub(crate) fn passive_order(schema: &Schema) -> Vec<usize> {
    fn place(schema: &Schema, var: usize, order: &mut Vec<usize>) {
        if order.contains(&var) {
            return;
        }
        if let Some(formula) = &schema.variables[var].formula {
            for input in formula.inputs() {
                if let Some(dep) = schema.index_of(input) {
                    if schema.variables[dep].role == VariableRole::Passive {
                        place(schema, dep, order);
                    }
                }
            }
        }
        order.push(var);
    }

    let mut order = Vec::new();
    for (var, spec) in schema.variables.iter().enumerate() {
        if spec.role == VariableRole::Passive {
            place(schema, var, &mut order);
        }
    }
    order
}

fn default_case_ids(nrows: usize) -> Vec<String> {
    (1..=nrows).map(|i| i.to_string()).collect()
}

fn passive_levels(spec: &VariableSpec) -> Vec<String> {
    if !spec.var_type.is_discrete() {
        return Vec::new();
    }
    spec.levels
        .clone()
        .or_else(|| spec.formula.as_ref().and_then(|f| f.cut_labels()))
        .unwrap_or_default()
}

fn coded_levels(spec: &VariableSpec, column: &[Option<f64>]) -> Result<Vec<String>> {
    if spec.role == VariableRole::Passive {
        return Ok(passive_levels(spec));
    }
    if !spec.var_type.is_discrete() {
        if column.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ImputationError::DataValidation(format!(
                "Continuous variable '{}' contains non-finite values",
                spec.name
            )));
        }
        return Ok(Vec::new());
    }

    let max_code = column.iter().flatten().try_fold(0usize, |acc, &v| {
        if v < 0.0 || v.fract() != 0.0 || !v.is_finite() {
            Err(ImputationError::DataValidation(format!(
                "Variable '{}' holds {} which is not a level code",
                spec.name, v
            )))
        } else {
            Ok(acc.max(v as usize))
        }
    })?;

    let levels = match &spec.levels {
        Some(levels) => levels.clone(),
        None if spec.var_type == VariableType::Binary => vec!["0".to_string(), "1".to_string()],
        None => (0..=max_code).map(|c| c.to_string()).collect(),
    };
    if column.iter().flatten().any(|&v| v as usize >= levels.len()) {
        return Err(ImputationError::DataValidation(format!(
            "Variable '{}' holds codes beyond its {} levels",
            spec.name,
            levels.len()
        )));
    }
    Ok(levels)
}

/// Numeric value of a text sentinel, if it has one.
fn sentinel_as_number(spec: &VariableSpec) -> Result<Option<f64>> {
    match &spec.missing {
        MissingSentinel::Null => Ok(None),
        MissingSentinel::Value(v) => Ok(Some(*v)),
        MissingSentinel::Text(text) => text.trim().parse::<f64>().map(Some).map_err(|_| {
            ImputationError::DataValidation(format!(
                "Missing sentinel '{}' for '{}' cannot occur in a numeric column",
                text, spec.name
            ))
        }),
    }
}

fn is_text_sentinel(spec: &VariableSpec, raw: &str) -> bool {
    match &spec.missing {
        MissingSentinel::Null => false,
        MissingSentinel::Text(text) => raw == text,
        MissingSentinel::Value(v) => raw.trim().parse::<f64>().is_ok_and(|x| x == *v),
    }
}

fn read_continuous(spec: &VariableSpec, series: &Series) -> Result<Vec<Option<f64>>> {
    let dtype = series.dtype();
    if is_numeric_dtype(dtype) {
        let sentinel = sentinel_as_number(spec)?;
        let cast = series.cast(&DataType::Float64)?;
        cast.f64()?
            .into_iter()
            .map(|value| match value {
                None => Ok(None),
                Some(v) if sentinel == Some(v) || v.is_nan() => Ok(None),
                Some(v) if v.is_infinite() => Err(ImputationError::DataValidation(format!(
                    "Continuous variable '{}' contains an infinite value",
                    spec.name
                ))),
                Some(v) => Ok(Some(v)),
            })
            .collect()
    } else if is_text_dtype(dtype) {
        let cast = series.cast(&DataType::String)?;
        cast.str()?
            .into_iter()
            .map(|value| match value {
                None => Ok(None),
                Some(raw) if is_text_sentinel(spec, raw) => Ok(None),
                Some(raw) => match raw.trim().parse::<f64>() {
                    Ok(v) if v.is_finite() => Ok(Some(v)),
                    Ok(v) if v.is_nan() => Ok(None),
                    _ => Err(ImputationError::DataValidation(format!(
                        "Value '{}' of continuous variable '{}' is not a finite number",
                        raw, spec.name
                    ))),
                },
            })
            .collect()
    } else {
        Err(ImputationError::DataValidation(format!(
            "Column '{}' of type {} cannot hold a continuous variable",
            spec.name, dtype
        )))
    }
}

fn read_discrete(spec: &VariableSpec, series: &Series) -> Result<(Vec<String>, Vec<Option<f64>>)> {
    let dtype = series.dtype();
    let labels: Vec<Option<String>> = if is_numeric_dtype(dtype) {
        let sentinel = sentinel_as_number(spec)?;
        let cast = series.cast(&DataType::Float64)?;
        cast.f64()?
            .into_iter()
            .map(|value| match value {
                Some(v) if sentinel != Some(v) && !v.is_nan() => Some(format_level_label(v)),
                _ => None,
            })
            .collect()
    } else if matches!(dtype, DataType::Boolean) {
        if spec.missing != MissingSentinel::Null {
            return Err(ImputationError::DataValidation(format!(
                "Boolean column '{}' cannot carry a missing sentinel",
                spec.name
            )));
        }
        series
            .bool()?
            .into_iter()
            .map(|value| value.map(|b| b.to_string()))
            .collect()
    } else if is_text_dtype(dtype) {
        let cast = series.cast(&DataType::String)?;
        cast.str()?
            .into_iter()
            .map(|value| match value {
                Some(raw) if !is_text_sentinel(spec, raw) => Some(raw.to_string()),
                _ => None,
            })
            .collect()
    } else {
        return Err(ImputationError::DataValidation(format!(
            "Column '{}' of type {} cannot hold a {} variable",
            spec.name, dtype, spec.var_type
        )));
    };

    let levels = match &spec.levels {
        Some(levels) => levels.clone(),
        None => infer_levels(spec, &labels)?,
    };
    let codes: HashMap<&str, usize> = levels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect();

    let values = labels
        .iter()
        .map(|label| match label {
            None => Ok(None),
            Some(label) => codes.get(label.as_str()).map(|&c| Some(c as f64)).ok_or_else(|| {
                ImputationError::DataValidation(format!(
                    "Observed value '{}' of '{}' is not one of its declared levels",
                    label, spec.name
                ))
            }),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((levels, values))
}

/// Sorted distinct labels; numeric labels sort numerically.
fn infer_levels(spec: &VariableSpec, labels: &[Option<String>]) -> Result<Vec<String>> {
    let distinct: BTreeSet<&str> = labels.iter().flatten().map(String::as_str).collect();
    let mut levels: Vec<String> = distinct.into_iter().map(str::to_string).collect();

    let numeric: Option<Vec<f64>> = levels.iter().map(|l| l.parse::<f64>().ok()).collect();
    if let Some(keys) = numeric {
        let mut paired: Vec<(f64, String)> = keys.into_iter().zip(levels).collect();
        paired.sort_by(|a, b| a.0.total_cmp(&b.0));
        levels = paired.into_iter().map(|(_, l)| l).collect();
    }

    if spec.var_type == VariableType::Binary && levels.len() > 2 {
        return Err(ImputationError::DataValidation(format!(
            "Binary variable '{}' has {} distinct values",
            spec.name,
            levels.len()
        )));
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::passive::PassiveFormula;
    use pretty_assertions::assert_eq;

    fn sample_frame() -> DataFrame {
        df![
            "age" => [Some(30.0), Some(-99.0), Some(50.0), None],
            "smoker" => [Some("yes"), Some("no"), Some("NA"), Some("no")],
            "group" => [Some(3i64), Some(1), Some(2), None],
        ]
        .unwrap()
    }

    fn sample_schema() -> Schema {
        Schema::new(vec![
            VariableSpec::continuous("age").with_missing(MissingSentinel::Value(-99.0)),
            VariableSpec::binary("smoker").with_missing(MissingSentinel::Text("NA".to_string())),
            VariableSpec::categorical("group"),
        ])
    }

    // =========================================================================
    // Ingestion Tests
    // =========================================================================

    #[test]
    fn test_from_dataframe_applies_sentinels() {
        let dataset = Dataset::from_dataframe(&sample_frame(), sample_schema()).unwrap();

        assert_eq!(dataset.nrows(), 4);
        assert_eq!(dataset.column(0), &[Some(30.0), None, Some(50.0), None]);
        assert_eq!(dataset.levels(1), &["no".to_string(), "yes".to_string()]);
        assert_eq!(dataset.column(1), &[Some(1.0), Some(0.0), None, Some(0.0)]);
        assert_eq!(
            dataset.levels(2),
            &["1".to_string(), "2".to_string(), "3".to_string()]
        );
        assert_eq!(dataset.column(2), &[Some(2.0), Some(0.0), Some(1.0), None]);
        assert_eq!(dataset.total_missing(), 4);
    }

    #[test]
    fn test_missing_column_is_reported() {
        let schema = Schema::new(vec![VariableSpec::continuous("height")]);
        let err = Dataset::from_dataframe(&sample_frame(), schema).unwrap_err();
        assert_eq!(err.error_code(), "VARIABLE_NOT_FOUND");
    }

    #[test]
    fn test_inconsistent_sentinel_rejected() {
        let schema = Schema::new(vec![
            VariableSpec::continuous("age").with_missing(MissingSentinel::Text("missing".into())),
        ]);
        let err = Dataset::from_dataframe(&sample_frame(), schema).unwrap_err();
        assert_eq!(err.error_code(), "DATA_VALIDATION");
        assert!(err.to_string().contains("sentinel"));
    }

    #[test]
    fn test_undeclared_level_rejected() {
        let schema = Schema::new(vec![
            VariableSpec::binary("smoker")
                .with_levels(["no", "yes"])
                .with_missing(MissingSentinel::Null),
        ]);
        let err = Dataset::from_dataframe(&sample_frame(), schema).unwrap_err();
        assert!(err.to_string().contains("'NA'"));
    }

    #[test]
    fn test_binary_with_three_values_rejected() {
        let df = df!["b" => ["x", "y", "z"]].unwrap();
        let schema = Schema::new(vec![VariableSpec::binary("b")]);
        assert!(Dataset::from_dataframe(&df, schema).is_err());
    }

    #[test]
    fn test_passive_derived_at_ingestion() {
        let df = df![
            "wgt" => [Some(80.0), None, Some(50.0)],
            "hgt" => [Some(2.0), Some(1.8), Some(1.0)],
        ]
        .unwrap();
        let schema = Schema::new(vec![
            VariableSpec::continuous("wgt"),
            VariableSpec::continuous("hgt"),
            VariableSpec::passive(
                "bmi",
                VariableType::Continuous,
                PassiveFormula::div(
                    PassiveFormula::var("wgt"),
                    PassiveFormula::pow(PassiveFormula::var("hgt"), 2.0),
                ),
            ),
        ]);

        let dataset = Dataset::from_dataframe(&df, schema).unwrap();
        assert_eq!(dataset.column(2), &[Some(20.0), None, Some(50.0)]);
    }

    #[test]
    fn test_passive_failure_names_case() {
        let df = df!["x" => [1.0, 0.0]].unwrap();
        let schema = Schema::new(vec![
            VariableSpec::continuous("x"),
            VariableSpec::passive(
                "inv",
                VariableType::Continuous,
                PassiveFormula::div(PassiveFormula::constant(1.0), PassiveFormula::var("x")),
            ),
        ]);
        let err = Dataset::from_dataframe(&df, schema).unwrap_err();
        assert!(matches!(
            err,
            ImputationError::PassiveFormula { case: 1, .. }
        ));
    }

    #[test]
    fn test_recompute_passive_is_idempotent() {
        let df = df![
            "wgt" => [Some(80.3), None, Some(51.7)],
            "hgt" => [Some(1.93), Some(1.71), Some(1.07)],
        ]
        .unwrap();
        let schema = Schema::new(vec![
            VariableSpec::continuous("wgt"),
            VariableSpec::continuous("hgt"),
            VariableSpec::passive(
                "log_bmi",
                VariableType::Continuous,
                PassiveFormula::log(PassiveFormula::div(
                    PassiveFormula::var("wgt"),
                    PassiveFormula::pow(PassiveFormula::var("hgt"), 2.0),
                )),
            ),
        ]);
        let mut dataset = Dataset::from_dataframe(&df, schema).unwrap();
        dataset.set(0, 1, Some(66.6));

        let bits = |ds: &Dataset| -> Vec<Option<u64>> {
            ds.column(2).iter().map(|v| v.map(f64::to_bits)).collect()
        };

        let mut once = dataset.clone();
        once.recompute_passive(2).unwrap();
        let mut twice = once.clone();
        twice.recompute_passive(2).unwrap();

        assert_eq!(bits(&once), bits(&twice));
        assert!(once.column(2).iter().all(Option::is_some));

        let mut fresh = dataset.clone();
        fresh.recompute_passive(2).unwrap();
        assert_eq!(bits(&fresh), bits(&once));
    }

    // =========================================================================
    // Construction and Export Tests
    // =========================================================================

    #[test]
    fn test_new_from_codes() {
        let schema = Schema::new(vec![
            VariableSpec::continuous("x"),
            VariableSpec::binary("b"),
        ]);
        let dataset = Dataset::new(
            schema,
            vec![vec![Some(1.0), None], vec![Some(0.0), Some(1.0)]],
        )
        .unwrap();
        assert_eq!(dataset.levels(1), &["0".to_string(), "1".to_string()]);
        assert_eq!(dataset.missing_rows(0), vec![1]);
        assert_eq!(dataset.case_ids(), &["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_new_rejects_bad_codes() {
        let schema = Schema::new(vec![VariableSpec::binary("b")]);
        assert!(Dataset::new(schema.clone(), vec![vec![Some(0.5)]]).is_err());
        assert!(Dataset::new(schema, vec![vec![Some(2.0)]]).is_err());
    }

    #[test]
    fn test_to_dataframe_uses_labels() {
        let dataset = Dataset::from_dataframe(&sample_frame(), sample_schema()).unwrap();
        let df = dataset.to_dataframe().unwrap();

        assert_eq!(df.width(), 3);
        let smoker = df.column("smoker").unwrap().as_materialized_series().str().unwrap().clone();
        assert_eq!(smoker.get(0), Some("yes"));
        assert_eq!(smoker.get(2), None);
        let age = df.column("age").unwrap().as_materialized_series().f64().unwrap().clone();
        assert_eq!(age.get(1), None);
    }

    #[test]
    fn test_case_ids_must_be_unique() {
        let dataset = Dataset::from_dataframe(&sample_frame(), sample_schema()).unwrap();
        let ids = vec!["a".into(), "b".into(), "b".into(), "c".into()];
        assert!(dataset.clone().with_case_ids(ids).is_err());
        let ids = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        assert_eq!(dataset.with_case_ids(ids).unwrap().case_ids()[3], "d");
    }
}
