//! Passive derivation rules.
//!
//! A passive variable is recomputed from other variables instead of being
//! modeled. Rules are a closed expression tree so the engine can inspect
//! their inputs (for predictor selection and visit ordering) and evaluate
//! them deterministically.

use serde::{Deserialize, Serialize};

/// Deterministic derivation rule for a passive variable.
///
/// # Example
///
/// ```rust,ignore
/// use lex_imputation::PassiveFormula;
///
/// // bmi = wgt / (hgt / 100)^2
/// let bmi = PassiveFormula::div(
///     PassiveFormula::var("wgt"),
///     PassiveFormula::pow(
///         PassiveFormula::div(PassiveFormula::var("hgt"), PassiveFormula::constant(100.0)),
///         2.0,
///     ),
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PassiveFormula {
    /// Current value of another variable (level code for categorical ones)
    Var { name: String },
    /// Literal constant
    Const { value: f64 },
    Add {
        left: Box<PassiveFormula>,
        right: Box<PassiveFormula>,
    },
    Sub {
        left: Box<PassiveFormula>,
        right: Box<PassiveFormula>,
    },
    Mul {
        left: Box<PassiveFormula>,
        right: Box<PassiveFormula>,
    },
    Div {
        left: Box<PassiveFormula>,
        right: Box<PassiveFormula>,
    },
    Pow {
        base: Box<PassiveFormula>,
        exponent: f64,
    },
    /// Natural logarithm
    Log { arg: Box<PassiveFormula> },
    Exp { arg: Box<PassiveFormula> },
    /// Bucketize into `breaks.len() + 1` right-closed bins; yields the bin
    /// index, which is used as a level code.
    Cut {
        input: Box<PassiveFormula>,
        breaks: Vec<f64>,
    },
}

impl PassiveFormula {
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var { name: name.into() }
    }

    pub fn constant(value: f64) -> Self {
        Self::Const { value }
    }

    pub fn add(left: Self, right: Self) -> Self {
        Self::Add {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn sub(left: Self, right: Self) -> Self {
        Self::Sub {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn mul(left: Self, right: Self) -> Self {
        Self::Mul {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn div(left: Self, right: Self) -> Self {
        Self::Div {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn pow(base: Self, exponent: f64) -> Self {
        Self::Pow {
            base: Box::new(base),
            exponent,
        }
    }

    pub fn log(arg: Self) -> Self {
        Self::Log { arg: Box::new(arg) }
    }

    pub fn exp(arg: Self) -> Self {
        Self::Exp { arg: Box::new(arg) }
    }

    pub fn cut(input: Self, breaks: Vec<f64>) -> Self {
        Self::Cut {
            input: Box::new(input),
            breaks,
        }
    }

    /// Distinct input variable names, in order of first appearance.
    pub fn inputs(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_inputs(&mut names);
        names
    }

    fn collect_inputs<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Var { name } => {
                if !names.contains(&name.as_str()) {
                    names.push(name.as_str());
                }
            }
            Self::Const { .. } => {}
            Self::Add { left, right }
            | Self::Sub { left, right }
            | Self::Mul { left, right }
            | Self::Div { left, right } => {
                left.collect_inputs(names);
                right.collect_inputs(names);
            }
            Self::Pow { base, .. } => base.collect_inputs(names),
            Self::Log { arg } | Self::Exp { arg } => arg.collect_inputs(names),
            Self::Cut { input, .. } => input.collect_inputs(names),
        }
    }

    /// Number of levels produced when the outermost node is a `cut`.
    pub fn level_count(&self) -> Option<usize> {
        match self {
            Self::Cut { breaks, .. } => Some(breaks.len() + 1),
            _ => None,
        }
    }

    /// Default labels for a top-level `cut`: `<=b0`, `(b0,b1]`, ..., `>bk`.
    pub fn cut_labels(&self) -> Option<Vec<String>> {
        let Self::Cut { breaks, .. } = self else {
            return None;
        };
        let mut labels = Vec::with_capacity(breaks.len() + 1);
        for (i, b) in breaks.iter().enumerate() {
            if i == 0 {
                labels.push(format!("<={}", b));
            } else {
                labels.push(format!("({},{}]", breaks[i - 1], b));
            }
        }
        if let Some(last) = breaks.last() {
            labels.push(format!(">{}", last));
        }
        Some(labels)
    }

    /// Check constants and break points.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Var { name } if name.is_empty() => Err("empty variable name".to_string()),
            Self::Var { .. } => Ok(()),
            Self::Const { value } if !value.is_finite() => {
                Err(format!("constant {} is not finite", value))
            }
            Self::Const { .. } => Ok(()),
            Self::Add { left, right }
            | Self::Sub { left, right }
            | Self::Mul { left, right }
            | Self::Div { left, right } => {
                left.validate()?;
                right.validate()
            }
            Self::Pow { base, exponent } => {
                if !exponent.is_finite() {
                    return Err(format!("exponent {} is not finite", exponent));
                }
                base.validate()
            }
            Self::Log { arg } | Self::Exp { arg } => arg.validate(),
            Self::Cut { input, breaks } => {
                if breaks.is_empty() {
                    return Err("cut needs at least one break".to_string());
                }
                if breaks.iter().any(|b| !b.is_finite()) {
                    return Err("cut breaks must be finite".to_string());
                }
                if breaks.windows(2).any(|w| w[0] >= w[1]) {
                    return Err("cut breaks must be strictly increasing".to_string());
                }
                input.validate()
            }
        }
    }

    /// Evaluate against the current values of the inputs.
    ///
    /// A missing input gives a missing result. A non-finite result is an
    /// error carrying the reason.
    pub fn evaluate<F>(&self, lookup: &F) -> Result<Option<f64>, String>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let value = match self {
            Self::Var { name } => lookup(name.as_str()),
            Self::Const { value } => Some(*value),
            Self::Add { left, right } => binary(left, right, lookup, |a, b| Ok(a + b))?,
            Self::Sub { left, right } => binary(left, right, lookup, |a, b| Ok(a - b))?,
            Self::Mul { left, right } => binary(left, right, lookup, |a, b| Ok(a * b))?,
            Self::Div { left, right } => binary(left, right, lookup, |a, b| {
                if b == 0.0 {
                    Err("division by zero".to_string())
                } else {
                    Ok(a / b)
                }
            })?,
            Self::Pow { base, exponent } => base.evaluate(lookup)?.map(|b| b.powf(*exponent)),
            Self::Log { arg } => match arg.evaluate(lookup)? {
                Some(a) if a <= 0.0 => return Err(format!("log of non-positive value {}", a)),
                other => other.map(f64::ln),
            },
            Self::Exp { arg } => arg.evaluate(lookup)?.map(f64::exp),
            Self::Cut { input, breaks } => input
                .evaluate(lookup)?
                .map(|v| breaks.iter().filter(|b| v > **b).count() as f64),
        };

        match value {
            Some(v) if !v.is_finite() => Err("non-finite result".to_string()),
            other => Ok(other),
        }
    }
}

fn binary<F, Op>(
    left: &PassiveFormula,
    right: &PassiveFormula,
    lookup: &F,
    op: Op,
) -> Result<Option<f64>, String>
where
    F: Fn(&str) -> Option<f64>,
    Op: Fn(f64, f64) -> Result<f64, String>,
{
    match (left.evaluate(lookup)?, right.evaluate(lookup)?) {
        (Some(a), Some(b)) => op(a, b).map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, Option<f64>)]) -> impl Fn(&str) -> Option<f64> {
        let map: HashMap<String, Option<f64>> =
            pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        move |name: &str| map.get(name).copied().flatten()
    }

    fn bmi() -> PassiveFormula {
        PassiveFormula::div(
            PassiveFormula::var("wgt"),
            PassiveFormula::pow(
                PassiveFormula::div(PassiveFormula::var("hgt"), PassiveFormula::constant(100.0)),
                2.0,
            ),
        )
    }

    #[test]
    fn test_inputs_are_distinct_and_ordered() {
        let f = PassiveFormula::add(
            PassiveFormula::mul(PassiveFormula::var("a"), PassiveFormula::var("b")),
            PassiveFormula::var("a"),
        );
        assert_eq!(f.inputs(), vec!["a", "b"]);
        assert_eq!(bmi().inputs(), vec!["wgt", "hgt"]);
    }

    #[test]
    fn test_evaluate_arithmetic() {
        let lookup = lookup_from(&[("wgt", Some(80.0)), ("hgt", Some(200.0))]);
        let value = bmi().evaluate(&lookup).unwrap().unwrap();
        assert!((value - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_input_gives_missing() {
        let lookup = lookup_from(&[("wgt", None), ("hgt", Some(180.0))]);
        assert_eq!(bmi().evaluate(&lookup).unwrap(), None);
    }

    #[test]
    fn test_division_by_zero_is_error() {
        let lookup = lookup_from(&[("wgt", Some(80.0)), ("hgt", Some(0.0))]);
        let err = bmi().evaluate(&lookup).unwrap_err();
        assert!(err.contains("division by zero"));
    }

    #[test]
    fn test_log_of_non_positive_is_error() {
        let f = PassiveFormula::log(PassiveFormula::var("x"));
        assert!(f.evaluate(&lookup_from(&[("x", Some(0.0))])).is_err());
        let ok = f.evaluate(&lookup_from(&[("x", Some(1.0))])).unwrap();
        assert_eq!(ok, Some(0.0));
    }

    #[test]
    fn test_cut_is_right_closed() {
        let f = PassiveFormula::cut(PassiveFormula::var("x"), vec![18.5, 25.0]);
        let eval = |x: f64| f.evaluate(&lookup_from(&[("x", Some(x))])).unwrap().unwrap();
        assert_eq!(eval(18.5), 0.0);
        assert_eq!(eval(18.6), 1.0);
        assert_eq!(eval(25.0), 1.0);
        assert_eq!(eval(30.0), 2.0);
        assert_eq!(f.level_count(), Some(3));
        assert_eq!(
            f.cut_labels().unwrap(),
            vec!["<=18.5".to_string(), "(18.5,25]".to_string(), ">25".to_string()]
        );
    }

    #[test]
    fn test_validate_rejects_unsorted_breaks() {
        let f = PassiveFormula::cut(PassiveFormula::var("x"), vec![3.0, 1.0]);
        assert!(f.validate().is_err());
        assert!(PassiveFormula::constant(f64::NAN).validate().is_err());
        assert!(bmi().validate().is_ok());
    }

    #[test]
    fn test_formula_json_round_trip() {
        let json = r#"{"op":"cut","input":{"op":"var","name":"age"},"breaks":[40.0,60.0]}"#;
        let f: PassiveFormula = serde_json::from_str(json).unwrap();
        assert_eq!(f.inputs(), vec!["age"]);
        assert_eq!(f.level_count(), Some(3));
    }
}
