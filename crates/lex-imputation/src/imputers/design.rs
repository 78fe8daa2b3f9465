//! Design matrices for the conditional models.
//!
//! Column 0 is always the intercept. Continuous and binary predictors take a
//! single column; a categorical predictor with `k` levels takes `k - 1`
//! treatment dummies against its first level.

use crate::data::{Dataset, VariableType};
use ndarray::Array2;

#[derive(Debug, Clone, Copy, PartialEq)]
enum ColumnKind {
    Intercept,
    Value,
    Dummy(usize),
}

#[derive(Debug, Clone)]
struct DesignColumn {
    owner: Option<usize>,
    kind: ColumnKind,
    label: String,
}

/// Column layout of a design matrix over a set of predictor variables.
#[derive(Debug, Clone)]
pub(crate) struct DesignLayout {
    predictors: Vec<usize>,
    columns: Vec<DesignColumn>,
}

impl DesignLayout {
    pub(crate) fn new(dataset: &Dataset, predictors: &[usize]) -> Self {
        let mut columns = vec![DesignColumn {
            owner: None,
            kind: ColumnKind::Intercept,
            label: "(intercept)".to_string(),
        }];

        for &var in predictors {
            let name = dataset.name(var);
            match dataset.var_type(var) {
                VariableType::Continuous | VariableType::Binary => columns.push(DesignColumn {
                    owner: Some(var),
                    kind: ColumnKind::Value,
                    label: name.to_string(),
                }),
                VariableType::Categorical => {
                    for code in 1..dataset.n_levels(var) {
                        columns.push(DesignColumn {
                            owner: Some(var),
                            kind: ColumnKind::Dummy(code),
                            label: format!("{}={}", name, dataset.levels(var)[code]),
                        });
                    }
                }
            }
        }

        Self {
            predictors: predictors.to_vec(),
            columns,
        }
    }

    pub(crate) fn predictors(&self) -> &[usize] {
        &self.predictors
    }

    pub(crate) fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// Predictor variable owning design column `col` (None for the intercept).
    pub(crate) fn owner(&self, col: usize) -> Option<usize> {
        self.columns[col].owner
    }

    pub(crate) fn labels(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.label.clone()).collect()
    }

    /// True when every predictor is currently observed in `row`.
    pub(crate) fn is_complete(&self, dataset: &Dataset, row: usize) -> bool {
        self.predictors.iter().all(|&var| !dataset.is_missing(var, row))
    }

    /// Design row for a record, or None when a predictor is missing.
    pub(crate) fn row(&self, dataset: &Dataset, row: usize) -> Option<Vec<f64>> {
        self.columns
            .iter()
            .map(|column| match (column.kind, column.owner) {
                (ColumnKind::Intercept, _) => Some(1.0),
                (ColumnKind::Value, Some(var)) => dataset.value(var, row),
                (ColumnKind::Dummy(code), Some(var)) => dataset
                    .value(var, row)
                    .map(|v| if v as usize == code { 1.0 } else { 0.0 }),
                _ => None,
            })
            .collect()
    }

    /// Design matrix for `rows`. Rows with a missing predictor are zero
    /// apart from the intercept; callers pass complete rows.
    pub(crate) fn matrix(&self, dataset: &Dataset, rows: &[usize]) -> Array2<f64> {
        let mut x = Array2::zeros((rows.len(), self.ncols()));
        for (i, &row) in rows.iter().enumerate() {
            if let Some(values) = self.row(dataset, row) {
                for (j, v) in values.into_iter().enumerate() {
                    x[[i, j]] = v;
                }
            } else {
                x[[i, 0]] = 1.0;
            }
        }
        x
    }
}

#[derive(Debug, Clone, Copy)]
struct ColumnSummary {
    mean: f64,
    sd: f64,
    min: f64,
    max: f64,
}

fn column_summary(values: &[f64]) -> ColumnSummary {
    let n = values.len().max(1) as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = if values.len() > 1 {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
    } else {
        0.0
    };
    ColumnSummary {
        mean,
        sd: var.sqrt(),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

/// Augmented training data for a categorical response.
#[derive(Debug, Clone)]
pub(crate) struct Augmented {
    pub x: Array2<f64>,
    pub y: Vec<f64>,
    pub weights: Vec<f64>,
}

/// Append `2 * p * k` weighted pseudo-observations to a categorical
/// regression problem.
///
/// For each non-intercept column and each of the `k` response levels, two
/// rows hold every column at its mean except that column, which sits half a
/// standard deviation above and below its mean (clamped to the observed
/// range). The pseudo-rows share a total weight of `p + 1`, so estimates stay
/// finite under complete separation.
pub(crate) fn augment(x: &Array2<f64>, y: &[f64], n_levels: usize) -> Augmented {
    let (n, ncols) = x.dim();
    let p = ncols.saturating_sub(1);
    let nr = if n == 0 { 0 } else { 2 * p * n_levels };

    let summaries: Vec<ColumnSummary> = (0..ncols)
        .map(|j| column_summary(&x.column(j).to_vec()))
        .collect();

    let mut ax = Array2::zeros((n + nr, ncols));
    ax.slice_mut(ndarray::s![..n, ..]).assign(x);
    let mut ay = y.to_vec();
    let mut weights = vec![1.0; n];

    let pseudo_weight = if nr > 0 { (p + 1) as f64 / nr as f64 } else { 0.0 };
    let mut r = n;
    for j in (1..ncols).filter(|_| nr > 0) {
        for level in 0..n_levels {
            for offset in [0.5, -0.5] {
                for (c, summary) in summaries.iter().enumerate() {
                    ax[[r, c]] = summary.mean;
                }
                let s = summaries[j];
                ax[[r, j]] = (s.mean + offset * s.sd).clamp(s.min, s.max);
                ay.push(level as f64);
                weights.push(pseudo_weight);
                r += 1;
            }
        }
    }

    Augmented {
        x: ax,
        y: ay,
        weights,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Schema, VariableSpec};

    fn dataset() -> Dataset {
        let schema = Schema::new(vec![
            VariableSpec::continuous("x"),
            VariableSpec::categorical("c").with_levels(["a", "b", "c"]),
            VariableSpec::binary("b"),
        ]);
        Dataset::new(
            schema,
            vec![
                vec![Some(1.5), None, Some(3.0)],
                vec![Some(0.0), Some(2.0), Some(1.0)],
                vec![Some(1.0), Some(0.0), None],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_layout_expands_categorical_dummies() {
        let ds = dataset();
        let layout = DesignLayout::new(&ds, &[0, 1, 2]);
        assert_eq!(layout.ncols(), 5);
        assert_eq!(
            layout.labels(),
            vec!["(intercept)", "x", "c=b", "c=c", "b"]
        );
        assert_eq!(layout.owner(0), None);
        assert_eq!(layout.owner(3), Some(1));
    }

    #[test]
    fn test_rows_and_completeness() {
        let ds = dataset();
        let layout = DesignLayout::new(&ds, &[0, 1, 2]);
        assert_eq!(layout.row(&ds, 0), Some(vec![1.0, 1.5, 0.0, 0.0, 1.0]));
        assert_eq!(layout.row(&ds, 1), None);
        assert!(!layout.is_complete(&ds, 2));

        let x = layout.matrix(&ds, &[0]);
        assert_eq!(x.shape(), &[1, 5]);
    }

    #[test]
    fn test_augment_adds_weighted_rows() {
        let x = ndarray::array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let y = [0.0, 0.0, 1.0, 1.0];
        let aug = augment(&x, &y, 2);

        // 2 * p * k = 2 * 1 * 2
        assert_eq!(aug.x.nrows(), 8);
        assert_eq!(aug.y[4..], [0.0, 0.0, 1.0, 1.0]);
        let pseudo: f64 = aug.weights[4..].iter().sum();
        assert!((pseudo - 2.0).abs() < 1e-12);
        for r in 4..8 {
            assert_eq!(aug.x[[r, 0]], 1.0);
            assert!(aug.x[[r, 1]] >= 0.0 && aug.x[[r, 1]] <= 3.0);
        }
    }
}
