//! Missingness report for a dataset.

use crate::data::Dataset;
use crate::missingness::flux::{FluxStats, compute_flux};
use crate::missingness::pairs::PairCounts;
use crate::missingness::patterns::PatternTable;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Missing count and proportion for one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableMissingness {
    pub variable: String,
    pub missing_count: usize,
    pub missing_proportion: f64,
}

/// Everything the analyzer derives from a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingnessReport {
    pub n_cases: usize,
    pub n_variables: usize,
    pub variables: Vec<VariableMissingness>,
    /// Per case, number of missing variables
    pub case_missing_counts: Vec<usize>,
    /// Per case, proportion of missing variables
    pub case_missing_proportions: Vec<f64>,
    /// Share of missing cells over all cells
    pub proportion_missing_cells: f64,
    /// Share of variables with at least one missing value
    pub proportion_incomplete_variables: f64,
    /// Share of cases with at least one missing value
    pub proportion_incomplete_cases: f64,
    pub pairs: PairCounts,
    pub flux: Vec<FluxStats>,
    pub patterns: PatternTable,
}

impl MissingnessReport {
    /// Variables sorted by descending missing count.
    pub fn most_missing(&self) -> Vec<&VariableMissingness> {
        let mut sorted: Vec<&VariableMissingness> = self.variables.iter().collect();
        sorted.sort_by(|a, b| b.missing_count.cmp(&a.missing_count));
        sorted
    }

    pub fn flux_of(&self, variable: &str) -> Option<&FluxStats> {
        self.flux.iter().find(|f| f.variable == variable)
    }
}

/// Computes missingness statistics. A pure function of the dataset.
pub struct MissingnessAnalyzer;

impl MissingnessAnalyzer {
    pub fn analyze(dataset: &Dataset) -> MissingnessReport {
        let n = dataset.nrows();
        let p = dataset.ncols();
        let names: Vec<String> = dataset.names().into_iter().map(str::to_string).collect();

        let observed: Vec<Vec<bool>> = (0..p)
            .map(|var| dataset.column(var).iter().map(Option::is_some).collect())
            .collect();

        let variables: Vec<VariableMissingness> = (0..p)
            .map(|var| {
                let missing_count = dataset.missing_count(var);
                VariableMissingness {
                    variable: names[var].clone(),
                    missing_count,
                    missing_proportion: proportion(missing_count, n),
                }
            })
            .collect();

        let case_missing_counts: Vec<usize> = (0..n)
            .map(|i| observed.iter().filter(|mask| !mask[i]).count())
            .collect();
        let case_missing_proportions = case_missing_counts
            .iter()
            .map(|&count| proportion(count, p))
            .collect();

        let total_missing: usize = variables.iter().map(|v| v.missing_count).sum();
        let incomplete_variables = variables.iter().filter(|v| v.missing_count > 0).count();
        let incomplete_cases = case_missing_counts.iter().filter(|&&c| c > 0).count();

        let pairs = PairCounts::from_masks(names.clone(), &observed);
        let flux = compute_flux(&pairs, &observed);
        let patterns = PatternTable::from_masks(names, &observed);

        debug!(
            "Missingness: {} of {} cells missing, {} patterns",
            total_missing,
            n * p,
            patterns.len()
        );

        MissingnessReport {
            n_cases: n,
            n_variables: p,
            variables,
            case_missing_counts,
            case_missing_proportions,
            proportion_missing_cells: proportion(total_missing, n * p),
            proportion_incomplete_variables: proportion(incomplete_variables, p),
            proportion_incomplete_cases: proportion(incomplete_cases, n),
            pairs,
            flux,
            patterns,
        }
    }
}

fn proportion(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Schema, VariableSpec};

    fn dataset(columns: Vec<Vec<Option<f64>>>) -> Dataset {
        let schema = Schema::new(
            (0..columns.len())
                .map(|i| VariableSpec::continuous(format!("v{}", i)))
                .collect(),
        );
        Dataset::new(schema, columns).unwrap()
    }

    #[test]
    fn test_proportions() {
        let ds = dataset(vec![
            vec![Some(1.0), None, Some(3.0), None],
            vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)],
        ]);
        let report = MissingnessAnalyzer::analyze(&ds);

        assert_eq!(report.variables[0].missing_count, 2);
        assert_eq!(report.variables[0].missing_proportion, 0.5);
        assert_eq!(report.case_missing_counts, vec![0, 1, 0, 1]);
        assert_eq!(report.case_missing_proportions[1], 0.5);
        assert_eq!(report.proportion_missing_cells, 0.25);
        assert_eq!(report.proportion_incomplete_variables, 0.5);
        assert_eq!(report.proportion_incomplete_cases, 0.5);
        assert_eq!(report.most_missing()[0].variable, "v0");
    }

    #[test]
    fn test_usable_cases_scenario() {
        // target missing in 4 of 10 records, predictor observed in 3 of those
        let target = (0..10).map(|i| (i >= 4).then_some(i as f64)).collect();
        let predictor = (0..10).map(|i| (i != 0).then_some(i as f64)).collect();
        let report = MissingnessAnalyzer::analyze(&dataset(vec![target, predictor]));

        assert_eq!(report.pairs.usable_cases(0, 1), Some(0.75));
    }

    #[test]
    fn test_empty_dataset() {
        let report = MissingnessAnalyzer::analyze(&dataset(vec![Vec::new()]));
        assert_eq!(report.n_cases, 0);
        assert_eq!(report.proportion_missing_cells, 0.0);
        assert!(report.patterns.is_empty());
    }

    #[test]
    fn test_zero_variables() {
        let ds = Dataset::new(Schema::new(Vec::new()), Vec::new()).unwrap();
        let report = MissingnessAnalyzer::analyze(&ds);
        assert_eq!(report.n_variables, 0);
        assert_eq!(report.proportion_incomplete_variables, 0.0);
    }
}
