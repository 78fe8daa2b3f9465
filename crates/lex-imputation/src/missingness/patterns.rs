//! Missing-data pattern table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One distinct missingness pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingPattern {
    /// Per variable, true when observed
    pub observed: Vec<bool>,
    /// Number of records with this pattern
    pub count: usize,
    /// Number of variables missing in this pattern
    pub n_missing: usize,
}

impl MissingPattern {
    /// Names of the variables missing in this pattern.
    pub fn missing_variables<'a>(&self, names: &'a [String]) -> Vec<&'a str> {
        self.observed
            .iter()
            .zip(names)
            .filter(|(observed, _)| !**observed)
            .map(|(_, name)| name.as_str())
            .collect()
    }
}

/// Distinct patterns, most frequent first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternTable {
    pub names: Vec<String>,
    pub patterns: Vec<MissingPattern>,
}

impl PatternTable {
    pub(crate) fn from_masks(names: Vec<String>, observed: &[Vec<bool>]) -> Self {
        let n = observed.first().map_or(0, Vec::len);
        let mut counts: BTreeMap<Vec<bool>, usize> = BTreeMap::new();
        for i in 0..n {
            let pattern: Vec<bool> = observed.iter().map(|mask| mask[i]).collect();
            *counts.entry(pattern).or_insert(0) += 1;
        }

        let mut patterns: Vec<MissingPattern> = counts
            .into_iter()
            .map(|(observed, count)| MissingPattern {
                n_missing: observed.iter().filter(|o| !**o).count(),
                observed,
                count,
            })
            .collect();
        // Ties: reverse key order, which lists the complete pattern first.
        patterns.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.observed.cmp(&a.observed))
        });

        Self { names, patterns }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Number of records without any missing value.
    pub fn complete_cases(&self) -> usize {
        self.patterns
            .iter()
            .filter(|p| p.n_missing == 0)
            .map(|p| p.count)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_sorted_by_count() {
        let observed = vec![
            vec![true, true, false, true, false],
            vec![true, false, true, true, true],
        ];
        let table = PatternTable::from_masks(vec!["a".into(), "b".into()], &observed);

        assert_eq!(table.len(), 3);
        assert_eq!(table.patterns[0].observed, vec![true, true]);
        assert_eq!(table.patterns[0].count, 2);
        assert_eq!(table.patterns[1].observed, vec![false, true]);
        assert_eq!(table.patterns[1].count, 2);
        assert_eq!(table.patterns[2].observed, vec![true, false]);
        assert_eq!(table.patterns[2].n_missing, 1);
        assert_eq!(table.complete_cases(), 2);
        assert_eq!(
            table.patterns[1].missing_variables(&table.names),
            vec!["a"]
        );
    }
}
