//! Pairwise response counts.

use serde::{Deserialize, Serialize};

/// Response-pattern counts for every ordered pair of variables.
///
/// All four matrices are indexed `[target][predictor]`:
/// - `rr`: both observed
/// - `rm`: target observed, predictor missing
/// - `mr`: target missing, predictor observed
/// - `mm`: both missing
///
/// For every pair `rr + rm + mr + mm` equals the number of cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairCounts {
    pub names: Vec<String>,
    pub rr: Vec<Vec<usize>>,
    pub rm: Vec<Vec<usize>>,
    pub mr: Vec<Vec<usize>>,
    pub mm: Vec<Vec<usize>>,
}

impl PairCounts {
    /// Count response pairs from per-variable observed masks.
    pub(crate) fn from_masks(names: Vec<String>, observed: &[Vec<bool>]) -> Self {
        let p = observed.len();
        let mut rr = vec![vec![0; p]; p];
        let mut rm = vec![vec![0; p]; p];
        let mut mr = vec![vec![0; p]; p];
        let mut mm = vec![vec![0; p]; p];

        for j in 0..p {
            for k in 0..p {
                for (&oj, &ok) in observed[j].iter().zip(&observed[k]) {
                    match (oj, ok) {
                        (true, true) => rr[j][k] += 1,
                        (true, false) => rm[j][k] += 1,
                        (false, true) => mr[j][k] += 1,
                        (false, false) => mm[j][k] += 1,
                    }
                }
            }
        }

        Self { names, rr, rm, mr, mm }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Proportion of usable cases: among cases where `target` is missing,
    /// the fraction with `predictor` observed. None when `target` is
    /// complete.
    pub fn usable_cases(&self, target: usize, predictor: usize) -> Option<f64> {
        let mr = self.mr[target][predictor];
        let denom = mr + self.mm[target][predictor];
        (denom > 0).then(|| mr as f64 / denom as f64)
    }

    /// Outbound statistic: among cases where `predictor` is observed, the
    /// fraction with `target` missing. None when `predictor` is never
    /// observed. Lower values mean the predictor is less useful for
    /// imputing `target`.
    pub fn outbound(&self, target: usize, predictor: usize) -> Option<f64> {
        let mr = self.mr[target][predictor];
        let denom = mr + self.rr[target][predictor];
        (denom > 0).then(|| mr as f64 / denom as f64)
    }
}
