//! Influx and outflux statistics.

use crate::missingness::pairs::PairCounts;
use serde::{Deserialize, Serialize};

/// Connectivity of one variable to the rest of the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxStats {
    pub variable: String,
    /// Proportion of observed cases
    pub pobs: f64,
    /// Share of observed cells (anywhere) that sit in records where this
    /// variable is missing
    pub influx: f64,
    /// Share of missing cells (anywhere) that sit in records where this
    /// variable is observed
    pub outflux: f64,
    /// Average proportion of usable cases over the other variables
    pub ainb: f64,
    /// Average outbound statistic towards the other variables
    pub aout: f64,
    /// Fraction of incomplete cases among cases where this variable is observed
    pub fico: f64,
}

pub(crate) fn compute_flux(pairs: &PairCounts, observed: &[Vec<bool>]) -> Vec<FluxStats> {
    let p = observed.len();
    let n = observed.first().map_or(0, Vec::len);

    let observed_cells: usize = observed.iter().map(|m| m.iter().filter(|&&o| o).count()).sum();
    let missing_cells = n * p - observed_cells;
    let incomplete_case: Vec<bool> = (0..n)
        .map(|i| observed.iter().any(|mask| !mask[i]))
        .collect();

    // Mean over the other p - 1 variables; undefined entries count as zero.
    let average = |values: Vec<Option<f64>>| {
        if p < 2 {
            0.0
        } else {
            values.into_iter().flatten().sum::<f64>() / (p - 1) as f64
        }
    };

    (0..p)
        .map(|j| {
            let n_obs = observed[j].iter().filter(|&&o| o).count();
            let influx_num: usize = pairs.mr[j].iter().sum();
            let outflux_num: usize = pairs.rm[j].iter().sum();
            let fico_num = observed[j]
                .iter()
                .zip(&incomplete_case)
                .filter(|&(&o, &inc)| o && inc)
                .count();

            FluxStats {
                variable: pairs.names[j].clone(),
                pobs: ratio(n_obs, n),
                influx: ratio(influx_num, observed_cells),
                outflux: ratio(outflux_num, missing_cells),
                ainb: average((0..p).filter(|&k| k != j).map(|k| pairs.usable_cases(j, k)).collect()),
                aout: average((0..p).filter(|&k| k != j).map(|k| pairs.outbound(k, j)).collect()),
                fico: ratio(fico_num, n_obs),
            }
        })
        .collect()
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}
