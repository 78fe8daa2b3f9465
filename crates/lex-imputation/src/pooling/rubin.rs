//! Scalar Rubin's rules.

use crate::error::PoolingError;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Pooled inference for one scalar estimand.
///
/// Built by [`pool_scalar`]; the raw per-imputation estimates and
/// variances are kept alongside the combined quantities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PooledEstimate {
    /// Per-imputation estimates `Q_i`
    pub q: Vec<f64>,
    /// Per-imputation complete-data variances `U_i`
    pub u: Vec<f64>,
    pub m: usize,
    /// Pooled estimate `Qbar`
    pub qbar: f64,
    /// Within-imputation variance `Ubar`
    pub ubar: f64,
    /// Between-imputation variance `B` (0 when `m = 1`)
    pub b: f64,
    /// Total variance `T = Ubar + (1 + 1/m) B`
    pub t: f64,
    /// Relative increase in variance due to nonresponse
    pub riv: f64,
    /// Proportion of total variance due to nonresponse
    pub lambda: f64,
    /// Complete-data degrees of freedom, when supplied
    pub complete_data_df: Option<f64>,
    /// False when `m = 1`: `B` could not be estimated
    pub between_variance_defined: bool,
}

/// Pool `m` (estimate, variance) pairs.
///
/// `complete_data_df` enables the Barnard-Rubin small-sample correction.
pub fn pool_scalar(
    estimates: &[f64],
    variances: &[f64],
    complete_data_df: Option<f64>,
) -> Result<PooledEstimate, PoolingError> {
    if estimates.is_empty() {
        return Err(PoolingError::NoImputations);
    }
    if estimates.len() != variances.len() {
        return Err(PoolingError::LengthMismatch {
            estimates: estimates.len(),
            variances: variances.len(),
        });
    }
    if let Some(index) = estimates.iter().position(|q| !q.is_finite()) {
        return Err(PoolingError::NonFiniteEstimate { index });
    }
    if let Some((index, &value)) = variances
        .iter()
        .enumerate()
        .find(|(_, u)| !u.is_finite() || **u < 0.0)
    {
        return Err(PoolingError::InvalidVariance { index, value });
    }
    if let Some(df) = complete_data_df.filter(|df| !df.is_finite() || *df <= 0.0) {
        return Err(PoolingError::InvalidCompleteDataDf(df));
    }

    let m = estimates.len();
    let mf = m as f64;
    let qbar = estimates.iter().sum::<f64>() / mf;
    let ubar = variances.iter().sum::<f64>() / mf;
    let b = if m > 1 {
        estimates.iter().map(|q| (q - qbar).powi(2)).sum::<f64>() / (mf - 1.0)
    } else {
        0.0
    };
    let inflated_b = (1.0 + 1.0 / mf) * b;
    let t = ubar + inflated_b;

    let riv = if ubar > 0.0 {
        inflated_b / ubar
    } else if inflated_b > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    let lambda = if t > 0.0 { inflated_b / t } else { 0.0 };

    Ok(PooledEstimate {
        q: estimates.to_vec(),
        u: variances.to_vec(),
        m,
        qbar,
        ubar,
        b,
        t,
        riv,
        lambda,
        complete_data_df,
        between_variance_defined: m > 1,
    })
}

impl PooledEstimate {
    /// Standard error `sqrt(T)`.
    pub fn std_error(&self) -> f64 {
        self.t.sqrt()
    }

    /// Large-sample degrees of freedom `(m-1)(1 + 1/r)^2`.
    ///
    /// Infinite when `B = 0`.
    pub fn df_old(&self) -> Result<f64, PoolingError> {
        self.require_between()?;
        if self.b <= 0.0 {
            return Ok(f64::INFINITY);
        }
        let m1 = (self.m - 1) as f64;
        if self.riv.is_infinite() {
            return Ok(m1);
        }
        Ok(m1 * (1.0 + 1.0 / self.riv).powi(2))
    }

    /// Degrees of freedom of the reference t distribution.
    ///
    /// With a complete-data df `v` this is the Barnard-Rubin value, which
    /// never exceeds `v`.
    pub fn degrees_of_freedom(&self) -> Result<f64, PoolingError> {
        let df_old = self.df_old()?;
        let Some(v) = self.complete_data_df else {
            return Ok(df_old);
        };
        let df_obs = (v + 1.0) / (v + 3.0) * v * (1.0 - self.lambda);
        if df_old.is_infinite() {
            return Ok(df_obs);
        }
        if df_old + df_obs <= 0.0 {
            return Ok(0.0);
        }
        Ok(df_old * df_obs / (df_old + df_obs))
    }

    /// Fraction of missing information.
    pub fn fmi(&self) -> Result<f64, PoolingError> {
        let df = self.degrees_of_freedom()?;
        if self.riv.is_infinite() {
            return Ok(1.0);
        }
        Ok((self.riv + 2.0 / (df + 3.0)) / (self.riv + 1.0))
    }

    /// Two-sided interval `Qbar ± t_{df, 1-α/2} sqrt(T)` at `level`.
    pub fn confidence_interval(&self, level: f64) -> Result<(f64, f64), PoolingError> {
        if !(level > 0.0 && level < 1.0) {
            return Err(PoolingError::InvalidConfidenceLevel(level));
        }
        let df = self.degrees_of_freedom()?;
        let quantile = reference_quantile(df, 1.0 - (1.0 - level) / 2.0)?;
        let half_width = quantile * self.std_error();
        Ok((self.qbar - half_width, self.qbar + half_width))
    }

    /// Two-sided p-value for `Qbar = 0` against the reference distribution.
    pub fn p_value(&self) -> Result<f64, PoolingError> {
        let df = self.degrees_of_freedom()?;
        if self.t <= 0.0 {
            return Ok(if self.qbar == 0.0 { 1.0 } else { 0.0 });
        }
        let statistic = (self.qbar / self.std_error()).abs();
        let upper = if df.is_infinite() {
            let normal = Normal::new(0.0, 1.0).map_err(|_| PoolingError::DegenerateDf(df))?;
            1.0 - normal.cdf(statistic)
        } else {
            let dist = students_t(df)?;
            1.0 - dist.cdf(statistic)
        };
        Ok((2.0 * upper).min(1.0))
    }

    fn require_between(&self) -> Result<(), PoolingError> {
        if self.between_variance_defined {
            Ok(())
        } else {
            Err(PoolingError::BetweenVarianceUndefined)
        }
    }
}

fn students_t(df: f64) -> Result<StudentsT, PoolingError> {
    if df.is_nan() || df <= 0.0 {
        return Err(PoolingError::DegenerateDf(df));
    }
    StudentsT::new(0.0, 1.0, df).map_err(|_| PoolingError::DegenerateDf(df))
}

fn reference_quantile(df: f64, p: f64) -> Result<f64, PoolingError> {
    if df.is_infinite() {
        let normal = Normal::new(0.0, 1.0).map_err(|_| PoolingError::DegenerateDf(df))?;
        return Ok(normal.inverse_cdf(p));
    }
    Ok(students_t(df)?.inverse_cdf(p))
}
