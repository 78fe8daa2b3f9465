//! Draws from a variable's observed marginal distribution.
//!
//! Used to initialize every chain and as the fallback when no predictor
//! survives a failed fit.

use crate::data::Dataset;
use rand::Rng;

#[derive(Debug, Clone)]
pub(crate) struct MarginalSampler {
    values: Vec<f64>,
}

impl MarginalSampler {
    /// Sampler over the observed values of `var`, or None when the variable
    /// has no observed value.
    pub(crate) fn from_observed(dataset: &Dataset, var: usize) -> Option<Self> {
        let values = dataset.observed_values(var);
        (!values.is_empty()).then_some(Self { values })
    }

    pub(crate) fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.values[rng.gen_range(0..self.values.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Schema, VariableSpec};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_marginal_draws_observed_values() {
        let schema = Schema::new(vec![VariableSpec::continuous("x")]);
        let ds = Dataset::new(schema, vec![vec![Some(1.0), None, Some(4.0)]]).unwrap();
        let sampler = MarginalSampler::from_observed(&ds, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..20 {
            let v = sampler.draw(&mut rng);
            assert!(v == 1.0 || v == 4.0);
        }
    }

    #[test]
    fn test_marginal_none_without_observed() {
        let schema = Schema::new(vec![VariableSpec::continuous("x")]);
        let ds = Dataset::new(schema, vec![vec![None, None]]).unwrap();
        assert!(MarginalSampler::from_observed(&ds, 0).is_none());
    }
}
