//! # Shared Utilities
//!
//! Log-space accumulation and weighted sampling helpers used by the forward
//! pass and the traceback.

pub mod workspace;

pub use workspace::Workspace;

use rand::Rng;

use crate::error::{ArgError, Result};

/// Numerically stable `ln(sum(exp(x)))`
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Sample an index proportionally to `exp(log_weights)`.
///
/// Fails when every weight is `-inf` — the caller treats this as a numeric
/// failure of the current column.
pub fn sample_log_weights(rng: &mut impl Rng, log_weights: &[f64]) -> Result<usize> {
    let max = log_weights
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return Err(ArgError::numeric("all sampling weights vanished"));
    }
    let weights: Vec<f64> = log_weights.iter().map(|w| (w - max).exp()).collect();
    Ok(sample_weights(rng, &weights))
}

/// Sample an index proportionally to linear-space weights (assumed to have a
/// positive sum).
pub fn sample_weights(rng: &mut impl Rng, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    let mut threshold = rng.gen::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        threshold -= w;
        if threshold <= 0.0 {
            return i;
        }
    }
    weights.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_log_sum_exp() {
        let v = [0.0f64.ln(), 1.0f64.ln(), 2.0f64.ln(), 3.0f64.ln()];
        assert!((log_sum_exp(&v) - 6.0f64.ln()).abs() < 1e-12);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY; 3]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_sample_log_weights_distribution() {
        let mut rng = StdRng::seed_from_u64(7);
        let lw = [0.1f64.ln(), 0.9f64.ln()];
        let mut counts = [0usize; 2];
        for _ in 0..5000 {
            counts[sample_log_weights(&mut rng, &lw).unwrap()] += 1;
        }
        assert!(counts[1] > counts[0] * 4);
    }

    #[test]
    fn test_sample_all_neg_inf_fails() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(sample_log_weights(&mut rng, &[f64::NEG_INFINITY; 4]).is_err());
    }
}
