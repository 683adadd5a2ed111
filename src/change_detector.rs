//! Two-sample z-test on segment means, used as a per-series spend diagnostic.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::config::DEFAULT_CHANGE_ALPHA;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeVerdict {
    Changed,
    Unchanged,
    Indeterminate,
}

impl ChangeVerdict {
    pub fn is_changed(self) -> bool {
        matches!(self, Self::Changed)
    }
}

pub fn has_spend_changed(before: &[f64], after: &[f64]) -> ChangeVerdict {
    has_spend_changed_at(before, after, DEFAULT_CHANGE_ALPHA)
}

// Rejects equal means when the CDF of N(mean_before - mean_after, se_pooled)
// at zero falls outside [alpha, 1 - alpha].
pub fn has_spend_changed_at(before: &[f64], after: &[f64], alpha: f64) -> ChangeVerdict {
    let (Some((mean_before, se_before)), Some((mean_after, se_after))) =
        (mean_and_standard_error(before), mean_and_standard_error(after))
    else {
        return ChangeVerdict::Indeterminate;
    };

    let pooled = (se_before * se_before + se_after * se_after).sqrt();
    let Ok(diff) = Normal::new(mean_before - mean_after, pooled) else {
        return ChangeVerdict::Indeterminate;
    };

    let zero_cdf = diff.cdf(0.0);
    if !zero_cdf.is_finite() {
        return ChangeVerdict::Indeterminate;
    }
    if zero_cdf < alpha || zero_cdf > 1.0 - alpha {
        ChangeVerdict::Changed
    } else {
        ChangeVerdict::Unchanged
    }
}

// Population standard deviation (divisor n).
fn mean_and_standard_error(sample: &[f64]) -> Option<(f64, f64)> {
    if sample.len() < 2 {
        return None;
    }
    let n = sample.len() as f64;
    let mean = sample.iter().sum::<f64>() / n;
    let variance = sample
        .iter()
        .map(|v| {
            let d = *v - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let se = variance.sqrt() / n.sqrt();
    if mean.is_finite() && se.is_finite() {
        Some((mean, se))
    } else {
        None
    }
}
