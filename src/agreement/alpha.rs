//! Chance-corrected agreement via a pluggable statistics provider.
//!
//! The in-process [`KrippendorffAlpha`] provider builds the coincidence
//! matrix for two values per unit and applies the difference function of the
//! requested measurement level:
//!
//! - nominal: `δ² = 0` if equal, else `1`
//! - ordinal: `δ²(c,k) = (Σ_{g=c..k} n_g − (n_c + n_k)/2)²` over sorted values
//! - interval: `δ² = (c − k)²`
//! - ratio: `δ² = ((c − k)/(c + k))²`
//!
//! `α = 1 − D_o / D_e`. When the expected disagreement `D_e` is zero (every
//! value identical) α is undefined and reported as `None`.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fields::MeasurementLevel;

const DEGENERATE_EPS: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StatisticsError {
    #[error("statistics provider unavailable: {0}")]
    Unavailable(String),
    #[error("statistics provider timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid input for {level:?} alpha: {message}")]
    InvalidInput {
        level: MeasurementLevel,
        message: String,
    },
}

/// Source of Krippendorff's alpha. Implementations may call out of process;
/// `timeout` is passed through unchanged and no retry is implied.
pub trait StatisticsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` means alpha is undefined for this input (e.g. zero variance).
    fn compute_alpha(
        &self,
        pairs: &[(f64, f64)],
        level: MeasurementLevel,
        timeout: Option<Duration>,
    ) -> Result<Option<f64>, StatisticsError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KrippendorffAlpha;

impl StatisticsProvider for KrippendorffAlpha {
    fn name(&self) -> &str {
        "krippendorff_in_process"
    }

    fn compute_alpha(
        &self,
        pairs: &[(f64, f64)],
        level: MeasurementLevel,
        _timeout: Option<Duration>,
    ) -> Result<Option<f64>, StatisticsError> {
        krippendorff_alpha(pairs, level)
    }
}

/// Krippendorff's alpha for two coders without missing values.
pub fn krippendorff_alpha(
    pairs: &[(f64, f64)],
    level: MeasurementLevel,
) -> Result<Option<f64>, StatisticsError> {
    validate(pairs, level)?;
    if pairs.is_empty() {
        return Ok(None);
    }

    // Distinct values, ascending, with their pooled frequencies n_c.
    let mut pooled: Vec<f64> = pairs.iter().flat_map(|&(a, b)| [a, b]).collect();
    pooled.sort_by(f64::total_cmp);
    let mut values: Vec<f64> = Vec::new();
    let mut counts: Vec<f64> = Vec::new();
    for v in pooled {
        match values.last() {
            Some(last) if *last == v => {
                if let Some(count) = counts.last_mut() {
                    *count += 1.0;
                }
            }
            _ => {
                values.push(v);
                counts.push(1.0);
            }
        }
    }
    let n: f64 = counts.iter().sum();
    let index_of = |v: f64| values.binary_search_by(|probe| probe.total_cmp(&v)).unwrap_or(0);

    let delta = |i: usize, j: usize| -> f64 {
        if i == j {
            return 0.0;
        }
        let (c, k) = (values[i], values[j]);
        match level {
            MeasurementLevel::Nominal => 1.0,
            MeasurementLevel::Interval => (c - k).powi(2),
            MeasurementLevel::Ratio => {
                let sum = c + k;
                if sum == 0.0 {
                    0.0
                } else {
                    ((c - k) / sum).powi(2)
                }
            }
            MeasurementLevel::Ordinal => {
                let (lo, hi) = if i < j { (i, j) } else { (j, i) };
                let between: f64 = counts[lo..=hi].iter().sum();
                (between - (counts[lo] + counts[hi]) / 2.0).powi(2)
            }
        }
    };

    // Each unit contributes the ordered pairs (a, b) and (b, a).
    let observed: f64 = pairs
        .iter()
        .map(|&(a, b)| 2.0 * delta(index_of(a), index_of(b)))
        .sum::<f64>()
        / n;

    let mut expected = 0.0;
    for i in 0..values.len() {
        for j in 0..values.len() {
            if i != j {
                expected += counts[i] * counts[j] * delta(i, j);
            }
        }
    }
    expected /= n * (n - 1.0);

    if expected <= DEGENERATE_EPS {
        return Ok(None);
    }
    Ok(Some(1.0 - observed / expected))
}

fn validate(pairs: &[(f64, f64)], level: MeasurementLevel) -> Result<(), StatisticsError> {
    for &(a, b) in pairs {
        if !a.is_finite() || !b.is_finite() {
            return Err(StatisticsError::InvalidInput {
                level,
                message: "values must be finite".to_string(),
            });
        }
        if level == MeasurementLevel::Ratio && (a < 0.0 || b < 0.0) {
            return Err(StatisticsError::InvalidInput {
                level,
                message: "ratio values must be non-negative".to_string(),
            });
        }
    }
    Ok(())
}

// =============================================================================
// Bootstrap interval
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub iterations: usize,
    pub seed: u64,
    /// Two-sided coverage, e.g. 0.95.
    pub confidence: f64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            iterations: 1000,
            seed: 42,
            confidence: 0.95,
        }
    }
}

/// Percentile bootstrap interval for alpha, resampling units with replacement.
/// Resamples with undefined alpha are dropped; `None` if none were defined.
pub fn bootstrap_alpha_interval(
    provider: &dyn StatisticsProvider,
    pairs: &[(f64, f64)],
    level: MeasurementLevel,
    config: &BootstrapConfig,
    timeout: Option<Duration>,
) -> Result<Option<(f64, f64)>, StatisticsError> {
    if pairs.is_empty() || config.iterations == 0 {
        return Ok(None);
    }
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut estimates = Vec::with_capacity(config.iterations);
    let mut sample = Vec::with_capacity(pairs.len());
    for _ in 0..config.iterations {
        sample.clear();
        for _ in 0..pairs.len() {
            sample.push(pairs[rng.gen_range(0..pairs.len())]);
        }
        if let Some(alpha) = provider.compute_alpha(&sample, level, timeout)? {
            estimates.push(alpha);
        }
    }
    if estimates.is_empty() {
        return Ok(None);
    }
    estimates.sort_by(f64::total_cmp);

    let tail = ((1.0 - config.confidence.clamp(0.0, 1.0)) / 2.0).max(0.0);
    let last = estimates.len() - 1;
    let lo = ((tail * last as f64).floor() as usize).min(last);
    let hi = (((1.0 - tail) * last as f64).ceil() as usize).min(last);
    Ok(Some((estimates[lo], estimates[hi])))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9
    }

    fn binary_pairs() -> Vec<(f64, f64)> {
        vec![(1.0, 1.0), (1.0, 0.0), (0.0, 0.0), (1.0, 1.0)]
    }

    #[test]
    fn binary_data_gives_same_alpha_at_every_level() {
        for level in [
            MeasurementLevel::Nominal,
            MeasurementLevel::Ordinal,
            MeasurementLevel::Interval,
            MeasurementLevel::Ratio,
        ] {
            let alpha = krippendorff_alpha(&binary_pairs(), level).unwrap().unwrap();
            assert!(approx_eq(alpha, 8.0 / 15.0), "{level:?}: {alpha}");
        }
    }

    #[test]
    fn perfect_agreement_with_variance_is_one() {
        let pairs = vec![(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)];
        for level in [MeasurementLevel::Nominal, MeasurementLevel::Interval] {
            let alpha = krippendorff_alpha(&pairs, level).unwrap().unwrap();
            assert!(approx_eq(alpha, 1.0));
        }
    }

    #[test]
    fn zero_variance_is_undefined_not_error() {
        let pairs = vec![(0.0, 0.0), (0.0, 0.0)];
        assert_eq!(krippendorff_alpha(&pairs, MeasurementLevel::Nominal).unwrap(), None);
        assert_eq!(krippendorff_alpha(&[], MeasurementLevel::Nominal).unwrap(), None);
    }

    #[test]
    fn alpha_is_symmetric_in_coder_order() {
        let pairs = vec![(1.0, 3.0), (2.0, 2.0), (4.0, 1.0), (3.0, 3.0)];
        let swapped: Vec<_> = pairs.iter().map(|&(a, b)| (b, a)).collect();
        for level in [MeasurementLevel::Ordinal, MeasurementLevel::Interval] {
            let ab = krippendorff_alpha(&pairs, level).unwrap().unwrap();
            let ba = krippendorff_alpha(&swapped, level).unwrap().unwrap();
            assert!(approx_eq(ab, ba));
        }
    }

    #[test]
    fn interval_penalizes_large_gaps_more_than_nominal() {
        let pairs = vec![(1.0, 1.0), (2.0, 2.0), (3.0, 3.0), (1.0, 10.0)];
        let nominal = krippendorff_alpha(&pairs, MeasurementLevel::Nominal).unwrap().unwrap();
        let interval = krippendorff_alpha(&pairs, MeasurementLevel::Interval).unwrap().unwrap();
        assert!(nominal > 0.0);
        assert!(interval < nominal);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(krippendorff_alpha(&[(f64::NAN, 1.0)], MeasurementLevel::Nominal).is_err());
        assert!(krippendorff_alpha(&[(-1.0, 1.0)], MeasurementLevel::Ratio).is_err());
        assert!(krippendorff_alpha(&[(-1.0, 1.0)], MeasurementLevel::Interval).is_ok());
    }

    #[test]
    fn bootstrap_is_seeded_and_brackets_the_estimate() {
        let pairs: Vec<(f64, f64)> = (0..40)
            .map(|i| {
                let v = (i % 4) as f64;
                if i % 7 == 0 {
                    (v, (v + 1.0) % 4.0)
                } else {
                    (v, v)
                }
            })
            .collect();
        let config = BootstrapConfig {
            iterations: 200,
            seed: 7,
            confidence: 0.9,
        };
        let point = krippendorff_alpha(&pairs, MeasurementLevel::Nominal).unwrap().unwrap();
        let first = bootstrap_alpha_interval(&KrippendorffAlpha, &pairs, MeasurementLevel::Nominal, &config, None)
            .unwrap()
            .unwrap();
        let second = bootstrap_alpha_interval(&KrippendorffAlpha, &pairs, MeasurementLevel::Nominal, &config, None)
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
        assert!(first.0 <= point && point <= first.1);
    }
}
