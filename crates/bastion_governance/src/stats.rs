//! Portfolio statistics.
//!
//! Series are aligned at their most recent sample: the last element of every
//! series refers to the same period.

use std::collections::BTreeMap;

/// Pearson correlation of two equal-length series.
///
/// Returns `None` for fewer than two samples, mismatched lengths, non-finite
/// input, or zero variance in either series.
#[must_use]
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    if a.iter().chain(b).any(|v| !v.is_finite()) {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

/// Correlation over the trailing `window` aligned samples.
///
/// Returns `None` when either series is shorter than the window.
#[must_use]
pub fn rolling_correlation(a: &[f64], b: &[f64], window: usize) -> Option<f64> {
    if window < 2 || a.len() < window || b.len() < window {
        return None;
    }
    pearson(&a[a.len() - window..], &b[b.len() - window..])
}

/// Weighted average of several series, aligned at the most recent sample.
///
/// The result is as long as the shortest input. Weights are normalised; if
/// they sum to zero every series counts equally.
#[must_use]
pub fn aggregate_signal(series: &[(f64, &[f64])]) -> Vec<f64> {
    let Some(len) = series.iter().map(|(_, s)| s.len()).min() else {
        return Vec::new();
    };
    let total: f64 = series.iter().map(|(w, _)| w.max(0.0)).sum();
    let weight = |w: f64| {
        if total > 0.0 {
            w.max(0.0) / total
        } else {
            1.0 / series.len() as f64
        }
    };

    let mut out = vec![0.0; len];
    for (w, s) in series {
        let w = weight(*w);
        let tail = &s[s.len() - len..];
        for (acc, v) in out.iter_mut().zip(tail) {
            *acc += w * v;
        }
    }
    out
}

/// Herfindahl-Hirschman index of bucket weights: the sum of squared shares.
///
/// 1.0 means everything sits in one bucket; an empty or zero-weight
/// portfolio has index 0.
#[must_use]
pub fn herfindahl(weights: &BTreeMap<String, f64>) -> f64 {
    let total: f64 = weights.values().map(|w| w.max(0.0)).sum();
    if total <= 0.0 {
        return 0.0;
    }
    weights
        .values()
        .map(|w| {
            let share = w.max(0.0) / total;
            share * share
        })
        .sum()
}

/// Allocation that brings a strategy to the volatility target
#[must_use]
pub fn volatility_target_allocation(target_volatility: f64, volatility: f64) -> Option<f64> {
    (volatility.is_finite() && volatility > 0.0).then(|| target_volatility / volatility)
}
