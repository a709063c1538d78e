//! Numeric features for RFM scoring.
//!
//! Provides pure functions used by the segmentation engine:
//! - Quantile edges (linear interpolation between order statistics)
//! - Right-closed binning against computed or fixed edges
//! - First-occurrence ranking for tie breaking
//! - Whole-day elapsed time

use chrono::NaiveDateTime;
use std::cmp::Ordering;

/// Probabilities of the quartile edges, including both extremes.
pub const QUARTILES: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];

const SECONDS_PER_DAY: i64 = 86_400;

/// Quantile of an ascending slice using linear interpolation.
///
/// With `h = (n - 1) * p`, the result is `x[lo] + (h - lo) * (x[lo + 1] - x[lo])`.
/// Returns `None` for an empty slice or `p` outside `[0, 1]`.
pub fn quantile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&p) {
        return None;
    }

    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let frac = h - lo as f64;

    match sorted.get(lo + 1) {
        Some(&next) if frac > 0.0 => Some(sorted[lo] + frac * (next - sorted[lo])),
        _ => Some(sorted[lo]),
    }
}

/// Quartile edges (min, q1, median, q3, max) of unsorted values.
pub fn quantile_edges(values: &[f64]) -> Option<[f64; 5]> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut edges = [0.0; 5];
    for (edge, &p) in edges.iter_mut().zip(QUARTILES.iter()) {
        *edge = quantile(&sorted, p)?;
    }
    Some(edges)
}

/// Check that edges are strictly increasing.
pub fn edges_are_unique(edges: &[f64]) -> bool {
    edges.windows(2).all(|w| w[0] < w[1])
}

/// Index of the bucket holding `value`.
///
/// Buckets are `[e0, e1], (e1, e2], ..., (e(n-1), en]`. Returns `None` when the
/// value falls outside the edges or fewer than two edges are given.
pub fn bucket_index(value: f64, edges: &[f64]) -> Option<usize> {
    if edges.len() < 2 || value < edges[0] {
        return None;
    }

    edges[1..].iter().position(|&upper| value <= upper)
}

/// Bucket of a count against fixed upper bounds.
///
/// Buckets are `(0, b0], (b0, b1], ..., (b_last, inf)`; zero belongs to none.
pub fn fixed_bucket(value: u32, upper_bounds: &[u32]) -> Option<usize> {
    if value == 0 {
        return None;
    }

    Some(
        upper_bounds
            .iter()
            .position(|&upper| value <= upper)
            .unwrap_or(upper_bounds.len()),
    )
}

/// 1-based ranks where ties are ranked by position of first occurrence.
pub fn rank_first(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| match values[a].total_cmp(&values[b]) {
        Ordering::Equal => a.cmp(&b),
        other => other,
    });

    let mut ranks = vec![0.0; values.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        ranks[idx] = (rank + 1) as f64;
    }
    ranks
}

/// Whole days from `latest` to `reference`, floored.
///
/// A `latest` one second after `reference` yields -1.
pub fn elapsed_days(reference: NaiveDateTime, latest: NaiveDateTime) -> i64 {
    (reference - latest).num_seconds().div_euclid(SECONDS_PER_DAY)
}
