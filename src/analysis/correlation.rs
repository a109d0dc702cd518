//! Lagged Pearson correlation between series windows.

use crate::analysis::stats::TimeSeries;

/// Fewer aligned points than this yields zero correlation.
pub const MIN_POINTS: usize = 4;
const VAR_FLOOR: f64 = 1e-12;

/// Pearson correlation over the last `min(len)` points of each slice.
///
/// Returns 0.0 when there are fewer than [`MIN_POINTS`] points or either side
/// is flat.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < MIN_POINTS {
        return 0.0;
    }
    let x = &x[x.len() - n..];
    let y = &y[y.len() - n..];

    let mx = TimeSeries::new(x).mean();
    let my = TimeSeries::new(y).mean();
    let vx = TimeSeries::new(x).sum_sq_dev();
    let vy = TimeSeries::new(y).sum_sq_dev();
    if vx <= VAR_FLOOR || vy <= VAR_FLOOR {
        return 0.0;
    }
    let cov: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    cov / (vx * vy).sqrt()
}

/// Windows used for an edge at index `i` with window `k`: the source's
/// trailing values ending at `i-1` and the destination's ending at `i`.
pub fn lagged_windows<'a>(src: &'a [f64], dst: &'a [f64], i: usize, k: usize) -> (&'a [f64], &'a [f64]) {
    let x = &src[i.saturating_sub(k)..i];
    let y = &dst[(i + 1).saturating_sub(k)..=i];
    (x, y)
}
