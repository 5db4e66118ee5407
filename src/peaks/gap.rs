//! Fragmentation gap estimation (C6.2, spec.md §4.6.2): how many unset
//! bins a run of candidate bins may jump across before two runs count as
//! one candidate.

use log::debug;

use crate::peaks::candidates::n_candidates;

/// Upper bound on the gap grid searched below.
const MAX_GAP: usize = 50;

#[derive(Debug, Clone, Copy)]
pub struct GapThresholds {
    pub light: f64,
    pub hard: f64,
    pub speed: f64,
}

impl Default for GapThresholds {
    fn default() -> Self {
        GapThresholds {
            light: 0.9,
            hard: 0.5,
            speed: 0.005,
        }
    }
}

/// `f(g) = n_candidates(s*, g) / n_candidates(s*, 0)`, spec.md §4.6.2.
fn candidate_ratio(ln_p0: &[f64], s_star: f64, n0: usize, gap: usize) -> f64 {
    if n0 == 0 {
        return 0.0;
    }
    n_candidates(ln_p0, s_star, gap) as f64 / n0 as f64
}

/// Estimate the final gap as `min(hard, speed)` if both exist, else
/// whichever exists, else `light` (spec.md §4.6.2).
pub fn estimate_gap(ln_p0: &[f64], s_star: f64, thresholds: GapThresholds) -> usize {
    let n0 = n_candidates(ln_p0, s_star, 0);
    if n0 == 0 {
        return 0;
    }
    let f = |g: usize| candidate_ratio(ln_p0, s_star, n0, g);

    let light = (0..MAX_GAP).find(|&g| f(g) <= thresholds.light);
    let hard = (0..MAX_GAP).find(|&g| f(g) <= thresholds.hard);

    let light_value = light.unwrap_or(0);
    let speed_start = light_value / 2;
    let speed = (speed_start..MAX_GAP.saturating_sub(1)).find(|&g| (f(g + 1) - f(g)).abs() < thresholds.speed);

    let gap = match (hard, speed) {
        (Some(h), Some(sp)) => h.min(sp),
        (Some(h), None) => h,
        (None, Some(sp)) => sp,
        (None, None) => light_value,
    };

    debug!(
        "fragmentation gap estimate: light={:?} hard={:?} speed={:?} -> {}",
        light, hard, speed, gap
    );
    gap
}
