//! Negative-binomial emission parameters and the data-driven multi-start
//! guess (C3, spec.md §4.3).

/// Deterministic multi-start schedule: `attempt -> SNR multiplier`.
pub const MULTI_START_SNR: [f64; 5] = [20.0, 40.0, 10.0, 80.0, 5.0];

/// Percentile used to seed `mu_L`, one per multi-start attempt. Diversifies
/// the five legs beyond just the SNR multiplier.
const LOW_PERCENTILE: [f64; 5] = [0.5, 0.4, 0.6, 0.3, 0.7];

/// Floor and ceiling enforced on the initial failure parameter `r`.
pub const R_FLOOR: f64 = 1.0e-3;
pub const R_MIN: f64 = 1.0e-2;
pub const R_MAX: f64 = 1.0e4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NbGuess {
    pub mu_low: f64,
    pub mu_high: f64,
    pub r_low: f64,
    pub r_high: f64,
}

/// Guess-by-data, spec.md §4.3: percentile-based low mean, SNR-scaled
/// high mean (never below the mean of the top `1/n_states` quantile),
/// and a failure parameter from moment matching with a configured floor.
pub fn guess_by_data(counts: &[i32], n_states: usize, attempt: usize) -> NbGuess {
    assert!(!counts.is_empty(), "guess_by_data requires a non-empty sample");
    let mut sorted: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let percentile = LOW_PERCENTILE[attempt % LOW_PERCENTILE.len()];
    let snr = MULTI_START_SNR[attempt % MULTI_START_SNR.len()];

    let mu_low = percentile_of(&sorted, percentile).max(0.1);

    let n_states = n_states.max(2);
    let top_quantile_start = ((n_states - 1) as f64 / n_states as f64 * sorted.len() as f64)
        .floor() as usize;
    let top_slice = &sorted[top_quantile_start.min(sorted.len() - 1)..];
    let top_mean = top_slice.iter().sum::<f64>() / top_slice.len() as f64;

    let mu_high = (mu_low * snr).max(top_mean);

    let r_low = moment_matched_r(&sorted, mu_low);
    let r_high = moment_matched_r(&sorted, mu_high);

    NbGuess {
        mu_low,
        mu_high,
        r_low,
        r_high,
    }
}

fn percentile_of(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// `r = max(mu·(mu/sigma² − 1)⁻¹, floor)` clamped to `[R_MIN, R_MAX]`.
fn moment_matched_r(sample: &[f64], mu: f64) -> f64 {
    let n = sample.len() as f64;
    let mean = sample.iter().sum::<f64>() / n;
    let var = sample.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n.max(1.0);

    if var <= mu || mu <= 0.0 {
        // Under-dispersed (or degenerate) sample: fall back to the floor,
        // letting the Poisson fallback in `nb_log_pmf` take over upstream.
        return R_MIN;
    }
    let r = mu / (mu / var - 1.0).max(f64::EPSILON);
    r.max(R_FLOOR).clamp(R_MIN, R_MAX)
}

/// Golden-section search for the `r` maximizing the gamma-weighted NB
/// log-likelihood of `(observation, weight)` pairs at a fixed `mu`.
/// Shared by the free HMM (C4) and the constrained multi-replicate HMM so
/// the two M-steps agree on how `r` is re-estimated.
pub fn golden_section_maximize_r(pairs: &[(i32, f64)], mu: f64, current_r: f64) -> f64 {
    use crate::model::logspace::nb_log_pmf;

    let objective = |log_r: f64| -> f64 {
        let r = log_r.exp();
        pairs
            .iter()
            .map(|&(o, w)| w * *nb_log_pmf(o.max(0) as u32, mu, r))
            .sum()
    };

    let mut lo = (current_r.max(R_MIN) * 0.01).ln();
    let mut hi = (current_r.max(R_MIN) * 100.0).min(R_MAX).ln();
    if lo >= hi {
        return current_r.clamp(R_MIN, R_MAX);
    }
    let invphi = (5f64.sqrt() - 1.0) / 2.0;
    let mut c = hi - invphi * (hi - lo);
    let mut d = lo + invphi * (hi - lo);
    let mut fc = objective(c);
    let mut fd = objective(d);
    for _ in 0..40 {
        if fc > fd {
            hi = d;
            d = c;
            fd = fc;
            c = hi - invphi * (hi - lo);
            fc = objective(c);
        } else {
            lo = c;
            c = d;
            fc = fd;
            d = lo + invphi * (hi - lo);
            fd = objective(d);
        }
    }
    ((lo + hi) / 2.0).exp().clamp(R_MIN, R_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overdispersed_sample() -> Vec<i32> {
        // Bimodal mixture: background near 2, enrichment near 40.
        let mut v = Vec::new();
        for i in 0..900 {
            v.push(1 + (i % 4));
        }
        for i in 0..100 {
            v.push(35 + (i % 10));
        }
        v
    }

    #[test]
    fn guess_orders_means_correctly() {
        let sample = overdispersed_sample();
        for attempt in 0..5 {
            let guess = guess_by_data(&sample, 3, attempt);
            assert!(guess.mu_low < guess.mu_high, "attempt {}", attempt);
            assert!(guess.r_low > 0.0 && guess.r_high > 0.0);
        }
    }

    #[test]
    fn five_attempts_cover_the_multi_start_table() {
        assert_eq!(MULTI_START_SNR.len(), 5);
        assert_eq!(LOW_PERCENTILE.len(), 5);
    }

    #[test]
    fn r_is_clamped_to_its_bounds() {
        let r = moment_matched_r(&[5.0, 5.0, 5.0, 5.0], 5.0);
        assert!((R_MIN..=R_MAX).contains(&r));
    }
}
