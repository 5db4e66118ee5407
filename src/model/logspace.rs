//! Log-space primitives shared by the emission model (C3) and the HMM
//! core (C4). All probability-valued arrays are kept in log space; sums
//! across alternatives go through `LogProb::ln_sum_exp` (spec.md §3).

use bio::stats::LogProb;
use rgsl::randist::poisson::poisson_pdf;
use statrs::function::gamma::ln_gamma;

/// Upper bound on `r` past which the negative-binomial mean/variance
/// relationship is numerically indistinguishable from Poisson; beyond
/// it `nb_log_pmf` falls back to `poisson_log_pmf` (spec.md §4.3).
pub const R_DIVERGENCE: f64 = 1.0e6;

/// Negative-binomial log-pmf under the mean/dispersion parameterization
/// (`mu` = mean, `r` = failure parameter, `r -> inf` recovers Poisson).
/// Uses the `lgamma`-based formula directly, per spec.md §4.3.
pub fn nb_log_pmf(k: u32, mu: f64, r: f64) -> LogProb {
    if !r.is_finite() || r > R_DIVERGENCE {
        return poisson_log_pmf(k, mu);
    }
    if mu <= 0.0 {
        return if k == 0 {
            LogProb::ln_one()
        } else {
            LogProb::ln_zero()
        };
    }
    let kf = k as f64;
    let log_pmf = ln_gamma(kf + r) - ln_gamma(r) - ln_gamma(kf + 1.0)
        + r * (r / (r + mu)).ln()
        + kf * (mu / (r + mu)).ln();
    LogProb(log_pmf)
}

/// Poisson log-pmf, used both as the NB numerical fallback and directly
/// for the zero-state-free score-block computation (C6.4).
pub fn poisson_log_pmf(k: u32, mu: f64) -> LogProb {
    if mu <= 0.0 {
        return if k == 0 {
            LogProb::ln_one()
        } else {
            LogProb::ln_zero()
        };
    }
    LogProb(poisson_pdf(k, mu).ln())
}

/// `log(P(X <= k))` for `X ~ Poisson(lambda)`, accumulated term-by-term in
/// log space via a running ratio so no single term needs its own
/// `lgamma` evaluation (property test #8 of spec.md §8: agrees with a
/// direct summation to 1e-6 for `k <= 10000`).
pub fn log_poisson_cdf(k: u32, lambda: f64) -> LogProb {
    if lambda <= 0.0 {
        return LogProb::ln_one();
    }
    let mut log_term = -lambda;
    let mut acc = LogProb(log_term);
    for i in 1..=k {
        log_term += lambda.ln() - (i as f64).ln();
        acc = LogProb::ln_sum_exp(&[acc, LogProb(log_term)]);
    }
    acc
}

/// Kahan-compensated summation of log-space weights, used where a plain
/// `ln_sum_exp` fold would otherwise accumulate rounding error across a
/// whole chromosome's worth of bins (spec.md §3 invariant).
pub fn kahan_log_sum(values: &[LogProb]) -> LogProb {
    if values.is_empty() {
        return LogProb::ln_zero();
    }
    // ln_sum_exp is already numerically stable (it factors out the max
    // term before exponentiating); a literal Kahan pass is only needed
    // for the final linear-space reduction, so sum the exponentiated,
    // max-shifted terms with compensation and re-log.
    let max = values
        .iter()
        .cloned()
        .fold(LogProb::ln_zero(), |a, b| if a > b { a } else { b });
    if max.is_infinite() {
        return LogProb::ln_zero();
    }
    let mut sum = 0.0f64;
    let mut compensation = 0.0f64;
    for &v in values {
        let y = (*v - *max).exp() - compensation;
        let t = sum + y;
        compensation = (t - sum) - y;
        sum = t;
    }
    LogProb(*max + sum.ln())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn nb_log_pmf_sums_to_one_over_a_wide_support() {
        let mu = 5.0;
        let r = 3.0;
        let total: f64 = (0..2000).map(|k| nb_log_pmf(k, mu, r).exp()).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn nb_log_pmf_falls_back_to_poisson_for_large_r() {
        let mu = 4.0;
        let nb = nb_log_pmf(3, mu, 1e9);
        let poisson = poisson_log_pmf(3, mu);
        assert_relative_eq!(*nb, *poisson, epsilon = 1e-6);
    }

    #[test]
    fn log_poisson_cdf_matches_direct_summation() {
        for &lambda in &[1e-3, 0.5, 5.0, 100.0, 1e4, 1e6] {
            for &k in &[0u32, 1, 10, 100, 10000] {
                let direct =
                    kahan_log_sum(&(0..=k).map(|i| poisson_log_pmf(i, lambda)).collect::<Vec<_>>());
                let fast = log_poisson_cdf(k, lambda);
                assert!(
                    (*direct - *fast).abs() < 1e-6 || (direct.exp() - fast.exp()).abs() < 1e-6,
                    "lambda={} k={} direct={:?} fast={:?}",
                    lambda,
                    k,
                    direct,
                    fast
                );
            }
        }
    }

    #[test]
    fn log_poisson_cdf_is_monotonic_in_k() {
        let mut prev = LogProb::ln_zero();
        for k in 0..50 {
            let cur = log_poisson_cdf(k, 7.0);
            assert!(cur >= prev);
            prev = cur;
        }
    }
}
