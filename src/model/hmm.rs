//! Free, zero-inflated 3-state HMM (C4, single-condition): Z (Dirac at
//! zero), L and H (negative-binomial, `mu_L <= mu_H`).

use bio::stats::LogProb;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cancellation::CancellationToken;
use crate::model::emission::{self, NbGuess};
use crate::model::logspace::nb_log_pmf;

pub const N_STATES: usize = 3;
pub const ZERO_STATE: usize = 0;
pub const LOW_STATE: usize = 1;
pub const HIGH_STATE: usize = 2;

/// Default signal-to-noise bounds enforced after every fit (spec.md §3),
/// overridable at the CLI via `--hmm-low`/`--hmm-snr`.
pub const SNR_MIN: f64 = 1.5;
pub const SNR_MAX: f64 = 20.0;
/// Multiplicative nudge applied to `mu_H` when the SNR floor/ceiling is
/// violated.
pub const SNR_ADJUST_STEP: f64 = 0.05;

/// The `[min, max]` window `mu_H/mu_L` is pushed into post-EM.
#[derive(Debug, Clone, Copy)]
pub struct SnrBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for SnrBounds {
    fn default() -> Self {
        SnrBounds {
            min: SNR_MIN,
            max: SNR_MAX,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EmConfig {
    pub max_iterations: usize,
    pub convergence_threshold: f64,
}

impl EmConfig {
    pub fn main_fit() -> Self {
        EmConfig {
            max_iterations: 10,
            convergence_threshold: 1e-4,
        }
    }

    pub fn multi_start_leg() -> Self {
        EmConfig {
            max_iterations: 5,
            convergence_threshold: 1e-4,
        }
    }
}

/// Parameters of the free zero-inflated HMM. `mu`/`r` are indexed by
/// `state - 1` (state 0 is the Dirac-zero state and carries no
/// parameters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeNbHmm {
    pub log_pi: Vec<LogProb>,
    pub log_trans: Vec<Vec<LogProb>>,
    pub mu: [f64; 2],
    pub r: [f64; 2],
    pub clamp_up_hit: bool,
    pub clamp_down_hit: bool,
}

impl FreeNbHmm {
    pub fn from_guess(guess: NbGuess) -> Self {
        let log_pi = vec![
            LogProb((1.0f64 / 3.0).ln()),
            LogProb((1.0f64 / 3.0).ln()),
            LogProb((1.0f64 / 3.0).ln()),
        ];
        // Mildly sticky transition matrix: favors staying in state.
        let stay = 0.9f64;
        let leave = (1.0 - stay) / (N_STATES as f64 - 1.0);
        let log_trans = (0..N_STATES)
            .map(|i| {
                (0..N_STATES)
                    .map(|j| LogProb(if i == j { stay.ln() } else { leave.ln() }))
                    .collect()
            })
            .collect();
        FreeNbHmm {
            log_pi,
            log_trans,
            mu: [guess.mu_low, guess.mu_high],
            r: [guess.r_low, guess.r_high],
            clamp_up_hit: false,
            clamp_down_hit: false,
        }
    }

    pub fn emission_log_pmf(&self, state: usize, obs: i32) -> LogProb {
        if state == ZERO_STATE {
            return if obs == 0 {
                LogProb::ln_one()
            } else {
                LogProb::ln_zero()
            };
        }
        nb_log_pmf(obs.max(0) as u32, self.mu[state - 1], self.r[state - 1])
    }

    pub fn snr(&self) -> f64 {
        if self.mu[0] <= 0.0 {
            f64::INFINITY
        } else {
            self.mu[1] / self.mu[0]
        }
    }

    /// Enforce `mu_L <= mu_H` post-fit, permuting `pi`, `A`, and the
    /// emission table together if a swap is needed (spec.md §9).
    pub fn reorder_states(&mut self) {
        if self.mu[0] <= self.mu[1] {
            return;
        }
        self.mu.swap(0, 1);
        self.r.swap(0, 1);
        self.log_pi.swap(LOW_STATE, HIGH_STATE);
        for row in self.log_trans.iter_mut() {
            row.swap(LOW_STATE, HIGH_STATE);
        }
        self.log_trans.swap(LOW_STATE, HIGH_STATE);
    }

    /// Push `mu_H` outward until `bounds.min <= mu_H/mu_L <= bounds.max`,
    /// flagging whichever bound was hit (spec.md §3).
    pub fn clamp_snr(&mut self, bounds: SnrBounds) {
        let mut snr = self.snr();
        let mut iterations = 0;
        while snr < bounds.min && iterations < 10_000 {
            self.mu[1] *= 1.0 + SNR_ADJUST_STEP;
            self.clamp_up_hit = true;
            snr = self.snr();
            iterations += 1;
        }
        iterations = 0;
        while snr > bounds.max && iterations < 10_000 {
            self.mu[1] *= 1.0 - SNR_ADJUST_STEP;
            self.clamp_down_hit = true;
            snr = self.snr();
            iterations += 1;
        }
    }

    pub fn out_of_snr_range(&self) -> bool {
        self.clamp_up_hit || self.clamp_down_hit
    }
}

#[derive(Debug, Clone)]
pub struct FitResult {
    pub model: FreeNbHmm,
    pub log_likelihood: f64,
    pub iterations: usize,
    pub cancelled: bool,
}

fn logsumexp(values: impl Iterator<Item = LogProb>) -> LogProb {
    let collected: Vec<LogProb> = values.collect();
    LogProb::ln_sum_exp(&collected)
}

/// One forward-backward-plus-M-step sweep. Returns the updated model and
/// the data log-likelihood under the *input* model (standard EM
/// convention: likelihood is evaluated before the parameters it labels
/// are replaced).
fn baum_welch_iteration(model: &FreeNbHmm, obs: &[i32]) -> (FreeNbHmm, f64) {
    let t_len = obs.len();
    let n = N_STATES;

    // Forward pass.
    let mut alpha = vec![vec![LogProb::ln_zero(); n]; t_len];
    for s in 0..n {
        alpha[0][s] = model.log_pi[s] + model.emission_log_pmf(s, obs[0]);
    }
    for t in 1..t_len {
        for s in 0..n {
            let incoming = (0..n).map(|j| alpha[t - 1][j] + model.log_trans[j][s]);
            alpha[t][s] = model.emission_log_pmf(s, obs[t]) + logsumexp(incoming);
        }
    }
    let log_likelihood = *logsumexp(alpha[t_len - 1].iter().cloned());

    // Backward pass.
    let mut beta = vec![vec![LogProb::ln_one(); n]; t_len];
    for t in (0..t_len - 1).rev() {
        for s in 0..n {
            let outgoing = (0..n).map(|j| {
                model.log_trans[s][j] + model.emission_log_pmf(j, obs[t + 1]) + beta[t + 1][j]
            });
            beta[t][s] = logsumexp(outgoing);
        }
    }

    // gamma[t][s] = P(state_t = s | obs)
    let ll = LogProb(log_likelihood);
    let gamma: Vec<Vec<LogProb>> = (0..t_len)
        .map(|t| (0..n).map(|s| alpha[t][s] + beta[t][s] - ll).collect())
        .collect();

    // M-step: pi.
    let new_log_pi = gamma[0].clone();

    // M-step: transition matrix from normalized sum of xi.
    let mut new_log_trans = vec![vec![LogProb::ln_zero(); n]; n];
    for i in 0..n {
        let denom = logsumexp((0..t_len - 1).map(|t| gamma[t][i]));
        for j in 0..n {
            let numer = logsumexp((0..t_len - 1).map(|t| {
                alpha[t][i] + model.log_trans[i][j] + model.emission_log_pmf(j, obs[t + 1])
                    + beta[t + 1][j]
                    - ll
            }));
            new_log_trans[i][j] = if denom.is_infinite() {
                LogProb(-(n as f64).ln())
            } else {
                numer - denom
            };
        }
    }

    // M-step: emission parameters for the two NB states, closed-form mu,
    // 1-D search for r.
    let mut mu = model.mu;
    let mut r = model.r;
    for state in [LOW_STATE, HIGH_STATE] {
        let idx = state - 1;
        let weights: Vec<f64> = (0..t_len).map(|t| gamma[t][state].exp()).collect();
        let weight_sum: f64 = weights.iter().sum();
        if weight_sum > 1e-9 {
            let weighted_mean: f64 = weights
                .iter()
                .zip(obs.iter())
                .map(|(&w, &o)| w * o as f64)
                .sum::<f64>()
                / weight_sum;
            mu[idx] = weighted_mean.max(1e-6);
            let pairs: Vec<(i32, f64)> = obs.iter().cloned().zip(weights.iter().cloned()).collect();
            r[idx] = emission::golden_section_maximize_r(&pairs, mu[idx], r[idx]);
        }
    }

    let new_model = FreeNbHmm {
        log_pi: new_log_pi,
        log_trans: new_log_trans,
        mu,
        r,
        clamp_up_hit: model.clamp_up_hit,
        clamp_down_hit: model.clamp_down_hit,
    };

    (new_model, log_likelihood)
}

/// Run Baum-Welch to convergence (or the iteration cap), checking the
/// cancellation token once per iteration (spec.md §4.4 step 5, §5).
pub fn fit(
    initial: FreeNbHmm,
    obs: &[i32],
    config: EmConfig,
    bounds: SnrBounds,
    cancel: &CancellationToken,
) -> FitResult {
    let mut model = initial;
    let mut prev_ll = f64::NEG_INFINITY;
    let mut iterations = 0;
    let mut cancelled = false;

    for i in 0..config.max_iterations {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let (next_model, ll) = baum_welch_iteration(&model, obs);
        iterations = i + 1;
        let relative_change = if prev_ll.is_finite() {
            ((ll - prev_ll) / prev_ll.abs().max(1e-12)).abs()
        } else {
            f64::INFINITY
        };
        model = next_model;
        if !ll.is_finite() {
            warn!("non-finite log-likelihood at iteration {}", i);
            break;
        }
        prev_ll = ll;
        if relative_change < config.convergence_threshold {
            debug!("Baum-Welch converged after {} iterations", iterations);
            break;
        }
    }

    model.reorder_states();
    model.clamp_snr(bounds);

    FitResult {
        model,
        log_likelihood: prev_ll,
        iterations,
        cancelled,
    }
}

/// Multi-start fit: run the five deterministic legs of
/// `emission::MULTI_START_SNR` in parallel, each for a capped number of
/// iterations, then converge the best one under the full cap (spec.md
/// §4.3-§4.4).
pub fn fit_multi_start(
    obs: &[i32],
    n_states_for_guess: usize,
    bounds: SnrBounds,
    cancel: &CancellationToken,
) -> FitResult {
    let leg_config = EmConfig::multi_start_leg();

    let legs: Vec<FitResult> = (0..emission::MULTI_START_SNR.len())
        .into_par_iter()
        .map(|attempt| {
            let guess = emission::guess_by_data(obs, n_states_for_guess, attempt);
            let model = FreeNbHmm::from_guess(guess);
            fit(model, obs, leg_config, bounds, cancel)
        })
        .collect();

    let best = legs
        .into_iter()
        .max_by(|a, b| {
            a.log_likelihood
                .partial_cmp(&b.log_likelihood)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .expect("multi-start schedule is non-empty");

    info!(
        "multi-start winner: log-likelihood = {:.3} after {} warm-up iterations",
        best.log_likelihood, best.iterations
    );

    fit(best.model, obs, EmConfig::main_fit(), bounds, cancel)
}

/// Per-bin log-posterior for every state, given a fitted model and a new
/// observation matrix (spec.md §4.4 "Posterior evaluation"). The caller
/// derives `lnP0` as `logsumexp` over the null states `{Z, L}`.
pub fn posterior_log_membership(model: &FreeNbHmm, obs: &[i32]) -> Vec<Vec<LogProb>> {
    let t_len = obs.len();
    let n = N_STATES;
    if t_len == 0 {
        return Vec::new();
    }

    let mut alpha = vec![vec![LogProb::ln_zero(); n]; t_len];
    for s in 0..n {
        alpha[0][s] = model.log_pi[s] + model.emission_log_pmf(s, obs[0]);
    }
    for t in 1..t_len {
        for s in 0..n {
            let incoming = (0..n).map(|j| alpha[t - 1][j] + model.log_trans[j][s]);
            alpha[t][s] = model.emission_log_pmf(s, obs[t]) + logsumexp(incoming);
        }
    }
    let ll = logsumexp(alpha[t_len - 1].iter().cloned());

    let mut beta = vec![vec![LogProb::ln_one(); n]; t_len];
    for t in (0..t_len - 1).rev() {
        for s in 0..n {
            let outgoing = (0..n).map(|j| {
                model.log_trans[s][j] + model.emission_log_pmf(j, obs[t + 1]) + beta[t + 1][j]
            });
            beta[t][s] = logsumexp(outgoing);
        }
    }

    (0..t_len)
        .map(|t| (0..n).map(|s| alpha[t][s] + beta[t][s] - ll).collect())
        .collect()
}

/// `lnP0[k] = logsumexp` over the null states `{Z, L}` of the per-bin
/// posterior log-membership (spec.md §3).
pub fn log_null_membership(posteriors: &[Vec<LogProb>]) -> Vec<f32> {
    posteriors
        .iter()
        .map(|row| *LogProb::ln_sum_exp(&[row[ZERO_STATE], row[LOW_STATE]]) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_obs() -> Vec<i32> {
        // Background around 2, one enriched block around 30.
        let mut v = vec![2i32; 40];
        v.extend(vec![30i32; 10]);
        v.extend(vec![2i32; 40]);
        v
    }

    #[test]
    fn multi_start_fit_produces_ordered_means() {
        let obs = synthetic_obs();
        let cancel = CancellationToken::new();
        let result = fit_multi_start(&obs, 3, SnrBounds::default(), &cancel);
        assert!(result.model.mu[0] <= result.model.mu[1]);
        assert!(result.log_likelihood.is_finite());
    }

    #[test]
    fn reorder_states_permutes_pi_and_transitions_together() {
        let mut model = FreeNbHmm::from_guess(NbGuess {
            mu_low: 50.0,
            mu_high: 5.0,
            r_low: 2.0,
            r_high: 2.0,
        });
        model.log_pi[LOW_STATE] = LogProb(0.1f64.ln());
        model.log_pi[HIGH_STATE] = LogProb(0.2f64.ln());
        model.reorder_states();
        assert!(model.mu[0] <= model.mu[1]);
        assert_eq!(model.mu[0], 5.0);
        assert_eq!(*model.log_pi[LOW_STATE], 0.2f64.ln());
    }

    #[test]
    fn snr_clamp_pushes_mu_high_into_bounds() {
        let mut model = FreeNbHmm::from_guess(NbGuess {
            mu_low: 10.0,
            mu_high: 11.0,
            r_low: 2.0,
            r_high: 2.0,
        });
        model.clamp_snr(SnrBounds::default());
        assert!(model.snr() >= SNR_MIN - 1e-6);
        assert!(model.clamp_up_hit);
    }

    #[test]
    fn snr_clamp_honors_custom_bounds() {
        let mut model = FreeNbHmm::from_guess(NbGuess {
            mu_low: 10.0,
            mu_high: 15.0,
            r_low: 2.0,
            r_high: 2.0,
        });
        let bounds = SnrBounds { min: 1.0, max: 1.2 };
        model.clamp_snr(bounds);
        assert!(model.snr() <= bounds.max + 1e-6);
        assert!(model.clamp_down_hit);
    }

    #[test]
    fn posterior_rows_sum_to_one_in_linear_space() {
        let obs = synthetic_obs();
        let cancel = CancellationToken::new();
        let result = fit_multi_start(&obs, 3, SnrBounds::default(), &cancel);
        let posteriors = posterior_log_membership(&result.model, &obs);
        for row in &posteriors {
            let total: f64 = row.iter().map(|p| p.exp()).sum();
            assert!((total - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn log_null_membership_is_finite_and_bounded() {
        let obs = synthetic_obs();
        let cancel = CancellationToken::new();
        let result = fit_multi_start(&obs, 3, SnrBounds::default(), &cancel);
        let posteriors = posterior_log_membership(&result.model, &obs);
        let ln_p0 = log_null_membership(&posteriors);
        let total: f64 = ln_p0.iter().map(|&p| (p as f64).exp()).sum();
        assert!(total.is_finite());
        assert!(total >= 0.0 && total <= ln_p0.len() as f64);
    }

    #[test]
    fn cancellation_stops_the_em_loop_early() {
        let obs = synthetic_obs();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let guess = emission::guess_by_data(&obs, 3, 0);
        let model = FreeNbHmm::from_guess(guess);
        let result = fit(model, &obs, EmConfig::main_fit(), SnrBounds::default(), &cancel);
        assert!(result.cancelled);
        assert_eq!(result.iterations, 0);
    }
}
