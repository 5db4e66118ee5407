//! Constrained multi-replicate HMM (C4, `compare` variant): 5 states
//! `{Z, L, H, I, D}` whose emissions are products of per-replicate NB (or
//! zero for Z), sharing NB parameters across states via a static
//! state -> (replicate-group -> NB-scheme-index) table (spec.md §3, §9).

use bio::stats::LogProb;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cancellation::CancellationToken;
use crate::model::emission::{self, NbGuess};
use crate::model::hmm::EmConfig;

pub const N_STATES: usize = 5;
pub const ZERO: usize = 0;
pub const LOW: usize = 1;
pub const HIGH: usize = 2;
pub const INCREASED: usize = 3;
pub const DECREASED: usize = 4;

/// Null states for the `compare` posterior: everything except I and D
/// (spec.md §3: "complement of {I, D}").
pub const NULL_STATES: [usize; 3] = [ZERO, LOW, HIGH];

/// NB-scheme index reserved for the zero-inflated tag: no parameters,
/// emission is `0` at `obs == 0` else `-inf`.
pub const ZERO_SCHEME: usize = 0;
/// Scheme indices for group 1's low/high states and group 2's low/high
/// states. Index 0 (`ZERO_SCHEME`) is shared by all groups at state Z.
pub const GROUP1_LOW: usize = 1;
pub const GROUP1_HIGH: usize = 2;
pub const GROUP2_LOW: usize = 3;
pub const GROUP2_HIGH: usize = 4;
pub const N_SCHEMES: usize = 5;

/// `constraint_map[state][group]` gives the NB-scheme index used by
/// replicates in that group while the HMM is in that state (spec.md §3).
pub const CONSTRAINT_MAP: [[usize; 2]; N_STATES] = [
    [ZERO_SCHEME, ZERO_SCHEME],       // Z
    [GROUP1_LOW, GROUP2_LOW],         // L
    [GROUP1_HIGH, GROUP2_HIGH],       // H
    [GROUP1_LOW, GROUP2_HIGH],        // I (increased in group 2)
    [GROUP1_HIGH, GROUP2_LOW],        // D (decreased in group 2)
];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NbScheme {
    pub mu: f64,
    pub r: f64,
}

/// Per-replicate group assignment: `0` for group 1, `1` for group 2.
pub type GroupAssignment = Vec<u8>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstrainedHmm {
    pub groups: GroupAssignment,
    pub log_pi: Vec<LogProb>,
    pub log_trans: Vec<Vec<LogProb>>,
    /// Indexed by `NB_SCHEME` constants; index 0 is the unused zero tag.
    pub schemes: [NbScheme; N_SCHEMES],
}

impl ConstrainedHmm {
    pub fn new(groups: GroupAssignment, group1_guess: NbGuess, group2_guess: NbGuess) -> Self {
        let log_pi = vec![LogProb((1.0f64 / N_STATES as f64).ln()); N_STATES];
        let stay = 0.9f64;
        let leave = (1.0 - stay) / (N_STATES as f64 - 1.0);
        let log_trans = (0..N_STATES)
            .map(|i| {
                (0..N_STATES)
                    .map(|j| LogProb(if i == j { stay.ln() } else { leave.ln() }))
                    .collect()
            })
            .collect();

        let mut schemes = [NbScheme::default(); N_SCHEMES];
        schemes[GROUP1_LOW] = NbScheme {
            mu: group1_guess.mu_low,
            r: group1_guess.r_low,
        };
        schemes[GROUP1_HIGH] = NbScheme {
            mu: group1_guess.mu_high,
            r: group1_guess.r_high,
        };
        schemes[GROUP2_LOW] = NbScheme {
            mu: group2_guess.mu_low,
            r: group2_guess.r_low,
        };
        schemes[GROUP2_HIGH] = NbScheme {
            mu: group2_guess.mu_high,
            r: group2_guess.r_high,
        };

        ConstrainedHmm {
            groups,
            log_pi,
            log_trans,
            schemes,
        }
    }

    fn scheme_for(&self, state: usize, replicate: usize) -> usize {
        CONSTRAINT_MAP[state][self.groups[replicate] as usize]
    }

    pub fn emission_log_pmf(&self, state: usize, obs: &[i32]) -> LogProb {
        let mut total = LogProb::ln_one();
        for (replicate, &count) in obs.iter().enumerate() {
            let scheme_idx = self.scheme_for(state, replicate);
            total = total
                + if scheme_idx == ZERO_SCHEME {
                    if count == 0 {
                        LogProb::ln_one()
                    } else {
                        LogProb::ln_zero()
                    }
                } else {
                    let scheme = self.schemes[scheme_idx];
                    crate::model::logspace::nb_log_pmf(count.max(0) as u32, scheme.mu, scheme.r)
                };
        }
        total
    }
}

#[derive(Debug, Clone)]
pub struct FitResult {
    pub model: ConstrainedHmm,
    pub log_likelihood: f64,
    pub iterations: usize,
    pub cancelled: bool,
}

fn logsumexp(values: impl Iterator<Item = LogProb>) -> LogProb {
    let collected: Vec<LogProb> = values.collect();
    LogProb::ln_sum_exp(&collected)
}

fn forward_backward(
    model: &ConstrainedHmm,
    obs: &[Vec<i32>],
) -> (Vec<Vec<LogProb>>, Vec<Vec<LogProb>>, f64) {
    let t_len = obs.len();
    let n = N_STATES;

    let mut alpha = vec![vec![LogProb::ln_zero(); n]; t_len];
    for s in 0..n {
        alpha[0][s] = model.log_pi[s] + model.emission_log_pmf(s, &obs[0]);
    }
    for t in 1..t_len {
        for s in 0..n {
            let incoming = (0..n).map(|j| alpha[t - 1][j] + model.log_trans[j][s]);
            alpha[t][s] = model.emission_log_pmf(s, &obs[t]) + logsumexp(incoming);
        }
    }
    let log_likelihood = *logsumexp(alpha[t_len - 1].iter().cloned());

    let mut beta = vec![vec![LogProb::ln_one(); n]; t_len];
    for t in (0..t_len - 1).rev() {
        for s in 0..n {
            let outgoing = (0..n).map(|j| {
                model.log_trans[s][j] + model.emission_log_pmf(j, &obs[t + 1]) + beta[t + 1][j]
            });
            beta[t][s] = logsumexp(outgoing);
        }
    }

    (alpha, beta, log_likelihood)
}

fn baum_welch_iteration(model: &ConstrainedHmm, obs: &[Vec<i32>]) -> (ConstrainedHmm, f64) {
    let t_len = obs.len();
    let n = N_STATES;
    let n_replicates = model.groups.len();
    let (alpha, beta, log_likelihood) = forward_backward(model, obs);
    let ll = LogProb(log_likelihood);

    let gamma: Vec<Vec<LogProb>> = (0..t_len)
        .map(|t| (0..n).map(|s| alpha[t][s] + beta[t][s] - ll).collect())
        .collect();

    let new_log_pi = gamma[0].clone();

    let mut new_log_trans = vec![vec![LogProb::ln_zero(); n]; n];
    for i in 0..n {
        let denom = logsumexp((0..t_len - 1).map(|t| gamma[t][i]));
        for j in 0..n {
            let numer = logsumexp((0..t_len - 1).map(|t| {
                alpha[t][i] + model.log_trans[i][j] + model.emission_log_pmf(j, &obs[t + 1])
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

    // Shared-parameter M-step: pool gamma-weighted sufficient statistics
    // across every (state, replicate) pair that maps to the same scheme.
    let mut schemes = model.schemes;
    for scheme_idx in [GROUP1_LOW, GROUP1_HIGH, GROUP2_LOW, GROUP2_HIGH] {
        let mut weight_sum = 0.0f64;
        let mut weighted_obs_sum = 0.0f64;
        let mut pairs: Vec<(i32, f64)> = Vec::new();
        for state in 0..n {
            for replicate in 0..n_replicates {
                if CONSTRAINT_MAP[state][model.groups[replicate] as usize] != scheme_idx {
                    continue;
                }
                for t in 0..t_len {
                    let w = gamma[t][state].exp();
                    let o = obs[t][replicate];
                    weight_sum += w;
                    weighted_obs_sum += w * o as f64;
                    pairs.push((o, w));
                }
            }
        }
        if weight_sum > 1e-9 {
            let mu = (weighted_obs_sum / weight_sum).max(1e-6);
            let r = emission::golden_section_maximize_r(&pairs, mu, schemes[scheme_idx].r);
            schemes[scheme_idx] = NbScheme { mu, r };
        }
    }

    (
        ConstrainedHmm {
            groups: model.groups.clone(),
            log_pi: new_log_pi,
            log_trans: new_log_trans,
            schemes,
        },
        log_likelihood,
    )
}

/// Enforce `mu_low <= mu_high` within each group, swapping the `L`/`H`
/// and `I`/`D` scheme roles together if a group's means are crossed --
/// the multi-replicate analogue of `FreeNbHmm::reorder_states`.
fn reorder_within_groups(model: &mut ConstrainedHmm) {
    if model.schemes[GROUP1_LOW].mu > model.schemes[GROUP1_HIGH].mu {
        model.schemes.swap(GROUP1_LOW, GROUP1_HIGH);
    }
    if model.schemes[GROUP2_LOW].mu > model.schemes[GROUP2_HIGH].mu {
        model.schemes.swap(GROUP2_LOW, GROUP2_HIGH);
    }
}

pub fn fit(
    initial: ConstrainedHmm,
    obs: &[Vec<i32>],
    config: EmConfig,
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
            break;
        }
        prev_ll = ll;
        if relative_change < config.convergence_threshold {
            debug!("constrained Baum-Welch converged after {} iterations", iterations);
            break;
        }
    }

    reorder_within_groups(&mut model);

    FitResult {
        model,
        log_likelihood: prev_ll,
        iterations,
        cancelled,
    }
}

pub fn fit_multi_start(
    obs: &[Vec<i32>],
    groups: GroupAssignment,
    cancel: &CancellationToken,
) -> FitResult {
    let group1_flat: Vec<i32> = obs
        .iter()
        .flat_map(|row| {
            row.iter()
                .enumerate()
                .filter(|(r, _)| groups[*r] == 0)
                .map(|(_, &v)| v)
        })
        .collect();
    let group2_flat: Vec<i32> = obs
        .iter()
        .flat_map(|row| {
            row.iter()
                .enumerate()
                .filter(|(r, _)| groups[*r] == 1)
                .map(|(_, &v)| v)
        })
        .collect();

    let leg_config = EmConfig::multi_start_leg();
    let legs: Vec<FitResult> = (0..emission::MULTI_START_SNR.len())
        .into_par_iter()
        .map(|attempt| {
            let g1 = emission::guess_by_data(&group1_flat, 3, attempt);
            let g2 = emission::guess_by_data(&group2_flat, 3, attempt);
            let model = ConstrainedHmm::new(groups.clone(), g1, g2);
            fit(model, obs, leg_config, cancel)
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

    fit(best.model, obs, EmConfig::main_fit(), cancel)
}

pub fn posterior_log_membership(model: &ConstrainedHmm, obs: &[Vec<i32>]) -> Vec<Vec<LogProb>> {
    if obs.is_empty() {
        return Vec::new();
    }
    let (alpha, beta, log_likelihood) = forward_backward(model, obs);
    let ll = LogProb(log_likelihood);
    (0..obs.len())
        .map(|t| (0..N_STATES).map(|s| alpha[t][s] + beta[t][s] - ll).collect())
        .collect()
}

/// `lnP0[k]` for the `compare` variant: logsumexp over `{Z, L, H}`.
pub fn log_null_membership(posteriors: &[Vec<LogProb>]) -> Vec<f32> {
    posteriors
        .iter()
        .map(|row| {
            let null: Vec<LogProb> = NULL_STATES.iter().map(|&s| row[s]).collect();
            *LogProb::ln_sum_exp(&null) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_obs() -> (Vec<Vec<i32>>, GroupAssignment) {
        // Two replicates, group1 has a block of enrichment group2 lacks.
        let mut rows = Vec::new();
        for _ in 0..40 {
            rows.push(vec![2, 2]);
        }
        for _ in 0..10 {
            rows.push(vec![30, 2]);
        }
        for _ in 0..40 {
            rows.push(vec![2, 2]);
        }
        (rows, vec![0, 1])
    }

    #[test]
    fn fit_converges_and_orders_group_means() {
        let (obs, groups) = synthetic_obs();
        let cancel = CancellationToken::new();
        let result = fit_multi_start(&obs, groups, &cancel);
        assert!(result.model.schemes[GROUP1_LOW].mu <= result.model.schemes[GROUP1_HIGH].mu);
        assert!(result.model.schemes[GROUP2_LOW].mu <= result.model.schemes[GROUP2_HIGH].mu);
        assert!(result.log_likelihood.is_finite());
    }

    #[test]
    fn constraint_map_only_uses_five_scheme_slots() {
        for row in CONSTRAINT_MAP.iter() {
            for &idx in row.iter() {
                assert!(idx < N_SCHEMES);
            }
        }
    }

    #[test]
    fn posteriors_are_normalized() {
        let (obs, groups) = synthetic_obs();
        let cancel = CancellationToken::new();
        let result = fit_multi_start(&obs, groups, &cancel);
        let posteriors = posterior_log_membership(&result.model, &obs);
        for row in &posteriors {
            let total: f64 = row.iter().map(|p| p.exp()).sum();
            assert!((total - 1.0).abs() < 1e-6);
        }
    }
}
