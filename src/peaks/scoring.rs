//! Per-candidate log-p computation (C6.4, spec.md §4.6.4): score blocks
//! within a candidate, a Poisson-CDF-against-control score where control
//! is available, a plain mean-lnP0 score otherwise, and a length-weighted
//! aggregate across blocks.

use crate::model::logspace::log_poisson_cdf;
use crate::normalization::NormalizedTrack;
use crate::peaks::candidates::merge_mask_to_intervals;

/// Default fraction of a candidate's strongest bins kept as "score
/// blocks" (spec.md §4.6.4, §9: `SPAN_SCORE_BLOCKS` default 0.5).
pub const DEFAULT_SCORE_BLOCKS_FRACTION: f64 = 0.5;

/// Select score blocks within `candidate`: the top `fraction` of the
/// candidate's `lnP0` values (smallest, i.e. most significant), run-
/// merged with `intra_gap` tolerance. Falls back to the whole candidate
/// when only one block results.
pub fn score_blocks(
    ln_p0_chrom: &[f64],
    candidate: (usize, usize),
    fraction: f64,
    intra_gap: usize,
) -> Vec<(usize, usize)> {
    let (from, to) = candidate;
    let slice = &ln_p0_chrom[from..to];
    if slice.is_empty() {
        return vec![candidate];
    }
    let mut sorted: Vec<f64> = slice.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let keep = ((fraction * sorted.len() as f64).ceil() as usize).max(1);
    let threshold = sorted[keep - 1];

    let mask: Vec<bool> = slice.iter().map(|&v| v <= threshold).collect();
    let blocks = merge_mask_to_intervals(&mask, intra_gap);
    if blocks.len() <= 1 {
        return vec![candidate];
    }
    blocks.into_iter().map(|(a, b)| (a + from, b + from)).collect()
}

/// Score of a single block (spec.md §4.6.4): `-sqrt(model_logp *
/// signal_logp)` against a control, or `mean(lnP0)` without one.
pub fn block_score(ln_p0_chrom: &[f64], block: (usize, usize), track: Option<&NormalizedTrack>) -> f64 {
    let (a, b) = block;
    let model_logp: f64 = ln_p0_chrom[a..b].iter().sum();

    match track.filter(|t| t.control.is_some()) {
        Some(track) => {
            let treatment_sum = track.scaled_treatment(a..b);
            let control_sum = track.scaled_control(a..b);
            let k = (treatment_sum.ceil() as u32).saturating_add(1);
            let lambda = control_sum + 1.0;
            let signal_logp = *log_poisson_cdf(k, lambda);
            -(model_logp * signal_logp).max(0.0).sqrt()
        }
        None => model_logp / (b - a).max(1) as f64,
    }
}

/// Candidate log-p, spec.md §4.6.4: length-weighted mean of block
/// scores. Returns the single block's score directly when there is only
/// one.
pub fn candidate_log_p(
    ln_p0_chrom: &[f64],
    candidate: (usize, usize),
    track: Option<&NormalizedTrack>,
    fraction: f64,
    intra_gap: usize,
) -> f64 {
    let blocks = score_blocks(ln_p0_chrom, candidate, fraction, intra_gap);
    if blocks.len() == 1 {
        return block_score(ln_p0_chrom, blocks[0], track);
    }

    let mut scored: Vec<(f64, usize)> = blocks
        .iter()
        .map(|&b| (block_score(ln_p0_chrom, b, track), b.1 - b.0))
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let total_len: usize = scored.iter().map(|&(_, l)| l).sum();
    if total_len == 0 {
        return 0.0;
    }
    scored.iter().map(|&(s, l)| s * l as f64).sum::<f64>() / total_len as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_block_candidate_returns_its_score_directly() {
        let ln_p0 = vec![-1.0, -1.0, -1.0];
        let log_p = candidate_log_p(&ln_p0, (0, 3), None, DEFAULT_SCORE_BLOCKS_FRACTION, 0);
        assert!((log_p - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn stronger_enrichment_yields_a_more_negative_log_p() {
        let weak = vec![-0.5; 10];
        let strong = vec![-5.0; 10];
        let weak_p = candidate_log_p(&weak, (0, 10), None, DEFAULT_SCORE_BLOCKS_FRACTION, 0);
        let strong_p = candidate_log_p(&strong, (0, 10), None, DEFAULT_SCORE_BLOCKS_FRACTION, 0);
        assert!(strong_p < weak_p);
    }

    #[test]
    fn treatment_far_above_control_gives_near_zero_signal_term() {
        let ln_p0 = vec![-3.0; 5];
        let track = NormalizedTrack::new(vec![100; 5], Some(vec![1; 5]), 500, 5);
        let log_p = candidate_log_p(&ln_p0, (0, 5), Some(&track), DEFAULT_SCORE_BLOCKS_FRACTION, 0);
        assert!(log_p.is_finite());
        assert!(log_p <= 0.0);
    }
}
