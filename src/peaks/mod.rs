//! Model-to-peaks (C6, spec.md §4.6): the densest subsystem. Turns a
//! genome-wide `lnP0` map into an FDR-controlled, optionally clipped
//! list of peak records.

pub mod candidates;
pub mod clipping;
pub mod gap;
pub mod multiple_testing;
pub mod scoring;
pub mod sensitivity;

use std::collections::BTreeMap;

use log::{info, warn};
use rayon::prelude::*;

use crate::blacklist::BlacklistSet;
use crate::cancellation::CancellationToken;
use crate::genome::GenomeQuery;
use crate::normalization::NormalizedTrack;
use crate::peak_record::Peak;

pub use gap::GapThresholds;
pub use multiple_testing::MultipleTesting;

#[derive(Debug, Clone)]
pub struct PeakCallParams {
    pub fdr: f64,
    pub sensitivity: Option<f64>,
    pub gap: Option<usize>,
    pub clip: Option<f64>,
    pub multiple_testing: MultipleTesting,
    pub gap_thresholds: GapThresholds,
    pub summits: bool,
    pub sensitivity_summits: Option<f64>,
    pub min_summit_relative_distance: f64,
    pub score_blocks_fraction: f64,
}

impl Default for PeakCallParams {
    fn default() -> Self {
        PeakCallParams {
            fdr: 0.05,
            sensitivity: None,
            gap: None,
            clip: None,
            multiple_testing: MultipleTesting::default(),
            gap_thresholds: GapThresholds::default(),
            summits: false,
            sensitivity_summits: None,
            min_summit_relative_distance: 0.2,
            score_blocks_fraction: scoring::DEFAULT_SCORE_BLOCKS_FRACTION,
        }
    }
}

/// A candidate still carrying its per-chromosome bin range, before it is
/// known whether it survives FDR control.
struct CandidateRecord {
    chrom: String,
    from: usize,
    to: usize,
    log_p: f64,
}

/// Assemble, filter by blacklist, and score every candidate on one
/// chromosome (spec.md §4.6.3, §4.6.4, §4.6.7). Runs single-threaded;
/// the caller fans this out across chromosomes.
fn candidates_for_chromosome(
    chrom: &str,
    ln_p0_chrom: &[f64],
    track: Option<&NormalizedTrack>,
    blacklist: Option<&dyn BlacklistSet>,
    genome: &GenomeQuery,
    sensitivity: f64,
    gap: usize,
    params: &PeakCallParams,
    cancel: &CancellationToken,
) -> Vec<CandidateRecord> {
    let mask = candidates::candidate_mask(ln_p0_chrom, sensitivity);
    let mut intervals = candidates::merge_mask_to_intervals(&mask, gap);

    if params.summits {
        let summit_sensitivity = params.sensitivity_summits.unwrap_or(sensitivity / 2.0);
        let summit_mask = candidates::candidate_mask(ln_p0_chrom, summit_sensitivity);
        intervals = intervals
            .into_iter()
            .flat_map(|candidate| {
                candidates::split_on_summits(candidate, &summit_mask, params.min_summit_relative_distance)
            })
            .collect();
    }

    let mut records = Vec::with_capacity(intervals.len());
    for (from, to) in intervals {
        if cancel.is_cancelled() {
            warn!("peak candidate scoring cancelled on {}", chrom);
            break;
        }
        if let Some(blacklist) = blacklist {
            let (start_bp, _) = genome.bin_interval(from);
            let (_, end_bp) = genome.bin_interval(to.saturating_sub(1).max(from));
            if blacklist.intersects(chrom, start_bp, end_bp) {
                continue;
            }
        }
        let log_p = scoring::candidate_log_p(ln_p0_chrom, (from, to), track, params.score_blocks_fraction, 0);
        records.push(CandidateRecord {
            chrom: chrom.to_string(),
            from,
            to,
            log_p,
        });
    }
    records
}

/// Run the full model-to-peaks pipeline (spec.md §4.6). `ln_p0` and
/// `tracks` are keyed by chromosome name; `tracks` may be absent
/// entirely for model kinds without a direct treatment/control pair
/// (e.g. the `compare` variant).
pub fn call_peaks(
    genome: &GenomeQuery,
    ln_p0: &BTreeMap<String, Vec<f64>>,
    tracks: Option<&BTreeMap<String, NormalizedTrack>>,
    blacklist: Option<&dyn BlacklistSet>,
    params: &PeakCallParams,
    cancel: &CancellationToken,
) -> Vec<Peak> {
    let flat: Vec<f64> = genome
        .chromosomes()
        .iter()
        .flat_map(|chrom| ln_p0.get(chrom).cloned().unwrap_or_default())
        .collect();

    let sensitivity = params
        .sensitivity
        .unwrap_or_else(|| sensitivity::auto_select_sensitivity(&flat, params.fdr, cancel));
    let gap = params
        .gap
        .unwrap_or_else(|| gap::estimate_gap(&flat, sensitivity, params.gap_thresholds));

    info!("model-to-peaks: sensitivity={:.4} gap={}", sensitivity, gap);

    let chromosomes = genome.chromosomes();
    let per_chromosome: Vec<Vec<CandidateRecord>> = chromosomes
        .par_iter()
        .map(|chrom| {
            if cancel.is_cancelled() {
                return Vec::new();
            }
            let empty = Vec::new();
            let ln_p0_chrom = ln_p0.get(chrom).unwrap_or(&empty);
            if ln_p0_chrom.is_empty() {
                return Vec::new();
            }
            let track = tracks.and_then(|t| t.get(chrom));
            candidates_for_chromosome(
                chrom,
                ln_p0_chrom,
                track,
                blacklist,
                genome,
                sensitivity,
                gap,
                params,
                cancel,
            )
        })
        .collect();

    let mut all_candidates: Vec<CandidateRecord> = per_chromosome.into_iter().flatten().collect();
    if all_candidates.is_empty() {
        info!("no candidates survived assembly; returning an empty peak list");
        return Vec::new();
    }

    let log_p_values: Vec<f64> = all_candidates.iter().map(|c| c.log_p).collect();
    let log_q_values = multiple_testing::adjust(&log_p_values, params.multiple_testing);
    let log_fdr = params.fdr.ln();

    let mut peaks: Vec<Peak> = Vec::new();
    let mut accepted_by_chrom: BTreeMap<String, Vec<(usize, usize, f64, f64)>> = BTreeMap::new();
    for (candidate, (&log_p, &log_q)) in all_candidates
        .drain(..)
        .zip(log_p_values.iter().zip(log_q_values.iter()))
    {
        if multiple_testing::rejects(log_p, log_q, log_fdr) {
            accepted_by_chrom
                .entry(candidate.chrom)
                .or_default()
                .push((candidate.from, candidate.to, log_p, log_q));
        }
    }

    for chrom in genome.chromosomes() {
        let accepted = match accepted_by_chrom.get(chrom) {
            Some(a) if !a.is_empty() => a,
            _ => continue,
        };
        let empty = Vec::new();
        let ln_p0_chrom = ln_p0.get(chrom).unwrap_or(&empty);
        let track = tracks.and_then(|t| t.get(chrom));

        let ranges: Vec<(usize, usize)> = accepted.iter().map(|&(a, b, _, _)| (a, b)).collect();
        let (avg_signal, avg_noise) = if let Some(clip) = params.clip {
            if clip > 0.0 {
                clipping::densities(ln_p0_chrom, &ranges)
            } else {
                (0.0, 0.0)
            }
        } else {
            (0.0, 0.0)
        };

        for &(from, to, log_p, log_q) in accepted {
            let (from, to) = match params.clip {
                Some(clip) if clip > 0.0 => {
                    clipping::clip_boundaries(ln_p0_chrom, (from, to), genome.bin_size(), clip, avg_signal, avg_noise)
                }
                _ => (from, to),
            };
            if to <= from {
                continue;
            }
            let (start, _) = genome.bin_interval(from);
            let (_, end) = genome.bin_interval(to - 1);

            let value = match track {
                Some(track) => track.scaled_treatment(from..to) / (to - from) as f64,
                None => ln_p0_chrom[from..to].iter().map(|&v| -v).sum::<f64>() / (to - from) as f64,
            };

            peaks.push(Peak {
                chrom: chrom.clone(),
                start,
                end,
                value,
                neg_log10_p: -log_p / std::f64::consts::LN_10,
                neg_log10_q: -log_q / std::f64::consts::LN_10,
            });
        }
    }

    peaks.sort_by(|a, b| a.chrom.cmp(&b.chrom).then(a.start.cmp(&b.start)).then(a.end.cmp(&b.end)));
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn small_genome() -> GenomeQuery {
        let mut sizes = HashMap::new();
        sizes.insert("chr1".to_string(), 10_000u32);
        GenomeQuery::new(&sizes, 100)
    }

    fn synthetic_ln_p0() -> BTreeMap<String, Vec<f64>> {
        let mut v = vec![-0.01f64; 100];
        for i in 48..52 {
            v[i] = -20.0;
        }
        let mut m = BTreeMap::new();
        m.insert("chr1".to_string(), v);
        m
    }

    #[test]
    fn a_clear_signal_produces_exactly_one_peak() {
        let genome = small_genome();
        let ln_p0 = synthetic_ln_p0();
        let params = PeakCallParams {
            sensitivity: Some(-5.0),
            gap: Some(1),
            ..PeakCallParams::default()
        };
        let cancel = CancellationToken::new();
        let peaks = call_peaks(&genome, &ln_p0, None, None, &params, &cancel);
        assert_eq!(peaks.len(), 1);
        assert!(peaks[0].start <= 4800);
        assert!(peaks[0].end >= 5200);
    }

    #[test]
    fn blacklisted_candidates_are_dropped() {
        use crate::blacklist::MemoryBlacklist;
        let genome = small_genome();
        let ln_p0 = synthetic_ln_p0();
        let mut intervals = HashMap::new();
        intervals.insert("chr1".to_string(), vec![(4000, 6000)]);
        let blacklist = MemoryBlacklist::from_intervals(intervals);
        let params = PeakCallParams {
            sensitivity: Some(-5.0),
            gap: Some(1),
            ..PeakCallParams::default()
        };
        let cancel = CancellationToken::new();
        let peaks = call_peaks(&genome, &ln_p0, None, Some(&blacklist), &params, &cancel);
        assert!(peaks.is_empty());
    }

    #[test]
    fn tightening_fdr_never_increases_peak_count() {
        let genome = small_genome();
        let ln_p0 = synthetic_ln_p0();
        let loose = PeakCallParams {
            sensitivity: Some(-5.0),
            gap: Some(1),
            fdr: 0.5,
            ..PeakCallParams::default()
        };
        let strict = PeakCallParams {
            fdr: 1e-6,
            ..loose.clone()
        };
        let cancel = CancellationToken::new();
        let loose_peaks = call_peaks(&genome, &ln_p0, None, None, &loose, &cancel);
        let strict_peaks = call_peaks(&genome, &ln_p0, None, None, &strict, &cancel);
        assert!(strict_peaks.len() <= loose_peaks.len());
    }
}
