//! End-to-end scenarios (spec.md §8): each builds a synthetic genome and
//! one or more in-memory read tracks, runs the pipeline through
//! `span_peaks::peaks::call_peaks`, and checks the resulting peak list
//! against the scenario's expectation.

use std::collections::{BTreeMap, HashMap};

use span_peaks::cancellation::CancellationToken;
use span_peaks::coverage::{bin_coverage, FragmentMode, InMemoryReadSource, ReadEnd};
use span_peaks::fit;
use span_peaks::genome::GenomeQuery;
use span_peaks::model::constrained;
use span_peaks::model::hmm;
use span_peaks::normalization::NormalizedTrack;
use span_peaks::peaks::{call_peaks, PeakCallParams};

const CHROM: &str = "chr1";
const CHROM_LEN: u32 = 20_000;
const BIN_SIZE: u32 = 100;

fn genome() -> GenomeQuery {
    let mut sizes = HashMap::new();
    sizes.insert(CHROM.to_string(), CHROM_LEN);
    GenomeQuery::new(&sizes, BIN_SIZE)
}

/// `n` single-end reads placed uniformly in `[center - spread, center +
/// spread)`, alternating strand.
fn reads_around(n: u32, center: u32, spread: u32) -> Vec<ReadEnd> {
    (0..n)
        .map(|i| {
            let offset = (i % (2 * spread + 1)) as i64 - spread as i64;
            let pos = (center as i64 + offset).max(0) as u32;
            ReadEnd {
                pos,
                reverse_strand: i % 2 == 1,
                template_length: None,
            }
        })
        .collect()
}

fn source(reads: Vec<ReadEnd>) -> InMemoryReadSource {
    let mut m = HashMap::new();
    m.insert(CHROM.to_string(), reads);
    InMemoryReadSource::new("synthetic.bam", m)
}

fn squash_one(genome: &GenomeQuery, per_chrom: Vec<i32>) -> Vec<i32> {
    let mut rows = BTreeMap::new();
    rows.insert(CHROM.to_string(), per_chrom);
    fit::squash(genome, &rows)
}

fn ln_p0_by_chrom(genome: &GenomeQuery, ln_p0: &[f32]) -> BTreeMap<String, Vec<f64>> {
    fit::split(genome, ln_p0)
        .into_iter()
        .map(|(chrom, values)| (chrom, values.into_iter().map(|v| v as f64).collect()))
        .collect()
}

#[test]
fn empty_track_is_a_fatal_error() {
    let genome = genome();
    let empty = source(vec![]);
    let err = bin_coverage(&empty, &genome, FragmentMode::None, false).unwrap_err();
    assert!(matches!(err, span_peaks::Error::EmptyCoverage { .. }));
}

#[test]
fn single_enriched_region_is_called_as_one_peak() {
    let genome = genome();
    let treatment = source(reads_around(500, 5_000, 100));
    let track = bin_coverage(&treatment, &genome, FragmentMode::None, false).unwrap();

    let counts = track.per_chromosome.get(CHROM).cloned().unwrap();
    let obs = squash_one(&genome, counts);

    let cancel = CancellationToken::new();
    let fit = hmm::fit_multi_start(&obs, hmm::N_STATES, hmm::SnrBounds::default(), &cancel);
    let posteriors = hmm::posterior_log_membership(&fit.model, &obs);
    let ln_p0 = hmm::log_null_membership(&posteriors);
    let ln_p0_map = ln_p0_by_chrom(&genome, &ln_p0);

    let params = PeakCallParams::default();
    let peaks = call_peaks(&genome, &ln_p0_map, None, None, &params, &cancel);

    assert_eq!(peaks.len(), 1, "expected exactly one enriched region, got {:?}", peaks);
    assert!(peaks[0].start <= 4_900);
    assert!(peaks[0].end >= 5_100);
}

#[test]
fn a_dominant_control_leaves_no_peaks() {
    let genome = genome();
    let treatment = source(reads_around(500, 5_000, 100));
    let control = source(reads_around(5_000, 5_000, 100));

    let treatment_track = bin_coverage(&treatment, &genome, FragmentMode::None, false).unwrap();
    let control_track = bin_coverage(&control, &genome, FragmentMode::None, false).unwrap();

    let t = treatment_track.per_chromosome.get(CHROM).cloned().unwrap();
    let c = control_track.per_chromosome.get(CHROM).cloned().unwrap();
    let normalized = NormalizedTrack::new(t, Some(c), treatment_track.total_reads, control_track.total_reads);
    let obs = squash_one(&genome, normalized.normalized());

    let cancel = CancellationToken::new();
    let fit = hmm::fit_multi_start(&obs, hmm::N_STATES, hmm::SnrBounds::default(), &cancel);
    let posteriors = hmm::posterior_log_membership(&fit.model, &obs);
    let ln_p0 = ln_p0_by_chrom(&genome, &hmm::log_null_membership(&posteriors));

    let params = PeakCallParams::default();
    let peaks = call_peaks(&genome, &ln_p0, None, None, &params, &cancel);
    assert!(peaks.is_empty(), "control-dominated region should not be called: {:?}", peaks);
}

#[test]
fn two_replicates_of_the_same_signal_call_one_peak() {
    let genome = genome();
    let replicate_a = source(reads_around(500, 5_000, 100));
    let replicate_b = source(reads_around(500, 5_000, 100));

    let counts_a = bin_coverage(&replicate_a, &genome, FragmentMode::None, false)
        .unwrap()
        .per_chromosome
        .remove(CHROM)
        .unwrap();
    let counts_b = bin_coverage(&replicate_b, &genome, FragmentMode::None, false)
        .unwrap()
        .per_chromosome
        .remove(CHROM)
        .unwrap();

    let obs_a = squash_one(&genome, counts_a);
    let obs_b = squash_one(&genome, counts_b);
    let obs: Vec<Vec<i32>> = (0..obs_a.len()).map(|i| vec![obs_a[i], obs_b[i]]).collect();
    let groups = vec![0u8, 0u8];

    let cancel = CancellationToken::new();
    let fit = constrained::fit_multi_start(&obs, groups, &cancel);
    let posteriors = constrained::posterior_log_membership(&fit.model, &obs);
    let ln_p0 = ln_p0_by_chrom(&genome, &constrained::log_null_membership(&posteriors));

    let params = PeakCallParams::default();
    let peaks = call_peaks(&genome, &ln_p0, None, None, &params, &cancel);
    assert_eq!(peaks.len(), 1, "two concordant replicates should call one peak: {:?}", peaks);
}

#[test]
fn compare_of_a_region_present_only_in_group_two_is_called_increased() {
    let genome = genome();
    let group1_a = source(reads_around(50, 5_000, 100));
    let group1_b = source(reads_around(50, 5_000, 100));
    let group2_a = source(reads_around(500, 5_000, 100));
    let group2_b = source(reads_around(500, 5_000, 100));

    let rows: Vec<Vec<i32>> = vec![group1_a, group1_b, group2_a, group2_b]
        .into_iter()
        .map(|src| {
            let counts = bin_coverage(&src, &genome, FragmentMode::None, false)
                .unwrap()
                .per_chromosome
                .remove(CHROM)
                .unwrap();
            squash_one(&genome, counts)
        })
        .collect();

    let n_bins = rows[0].len();
    let obs: Vec<Vec<i32>> = (0..n_bins).map(|bin| rows.iter().map(|r| r[bin]).collect()).collect();
    let groups = vec![0u8, 0u8, 1u8, 1u8];

    let cancel = CancellationToken::new();
    let fit = constrained::fit_multi_start(&obs, groups, &cancel);
    let posteriors = constrained::posterior_log_membership(&fit.model, &obs);
    let ln_p0 = ln_p0_by_chrom(&genome, &constrained::log_null_membership(&posteriors));

    let params = PeakCallParams::default();
    let peaks = call_peaks(&genome, &ln_p0, None, None, &params, &cancel);
    assert_eq!(peaks.len(), 1, "only group 2 is enriched, expected one differential region: {:?}", peaks);
}

#[test]
fn auto_selected_sensitivity_lands_strictly_inside_the_search_grid() {
    let genome = genome();
    let treatment = source(reads_around(500, 5_000, 100));
    let counts = bin_coverage(&treatment, &genome, FragmentMode::None, false)
        .unwrap()
        .per_chromosome
        .remove(CHROM)
        .unwrap();
    let obs = squash_one(&genome, counts);

    let cancel = CancellationToken::new();
    let fit = hmm::fit_multi_start(&obs, hmm::N_STATES, hmm::SnrBounds::default(), &cancel);
    let posteriors = hmm::posterior_log_membership(&fit.model, &obs);
    let ln_p0 = hmm::log_null_membership(&posteriors);
    let ln_p0_f64: Vec<f64> = ln_p0.iter().map(|&v| v as f64).collect();

    let sensitivity = span_peaks::peaks::sensitivity::auto_select_sensitivity(&ln_p0_f64, 0.05, &cancel);
    assert!(sensitivity.is_finite());
    assert!(sensitivity <= 0.0);
    assert!(sensitivity > span_peaks::peaks::sensitivity::SPAN_MIN_SENSITIVITY);
}
