// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Command-line surface (spec.md §6): `analyze` and `compare`, their
//! recognized options, argument validation, and the orchestration that
//! wires C1 through C7 together. `src/bin/span.rs` only sets up logging
//! and turns the `Result` this module returns into an exit code.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use log::info;
use structopt::StructOpt;

use crate::archive::TarArchiveStore;
use crate::blacklist::{self, MemoryBlacklist};
use crate::cancellation::CancellationToken;
use crate::coverage::bed_source::BedReadSource;
use crate::coverage::htslib_source::BamReadSource;
use crate::coverage::{self, FragmentMode, ReadSource};
use crate::errors::{Error, Result};
use crate::fit::{self, FitInformation, TrainingInput};
use crate::genome::{self, GenomeQuery};
use crate::labels;
use crate::model::constrained::GroupAssignment;
use crate::normalization::NormalizedTrack;
use crate::peak_record::{self, Peak};
use crate::peaks::{self, GapThresholds, MultipleTesting, PeakCallParams};

/// Archive schema version this build writes and insists on reading back
/// (spec.md §6).
pub const MODEL_VERSION: &str = crate::archive::ARCHIVE_VERSION;

#[derive(Debug, StructOpt, Clone)]
#[structopt(
    name = "span",
    about = "A semi-supervised peak caller for ChIP-seq/ATAC-seq/scATAC-seq enrichment assays.",
    setting = structopt::clap::AppSettings::ColoredHelp,
)]
pub enum Span {
    /// Call peaks for a single condition (spec.md §4.4's free, zero-inflated
    /// 3-state HMM).
    #[structopt(
        name = "analyze",
        setting = structopt::clap::AppSettings::ColoredHelp,
    )]
    Analyze {
        /// One or more treatment tracks; multiple replicates are pooled by
        /// per-bin summation before fitting (DESIGN.md's resolution of
        /// spec.md §8's "two replicates, one signal" scenario).
        #[structopt(short = "t", long = "treatment", required = true)]
        treatment: Vec<PathBuf>,
        #[structopt(short = "c", long = "control")]
        control: Vec<PathBuf>,
        #[structopt(flatten)]
        shared: SharedOpt,
    },
    /// Compare two groups of replicates with the constrained 5-state
    /// multi-replicate HMM (spec.md §3's `I`/`D` differential states).
    #[structopt(
        name = "compare",
        setting = structopt::clap::AppSettings::ColoredHelp,
    )]
    Compare {
        #[structopt(long = "t1", required = true)]
        treatment1: Vec<PathBuf>,
        #[structopt(long = "c1")]
        control1: Vec<PathBuf>,
        #[structopt(long = "t2", required = true)]
        treatment2: Vec<PathBuf>,
        #[structopt(long = "c2")]
        control2: Vec<PathBuf>,
        #[structopt(flatten)]
        shared: SharedOpt,
    },
}

#[derive(Debug, StructOpt, Clone)]
pub struct SharedOpt {
    #[structopt(long = "chrom-sizes")]
    pub chrom_sizes: PathBuf,
    #[structopt(long = "format")]
    pub format: Option<String>,
    #[structopt(short = "b", long = "bin", default_value = "100")]
    pub bin: u32,
    #[structopt(short = "f", long = "fdr", default_value = "0.05")]
    pub fdr: f64,
    #[structopt(long = "sensitivity")]
    pub sensitivity: Option<f64>,
    #[structopt(long = "gap")]
    pub gap: Option<usize>,
    #[structopt(long = "fragment", default_value = "auto")]
    pub fragment: String,
    #[structopt(long = "keep-dup")]
    pub keep_dup: bool,
    #[structopt(long = "blacklist")]
    pub blacklist: Option<PathBuf>,
    #[structopt(long = "labels")]
    pub labels: Option<PathBuf>,
    #[structopt(short = "m", long = "model")]
    pub model: Option<PathBuf>,
    #[structopt(short = "p", long = "peaks")]
    pub peaks: Option<PathBuf>,
    #[structopt(short = "w", long = "workdir", default_value = ".")]
    pub workdir: PathBuf,
    #[structopt(long = "threads", default_value = "0")]
    pub threads: usize,
    #[structopt(long = "multiple", default_value = "BH")]
    pub multiple: String,
    #[structopt(long = "chromosomes")]
    pub chromosomes: Vec<String>,
    #[structopt(long = "clip")]
    pub clip: Option<f64>,
    #[structopt(long = "fragmentation-light")]
    pub fragmentation_light: Option<f64>,
    #[structopt(long = "fragmentation-hard")]
    pub fragmentation_hard: Option<f64>,
    #[structopt(long = "fragmentation-speed")]
    pub fragmentation_speed: Option<f64>,
    #[structopt(long = "hmm-snr")]
    pub hmm_snr: Option<f64>,
    #[structopt(long = "hmm-low")]
    pub hmm_low: Option<f64>,
    #[structopt(long = "deep-analysis")]
    pub deep_analysis: bool,
    #[structopt(long = "ext")]
    pub ext: bool,
    #[structopt(short = "l", long = "log")]
    pub log: Option<PathBuf>,
    #[structopt(short = "d", long = "debug")]
    pub debug: bool,
    #[structopt(short = "q", long = "quiet")]
    pub quiet: bool,
}

impl SharedOpt {
    fn validate(&self) -> Result<()> {
        if !(self.fdr > 0.0 && self.fdr < 1.0) {
            return Err(Error::InvalidFdr { value: self.fdr });
        }
        if let Some(clip) = self.clip {
            if !(clip >= 0.0 && clip < 1.0) {
                return Err(Error::InvalidClip { value: clip });
            }
        }
        if let Some(s) = self.sensitivity {
            if !s.is_finite() || s > 0.0 {
                return Err(Error::InvalidSensitivity { value: s });
            }
        }
        let bounds = self.snr_bounds();
        if !(bounds.min > 0.0 && bounds.min < bounds.max) {
            return Err(Error::InvalidSnrBounds {
                low: bounds.min,
                snr: bounds.max,
            });
        }
        Ok(())
    }

    fn fragment_mode(&self) -> FragmentMode {
        match self.fragment.as_str() {
            "auto" => FragmentMode::Auto,
            "0" => FragmentMode::None,
            other => other
                .parse::<u32>()
                .map(FragmentMode::Shift)
                .unwrap_or(FragmentMode::Auto),
        }
    }

    fn multiple_testing(&self) -> MultipleTesting {
        match self.multiple.to_uppercase().as_str() {
            "BONFERRONI" => MultipleTesting::Bonferroni,
            _ => MultipleTesting::BenjaminiHochberg,
        }
    }

    fn gap_thresholds(&self) -> GapThresholds {
        let mut thresholds = GapThresholds::default();
        if let Some(light) = self.fragmentation_light {
            thresholds.light = light;
        }
        if let Some(hard) = self.fragmentation_hard {
            thresholds.hard = hard;
        }
        if let Some(speed) = self.fragmentation_speed {
            thresholds.speed = speed;
        }
        thresholds
    }

    /// `--hmm-low`/`--hmm-snr` override the default post-EM signal-to-noise
    /// window (spec.md §3, §6).
    fn snr_bounds(&self) -> crate::model::hmm::SnrBounds {
        let mut bounds = crate::model::hmm::SnrBounds::default();
        if let Some(low) = self.hmm_low {
            bounds.min = low;
        }
        if let Some(snr) = self.hmm_snr {
            bounds.max = snr;
        }
        bounds
    }

    fn peak_params(&self) -> PeakCallParams {
        PeakCallParams {
            fdr: self.fdr,
            sensitivity: self.sensitivity,
            gap: self.gap,
            clip: self.clip,
            multiple_testing: self.multiple_testing(),
            gap_thresholds: self.gap_thresholds(),
            ..PeakCallParams::default()
        }
    }
}

/// Format of an input track, inferred from `--format` or the path's
/// extension (spec.md §6's `--format` option; out-of-scope alignment
/// parsing is delegated to `rust_htslib`, per SPEC_FULL.md §D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackFormat {
    Bam,
    Cram,
    Bed,
}

fn resolve_format(path: &Path, requested: &Option<String>) -> Result<TrackFormat> {
    if let Some(requested) = requested {
        return match requested.to_uppercase().as_str() {
            "BAM" => Ok(TrackFormat::Bam),
            "CRAM" => Ok(TrackFormat::Cram),
            "BED" => Ok(TrackFormat::Bed),
            "SAM" => Err(Error::Other(
                "SAM tracks require an indexed BAM/CRAM; sort and index first".to_string(),
            )),
            other => Err(Error::Other(format!("unrecognized track format {}", other))),
        };
    }
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()) {
        Some(ref ext) if ext == "bam" => Ok(TrackFormat::Bam),
        Some(ref ext) if ext == "cram" => Ok(TrackFormat::Cram),
        Some(ref ext) if ext == "bed" => Ok(TrackFormat::Bed),
        _ => Err(Error::Other(format!(
            "cannot infer track format for {:?}; pass --format explicitly",
            path
        ))),
    }
}

fn open_source(path: &Path, requested: &Option<String>) -> Result<Box<dyn ReadSource>> {
    match resolve_format(path, requested)? {
        TrackFormat::Bam | TrackFormat::Cram => Ok(Box::new(BamReadSource::open(path)?)),
        TrackFormat::Bed => Ok(Box::new(BedReadSource::open(path)?)),
    }
}

/// Sum per-bin counts of several tracks into one pooled coverage map
/// (the pooling strategy for `analyze`'s multi-replicate case, see
/// `Span::Analyze`'s doc comment).
fn pooled_coverage(
    genome: &GenomeQuery,
    paths: &[PathBuf],
    format: &Option<String>,
    fragment: FragmentMode,
    unique_only: bool,
) -> Result<(BTreeMap<String, Vec<i32>>, u64)> {
    let mut pooled: BTreeMap<String, Vec<i32>> = BTreeMap::new();
    let mut total_reads = 0u64;
    for path in paths {
        let source = open_source(path, format)?;
        let track = coverage::bin_coverage(source.as_ref(), genome, fragment, unique_only)?;
        total_reads += track.total_reads;
        for chrom in genome.chromosomes() {
            let n_bins = genome.bins(chrom)?;
            let entry = pooled.entry(chrom.clone()).or_insert_with(|| vec![0i32; n_bins]);
            if let Some(counts) = track.per_chromosome.get(chrom) {
                for (slot, &v) in entry.iter_mut().zip(counts.iter()) {
                    *slot += v;
                }
            }
        }
    }
    Ok((pooled, total_reads))
}

fn load_genome(shared: &SharedOpt, treatment_paths: &[PathBuf], format: &Option<String>) -> Result<GenomeQuery> {
    let mut sizes = genome::load_chrom_sizes(&shared.chrom_sizes)?;
    if !shared.chromosomes.is_empty() {
        let restrict: std::collections::HashSet<&String> = shared.chromosomes.iter().collect();
        sizes.retain(|name, _| restrict.contains(name));
    }
    let full = GenomeQuery::new(&sizes, shared.bin);

    let mut chromosomes_with_reads: std::collections::HashSet<String> = std::collections::HashSet::new();
    for path in treatment_paths {
        let source = open_source(path, format)?;
        for chrom in full.chromosomes() {
            if let Ok(reads) = source.reads(chrom) {
                if !reads.is_empty() {
                    chromosomes_with_reads.insert(chrom.clone());
                }
            }
        }
    }
    full.effective(|c| chromosomes_with_reads.contains(c))
}

fn write_output(shared: &SharedOpt, mut peaks: Vec<Peak>) -> Result<()> {
    peaks.sort_by(|a, b| a.chrom.cmp(&b.chrom).then(a.start.cmp(&b.start)).then(a.end.cmp(&b.end)));
    info!("{} peaks called", peaks.len());
    match &shared.peaks {
        Some(path) => {
            let file = File::create(path).map_err(|e| Error::UnreadableInput {
                path: path.clone(),
                source: e,
            })?;
            peak_record::write_peaks(file, &peaks)
        }
        None => peak_record::write_peaks(std::io::stdout(), &peaks),
    }
}

fn configure_threads(threads: usize) -> Result<()> {
    if threads == 0 {
        return Ok(());
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .map_err(|e| Error::Other(e.to_string()))
}

fn build_blacklist(shared: &SharedOpt) -> Result<Option<MemoryBlacklist>> {
    match &shared.blacklist {
        Some(path) => Ok(Some(blacklist::load_blacklist(path).map_err(|e| Error::Other(e.to_string()))?)),
        None => Ok(None),
    }
}

fn load_labels(shared: &SharedOpt) -> Result<Vec<labels::Label>> {
    match &shared.labels {
        Some(path) => labels::load_labels(path).map_err(|e| Error::Other(e.to_string())),
        None => Ok(Vec::new()),
    }
}

/// Run `analyze` (spec.md §4 single-condition pipeline, C1 through C7).
fn analyze(treatment: Vec<PathBuf>, control: Vec<PathBuf>, shared: SharedOpt) -> Result<()> {
    configure_threads(shared.threads)?;
    let fragment = shared.fragment_mode();
    let genome = load_genome(&shared, &treatment, &shared.format)?;

    let (treatment_rows, n_treatment) =
        pooled_coverage(&genome, &treatment, &shared.format, fragment, !shared.keep_dup)?;
    let (control_rows, n_control) = if control.is_empty() {
        (BTreeMap::new(), 0)
    } else {
        pooled_coverage(&genome, &control, &shared.format, fragment, !shared.keep_dup)?
    };

    let mut tracks: BTreeMap<String, NormalizedTrack> = BTreeMap::new();
    for chrom in genome.chromosomes() {
        let t = treatment_rows.get(chrom).cloned().unwrap_or_default();
        let c = if control.is_empty() {
            None
        } else {
            Some(control_rows.get(chrom).cloned().unwrap_or_default())
        };
        tracks.insert(chrom.clone(), NormalizedTrack::new(t, c, n_treatment, n_control));
    }

    let per_chrom_normalized: BTreeMap<String, Vec<i32>> = tracks
        .iter()
        .map(|(chrom, track)| (chrom.clone(), track.normalized()))
        .collect();
    let obs = fit::squash(&genome, &per_chrom_normalized);

    let mut sizes = BTreeMap::new();
    for chrom in genome.chromosomes() {
        sizes.insert(chrom.clone(), genome.length(chrom)?);
    }
    let fit_information = FitInformation {
        build: "unspecified".to_string(),
        paths: path_pairs(&treatment, &control),
        labels: shared.labels.as_ref().map(|p| p.to_string_lossy().to_string()),
        fragment: shared.fragment.clone(),
        unique: !shared.keep_dup,
        bin_size: shared.bin,
        chromosome_sizes: sizes,
        version: MODEL_VERSION.to_string(),
        fqn: "NB2Z-HMM".to_string(),
    };

    let store = TarArchiveStore::with_explicit_path(shared.workdir.clone(), shared.model.clone());
    let cancel = CancellationToken::new();
    let snr_bounds = shared.snr_bounds();
    let results = fit::fit_or_load(
        fit_information,
        TrainingInput::Single(obs),
        &store,
        snr_bounds,
        &cancel,
    )?;

    if results.out_of_snr_range {
        log::warn!(
            "fitted model's signal-to-noise ratio was clamped into [{}, {}]",
            snr_bounds.min, snr_bounds.max
        );
    }

    let ln_p0_by_chrom: BTreeMap<String, Vec<f64>> = fit::split(&genome, &results.ln_p0)
        .into_iter()
        .map(|(chrom, values)| (chrom, values.into_iter().map(|v| v as f64).collect()))
        .collect();

    let blacklist = build_blacklist(&shared)?;
    let label_entries = load_labels(&shared)?;
    let mut params = shared.peak_params();
    if !label_entries.is_empty() {
        params = labels::tune(&genome, &ln_p0_by_chrom, &label_entries, &params, &cancel);
    }

    let peaks = peaks::call_peaks(
        &genome,
        &ln_p0_by_chrom,
        Some(&tracks),
        blacklist.as_ref().map(|b| b as &dyn blacklist::BlacklistSet),
        &params,
        &cancel,
    );

    write_output(&shared, peaks)
}

/// Run `compare` (spec.md §3's constrained multi-replicate variant).
fn compare(
    treatment1: Vec<PathBuf>,
    control1: Vec<PathBuf>,
    treatment2: Vec<PathBuf>,
    control2: Vec<PathBuf>,
    shared: SharedOpt,
) -> Result<()> {
    configure_threads(shared.threads)?;
    let fragment = shared.fragment_mode();
    let mut all_treatment = treatment1.clone();
    all_treatment.extend(treatment2.clone());
    let genome = load_genome(&shared, &all_treatment, &shared.format)?;

    let group1_tracks = replicate_tracks(&genome, &treatment1, &control1, &shared, fragment)?;
    let group2_tracks = replicate_tracks(&genome, &treatment2, &control2, &shared, fragment)?;

    let mut groups: GroupAssignment = vec![0u8; group1_tracks.len()];
    groups.extend(vec![1u8; group2_tracks.len()]);

    // Each replicate's `normalized()` is already genome-wide (squashed at
    // construction in `replicate_tracks`), so `obs[bin][replicate]` is a
    // direct transpose.
    let replicate_rows: Vec<Vec<i32>> = group1_tracks
        .iter()
        .chain(group2_tracks.iter())
        .map(|track| track.normalized())
        .collect();
    let n_bins = genome.total_bins();
    let obs: Vec<Vec<i32>> = (0..n_bins)
        .map(|bin| replicate_rows.iter().map(|replicate| replicate[bin]).collect())
        .collect();

    let mut sizes = BTreeMap::new();
    for chrom in genome.chromosomes() {
        sizes.insert(chrom.clone(), genome.length(chrom)?);
    }
    let fit_information = FitInformation {
        build: "unspecified".to_string(),
        paths: path_pairs(&all_treatment, &control1.iter().chain(control2.iter()).cloned().collect::<Vec<_>>()),
        labels: shared.labels.as_ref().map(|p| p.to_string_lossy().to_string()),
        fragment: shared.fragment.clone(),
        unique: !shared.keep_dup,
        bin_size: shared.bin,
        chromosome_sizes: sizes,
        version: MODEL_VERSION.to_string(),
        fqn: "NB2Z-HMM-compare".to_string(),
    };

    let store = TarArchiveStore::with_explicit_path(shared.workdir.clone(), shared.model.clone());
    let cancel = CancellationToken::new();
    let results = fit::fit_or_load(
        fit_information,
        TrainingInput::Multi(obs.clone(), groups.clone()),
        &store,
        shared.snr_bounds(),
        &cancel,
    )?;

    let ln_p0_by_chrom: BTreeMap<String, Vec<f64>> = fit::split(&genome, &results.ln_p0)
        .into_iter()
        .map(|(chrom, values)| (chrom, values.into_iter().map(|v| v as f64).collect()))
        .collect();

    let blacklist = build_blacklist(&shared)?;
    let params = shared.peak_params();
    let mut peaks = peaks::call_peaks(
        &genome,
        &ln_p0_by_chrom,
        None,
        blacklist.as_ref().map(|b| b as &dyn blacklist::BlacklistSet),
        &params,
        &cancel,
    );

    apply_log2_fold_change(&mut peaks, &genome, &obs, &groups);

    write_output(&shared, peaks)
}

fn path_pairs(treatment: &[PathBuf], control: &[PathBuf]) -> Vec<(String, Option<String>)> {
    treatment
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let c = control.get(i).map(|p| p.to_string_lossy().to_string());
            (t.to_string_lossy().to_string(), c)
        })
        .collect()
}

fn replicate_tracks(
    genome: &GenomeQuery,
    treatment: &[PathBuf],
    control: &[PathBuf],
    shared: &SharedOpt,
    fragment: FragmentMode,
) -> Result<Vec<NormalizedTrack>> {
    let mut tracks = Vec::with_capacity(treatment.len());
    for (i, path) in treatment.iter().enumerate() {
        let source = open_source(path, &shared.format)?;
        let treatment_track = coverage::bin_coverage(source.as_ref(), genome, fragment, !shared.keep_dup)?;
        let control_track = match control.get(i) {
            Some(control_path) => {
                let control_source = open_source(control_path, &shared.format)?;
                Some(coverage::bin_coverage(control_source.as_ref(), genome, fragment, !shared.keep_dup)?)
            }
            None => None,
        };

        let per_chrom_treatment: BTreeMap<String, Vec<i32>> = treatment_track.per_chromosome.clone().into_iter().collect();
        let treatment_squashed = fit::squash(genome, &per_chrom_treatment);
        let control_squashed = control_track.as_ref().map(|track| {
            let per_chrom_control: BTreeMap<String, Vec<i32>> = track.per_chromosome.clone().into_iter().collect();
            fit::squash(genome, &per_chrom_control)
        });

        let n_t = treatment_track.total_reads;
        let n_c = control_track.as_ref().map(|t| t.total_reads).unwrap_or(0);
        tracks.push(NormalizedTrack::new(treatment_squashed, control_squashed, n_t, n_c));
    }
    Ok(tracks)
}

/// Overwrite each peak's `value` with `log2((group1 + 1) / (group2 + 1))`
/// of its summed normalized counts (spec.md §3: "log2 fold-change in
/// compare"), since `peaks::call_peaks` otherwise falls back to its
/// single-condition mean-signal default.
fn apply_log2_fold_change(peaks: &mut [Peak], genome: &GenomeQuery, obs: &[Vec<i32>], groups: &GroupAssignment) {
    for peak in peaks.iter_mut() {
        let chrom_idx = match genome.index_of(&peak.chrom) {
            Ok(i) => i,
            Err(_) => continue,
        };
        let offset = genome.offsets_map()[chrom_idx];
        let from_bin = offset + (peak.start / genome.bin_size()) as usize;
        let to_bin = offset + ((peak.end - 1) / genome.bin_size()) as usize + 1;

        let mut group1_sum = 0f64;
        let mut group2_sum = 0f64;
        for bin in obs.iter().take(to_bin).skip(from_bin) {
            for (replicate, &count) in bin.iter().enumerate() {
                if groups[replicate] == 0 {
                    group1_sum += count as f64;
                } else {
                    group2_sum += count as f64;
                }
            }
        }
        peak.value = ((group1_sum + 1.0) / (group2_sum + 1.0)).log2();
    }
}

/// Top-level entry point: validate, dispatch, return a `Result` whose
/// `Error` variant `span.rs::main` turns into the matching exit code
/// (spec.md §6: 0 success, 1 fatal, 2 invalid arguments).
pub fn run(opt: Span) -> Result<()> {
    match opt {
        Span::Analyze { treatment, control, shared } => {
            shared.validate()?;
            analyze(treatment, control, shared)
        }
        Span::Compare {
            treatment1,
            control1,
            treatment2,
            control2,
            shared,
        } => {
            shared.validate()?;
            compare(treatment1, control1, treatment2, control2, shared)
        }
    }
}

/// Logging level requested by `-d/--debug` and `-q/--quiet`, shared opt
/// fields read before the rest of the pipeline runs (SPEC_FULL.md §B).
pub fn log_level(debug: bool, quiet: bool) -> log::LevelFilter {
    if debug {
        log::LevelFilter::Debug
    } else if quiet {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    }
}

pub fn shared_opt(opt: &Span) -> &SharedOpt {
    match opt {
        Span::Analyze { shared, .. } => shared,
        Span::Compare { shared, .. } => shared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_opt_rejects_fdr_outside_unit_interval() {
        let mut shared = default_shared();
        shared.fdr = 1.5;
        assert!(matches!(shared.validate(), Err(Error::InvalidFdr { .. })));
    }

    #[test]
    fn shared_opt_rejects_negative_clip() {
        let mut shared = default_shared();
        shared.clip = Some(-0.1);
        assert!(matches!(shared.validate(), Err(Error::InvalidClip { .. })));
    }

    #[test]
    fn shared_opt_accepts_defaults() {
        assert!(default_shared().validate().is_ok());
    }

    #[test]
    fn shared_opt_rejects_inverted_snr_bounds() {
        let mut shared = default_shared();
        shared.hmm_low = Some(20.0);
        shared.hmm_snr = Some(1.5);
        assert!(matches!(shared.validate(), Err(Error::InvalidSnrBounds { .. })));
    }

    #[test]
    fn snr_bounds_defaults_to_hmm_constants_when_unset() {
        let shared = default_shared();
        let bounds = shared.snr_bounds();
        assert_eq!(bounds.min, crate::model::hmm::SNR_MIN);
        assert_eq!(bounds.max, crate::model::hmm::SNR_MAX);
    }

    #[test]
    fn fragment_mode_parses_auto_and_fixed_shift() {
        let mut shared = default_shared();
        assert_eq!(shared.fragment_mode(), FragmentMode::Auto);
        shared.fragment = "150".to_string();
        assert_eq!(shared.fragment_mode(), FragmentMode::Shift(150));
        shared.fragment = "0".to_string();
        assert_eq!(shared.fragment_mode(), FragmentMode::None);
    }

    fn default_shared() -> SharedOpt {
        SharedOpt {
            chrom_sizes: PathBuf::from("sizes.txt"),
            format: None,
            bin: 100,
            fdr: 0.05,
            sensitivity: None,
            gap: None,
            fragment: "auto".to_string(),
            keep_dup: false,
            blacklist: None,
            labels: None,
            model: None,
            peaks: None,
            workdir: PathBuf::from("."),
            threads: 0,
            multiple: "BH".to_string(),
            chromosomes: Vec::new(),
            clip: None,
            fragmentation_light: None,
            fragmentation_hard: None,
            fragmentation_speed: None,
            hmm_snr: None,
            hmm_low: None,
            deep_analysis: false,
            ext: false,
            log: None,
            debug: false,
            quiet: false,
        }
    }
}
