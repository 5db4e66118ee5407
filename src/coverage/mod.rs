//! Binned coverage (C1): maps reads to per-bin integer counts.

pub mod bed_source;
pub mod fragment;
pub mod htslib_source;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::errors::{Error, Result};
use crate::genome::GenomeQuery;

pub use fragment::FragmentMode;

/// A single aligned read, reduced to the coordinates `bin_coverage` needs.
/// Produced by a `ReadSource`; never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadEnd {
    /// 0-based position of the representative coordinate (5' end for
    /// single-end reads, leftmost base for paired fragments).
    pub pos: u32,
    pub reverse_strand: bool,
    /// Fragment length for paired-end reads (`None` for single-end).
    pub template_length: Option<u32>,
}

/// Collaborator interface declared in spec.md §6: `ReadSource.read_counts`.
/// Implementors own the alignment-format I/O (BAM/SAM/CRAM/BED); SPAN's
/// core never parses an alignment file directly.
pub trait ReadSource {
    /// All chromosomes this source knows about, independent of whether
    /// they carry any reads.
    fn chromosomes(&self) -> Vec<String>;

    /// Raw read ends on `chrom`, sorted by `pos`. Empty for a chromosome
    /// with no reads -- not an error (spec.md §4.1).
    fn reads(&self, chrom: &str) -> Result<Vec<ReadEnd>>;

    fn source_path(&self) -> &Path;
}

/// Per-chromosome integer coverage vectors for one track.
#[derive(Debug, Clone, Default)]
pub struct CoverageTrack {
    pub per_chromosome: HashMap<String, Vec<i32>>,
    pub total_reads: u64,
}

impl CoverageTrack {
    pub fn total_reads_on(&self, chrom: &str) -> u64 {
        self.per_chromosome
            .get(chrom)
            .map(|v| v.iter().map(|&c| c as u64).sum())
            .unwrap_or(0)
    }

    pub fn has_reads(&self, chrom: &str) -> bool {
        self.total_reads_on(chrom) > 0
    }
}

/// `bin_coverage(track, bin, fragment?, unique_only) -> per-chromosome i32
/// array`, spec.md §4.1.
///
/// For paired-end reads the fragment midpoint is binned; for single-end
/// reads the read is shifted by `fragment/2` before binning (0 disables
/// the shift; `FragmentMode::Auto` estimates it via cross-correlation,
/// see `fragment::estimate_fragment_size`).
pub fn bin_coverage(
    source: &dyn ReadSource,
    genome: &GenomeQuery,
    fragment: FragmentMode,
    unique_only: bool,
) -> Result<CoverageTrack> {
    let mut track = CoverageTrack::default();
    let mut any_reads = false;

    let resolved_shift = match fragment {
        FragmentMode::Auto => fragment::estimate_fragment_size(source, genome)?,
        FragmentMode::Shift(bp) => bp,
        FragmentMode::None => 0,
    };

    for chrom in genome.chromosomes() {
        let reads = source.reads(chrom)?;
        if reads.is_empty() {
            continue;
        }
        let n_bins = genome.bins(chrom)?;
        let bin_size = genome.bin_size();
        let mut counts = vec![0i32; n_bins];
        let mut seen = std::collections::HashSet::new();

        for read in &reads {
            if unique_only {
                let key = (read.reverse_strand, read.pos);
                if !seen.insert(key) {
                    continue;
                }
            }
            let centered = match read.template_length {
                Some(tlen) if tlen > 0 => read.pos + tlen / 2,
                _ => {
                    if read.reverse_strand {
                        read.pos.saturating_sub(resolved_shift / 2)
                    } else {
                        read.pos + resolved_shift / 2
                    }
                }
            };
            let bin = (centered / bin_size) as usize;
            if bin < n_bins {
                counts[bin] += 1;
                any_reads = true;
            }
        }

        track.total_reads += counts.iter().map(|&c| c as u64).sum::<u64>();
        track.per_chromosome.insert(chrom.clone(), counts);
    }

    if !any_reads {
        warn!(
            "track {:?} has zero reads over the whole requested genome query",
            source.source_path()
        );
        return Err(Error::EmptyCoverage {
            path: source.source_path().to_path_buf(),
        });
    }

    info!(
        "binned {} reads from {:?} across {} chromosomes",
        track.total_reads,
        source.source_path(),
        track.per_chromosome.len()
    );

    Ok(track)
}

/// In-memory `ReadSource` used by tests and by callers that have already
/// materialized read positions (e.g. from a prior BAM scan). Kept in the
/// core crate because the end-to-end scenarios of spec.md §8 are
/// synthetic and never touch a real alignment file.
pub struct InMemoryReadSource {
    path: PathBuf,
    reads: HashMap<String, Vec<ReadEnd>>,
}

impl InMemoryReadSource {
    pub fn new(path: impl Into<PathBuf>, reads: HashMap<String, Vec<ReadEnd>>) -> Self {
        InMemoryReadSource {
            path: path.into(),
            reads,
        }
    }
}

impl ReadSource for InMemoryReadSource {
    fn chromosomes(&self) -> Vec<String> {
        self.reads.keys().cloned().collect()
    }

    fn reads(&self, chrom: &str) -> Result<Vec<ReadEnd>> {
        let mut reads = self.reads.get(chrom).cloned().unwrap_or_default();
        reads.sort_by_key(|r| r.pos);
        Ok(reads)
    }

    fn source_path(&self) -> &Path {
        &self.path
    }
}
