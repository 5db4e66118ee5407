//! Fragment-size handling for single-end tracks (spec.md §4.1).

use log::debug;

use crate::errors::Result;
use crate::genome::GenomeQuery;

use super::ReadSource;

/// How to shift single-end reads toward their estimated fragment center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentMode {
    /// No shift.
    None,
    /// Shift by a fixed number of base pairs (the full fragment length;
    /// `bin_coverage` halves it per strand).
    Shift(u32),
    /// Estimate the shift via strand cross-correlation (the CLI's
    /// `--fragment auto`, the default).
    Auto,
}

/// Candidate shifts searched by `estimate_fragment_size`, in base pairs.
const SHIFT_GRID: &[u32] = &[
    50, 75, 100, 125, 150, 175, 200, 225, 250, 300, 350, 400,
];

/// Estimate fragment size by maximizing the cross-correlation between
/// forward- and reverse-strand coverage, sampled over a subset of
/// chromosomes for performance (SPEC_FULL.md §C.4).
pub fn estimate_fragment_size(source: &dyn ReadSource, genome: &GenomeQuery) -> Result<u32> {
    let sample_chroms: Vec<&String> = genome.chromosomes().iter().take(3).collect();

    let mut best_shift = SHIFT_GRID[0];
    let mut best_score = f64::NEG_INFINITY;

    for &shift in SHIFT_GRID {
        let mut score = 0.0;
        let mut any = false;
        for chrom in &sample_chroms {
            let n_bins = match genome.bins(chrom) {
                Ok(n) => n,
                Err(_) => continue,
            };
            let bin_size = genome.bin_size();
            let reads = source.reads(chrom)?;
            if reads.is_empty() {
                continue;
            }
            any = true;
            let mut fwd = vec![0f64; n_bins];
            let mut rev = vec![0f64; n_bins];
            for read in &reads {
                if read.reverse_strand {
                    let p = read.pos.saturating_sub(shift);
                    let bin = (p / bin_size) as usize;
                    if bin < n_bins {
                        rev[bin] += 1.0;
                    }
                } else {
                    let bin = (read.pos / bin_size) as usize;
                    if bin < n_bins {
                        fwd[bin] += 1.0;
                    }
                }
            }
            score += pearson(&fwd, &rev);
        }
        if any && score > best_score {
            best_score = score;
            best_shift = shift;
        }
    }

    debug!(
        "auto fragment-size estimate: {} bp (cross-correlation {:.4})",
        best_shift, best_score
    );
    Ok(best_shift)
}

/// Pearson correlation coefficient; 0 if either series has zero variance.
fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        0.0
    } else {
        cov / (var_a.sqrt() * var_b.sqrt())
    }
}
