//! Boundary clipping (C6.6, optional, spec.md §4.6.6): tighten a
//! candidate's edges inward while its trimmed density stays below a
//! genome-wide noise-relative threshold, without shifting its center.

/// Geometric step table in bins (the spec's `{10,20,50,100,200,500,1000}
/// x bin_size` collapses to bin counts once the `x bin_size` and the
/// bin-size normalization of density cancel).
const STEP_BINS: &[usize] = &[10, 20, 50, 100, 200, 500, 1000];

const MAX_ITERATIONS_PER_SIDE: usize = 10_000;

/// Genome-wide `avg_signal_density` and `avg_noise_density` (spec.md
/// §4.6.6): mean of `-lnP0` over candidate bins and over the gaps between
/// consecutive (sorted, non-overlapping) candidates respectively.
pub fn densities(ln_p0_chrom: &[f64], candidates: &[(usize, usize)]) -> (f64, f64) {
    let mut signal_sum = 0.0;
    let mut signal_len = 0usize;
    for &(a, b) in candidates {
        signal_sum += ln_p0_chrom[a..b].iter().map(|&v| -v).sum::<f64>();
        signal_len += b - a;
    }

    let mut noise_sum = 0.0;
    let mut noise_len = 0usize;
    let mut prev_end = 0usize;
    for &(a, b) in candidates {
        if a > prev_end {
            noise_sum += ln_p0_chrom[prev_end..a].iter().map(|&v| -v).sum::<f64>();
            noise_len += a - prev_end;
        }
        prev_end = prev_end.max(b);
    }
    if prev_end < ln_p0_chrom.len() {
        noise_sum += ln_p0_chrom[prev_end..].iter().map(|&v| -v).sum::<f64>();
        noise_len += ln_p0_chrom.len() - prev_end;
    }

    let avg_signal = if signal_len > 0 { signal_sum / signal_len as f64 } else { 0.0 };
    let avg_noise = if noise_len > 0 { noise_sum / noise_len as f64 } else { 0.0 };
    (avg_signal, avg_noise)
}

fn clip_side(
    ln_p0_chrom: &[f64],
    start: usize,
    end: usize,
    from_left: bool,
    bin_size: u32,
    max_density: f64,
    max_clipped_length_bp: f64,
) -> usize {
    let mut boundary = if from_left { start } else { end };
    let mut step_idx = 0usize;

    for _ in 0..MAX_ITERATIONS_PER_SIDE {
        let step = STEP_BINS[step_idx];
        let candidate_boundary = if from_left {
            boundary.saturating_add(step)
        } else {
            boundary.saturating_sub(step)
        };

        let (lo, hi) = if from_left {
            (candidate_boundary, end)
        } else {
            (start, candidate_boundary)
        };
        if lo >= hi || candidate_boundary < start || candidate_boundary > end {
            break;
        }

        let clipped_bins = if from_left {
            candidate_boundary - start
        } else {
            end - candidate_boundary
        };
        if clipped_bins as f64 * bin_size as f64 > max_clipped_length_bp {
            if step_idx == 0 {
                break;
            }
            step_idx -= 1;
            continue;
        }

        let density = ln_p0_chrom[lo..hi].iter().map(|&v| -v).sum::<f64>() / (hi - lo) as f64;
        if density < max_density {
            boundary = candidate_boundary;
            step_idx = (step_idx + 1).min(STEP_BINS.len() - 1);
        } else if step_idx == 0 {
            break;
        } else {
            step_idx -= 1;
        }
    }

    boundary
}

/// Clip `candidate`'s boundaries inward (spec.md §4.6.6). `clip` is the
/// fraction in `[0, 1)` controlling both the density threshold and the
/// maximum fraction of the candidate that may be clipped from each side.
pub fn clip_boundaries(
    ln_p0_chrom: &[f64],
    candidate: (usize, usize),
    bin_size: u32,
    clip: f64,
    avg_signal_density: f64,
    avg_noise_density: f64,
) -> (usize, usize) {
    let (start, end) = candidate;
    if clip <= 0.0 || end <= start {
        return candidate;
    }
    let max_density = avg_noise_density + clip * (avg_signal_density - avg_noise_density);
    let max_clipped_length_bp = (end - start) as f64 * bin_size as f64 * clip / 2.0;

    let new_start = clip_side(ln_p0_chrom, start, end, true, bin_size, max_density, max_clipped_length_bp);
    let new_end = clip_side(ln_p0_chrom, new_start, end, false, bin_size, max_density, max_clipped_length_bp);
    (new_start, new_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clipping_never_widens_a_candidate() {
        let mut ln_p0 = vec![-0.01f64; 200];
        for i in 50..150 {
            ln_p0[i] = -10.0;
        }
        let (avg_signal, avg_noise) = densities(&ln_p0, &[(50, 150)]);
        let (start, end) = clip_boundaries(&ln_p0, (50, 150), 100, 0.2, avg_signal, avg_noise);
        assert!(start >= 50);
        assert!(end <= 150);
        assert!(start <= end);
    }

    #[test]
    fn zero_clip_is_a_no_op() {
        let ln_p0 = vec![-5.0f64; 50];
        let result = clip_boundaries(&ln_p0, (10, 40), 100, 0.0, 1.0, 0.0);
        assert_eq!(result, (10, 40));
    }

    #[test]
    fn uniformly_dense_candidate_is_not_clipped() {
        let ln_p0 = vec![-10.0f64; 100];
        let (avg_signal, avg_noise) = densities(&ln_p0, &[(0, 100)]);
        let (start, end) = clip_boundaries(&ln_p0, (0, 100), 100, 0.3, avg_signal, avg_noise);
        assert_eq!((start, end), (0, 100));
    }
}
