//! Bitmask construction and run-merging shared by sensitivity selection,
//! gap estimation, and candidate assembly (spec.md §4.6.1, §4.6.3).

/// `B[k] = lnP0[k] <= s`, spec.md §4.6.1 / §4.6.3 step 1.
pub fn candidate_mask(ln_p0: &[f64], s: f64) -> Vec<bool> {
    ln_p0.iter().map(|&v| v <= s).collect()
}

/// Aggregate maximal runs of set bits, joining runs separated by `<= gap`
/// unset bits, into half-open `[start, end)` bin-index intervals. A
/// direct, two-pass mark-and-sweep (property test #9 of spec.md §8: must
/// agree exactly with this formulation for any gap).
pub fn merge_mask_to_intervals(mask: &[bool], gap: usize) -> Vec<(usize, usize)> {
    let n = mask.len();
    let mut intervals = Vec::new();
    let mut i = 0;
    while i < n {
        if !mask[i] {
            i += 1;
            continue;
        }
        let start = i;
        let mut end = i + 1;
        while end < n && mask[end] {
            end += 1;
        }
        loop {
            let mut gap_end = end;
            while gap_end < n && !mask[gap_end] {
                gap_end += 1;
            }
            if gap_end < n && gap_end - end <= gap {
                let mut next_end = gap_end + 1;
                while next_end < n && mask[next_end] {
                    next_end += 1;
                }
                end = next_end;
            } else {
                break;
            }
        }
        intervals.push((start, end));
        i = end;
    }
    intervals
}

/// Number of candidate intervals and their average length (in bins) at a
/// given sensitivity and gap (spec.md §4.6.1's `(n(s), al(s))`).
pub fn count_and_average_length(ln_p0: &[f64], s: f64, gap: usize) -> (usize, f64) {
    let mask = candidate_mask(ln_p0, s);
    let intervals = merge_mask_to_intervals(&mask, gap);
    let n = intervals.len();
    if n == 0 {
        return (0, 0.0);
    }
    let total: usize = intervals.iter().map(|&(a, b)| b - a).sum();
    (n, total as f64 / n as f64)
}

/// Number of candidate intervals at `(s, gap)`, used directly by gap
/// estimation's ratio `f(g)` (spec.md §4.6.2).
pub fn n_candidates(ln_p0: &[f64], s: f64, gap: usize) -> usize {
    let mask = candidate_mask(ln_p0, s);
    merge_mask_to_intervals(&mask, gap).len()
}

pub fn intervals_overlap(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

/// Split a candidate at well-separated summits found by intersecting with
/// a stricter bitmask (spec.md §4.6.3 step 3). Splits occur at the
/// midpoint of the gap between consecutive accepted summit runs; summits
/// closer than `min_relative_distance * candidate_length` are treated as
/// one summit.
pub fn split_on_summits(
    candidate: (usize, usize),
    summit_mask: &[bool],
    min_relative_distance: f64,
) -> Vec<(usize, usize)> {
    let (from, to) = candidate;
    if to <= from {
        return vec![candidate];
    }
    let summit_runs: Vec<(usize, usize)> = merge_mask_to_intervals(&summit_mask[from..to], 0)
        .into_iter()
        .map(|(a, b)| (a + from, b + from))
        .collect();
    if summit_runs.len() < 2 {
        return vec![candidate];
    }

    let length = (to - from) as f64;
    let min_distance = min_relative_distance * length;
    let mut kept = vec![summit_runs[0]];
    for &(a, b) in &summit_runs[1..] {
        let last = *kept.last().unwrap();
        let last_center = (last.0 + last.1) as f64 / 2.0;
        let center = (a + b) as f64 / 2.0;
        if center - last_center >= min_distance {
            kept.push((a, b));
        }
    }
    if kept.len() < 2 {
        return vec![candidate];
    }

    let mut splits = vec![from];
    for pair in kept.windows(2) {
        let mid = (pair[0].1 + pair[1].0) / 2;
        splits.push(mid.clamp(from, to));
    }
    splits.push(to);
    splits.windows(2).map(|w| (w[0], w[1])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_respects_gap_threshold() {
        let mask = vec![true, false, false, true, false, false, false, true];
        assert_eq!(merge_mask_to_intervals(&mask, 0), vec![(0, 1), (3, 4), (7, 8)]);
        assert_eq!(merge_mask_to_intervals(&mask, 2), vec![(0, 4), (7, 8)]);
        assert_eq!(merge_mask_to_intervals(&mask, 3), vec![(0, 8)]);
    }

    #[test]
    fn merge_matches_naive_mark_and_sweep() {
        let mask = vec![
            true, true, false, false, true, false, true, true, false, false, false, true,
        ];
        for gap in 0..=4 {
            let fast = merge_mask_to_intervals(&mask, gap);
            let naive = naive_merge(&mask, gap);
            assert_eq!(fast, naive, "gap={}", gap);
        }
    }

    fn naive_merge(mask: &[bool], gap: usize) -> Vec<(usize, usize)> {
        let n = mask.len();
        let mut merged = mask.to_vec();
        // Two passes: grow each set bin rightward across <= gap unset bins if
        // a set bin lies beyond, then collapse runs.
        loop {
            let mut changed = false;
            for i in 0..n {
                if merged[i] {
                    continue;
                }
                let left_set = i > 0 && merged[..i].iter().rev().take(gap).any(|&b| b);
                if !left_set {
                    continue;
                }
                for j in (i + 1)..n.min(i + gap + 2) {
                    if merged[j] {
                        for k in i..j {
                            if !merged[k] {
                                merged[k] = true;
                                changed = true;
                            }
                        }
                        break;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        let mut intervals = Vec::new();
        let mut i = 0;
        while i < n {
            if merged[i] {
                let start = i;
                while i < n && merged[i] {
                    i += 1;
                }
                intervals.push((start, i));
            } else {
                i += 1;
            }
        }
        intervals
    }

    #[test]
    fn summit_split_creates_two_candidates_when_well_separated() {
        let candidate = (0, 20);
        let mut summit_mask = vec![false; 20];
        for i in 0..3 {
            summit_mask[i] = true;
        }
        for i in 17..20 {
            summit_mask[i] = true;
        }
        let split = split_on_summits(candidate, &summit_mask, 0.1);
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].0, 0);
        assert_eq!(split.last().unwrap().1, 20);
    }

    #[test]
    fn close_summits_are_not_split() {
        let candidate = (0, 20);
        let mut summit_mask = vec![false; 20];
        summit_mask[9] = true;
        summit_mask[10] = true;
        let split = split_on_summits(candidate, &summit_mask, 0.5);
        assert_eq!(split, vec![candidate]);
    }
}
