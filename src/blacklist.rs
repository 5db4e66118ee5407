//! Blacklist interval sets (spec.md §4.6.7, §6: `BlacklistSet`). Loaded
//! from plain BED files; candidates intersecting a blacklisted interval
//! are dropped before scoring.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

/// Collaborator interface declared in spec.md §6.
pub trait BlacklistSet {
    fn intersects(&self, chrom: &str, start: u32, end: u32) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBlacklist {
    intervals: HashMap<String, Vec<(u32, u32)>>,
}

impl MemoryBlacklist {
    pub fn empty() -> Self {
        MemoryBlacklist::default()
    }

    pub fn from_intervals(intervals: HashMap<String, Vec<(u32, u32)>>) -> Self {
        let mut blacklist = MemoryBlacklist { intervals };
        blacklist.merge_all();
        blacklist
    }

    fn merge_all(&mut self) {
        for entries in self.intervals.values_mut() {
            *entries = merge_intervals(entries);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.values().all(|v| v.is_empty())
    }
}

impl BlacklistSet for MemoryBlacklist {
    fn intersects(&self, chrom: &str, start: u32, end: u32) -> bool {
        match self.intervals.get(chrom) {
            Some(entries) => entries
                .iter()
                .any(|&(a, b)| compute_blacklist_overlap(start, end, a, b) > 0),
            None => false,
        }
    }
}

/// Load a single BED3(+) file into a per-chromosome interval map.
pub fn load_blacklist(path: &Path) -> Result<MemoryBlacklist> {
    let file = File::open(path).with_context(|| format!("opening blacklist {:?}", path))?;
    let reader = BufReader::new(file);

    let mut intervals: HashMap<String, Vec<(u32, u32)>> = HashMap::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {:?} line {}", path, line_no + 1))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("track") {
            continue;
        }
        let mut fields = line.split_whitespace();
        let chrom = fields
            .next()
            .with_context(|| format!("{:?}:{} missing chrom column", path, line_no + 1))?;
        let start: u32 = fields
            .next()
            .with_context(|| format!("{:?}:{} missing start column", path, line_no + 1))?
            .parse()
            .with_context(|| format!("{:?}:{} non-integer start", path, line_no + 1))?;
        let end: u32 = fields
            .next()
            .with_context(|| format!("{:?}:{} missing end column", path, line_no + 1))?
            .parse()
            .with_context(|| format!("{:?}:{} non-integer end", path, line_no + 1))?;
        intervals.entry(chrom.to_string()).or_default().push((start, end));
    }

    info!(
        "loaded blacklist {:?}: {} chromosomes",
        path,
        intervals.len()
    );
    Ok(MemoryBlacklist::from_intervals(intervals))
}

/// Sort-and-sweep interval union, used both when loading a single file
/// (overlapping records within it) and when merging several files.
pub fn merge_intervals(intervals: &[(u32, u32)]) -> Vec<(u32, u32)> {
    if intervals.is_empty() {
        return Vec::new();
    }
    let mut sorted = intervals.to_vec();
    sorted.sort_by_key(|&(start, _)| start);

    let mut merged = vec![sorted[0]];
    for &(start, end) in &sorted[1..] {
        let last = merged.last_mut().unwrap();
        if start <= last.1 {
            last.1 = last.1.max(end);
        } else {
            merged.push((start, end));
        }
    }
    merged
}

/// Length of the overlap between `[a_start, a_end)` and `[b_start,
/// b_end)`, 0 if disjoint.
pub fn compute_blacklist_overlap(a_start: u32, a_end: u32, b_start: u32, b_end: u32) -> u32 {
    let lo = a_start.max(b_start);
    let hi = a_end.min(b_end);
    hi.saturating_sub(lo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_intervals_joins_overlaps() {
        let merged = merge_intervals(&[(10, 20), (15, 25), (30, 40)]);
        assert_eq!(merged, vec![(10, 25), (30, 40)]);
    }

    #[test]
    fn intersects_detects_partial_overlap() {
        let mut intervals = HashMap::new();
        intervals.insert("chr1".to_string(), vec![(100, 200)]);
        let blacklist = MemoryBlacklist::from_intervals(intervals);
        assert!(blacklist.intersects("chr1", 150, 250));
        assert!(!blacklist.intersects("chr1", 300, 400));
        assert!(!blacklist.intersects("chr2", 150, 250));
    }

    #[test]
    fn empty_blacklist_never_intersects() {
        let blacklist = MemoryBlacklist::empty();
        assert!(!blacklist.intersects("chr1", 0, 1_000_000));
        assert!(blacklist.is_empty());
    }
}
