//! Chromosome bookkeeping: sizes, canonical ordering, bin offsets.
//!
//! Downstream components (C2 onward) consume only the *effective* genome
//! query -- the canonically sorted subset of chromosomes that actually
//! carry reads in at least one treatment track. See spec.md §3.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::errors::{Error, Result};

/// Default bin width in base pairs.
pub const DEFAULT_BIN_SIZE: u32 = 100;

/// An ordered, bin-addressable view of a genome (or a filtered subset of
/// one). `names` is always sorted lexicographically; `offsets[i]..offsets[i+1]`
/// gives the global bin-index range of chromosome `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenomeQuery {
    names: Vec<String>,
    lengths: Vec<u32>,
    bin_size: u32,
    offsets: Vec<usize>,
}

impl GenomeQuery {
    /// Build a canonically sorted genome query from a chromosome-sizes
    /// table (the `ChromosomeIndex` collaborator, spec.md §6).
    pub fn new(sizes: &HashMap<String, u32>, bin_size: u32) -> Self {
        let mut names: Vec<String> = sizes.keys().cloned().collect();
        names.sort();
        let lengths: Vec<u32> = names.iter().map(|n| sizes[n]).collect();
        Self::from_sorted(names, lengths, bin_size)
    }

    fn from_sorted(names: Vec<String>, lengths: Vec<u32>, bin_size: u32) -> Self {
        let mut offsets = Vec::with_capacity(names.len() + 1);
        offsets.push(0);
        for &len in &lengths {
            let bins = bins_for_length(len, bin_size);
            offsets.push(offsets.last().unwrap() + bins);
        }
        GenomeQuery {
            names,
            lengths,
            bin_size,
            offsets,
        }
    }

    /// Restrict this query to the chromosomes for which `has_reads` returns
    /// true. Returns `Error::EmptyGenomeQuery` if nothing survives -- the
    /// sole invariant violation downstream components rely on never seeing.
    pub fn effective<F: Fn(&str) -> bool>(&self, has_reads: F) -> Result<GenomeQuery> {
        let mut names = Vec::new();
        let mut lengths = Vec::new();
        for (name, &len) in self.names.iter().zip(self.lengths.iter()) {
            if has_reads(name) {
                names.push(name.clone());
                lengths.push(len);
            }
        }
        if names.is_empty() {
            return Err(Error::EmptyGenomeQuery);
        }
        Ok(Self::from_sorted(names, lengths, self.bin_size))
    }

    pub fn bin_size(&self) -> u32 {
        self.bin_size
    }

    pub fn chromosomes(&self) -> &[String] {
        &self.names
    }

    pub fn length(&self, chrom: &str) -> Result<u32> {
        self.index_of(chrom).map(|i| self.lengths[i])
    }

    pub fn bins(&self, chrom: &str) -> Result<usize> {
        let i = self.index_of(chrom)?;
        Ok(self.offsets[i + 1] - self.offsets[i])
    }

    pub fn total_bins(&self) -> usize {
        *self.offsets.last().unwrap_or(&0)
    }

    /// The global bin-index range `[start, end)` owned by `chrom`.
    pub fn offset_range(&self, chrom: &str) -> Result<std::ops::Range<usize>> {
        let i = self.index_of(chrom)?;
        Ok(self.offsets[i]..self.offsets[i + 1])
    }

    /// `offsets_map[i..i+1]` from spec.md §3, exposed as a slice.
    pub fn offsets_map(&self) -> &[usize] {
        &self.offsets
    }

    pub fn index_of(&self, chrom: &str) -> Result<usize> {
        self.names
            .binary_search(&chrom.to_string())
            .map_err(|_| Error::UnknownChromosome {
                chrom: chrom.to_string(),
            })
    }

    /// Global bin index -> (chromosome name, local bin index).
    pub fn locate(&self, global_bin: usize) -> (&str, usize) {
        let chrom_idx = match self.offsets.binary_search(&global_bin) {
            Ok(i) if i < self.names.len() => i,
            Ok(i) => i - 1,
            Err(i) => i - 1,
        };
        (&self.names[chrom_idx], global_bin - self.offsets[chrom_idx])
    }

    /// Local bin index -> `[start, end)` base-pair half-open interval.
    pub fn bin_interval(&self, local_bin: usize) -> (u32, u32) {
        let start = local_bin as u32 * self.bin_size;
        let end = start + self.bin_size;
        (start, end)
    }
}

fn bins_for_length(length: u32, bin_size: u32) -> usize {
    ((length as u64 + bin_size as u64 - 1) / bin_size as u64) as usize
}

/// Load a two-column `chrom<TAB>length` table (the `ChromosomeIndex`
/// collaborator's on-disk form, spec.md §6).
pub fn load_chrom_sizes(path: &Path) -> Result<HashMap<String, u32>> {
    let file = File::open(path).map_err(|e| Error::UnreadableInput {
        path: path.to_path_buf(),
        source: e,
    })?;
    let reader = BufReader::new(file);

    let mut sizes = HashMap::new();
    for line in reader.lines() {
        let line = line.map_err(|e| Error::UnreadableInput {
            path: path.to_path_buf(),
            source: e,
        })?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let name = match fields.next() {
            Some(name) => name,
            None => continue,
        };
        let length = match fields.next().and_then(|v| v.parse::<u32>().ok()) {
            Some(length) => length,
            None => continue,
        };
        sizes.insert(name.to_string(), length);
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes() -> HashMap<String, u32> {
        let mut m = HashMap::new();
        m.insert("chr2".to_string(), 250);
        m.insert("chr1".to_string(), 1000);
        m
    }

    #[test]
    fn canonical_sort_by_name() {
        let q = GenomeQuery::new(&sizes(), 100);
        assert_eq!(q.chromosomes(), &["chr1", "chr2"]);
    }

    #[test]
    fn bin_counts_and_offsets() {
        let q = GenomeQuery::new(&sizes(), 100);
        assert_eq!(q.bins("chr1").unwrap(), 10);
        assert_eq!(q.bins("chr2").unwrap(), 3);
        assert_eq!(q.total_bins(), 13);
        assert_eq!(q.offset_range("chr1").unwrap(), 0..10);
        assert_eq!(q.offset_range("chr2").unwrap(), 10..13);
    }

    #[test]
    fn locate_round_trips_offset_range() {
        let q = GenomeQuery::new(&sizes(), 100);
        assert_eq!(q.locate(0).0, "chr1");
        assert_eq!(q.locate(9).0, "chr1");
        assert_eq!(q.locate(10).0, "chr2");
        assert_eq!(q.locate(12).0, "chr2");
    }

    #[test]
    fn effective_query_filters_empty_chromosomes() {
        let q = GenomeQuery::new(&sizes(), 100);
        let eff = q.effective(|c| c == "chr1").unwrap();
        assert_eq!(eff.chromosomes(), &["chr1"]);
    }

    #[test]
    fn effective_query_empty_is_an_error() {
        let q = GenomeQuery::new(&sizes(), 100);
        assert!(matches!(
            q.effective(|_| false),
            Err(Error::EmptyGenomeQuery)
        ));
    }

    #[test]
    fn load_chrom_sizes_parses_a_two_column_table() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chr1\t1000").unwrap();
        writeln!(file, "# a comment").unwrap();
        writeln!(file, "chr2 250").unwrap();
        let sizes = load_chrom_sizes(file.path()).unwrap();
        assert_eq!(sizes.get("chr1"), Some(&1000));
        assert_eq!(sizes.get("chr2"), Some(&250));
        assert_eq!(sizes.len(), 2);
    }
}
