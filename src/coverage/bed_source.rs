//! Plain-BED-backed `ReadSource` for `--format BED` tracks (spec.md §6).
//! Reads are already intervals rather than CIGAR-aligned records, so each
//! BED line becomes one `ReadEnd` at its start coordinate; strand comes
//! from an optional 6th column (`+`/`-`, default `+`).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::coverage::{ReadEnd, ReadSource};
use crate::errors::{Error, Result};

pub struct BedReadSource {
    path: PathBuf,
    reads: HashMap<String, Vec<ReadEnd>>,
}

impl BedReadSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| Error::UnreadableInput {
            path: path.clone(),
            source: e,
        })?;
        let reader = BufReader::new(file);

        let mut reads: HashMap<String, Vec<ReadEnd>> = HashMap::new();
        for line in reader.lines() {
            let line = line.map_err(|e| Error::UnreadableInput {
                path: path.clone(),
                source: e,
            })?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("track") {
                continue;
            }
            let mut fields = line.split('\t');
            let chrom = match fields.next() {
                Some(c) => c.to_string(),
                None => continue,
            };
            let start: u32 = match fields.next().and_then(|v| v.parse().ok()) {
                Some(v) => v,
                None => continue,
            };
            let strand = fields.nth(3).unwrap_or("+");
            reads.entry(chrom).or_default().push(ReadEnd {
                pos: start,
                reverse_strand: strand == "-",
                template_length: None,
            });
        }
        for values in reads.values_mut() {
            values.sort_by_key(|r| r.pos);
        }
        Ok(BedReadSource { path, reads })
    }
}

impl ReadSource for BedReadSource {
    fn chromosomes(&self) -> Vec<String> {
        self.reads.keys().cloned().collect()
    }

    fn reads(&self, chrom: &str) -> Result<Vec<ReadEnd>> {
        Ok(self.reads.get(chrom).cloned().unwrap_or_default())
    }

    fn source_path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_chrom_start_and_strand() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chr1\t100\t150\tread1\t0\t-").unwrap();
        writeln!(file, "chr1\t300\t350\tread2\t0\t+").unwrap();
        let source = BedReadSource::open(file.path()).unwrap();
        let reads = source.reads("chr1").unwrap();
        assert_eq!(reads.len(), 2);
        assert!(reads[0].reverse_strand);
        assert!(!reads[1].reverse_strand);
    }
}
