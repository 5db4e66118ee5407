//! Peak record and serialization (C7, spec.md §3, §6): the in-memory
//! peak type and its ENCODE broadPeak-compatible (BED 6+3) tab-separated
//! writer.

use std::io::Write;

use csv::WriterBuilder;

use crate::errors::Result;

/// `(chrom, start, end, -log10(p), -log10(q), value, score)`, spec.md
/// §3. `score` is `min(1000, -log10(q))` rounded to an integer, matching
/// broadPeak's `[0, 1000]` score column.
#[derive(Debug, Clone, PartialEq)]
pub struct Peak {
    pub chrom: String,
    pub start: u32,
    pub end: u32,
    pub value: f64,
    pub neg_log10_p: f64,
    pub neg_log10_q: f64,
}

impl Peak {
    pub fn score(&self) -> u32 {
        self.neg_log10_q.min(1000.0).max(0.0).round() as u32
    }
}

/// Write peaks as tab-separated broadPeak: `chrom, start, end, name,
/// score, strand("."), value, -log10(p), -log10(q)` (spec.md §6).
/// Peaks are expected to already be in the ordering guarantee of spec.md
/// §5 (sorted within chromosome by start then end, chromosomes in
/// canonical order); this function does not re-sort.
pub fn write_peaks<W: Write>(writer: W, peaks: &[Peak]) -> Result<()> {
    let mut csv_writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer);

    for (i, peak) in peaks.iter().enumerate() {
        csv_writer.write_record(&[
            peak.chrom.clone(),
            peak.start.to_string(),
            peak.end.to_string(),
            format!("peak_{}", i + 1),
            peak.score().to_string(),
            ".".to_string(),
            format!("{:.6}", peak.value),
            format!("{:.6}", peak.neg_log10_p),
            format!("{:.6}", peak.neg_log10_q),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}
