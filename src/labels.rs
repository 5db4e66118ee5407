//! Labels & tuning (C8, optional, spec.md §2 table, §6 `--labels`):
//! semi-supervised grid search over `(sensitivity, gap)` minimizing
//! disagreement against a hand-curated label BED file.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::cancellation::CancellationToken;
use crate::genome::GenomeQuery;
use crate::peaks::{call_peaks, PeakCallParams};

/// A label interval: ground truth for whether a region should be called
/// enriched (`true`) or not (`false`, e.g. a curated negative region).
#[derive(Debug, Clone)]
pub struct Label {
    pub chrom: String,
    pub start: u32,
    pub end: u32,
    pub enriched: bool,
}

/// Parse a 3 or 4-column BED-like label file. A 4th column of `0` is
/// treated as a negative label; anything else (or its absence) as
/// positive.
pub fn load_labels(path: &Path) -> Result<Vec<Label>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening labels file {:?}", path))?;

    let mut labels = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("reading labels file {:?}", path))?;
        if record.len() < 3 {
            continue;
        }
        let chrom = record[0].to_string();
        let start: u32 = record[1].parse().with_context(|| "non-integer label start")?;
        let end: u32 = record[2].parse().with_context(|| "non-integer label end")?;
        let enriched = record.get(3).map(|v| v != "0").unwrap_or(true);
        labels.push(Label {
            chrom,
            start,
            end,
            enriched,
        });
    }
    info!("loaded {} labels from {:?}", labels.len(), path);
    Ok(labels)
}

/// Sensitivity candidates searched by [`tune`]: multiplicative offsets
/// around the auto-selected sensitivity in log space.
const SENSITIVITY_OFFSETS: &[f64] = &[-2.0, -1.0, -0.5, 0.0, 0.5, 1.0, 2.0];
const GAP_CANDIDATES: &[usize] = &[0, 1, 2, 3, 5, 10, 20];

/// Error against a label set: the fraction of labeled bases misclassified
/// (called enriched where the label says background, or vice versa).
fn label_error(peaks: &[crate::peak_record::Peak], labels: &[Label]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let mut misclassified_bases = 0u64;
    let mut total_bases = 0u64;
    for label in labels {
        let length = (label.end.saturating_sub(label.start)) as u64;
        total_bases += length;
        let covered: u64 = peaks
            .iter()
            .filter(|p| p.chrom == label.chrom)
            .map(|p| {
                let lo = p.start.max(label.start);
                let hi = p.end.min(label.end);
                hi.saturating_sub(lo) as u64
            })
            .sum();
        if label.enriched {
            misclassified_bases += length.saturating_sub(covered);
        } else {
            misclassified_bases += covered;
        }
    }
    if total_bases == 0 {
        0.0
    } else {
        misclassified_bases as f64 / total_bases as f64
    }
}

/// Grid search `(sensitivity, gap)` minimizing [`label_error`] against
/// the auto-selected sensitivity as a center point (spec.md §2's C8
/// responsibility: "semi-supervised grid search over (sensitivity, gap)
/// by label error").
pub fn tune(
    genome: &GenomeQuery,
    ln_p0: &BTreeMap<String, Vec<f64>>,
    labels: &[Label],
    base_params: &PeakCallParams,
    cancel: &CancellationToken,
) -> PeakCallParams {
    let flat: Vec<f64> = genome
        .chromosomes()
        .iter()
        .flat_map(|chrom| ln_p0.get(chrom).cloned().unwrap_or_default())
        .collect();
    let auto_sensitivity =
        crate::peaks::sensitivity::auto_select_sensitivity(&flat, base_params.fdr, cancel);

    let mut best_params = base_params.clone();
    best_params.sensitivity = Some(auto_sensitivity);
    let mut best_error = f64::INFINITY;

    for &offset in SENSITIVITY_OFFSETS {
        for &gap in GAP_CANDIDATES {
            if cancel.is_cancelled() {
                return best_params;
            }
            let mut candidate_params = base_params.clone();
            candidate_params.sensitivity = Some(auto_sensitivity + offset);
            candidate_params.gap = Some(gap);

            let peaks = call_peaks(genome, ln_p0, None, None, &candidate_params, cancel);
            let error = label_error(&peaks, labels);
            if error < best_error {
                best_error = error;
                best_params = candidate_params;
            }
        }
    }

    info!(
        "label-tuned sensitivity={:?} gap={:?} error={:.4}",
        best_params.sensitivity, best_params.gap, best_error
    );
    best_params
}
