//! Multiple-testing correction across every candidate genome-wide (C6.5,
//! spec.md §4.6.5), in log space throughout.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultipleTesting {
    #[serde(rename = "BH")]
    BenjaminiHochberg,
    #[serde(rename = "BONFERRONI")]
    Bonferroni,
}

impl Default for MultipleTesting {
    fn default() -> Self {
        MultipleTesting::BenjaminiHochberg
    }
}

/// Adjust a genome-wide vector of log-p-values, producing log-q-values
/// (spec.md §4.6.5). Bonferroni is `logP + ln(n)`; Benjamini-Hochberg is
/// the usual step-up procedure, `logQ_(k) = min_{j >= k} (logP_(j) +
/// ln(n) - ln(j))`, carried out entirely in log space.
pub fn adjust(log_p_values: &[f64], method: MultipleTesting) -> Vec<f64> {
    let n = log_p_values.len();
    if n == 0 {
        return Vec::new();
    }
    match method {
        MultipleTesting::Bonferroni => {
            let ln_n = (n as f64).ln();
            log_p_values.iter().map(|&p| p + ln_n).collect()
        }
        MultipleTesting::BenjaminiHochberg => {
            let ln_n = (n as f64).ln();
            let mut order: Vec<usize> = (0..n).collect();
            order.sort_by(|&a, &b| log_p_values[a].partial_cmp(&log_p_values[b]).unwrap());

            let mut log_q = vec![0.0f64; n];
            let mut running_min = f64::INFINITY;
            for (rank_from_largest, &i) in order.iter().rev().enumerate() {
                let rank = n - rank_from_largest;
                let candidate = log_p_values[i] + ln_n - (rank as f64).ln();
                running_min = running_min.min(candidate);
                log_q[i] = running_min;
            }
            log_q
        }
    }
}

/// Reject iff both the raw and adjusted log-p-values clear the
/// log-space FDR bound (spec.md §4.6.5).
pub fn rejects(log_p: f64, log_q: f64, log_fdr: f64) -> bool {
    log_p <= log_fdr && log_q <= log_fdr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bonferroni_adds_ln_n() {
        let log_p = vec![(-5.0f64), (-3.0), (-1.0)];
        let log_q = adjust(&log_p, MultipleTesting::Bonferroni);
        let ln3 = 3f64.ln();
        for (p, q) in log_p.iter().zip(log_q.iter()) {
            assert!((q - (p + ln3)).abs() < 1e-9);
        }
    }

    #[test]
    fn bh_is_monotonic_in_rank() {
        let log_p = vec![(-10.0f64), (-1.0), (-5.0), (-0.1)];
        let log_q = adjust(&log_p, MultipleTesting::BenjaminiHochberg);
        let mut order: Vec<usize> = (0..log_p.len()).collect();
        order.sort_by(|&a, &b| log_p[a].partial_cmp(&log_p[b]).unwrap());
        for pair in order.windows(2) {
            assert!(log_q[pair[0]] <= log_q[pair[1]] + 1e-9);
        }
    }

    #[test]
    fn bh_q_values_are_never_smaller_than_bonferroni() {
        let log_p = vec![(-10.0f64), (-1.0), (-5.0), (-0.1), (-0.05)];
        let bh = adjust(&log_p, MultipleTesting::BenjaminiHochberg);
        let bonf = adjust(&log_p, MultipleTesting::Bonferroni);
        for i in 0..log_p.len() {
            assert!(bh[i] <= bonf[i] + 1e-9);
        }
    }
}
