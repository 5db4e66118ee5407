use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("fdr must lie in (0, 1), got {value}")]
    InvalidFdr { value: f64 },
    #[error("clip must lie in [0, 1), got {value}")]
    InvalidClip { value: f64 },
    #[error("sensitivity must be finite and <= 0 in log space, got {value}")]
    InvalidSensitivity { value: f64 },
    #[error("gap must be a non-negative number of bins, got {value}")]
    InvalidGap { value: i64 },
    #[error("hmm-low must be positive and less than hmm-snr, got low={low} snr={snr}")]
    InvalidSnrBounds { low: f64, snr: f64 },
    #[error("unreadable input {path}: {source}")]
    UnreadableInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("track {path} contains zero reads on every chromosome")]
    EmptyCoverage { path: PathBuf },
    #[error("effective genome query is empty: no chromosome has reads in any treatment track")]
    EmptyGenomeQuery,
    #[error("chromosome {chrom} not found in chromosome sizes table")]
    UnknownChromosome { chrom: String },
    #[error("archive {path} has version {found}, expected {expected}")]
    ArchiveVersionMismatch {
        path: PathBuf,
        found: String,
        expected: String,
    },
    #[error("archive at {path} does not match the current fit request, refitting required")]
    StaleModel { path: PathBuf },
    #[error("archive {path} is missing required member {member}")]
    MalformedArchive { path: PathBuf, member: &'static str },
    #[error("computation was cancelled")]
    Cancelled,
    #[error("HMM produced a non-finite log-likelihood despite the Poisson fallback")]
    NumericalFailure,
    #[error("failed to write model archive atomically: {0}")]
    AtomicWriteFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("(de)serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("tar archive error: {0}")]
    Tar(String),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Process exit code for this error (spec.md §6: 0 success, 1 fatal
    /// model/I/O error, 2 invalid arguments).
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidFdr { .. }
            | Error::InvalidClip { .. }
            | Error::InvalidSensitivity { .. }
            | Error::InvalidGap { .. }
            | Error::InvalidSnrBounds { .. } => 2,
            _ => 1,
        }
    }
}
