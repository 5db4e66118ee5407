//! Model archive persistence (spec.md §4.5, §6 "Model archive"): a TAR
//! file named `information.json` + `model.json` + `null.npz`, optionally
//! `states.npz` / `coverage_<chr>.npz`, written atomically via a
//! temporary file plus rename.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use tar::{Archive, Builder, Header};
use tempfile::NamedTempFile;

use crate::errors::{Error, Result};
use crate::fit::{FitInformation, FitResults};

/// Bumped whenever the archive layout or `model.json` schema changes.
/// SPAN refuses to load an archive whose version does not match
/// (spec.md §6).
pub const ARCHIVE_VERSION: &str = "1.0";

const INFORMATION_MEMBER: &str = "information.json";
const MODEL_MEMBER: &str = "model.json";
const NULL_MEMBER: &str = "null.npz";

/// Collaborator interface declared in spec.md §6: `ArchiveStore`.
/// `try_load` distinguishes "no archive yet" (`Ok(None)`, caller should
/// fit) from "archive exists but embedded fit-information differs"
/// (`Err(StaleModel)`, per spec.md §4.5's Failure semantics) from
/// "archive exists and matches" (`Ok(Some(..))`).
pub trait ArchiveStore {
    fn try_load(&self, id: &str, expected: &FitInformation) -> Result<Option<FitResults>>;
    fn write(&self, id: &str, results: &FitResults) -> Result<()>;
}

pub struct TarArchiveStore {
    workdir: PathBuf,
    /// Explicit archive path from `-m/--model` (spec.md §6), overriding the
    /// workdir/identifier-derived default location when set.
    explicit_path: Option<PathBuf>,
}

impl TarArchiveStore {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        TarArchiveStore {
            workdir: workdir.into(),
            explicit_path: None,
        }
    }

    pub fn with_explicit_path(workdir: impl Into<PathBuf>, explicit_path: Option<PathBuf>) -> Self {
        TarArchiveStore {
            workdir: workdir.into(),
            explicit_path,
        }
    }

    fn archive_path(&self, id: &str) -> PathBuf {
        self.explicit_path
            .clone()
            .unwrap_or_else(|| self.workdir.join(format!("{}.span", id)))
    }
}

impl ArchiveStore for TarArchiveStore {
    fn try_load(&self, id: &str, expected: &FitInformation) -> Result<Option<FitResults>> {
        let path = self.archive_path(id);
        if !path.exists() {
            return Ok(None);
        }

        let file = fs::File::open(&path)?;
        let mut archive = Archive::new(file);

        let mut information: Option<FitInformation> = None;
        let mut model_bytes: Option<Vec<u8>> = None;
        let mut null_bytes: Option<Vec<u8>> = None;

        for entry in archive.entries().map_err(|e| Error::Tar(e.to_string()))? {
            let mut entry = entry.map_err(|e| Error::Tar(e.to_string()))?;
            let name = entry
                .path()
                .map_err(|e| Error::Tar(e.to_string()))?
                .to_string_lossy()
                .to_string();
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            match name.as_str() {
                INFORMATION_MEMBER => information = Some(serde_json::from_slice(&buf)?),
                MODEL_MEMBER => model_bytes = Some(buf),
                NULL_MEMBER => null_bytes = Some(buf),
                _ => {}
            }
        }

        let information = information.ok_or(Error::MalformedArchive {
            path: path.clone(),
            member: INFORMATION_MEMBER,
        })?;
        let model_bytes = model_bytes.ok_or(Error::MalformedArchive {
            path: path.clone(),
            member: MODEL_MEMBER,
        })?;
        let null_bytes = null_bytes.ok_or(Error::MalformedArchive {
            path: path.clone(),
            member: NULL_MEMBER,
        })?;

        if information.version != ARCHIVE_VERSION {
            return Err(Error::ArchiveVersionMismatch {
                path,
                found: information.version.clone(),
                expected: ARCHIVE_VERSION.to_string(),
            });
        }

        if &information != expected {
            warn!("archive {:?} is stale with respect to the current request", path);
            return Err(Error::StaleModel { path });
        }

        let model = serde_json::from_slice(&model_bytes)?;
        let ln_p0: Vec<f32> = bincode::deserialize(&null_bytes)?;

        info!("loaded cached model archive {:?}", path);
        Ok(Some(FitResults {
            model,
            fit_information: information,
            ln_p0,
            cancelled: false,
            out_of_snr_range: false,
        }))
    }

    fn write(&self, id: &str, results: &FitResults) -> Result<()> {
        fs::create_dir_all(&self.workdir)?;
        let final_path = self.archive_path(id);

        let mut tmp = NamedTempFile::new_in(&self.workdir)
            .map_err(|e| Error::AtomicWriteFailed(e.to_string()))?;
        {
            let mut builder = Builder::new(tmp.as_file_mut());
            append_bytes(
                &mut builder,
                INFORMATION_MEMBER,
                &serde_json::to_vec_pretty(&results.fit_information)?,
            )?;
            append_bytes(
                &mut builder,
                MODEL_MEMBER,
                &serde_json::to_vec_pretty(&results.model)?,
            )?;
            append_bytes(&mut builder, NULL_MEMBER, &bincode::serialize(&results.ln_p0)?)?;
            builder.finish().map_err(|e| Error::Tar(e.to_string()))?;
        }
        tmp.flush()?;
        tmp.persist(&final_path)
            .map_err(|e| Error::AtomicWriteFailed(e.to_string()))?;

        info!("wrote model archive {:?}", final_path);
        Ok(())
    }
}

fn append_bytes<W: Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, name, data)
        .map_err(|e| Error::Tar(e.to_string()))
}

pub fn is_valid_archive_path(path: &Path) -> bool {
    path.extension().map(|e| e == "span").unwrap_or(false)
}
