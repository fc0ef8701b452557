//! Pipeline stages: prep → snapshot → hists → corr → convert → validate.
//!
//! Stages only talk to each other through files under the run's
//! [`RunPaths`], so any of them can be rerun on its own.

use std::path::PathBuf;

use crate::config::{RunPaths, Settings};
use crate::domain::DatasetKind;
use crate::error::AppError;
use crate::io::list_snapshots;

pub mod convert;
pub mod corr;
pub mod hists;
pub mod prep;
pub mod snapshot;
pub mod validate;

/// Everything a stage needs to know about the current run.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub settings: Settings,
    pub paths: RunPaths,
    pub year: String,
    pub version: String,
    pub mets: Vec<String>,
    pub pileups: Vec<String>,
    pub kinds: Vec<DatasetKind>,
    /// Worker threads; 0 lets rayon pick.
    pub jobs: usize,
}

impl StageContext {
    pub fn new(
        settings: Settings,
        year: &str,
        version: &str,
        mets: Vec<String>,
        pileups: Vec<String>,
        kinds: Vec<DatasetKind>,
    ) -> Result<Self, AppError> {
        settings.epoch(year)?;
        if mets.is_empty() || pileups.is_empty() || kinds.is_empty() {
            return Err(AppError::new(
                2,
                "At least one MET type, pileup variable and dataset type is required.",
            ));
        }
        let paths = settings.paths(year, version);
        Ok(Self {
            settings,
            paths,
            year: year.to_string(),
            version: version.to_string(),
            mets,
            pileups,
            kinds,
            jobs: 0,
        })
    }

    /// Snapshot directories of the selected dataset kinds.
    pub fn snapshot_dirs(&self) -> Vec<PathBuf> {
        self.kinds.iter().map(|k| self.paths.snapshot_dir(*k)).collect()
    }

    /// Snapshot files of one dataset kind; none at all is a "no data" error.
    pub fn snapshot_files(&self, kind: DatasetKind) -> Result<Vec<PathBuf>, AppError> {
        let dir = self.paths.snapshot_dir(kind);
        let files = list_snapshots(&dir)?;
        if files.is_empty() {
            return Err(AppError::new(
                3,
                format!("No {kind} snapshots in '{}'. Run the snapshot stage first (-S).", dir.display()),
            ));
        }
        Ok(files)
    }
}
