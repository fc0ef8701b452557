//! Dataset discovery: turn dataset names into per-dataset input file lists.
//!
//! The datasets config looks like
//!
//! ```json
//! { "DATA": {"names": ["/Muon/Run2022C-.../NANOAOD"]}, "MC": {"names": ["..."]} }
//! ```
//!
//! A name that is a local directory contributes its `.csv` files; anything
//! else is resolved through the experiment's dataset catalogue (`dasgoclient`),
//! with each logical file name prefixed by the xrootd redirector.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::DatasetKind;
use crate::error::AppError;
use crate::io::{FileLists, read_json, write_file_lists};

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetEntry {
    pub names: Vec<String>,
}

pub type DatasetConfig = BTreeMap<DatasetKind, DatasetEntry>;

/// Resolves a catalogue dataset name into file locations.
pub trait FileCatalog {
    fn files(&self, dataset: &str) -> Result<Vec<String>, AppError>;
}

/// `dasgoclient`-backed catalogue.
#[derive(Debug, Clone)]
pub struct DasClient {
    redirector: String,
}

impl DasClient {
    pub fn new(redirector: impl Into<String>) -> Self {
        Self {
            redirector: redirector.into(),
        }
    }
}

impl FileCatalog for DasClient {
    fn files(&self, dataset: &str) -> Result<Vec<String>, AppError> {
        let query = format!("file dataset={dataset}");
        debug!("dasgoclient -query=\"{query}\"");
        let output = Command::new("dasgoclient")
            .arg(format!("-query={query}"))
            .output()
            .map_err(|e| AppError::new(2, format!("Failed to run dasgoclient: {e}")))?;
        if !output.status.success() {
            return Err(AppError::new(
                2,
                format!(
                    "dasgoclient failed for '{dataset}': {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| format!("{}{l}", self.redirector))
            .collect())
    }
}

/// `.csv` files directly inside `dir`, sorted by path.
pub fn local_files(dir: &Path) -> Result<Vec<String>, AppError> {
    let entries = fs::read_dir(dir).map_err(|e| {
        AppError::new(2, format!("Failed to list '{}': {e}", dir.display()))
    })?;
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        })
        .collect();
    files.sort();
    Ok(files.into_iter().map(|p| p.display().to_string()).collect())
}

pub fn read_dataset_config(path: &Path) -> Result<DatasetConfig, AppError> {
    if !path.exists() {
        return Err(AppError::new(
            2,
            format!(
                "Datasets config '{}' does not exist. Run from the project root or set [paths].datasets.",
                path.display()
            ),
        ));
    }
    read_json(path, "datasets config")
}

/// Resolve every dataset name of `kinds` and write the file lists to `out`.
pub fn discover_files(
    datasets: &Path,
    out: &Path,
    kinds: &[DatasetKind],
    catalog: &dyn FileCatalog,
) -> Result<FileLists, AppError> {
    info!("Starting dataset queries.");
    let config = read_dataset_config(datasets)?;

    let mut lists = FileLists::new();
    for kind in kinds {
        let entry = config.get(kind).ok_or_else(|| {
            AppError::new(
                2,
                format!("Datasets config '{}' has no entry for {kind}.", datasets.display()),
            )
        })?;
        let mut files = Vec::new();
        for name in &entry.names {
            let path = Path::new(name);
            if path.is_dir() {
                files.extend(local_files(path)?);
            } else {
                files.extend(catalog.files(name)?);
            }
        }
        info!("{kind}: {} file(s) from {} dataset(s)", files.len(), entry.names.len());
        lists.insert(*kind, files);
    }

    write_file_lists(out, &lists)?;
    info!("File lists saved in {}", out.display());
    Ok(lists)
}
