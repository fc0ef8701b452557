//! Read/write the JSON artifacts passed between pipeline stages.
//!
//! - `hist_dir/<DTMC>.json`: 2D histograms of MET components vs. pileup
//! - `corr_dir/<DTMC>.json`: fitted correction parameters
//! - `hist_dir/validation_<DTMC>.json`: 1D validation histograms
//! - `inputs/nanoAODs/{year}.json`: per-dataset input file lists
//!
//! Each artifact is rewritten as a whole; nothing is appended in place.

use std::collections::BTreeMap;
use std::fs::{File, create_dir_all};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{CorrectionParams, DatasetKind};
use crate::error::AppError;
use crate::math::{Hist1D, Hist2D};

pub const TOOL_NAME: &str = "xycorr";

/// Histograms filled for one dataset kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramFile {
    pub tool: String,
    pub year: String,
    pub dataset: DatasetKind,
    pub hists: BTreeMap<String, Hist2D>,
}

impl HistogramFile {
    pub fn new(year: &str, dataset: DatasetKind) -> Self {
        Self {
            tool: TOOL_NAME.to_string(),
            year: year.to_string(),
            dataset,
            hists: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&Hist2D, AppError> {
        self.hists.get(name).ok_or_else(|| {
            AppError::new(
                2,
                format!(
                    "Histogram '{name}' not found in the {} histogram file for {}.",
                    self.dataset, self.year
                ),
            )
        })
    }
}

/// Uncorrected and corrected pt/phi distributions for one dataset kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFile {
    pub tool: String,
    pub year: String,
    pub dataset: DatasetKind,
    /// Largest |schema − direct| deviation of the nominal corrected pt/phi.
    pub closure_max_deviation: f64,
    pub hists: BTreeMap<String, Hist1D>,
}

/// Input files per dataset kind, as produced by dataset discovery.
pub type FileLists = BTreeMap<DatasetKind, Vec<String>>;

pub fn write_json<T: Serialize>(path: &Path, value: &T, label: &str) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent).map_err(|e| {
            AppError::new(2, format!("Failed to create directory '{}': {e}", parent.display()))
        })?;
    }
    let file = File::create(path).map_err(|e| {
        AppError::new(2, format!("Failed to create {label} '{}': {e}", path.display()))
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| AppError::new(2, format!("Failed to write {label}: {e}")))?;
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to write {label}: {e}")))
}

pub fn read_json<T: DeserializeOwned>(path: &Path, label: &str) -> Result<T, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(2, format!("Failed to open {label} '{}': {e}", path.display()))
    })?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid {label} '{}': {e}", path.display())))
}

pub fn write_histogram_file(path: &Path, hists: &HistogramFile) -> Result<(), AppError> {
    write_json(path, hists, "histogram file")
}

pub fn read_histogram_file(path: &Path) -> Result<HistogramFile, AppError> {
    let file: HistogramFile = read_json(path, "histogram file")?;
    for hist in file.hists.values() {
        hist.validate().map_err(|e| e.context(path.display()))?;
    }
    Ok(file)
}

pub fn write_params(path: &Path, params: &CorrectionParams) -> Result<(), AppError> {
    write_json(path, params, "correction parameters")
}

pub fn read_params(path: &Path) -> Result<CorrectionParams, AppError> {
    read_json(path, "correction parameters")
}

pub fn write_validation_file(path: &Path, file: &ValidationFile) -> Result<(), AppError> {
    write_json(path, file, "validation file")
}

pub fn write_file_lists(path: &Path, lists: &FileLists) -> Result<(), AppError> {
    write_json(path, lists, "file list")
}

pub fn read_file_lists(path: &Path) -> Result<FileLists, AppError> {
    read_json(path, "file list")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Component, FitParams, WeightVariation};
    use crate::math::Axis;

    #[test]
    fn histogram_file_round_trips_and_reports_missing_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hists").join("MC.json");

        let axis = Axis::new(4, 0.0, 4.0).unwrap();
        let mut h = Hist2D::new("PV_npvsGood_MET_x_puweight", axis, axis);
        h.fill(1.5, 2.5, 0.75);
        let mut file = HistogramFile::new("2022_Summer22", DatasetKind::Mc);
        file.hists.insert(h.name.clone(), h);

        write_histogram_file(&path, &file).unwrap();
        let back = read_histogram_file(&path).unwrap();
        assert_eq!(back, file);

        let err = back.get("PV_npvsGood_MET_y_puweight").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn truncated_histogram_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("DATA.json");

        let x = Axis::new(100, 0.0, 100.0).unwrap();
        let y = Axis::new(200, -100.0, 100.0).unwrap();
        let mut h = Hist2D::new("PV_npvsGood_MET_x", x, y);
        h.content.truncate(2);
        let mut file = HistogramFile::new("2022_Summer22", DatasetKind::Data);
        file.hists.insert(h.name.clone(), h);
        write_histogram_file(&path, &file).unwrap();

        let err = read_histogram_file(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.message().contains("DATA.json"));
        assert!(err.message().contains("corrupt"));
    }

    #[test]
    fn params_file_uses_nested_string_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("DATA.json");
        let mut params = CorrectionParams::new();
        let fit = FitParams {
            m: 0.1,
            m_stat: 0.01,
            c: -0.3,
            c_stat: 0.02,
            correlation: -0.9,
        };
        params.insert("PuppiMET", "PV_npvsGood", Component::Y, WeightVariation::Nominal, fit);
        write_params(&path, &params).unwrap();

        let raw: serde_json::Value = read_json(&path, "raw").unwrap();
        assert_eq!(raw["PuppiMET"]["PV_npvsGood"]["_y"]["nom"]["m"], 0.1);
        assert_eq!(read_params(&path).unwrap(), params);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_file_lists(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.message().contains("file list"));
    }
}
