//! Run configuration: known epochs, path layout, binning and fit range.
//!
//! Resolution order (later wins):
//!
//! 1. built-in defaults (the four Run 3 epochs, standard binning)
//! 2. `xycorr.toml` in the working directory, or the file given with `--config`
//! 3. environment (`.env` honoured): `XYCORR_SNAP_DIR`, `XYCORR_RESULTS_DIR`,
//!    `XYCORR_REDIRECTOR`
//!
//! Example `xycorr.toml`:
//!
//! ```toml
//! [epochs.2024_Prompt]
//! lumi_data = "109fb^{-1} (13.6 TeV)"
//! lumi_mc = "(13.6 TeV)"
//! label = "2024"
//!
//! [paths]
//! snapshots_root = "/ceph/user/xycorr/snapshots"
//!
//! [fit_range]
//! lo = 5.0
//! hi = 60.0
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::DatasetKind;
use crate::error::AppError;
use crate::fit::FitRange;
use crate::math::Axis;

pub const DEFAULT_CONFIG_FILE: &str = "xycorr.toml";

/// Display labels of one data-taking epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochConfig {
    pub lumi_data: String,
    pub lumi_mc: String,
    pub label: String,
}

impl EpochConfig {
    fn new(lumi_data: &str, label: &str) -> Self {
        Self {
            lumi_data: lumi_data.to_string(),
            lumi_mc: "(13.6 TeV)".to_string(),
            label: label.to_string(),
        }
    }

    pub fn lumi_label(&self, kind: DatasetKind) -> &str {
        match kind {
            DatasetKind::Data => &self.lumi_data,
            DatasetKind::Mc => &self.lumi_mc,
        }
    }
}

/// Path templates; `{year}` and `{version}` are substituted per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathTemplates {
    pub datasets: String,
    pub file_lists: String,
    pub golden_json: String,
    pub pileup_json: String,
    pub results_root: String,
    pub snapshots_root: String,
    /// Prefix for remote files returned by dataset queries.
    pub redirector: String,
}

impl Default for PathTemplates {
    fn default() -> Self {
        Self {
            datasets: "inputs/config/datasets.json".to_string(),
            file_lists: "inputs/nanoAODs/{year}.json".to_string(),
            golden_json: "inputs/jsons/Run3_2022_2023_Golden.json".to_string(),
            pileup_json: "inputs/jsonpog/POG/LUM/{year}/puWeights.json".to_string(),
            results_root: "results".to_string(),
            snapshots_root: "snapshots".to_string(),
            redirector: "root://cms-xrd-global.cern.ch/".to_string(),
        }
    }
}

/// Histogram axes used by the histogram and validation stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    /// MET x/y component.
    pub met: Axis,
    pub pileup: Axis,
    pub pt: Axis,
    pub phi: Axis,
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self {
            met: Axis {
                bins: 200,
                min: -200.0,
                max: 200.0,
            },
            pileup: Axis {
                bins: 100,
                min: 0.0,
                max: 100.0,
            },
            pt: Axis {
                bins: 100,
                min: 0.0,
                max: 200.0,
            },
            phi: Axis {
                bins: 30,
                min: -3.14,
                max: 3.14,
            },
        }
    }
}

impl BinningConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        for (name, axis) in [
            ("met", self.met),
            ("pileup", self.pileup),
            ("pt", self.pt),
            ("phi", self.phi),
        ] {
            axis.validate()
                .map_err(|e| e.context(format!("binning.{name}")))?;
        }
        Ok(())
    }
}

/// Fully resolved settings for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub epochs: BTreeMap<String, EpochConfig>,
    pub paths: PathTemplates,
    pub binning: BinningConfig,
    pub fit_range: FitRange,
}

/// On-disk shape of `xycorr.toml`; every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    #[serde(default)]
    epochs: BTreeMap<String, EpochConfig>,
    paths: Option<PathTemplates>,
    binning: Option<BinningConfig>,
    fit_range: Option<FitRange>,
}

impl Default for Settings {
    fn default() -> Self {
        let epochs = [
            ("2022_Summer22", EpochConfig::new("8.0fb^{-1} (13.6 TeV)", "2022 preEE")),
            ("2022_Summer22EE", EpochConfig::new("26.7fb^{-1} (13.6 TeV)", "2022 postEE")),
            ("2023_Summer23", EpochConfig::new("17.6fb^{-1} (13.6 TeV)", "2023 preBPix")),
            ("2023_Summer23BPix", EpochConfig::new("9.5fb^{-1} (13.6 TeV)", "2023 postBPix")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            epochs,
            paths: PathTemplates::default(),
            binning: BinningConfig::default(),
            fit_range: FitRange::default(),
        }
    }
}

impl Settings {
    /// Load defaults, the optional TOML file and environment overrides.
    ///
    /// An explicitly requested config file must exist; the default
    /// `xycorr.toml` is only read when present.
    pub fn load(explicit: Option<&Path>) -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let mut settings = Settings::default();
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let p = PathBuf::from(DEFAULT_CONFIG_FILE);
                p.exists().then_some(p)
            }
        };
        if let Some(path) = path {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                AppError::new(2, format!("Failed to read config '{}': {e}", path.display()))
            })?;
            settings.merge_toml(&content).map_err(|e| e.context(path.display()))?;
            debug!("Loaded config from {}", path.display());
        }

        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Merge a TOML document over the current settings.
    pub fn merge_toml(&mut self, content: &str) -> Result<(), AppError> {
        let file: SettingsFile = toml::from_str(content)
            .map_err(|e| AppError::new(2, format!("Invalid config: {e}")))?;
        self.epochs.extend(file.epochs);
        if let Some(paths) = file.paths {
            self.paths = paths;
        }
        if let Some(binning) = file.binning {
            self.binning = binning;
        }
        if let Some(range) = file.fit_range {
            self.fit_range = range;
        }
        Ok(())
    }

    /// Apply `XYCORR_*` overrides from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("XYCORR_SNAP_DIR") {
            self.paths.snapshots_root = dir;
        }
        if let Some(dir) = lookup("XYCORR_RESULTS_DIR") {
            self.paths.results_root = dir;
        }
        if let Some(prefix) = lookup("XYCORR_REDIRECTOR") {
            self.paths.redirector = prefix;
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.binning.validate()?;
        let r = self.fit_range;
        if !(r.lo.is_finite() && r.hi.is_finite() && r.hi > r.lo) {
            return Err(AppError::new(
                2,
                format!("Invalid fit_range [{}, {}] in config.", r.lo, r.hi),
            ));
        }
        Ok(())
    }

    /// Look up an epoch; unknown epochs are fatal.
    pub fn epoch(&self, year: &str) -> Result<&EpochConfig, AppError> {
        self.epochs.get(year).ok_or_else(|| {
            let known: Vec<&str> = self.epochs.keys().map(String::as_str).collect();
            AppError::new(
                2,
                format!(
                    "No configuration for epoch '{year}'. Known epochs: {}. Add it under [epochs] in {DEFAULT_CONFIG_FILE}.",
                    known.join(", ")
                ),
            )
        })
    }

    /// Resolve every path of a run for one epoch and version tag.
    pub fn paths(&self, year: &str, version: &str) -> RunPaths {
        let t = &self.paths;
        let expand = |template: &str| {
            PathBuf::from(template.replace("{year}", year).replace("{version}", version))
        };
        let results = PathBuf::from(&t.results_root);
        let corrections_root = results.join("corrections").join(version);

        RunPaths {
            datasets: expand(&t.datasets),
            file_lists: expand(&t.file_lists),
            golden_json: expand(&t.golden_json),
            pileup_json: expand(&t.pileup_json),
            corr_dir: corrections_root.join(year),
            hist_dir: results.join("hists").join(version).join(year),
            condor_dir: results.join("condor").join(version).join(year),
            snap_dir: PathBuf::from(&t.snapshots_root).join(version).join(year),
            schema: corrections_root.join(crate::schema::build::schema_file_name(year)),
            corrections_root,
        }
    }
}

/// Concrete paths of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPaths {
    pub datasets: PathBuf,
    pub file_lists: PathBuf,
    pub golden_json: PathBuf,
    pub pileup_json: PathBuf,
    pub corr_dir: PathBuf,
    pub hist_dir: PathBuf,
    pub condor_dir: PathBuf,
    pub snap_dir: PathBuf,
    /// `results/corrections/{version}/`, home of the schema files.
    pub corrections_root: PathBuf,
    pub schema: PathBuf,
}

impl RunPaths {
    pub fn hist_file(&self, kind: DatasetKind) -> PathBuf {
        self.hist_dir.join(format!("{kind}.json"))
    }

    pub fn validation_file(&self, kind: DatasetKind) -> PathBuf {
        self.hist_dir.join(format!("validation_{kind}.json"))
    }

    pub fn params_file(&self, kind: DatasetKind) -> PathBuf {
        self.corr_dir.join(format!("{kind}.json"))
    }

    pub fn snapshot_dir(&self, kind: DatasetKind) -> PathBuf {
        self.snap_dir.join(kind.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_epochs_and_unknown_epoch() {
        let s = Settings::default();
        assert_eq!(s.epoch("2022_Summer22EE").unwrap().label, "2022 postEE");
        assert_eq!(
            s.epoch("2023_Summer23").unwrap().lumi_label(DatasetKind::Data),
            "17.6fb^{-1} (13.6 TeV)"
        );

        let err = s.epoch("2018").unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.message().contains("2023_Summer23BPix"));
    }

    #[test]
    fn paths_follow_version_and_year() {
        let p = Settings::default().paths("2022_Summer22", "v3");
        assert_eq!(p.file_lists, PathBuf::from("inputs/nanoAODs/2022_Summer22.json"));
        assert_eq!(
            p.pileup_json,
            PathBuf::from("inputs/jsonpog/POG/LUM/2022_Summer22/puWeights.json")
        );
        assert_eq!(p.corr_dir, PathBuf::from("results/corrections/v3/2022_Summer22"));
        assert_eq!(
            p.schema,
            PathBuf::from("results/corrections/v3/schemaV2_2022_Summer22.json")
        );
        assert_eq!(
            p.hist_file(DatasetKind::Mc),
            PathBuf::from("results/hists/v3/2022_Summer22/MC.json")
        );
        assert_eq!(
            p.snapshot_dir(DatasetKind::Data),
            PathBuf::from("snapshots/v3/2022_Summer22/DATA")
        );
    }

    #[test]
    fn toml_adds_epochs_and_overrides_sections() {
        let mut s = Settings::default();
        s.merge_toml(
            r#"
            [epochs.2024_Prompt]
            lumi_data = "109fb^{-1} (13.6 TeV)"
            lumi_mc = "(13.6 TeV)"
            label = "2024"

            [paths]
            results_root = "out"

            [fit_range]
            lo = 5.0
            hi = 60.0
            "#,
        )
        .unwrap();

        assert!(s.epoch("2024_Prompt").is_ok());
        assert!(s.epoch("2022_Summer22").is_ok());
        assert_eq!(s.paths.results_root, "out");
        // Unset path keys keep their defaults.
        assert_eq!(s.paths.snapshots_root, "snapshots");
        assert_eq!(s.fit_range, FitRange { lo: 5.0, hi: 60.0 });
        assert_eq!(s.binning, BinningConfig::default());
    }

    #[test]
    fn bad_toml_is_an_input_error() {
        let mut s = Settings::default();
        let err = s.merge_toml("[unknown_section]\nx = 1").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn env_overrides_roots() {
        let mut s = Settings::default();
        s.apply_env(|key| match key {
            "XYCORR_SNAP_DIR" => Some("/scratch/snaps".to_string()),
            _ => None,
        });
        assert_eq!(s.paths.snapshots_root, "/scratch/snaps");
        assert_eq!(s.paths.results_root, "results");
        assert_eq!(
            s.paths("2023_Summer23", "v0").snap_dir,
            PathBuf::from("/scratch/snaps/v0/2023_Summer23")
        );
    }
}
