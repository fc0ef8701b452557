//! Synthetic raw events with a known pileup-dependent MET bias.
//!
//! Used to exercise the full chain without experiment data: the fitted
//! slopes/offsets should come back close to the injected ones.
//!
//! Per event:
//!
//! - `npv ~ round(max(0, N(μ_pu, σ_pu)))`, shared by every pileup column
//! - `Pileup_nTrueInt = max(0, npv + N(0, 1))` (MC only)
//! - true MET components `~ N(0, σ_met)`, then
//!   `x += m_x·npv + c_x`, `y += m_y·npv + c_y`
//! - `<met>_pt = hypot(x, y)`, `<met>_phi = atan2(y, x)`
//!
//! Luminosity blocks run `1..=lumis`; the accompanying golden JSON certifies
//! all but the last block of each run, so the DATA filter has work to do.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde_json::json;
use tracing::info;

use crate::domain::{DatasetKind, raw_columns};
use crate::error::AppError;
use crate::io::{EventTable, write_json, write_table};
use crate::schema::model::{
    Binning, Category, Content, Correction, CorrectionSet, Flow, FlowMode, VarType, Variable,
};

/// First run number of generated files; file `i` uses run `FIRST_RUN + i`.
pub const FIRST_RUN: u64 = 355_100;

#[derive(Debug, Clone)]
pub struct SynthConfig {
    pub mets: Vec<String>,
    pub pileups: Vec<String>,
    pub files: usize,
    pub events_per_file: usize,
    pub lumis_per_run: u64,
    pub seed: u64,
    pub pileup_mean: f64,
    pub pileup_sigma: f64,
    pub met_sigma: f64,
    /// Injected `(m, c)` for the x component.
    pub bias_x: (f64, f64),
    /// Injected `(m, c)` for the y component.
    pub bias_y: (f64, f64),
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            mets: vec!["MET".to_string(), "PuppiMET".to_string()],
            pileups: vec!["PV_npvsGood".to_string()],
            files: 2,
            events_per_file: 20_000,
            lumis_per_run: 10,
            seed: 42,
            pileup_mean: 35.0,
            pileup_sigma: 12.0,
            met_sigma: 20.0,
            bias_x: (0.15, 1.0),
            bias_y: (-0.1, -0.5),
        }
    }
}

impl SynthConfig {
    fn validate(&self) -> Result<(), AppError> {
        if self.files == 0 || self.events_per_file == 0 || self.lumis_per_run == 0 {
            return Err(AppError::new(2, "Synthetic sample needs at least one file, event and lumi block."));
        }
        if self.mets.is_empty() || self.pileups.is_empty() {
            return Err(AppError::new(2, "Synthetic sample needs MET types and pileup columns."));
        }
        Ok(())
    }
}

fn file_seed(config: &SynthConfig, kind: DatasetKind, file_idx: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.seed.hash(&mut hasher);
    kind.hash(&mut hasher);
    file_idx.hash(&mut hasher);
    hasher.finish()
}

/// Generate the events of one file.
pub fn generate_events(
    config: &SynthConfig,
    kind: DatasetKind,
    file_idx: usize,
) -> Result<EventTable, AppError> {
    config.validate()?;
    let dist = |mean: f64, sd: f64| {
        Normal::new(mean, sd)
            .map_err(|e| AppError::new(2, format!("Invalid synthetic distribution: {e}")))
    };
    let pileup = dist(config.pileup_mean, config.pileup_sigma)?;
    let met = dist(0.0, config.met_sigma)?;
    let true_int = dist(0.0, 1.0)?;

    let mut rng = StdRng::seed_from_u64(file_seed(config, kind, file_idx));
    let run = FIRST_RUN + file_idx as u64;
    let mut table = EventTable::new(raw_columns(kind, &config.mets, &config.pileups));
    let mut row = Vec::with_capacity(table.names().len());

    for i in 0..config.events_per_file {
        let npv = pileup.sample(&mut rng).max(0.0).round();
        let lumi = 1 + (i as u64 * config.lumis_per_run) / config.events_per_file as u64;

        row.clear();
        row.push(run as f64);
        row.push(lumi as f64);
        row.extend(std::iter::repeat_n(npv, config.pileups.len()));
        for _ in &config.mets {
            let x = met.sample(&mut rng) + config.bias_x.0 * npv + config.bias_x.1;
            let y = met.sample(&mut rng) + config.bias_y.0 * npv + config.bias_y.1;
            row.push(x.hypot(y));
            row.push(y.atan2(x));
        }
        if kind == DatasetKind::Mc {
            row.push((npv + true_int.sample(&mut rng)).max(0.0));
        }
        table.push_row(&row)?;
    }
    Ok(table)
}

/// Golden JSON certifying lumi blocks `1..lumis_per_run` of every generated run.
pub fn golden_json(config: &SynthConfig) -> BTreeMap<String, Vec<[u64; 2]>> {
    let last = config.lumis_per_run.saturating_sub(1).max(1);
    (0..config.files as u64)
        .map(|i| ((FIRST_RUN + i).to_string(), vec![[1, last]]))
        .collect()
}

/// A `puweights` correction with a gentle linear shape in true interactions.
pub fn pileup_weights() -> CorrectionSet {
    let edges: Vec<f64> = (0..=20).map(|i| i as f64 * 5.0).collect();
    let mut cat = Category::new("weights");
    for (label, tilt) in [("nominal", 0.0), ("up", 0.004), ("down", -0.004)] {
        let content = edges
            .windows(2)
            .map(|w| {
                let center = 0.5 * (w[0] + w[1]);
                Content::Value(1.0 + tilt * (center - 35.0))
            })
            .collect();
        cat.push(
            label,
            Binning {
                input: "NumTrueInteractions".to_string(),
                edges: edges.clone(),
                content,
                flow: Flow::Mode(FlowMode::Clamp),
            },
        );
    }
    let correction = Correction {
        name: "puweights".to_string(),
        description: Some("Synthetic pileup weights".to_string()),
        version: 1,
        inputs: vec![
            Variable::new("NumTrueInteractions", VarType::Real),
            Variable::new("weights", VarType::String),
        ],
        output: Variable::new("weight", VarType::Real),
        data: cat.into(),
    };
    CorrectionSet::new("Synthetic pileup reweighting", vec![correction])
}

/// Files written by `write_sample`.
#[derive(Debug, Clone)]
pub struct SynthOutput {
    pub files: BTreeMap<DatasetKind, Vec<PathBuf>>,
    pub golden_json: PathBuf,
    pub pileup_json: PathBuf,
    /// Datasets config pointing dataset discovery at the generated directories.
    pub datasets_json: PathBuf,
}

/// Write `out/<DTMC>/raw_<i>.csv` per kind, plus `out/golden.json`,
/// `out/puWeights.json` and `out/datasets.json`.
pub fn write_sample(
    out: &Path,
    kinds: &[DatasetKind],
    config: &SynthConfig,
) -> Result<SynthOutput, AppError> {
    config.validate()?;
    let mut files = BTreeMap::new();
    let mut datasets = BTreeMap::new();
    for &kind in kinds {
        let dir = out.join(kind.as_str());
        let mut written = Vec::with_capacity(config.files);
        for idx in 0..config.files {
            let path = dir.join(format!("raw_{idx}.csv"));
            write_table(&path, &generate_events(config, kind, idx)?)?;
            written.push(path);
        }
        info!("Generated {} synthetic {kind} file(s) in {}", written.len(), dir.display());
        datasets.insert(kind, json!({ "names": [dir.display().to_string()] }));
        files.insert(kind, written);
    }

    let golden = out.join("golden.json");
    write_json(&golden, &golden_json(config), "golden JSON")?;
    let pileup_json = out.join("puWeights.json");
    pileup_weights().write(&pileup_json)?;
    let datasets_json = out.join("datasets.json");
    write_json(&datasets_json, &datasets, "datasets config")?;

    Ok(SynthOutput {
        files,
        golden_json: golden,
        pileup_json,
        datasets_json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SynthConfig {
        SynthConfig {
            mets: vec!["MET".to_string()],
            files: 1,
            events_per_file: 500,
            ..SynthConfig::default()
        }
    }

    #[test]
    fn same_seed_same_events() {
        let a = generate_events(&small(), DatasetKind::Mc, 0).unwrap();
        let b = generate_events(&small(), DatasetKind::Mc, 0).unwrap();
        let c = generate_events(&small(), DatasetKind::Mc, 1).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.column("MET_pt").unwrap(), c.column("MET_pt").unwrap());
    }

    #[test]
    fn columns_and_value_ranges() {
        let cfg = small();
        let data = generate_events(&cfg, DatasetKind::Data, 0).unwrap();
        assert!(data.column("Pileup_nTrueInt").is_err());
        assert_eq!(data.len(), 500);

        let mc = generate_events(&cfg, DatasetKind::Mc, 0).unwrap();
        assert!(mc.column("PV_npvsGood").unwrap().iter().all(|v| *v >= 0.0 && v.fract() == 0.0));
        assert!(mc.column("MET_pt").unwrap().iter().all(|v| *v >= 0.0));
        assert!(mc
            .column("MET_phi")
            .unwrap()
            .iter()
            .all(|v| v.abs() <= std::f64::consts::PI));
        let lumis = mc.column("luminosityBlock").unwrap();
        assert_eq!(lumis[0], 1.0);
        assert_eq!(lumis[lumis.len() - 1], cfg.lumis_per_run as f64);
    }

    #[test]
    fn golden_json_leaves_out_last_lumi_block() {
        let cfg = SynthConfig {
            files: 2,
            ..small()
        };
        let golden = golden_json(&cfg);
        assert_eq!(golden["355100"], vec![[1, 9]]);
        assert_eq!(golden["355101"], vec![[1, 9]]);
    }
}
