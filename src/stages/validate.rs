//! Validation stage: apply the packaged schema to the snapshots and compare
//! corrected with uncorrected pt/phi distributions.
//!
//! Alongside the histograms, every nominal schema output is checked against a
//! direct computation from the fit-parameter file (closure). A deviation above
//! [`CLOSURE_TOLERANCE`] means the schema does not encode the fits and fails
//! the stage.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::info;

use crate::config::BinningConfig;
use crate::domain::{
    Component, CorrectionParams, DatasetKind, FitParams, WeightVariation, component_column,
};
use crate::error::AppError;
use crate::io::{TOOL_NAME, ValidationFile, read_params, read_table, write_validation_file};
use crate::math::Hist1D;
use crate::schema::build::{packaged_pileup, variation_suffixes};
use crate::schema::{CorrectionSet, MetCorrector};
use crate::stages::StageContext;

pub const CLOSURE_TOLERANCE: f64 = 1e-6;

/// Histogram names for one MET type and quantity (`pt` or `phi`).
pub fn raw_hist_name(met: &str, quantity: &str) -> String {
    format!("{met}_{quantity}")
}

pub fn corrected_hist_name(met: &str, quantity: &str, suffix: &str) -> String {
    format!("{met}_{quantity}_corr{suffix}")
}

/// Summary of one distribution against the uncorrected one.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRow {
    pub name: String,
    pub mean: Option<f64>,
    pub rms: Option<f64>,
    /// Largest bin-wise `|corr − raw| / raw` over bins with raw content.
    pub max_rel_change: Option<f64>,
}

/// Everything validated for one dataset kind.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub file: ValidationFile,
    pub rows: Vec<ComparisonRow>,
}

struct Setup<'a> {
    kind: DatasetKind,
    mets: &'a [String],
    pileup: &'a str,
    corrector: &'a MetCorrector,
    nominal: Vec<(FitParams, FitParams)>,
    suffixes: Vec<&'static str>,
    binning: &'a BinningConfig,
}

impl Setup<'_> {
    fn columns(&self) -> Vec<String> {
        let mut cols = vec![self.pileup.to_string()];
        for met in self.mets {
            for component in Component::ALL {
                cols.push(component_column(met, component));
            }
        }
        cols.push(WeightVariation::Nominal.weight_column().to_string());
        cols
    }

    fn empty_hists(&self) -> BTreeMap<String, Hist1D> {
        let mut hists = BTreeMap::new();
        for met in self.mets {
            for (quantity, axis) in [("pt", self.binning.pt), ("phi", self.binning.phi)] {
                let raw = raw_hist_name(met, quantity);
                hists.insert(raw.clone(), Hist1D::new(raw, axis));
                for suffix in &self.suffixes {
                    let name = corrected_hist_name(met, quantity, suffix);
                    hists.insert(name.clone(), Hist1D::new(name, axis));
                }
            }
        }
        hists
    }

    fn fill_file(&self, path: &Path) -> Result<(BTreeMap<String, Hist1D>, f64), AppError> {
        let table = read_table(path, &self.columns())?.table;
        let npv = table.column(self.pileup)?;
        let weight = table.column(WeightVariation::Nominal.weight_column())?;

        let mut hists = self.empty_hists();
        let mut max_dev: f64 = 0.0;
        for (met, (px, py)) in self.mets.iter().zip(&self.nominal) {
            let xs = table.column(&component_column(met, Component::X))?;
            let ys = table.column(&component_column(met, Component::Y))?;
            for i in 0..table.len() {
                let pt = xs[i].hypot(ys[i]);
                let phi = ys[i].atan2(xs[i]);
                let w = weight[i];
                fill(&mut hists, &raw_hist_name(met, "pt"), pt, w);
                fill(&mut hists, &raw_hist_name(met, "phi"), phi, w);

                for suffix in &self.suffixes {
                    let eval = |quantity: &str| {
                        self.corrector.evaluate(
                            &format!("{quantity}{suffix}"),
                            met,
                            self.kind,
                            pt,
                            phi,
                            npv[i],
                        )
                    };
                    let pt_corr = eval("pt")?;
                    let phi_corr = eval("phi")?;
                    fill(&mut hists, &corrected_hist_name(met, "pt", suffix), pt_corr, w);
                    fill(&mut hists, &corrected_hist_name(met, "phi", suffix), phi_corr, w);

                    if suffix.is_empty() {
                        let (pt_direct, phi_direct) = direct_correction(pt, phi, npv[i], px, py);
                        max_dev = worst_deviation(max_dev, (pt_corr - pt_direct).abs());
                        max_dev = worst_deviation(max_dev, angle_distance(phi_corr, phi_direct));
                    }
                }
            }
        }
        Ok((hists, max_dev))
    }
}

/// Larger of two closure deviations; a non-finite one poisons the result.
fn worst_deviation(a: f64, b: f64) -> f64 {
    if a.is_finite() && b.is_finite() {
        a.max(b)
    } else {
        f64::INFINITY
    }
}

fn check_closure(kind: DatasetKind, max_dev: f64) -> Result<(), AppError> {
    if max_dev.is_finite() && max_dev <= CLOSURE_TOLERANCE {
        return Ok(());
    }
    Err(AppError::new(
        4,
        format!(
            "{kind}: schema output deviates from the fit parameters by {max_dev:.3e} (tolerance {CLOSURE_TOLERANCE:.0e})."
        ),
    ))
}

fn fill(hists: &mut BTreeMap<String, Hist1D>, name: &str, v: f64, w: f64) {
    if let Some(h) = hists.get_mut(name) {
        h.fill(v, w);
    }
}

/// Corrected (pt, phi) computed straight from the fit parameters.
pub fn direct_correction(pt: f64, phi: f64, npv: f64, x: &FitParams, y: &FitParams) -> (f64, f64) {
    let xc = pt * phi.cos() - x.value_at(npv);
    let yc = pt * phi.sin() - y.value_at(npv);
    (xc.hypot(yc), yc.atan2(xc))
}

fn angle_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % (2.0 * PI);
    d.min(2.0 * PI - d)
}

/// Compare every distribution of one MET type against its uncorrected one.
pub fn compare(hists: &BTreeMap<String, Hist1D>, mets: &[String], suffixes: &[&str]) -> Vec<ComparisonRow> {
    let mut rows = Vec::new();
    for met in mets {
        for quantity in ["pt", "phi"] {
            let Some(raw) = hists.get(&raw_hist_name(met, quantity)) else {
                continue;
            };
            rows.push(ComparisonRow {
                name: raw.name.clone(),
                mean: raw.mean(),
                rms: raw.rms(),
                max_rel_change: None,
            });
            for suffix in suffixes {
                if let Some(h) = hists.get(&corrected_hist_name(met, quantity, suffix)) {
                    rows.push(ComparisonRow {
                        name: h.name.clone(),
                        mean: h.mean(),
                        rms: h.rms(),
                        max_rel_change: max_relative_change(raw, h),
                    });
                }
            }
        }
    }
    rows
}

fn max_relative_change(raw: &Hist1D, other: &Hist1D) -> Option<f64> {
    raw.content
        .iter()
        .zip(&other.content)
        .filter(|(r, _)| **r > 0.0)
        .map(|(r, o)| (o - r).abs() / r)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
}

/// Validate one dataset kind against an already loaded schema.
pub fn validate_kind(
    ctx: &StageContext,
    kind: DatasetKind,
    corrector: &MetCorrector,
    params: &CorrectionParams,
) -> Result<ValidationReport, AppError> {
    let pileup = packaged_pileup(&ctx.pileups)
        .ok_or_else(|| AppError::new(2, "No pileup variable to validate against."))?;
    let nominal = ctx
        .mets
        .iter()
        .map(|met| {
            params
                .pair(met, pileup, WeightVariation::Nominal)
                .map(|(x, y)| (*x, *y))
                .map_err(|e| AppError::new(2, format!("{kind}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let setup = Setup {
        kind,
        mets: &ctx.mets,
        pileup,
        corrector,
        nominal,
        suffixes: variation_suffixes(kind),
        binning: &ctx.settings.binning,
    };

    let files = ctx.snapshot_files(kind)?;
    let per_file: Vec<(BTreeMap<String, Hist1D>, f64)> = files
        .par_iter()
        .map(|path| setup.fill_file(path).map_err(|e| e.context(path.display())))
        .collect::<Result<_, _>>()?;

    let mut hists = setup.empty_hists();
    let mut max_dev: f64 = 0.0;
    for (file_hists, dev) in &per_file {
        max_dev = worst_deviation(max_dev, *dev);
        for (name, h) in file_hists {
            if let Some(total) = hists.get_mut(name) {
                total.merge(h)?;
            }
        }
    }

    info!("{kind}: closure max deviation {max_dev:.3e}");
    check_closure(kind, max_dev)?;

    let rows = compare(&hists, &ctx.mets, &setup.suffixes);
    Ok(ValidationReport {
        file: ValidationFile {
            tool: TOOL_NAME.to_string(),
            year: ctx.year.clone(),
            dataset: kind,
            closure_max_deviation: max_dev,
            hists,
        },
        rows,
    })
}

/// Run validation for every selected dataset kind.
pub fn run(ctx: &StageContext) -> Result<Vec<PathBuf>, AppError> {
    let cset = CorrectionSet::from_file(&ctx.paths.schema)?;
    let corrector = MetCorrector::new(&cset)?;

    let mut written = Vec::with_capacity(ctx.kinds.len());
    for &kind in &ctx.kinds {
        let params = read_params(&ctx.paths.params_file(kind))?;
        let report = validate_kind(ctx, kind, &corrector, &params)?;
        println!("{}", crate::report::format_validation(kind, &report.rows));

        let path = ctx.paths.validation_file(kind);
        write_validation_file(&path, &report.file)?;
        info!("Validation histograms saved in {}", path.display());
        written.push(path);
    }
    Ok(written)
}
