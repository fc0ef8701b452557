//! Assemble correction schemas from fit parameters.
//!
//! Every leaf of the produced tree is a TFormula over
//! `x = met_pt`, `y = met_phi`, `z = npvGood` with the ten parameters
//! `[0..9] = m_x, c_x, m_y, c_y, σm_x, σc_x, ρ_x, σm_y, σc_y, ρ_y`.
//! The corrected components are
//!
//! ```text
//! x_corr = x·cos(y) − ([0]·z + [1])
//! y_corr = x·sin(y) − ([2]·z + [3])
//! ```
//!
//! and pt/phi are always rebuilt from them (`sqrt(x² + y²)`, `atan2(y, x)`).
//! The `_stat_*` keys shift one component by its fit envelope at pileup `z`.

use std::collections::BTreeMap;

use crate::domain::{CorrectionParams, DatasetKind, FitParams, WeightVariation};
use crate::error::AppError;
use crate::schema::eval::{CompiledCorrection, EvalError, Input};
use crate::schema::model::{Category, Correction, CorrectionSet, Formula, VarType, Variable};

pub const CORRECTION_NAME: &str = "met_xy_corrections";

/// Pileup proxy packaged into the schema when present.
pub const PACKAGED_PILEUP: &str = "PV_npvsGood";

const FORMULA_VARIABLES: [&str; 3] = ["met_pt", "met_phi", "npvGood"];

const X_CORR: &str = "(x*cos(y) - ([0]*z + [1]))";
const Y_CORR: &str = "(x*sin(y) - ([2]*z + [3]))";
// Radicands are clamped at zero like `FitParams::sigma_at`.
const SIGMA_X: &str = "sqrt(max(pow(z*[4],2) + pow([5],2) + 2*z*[4]*[5]*[6], 0))";
const SIGMA_Y: &str = "sqrt(max(pow(z*[7],2) + pow([8],2) + 2*z*[7]*[8]*[9], 0))";

/// Key suffixes of the statistical envelope variations, in schema order.
pub const STAT_SUFFIXES: [&str; 4] = ["_stat_xup", "_stat_xdn", "_stat_yup", "_stat_ydn"];

/// Key suffixes of the pileup-reweighting variations (MC only).
pub const PU_SUFFIXES: [&str; 2] = ["_pu_up", "_pu_dn"];

/// The ten formula keys and their TFormula expressions.
///
/// Order: `pt`, `phi`, then `pt_stat_*`, then `phi_stat_*`.
pub fn formula_expressions() -> Vec<(String, String)> {
    let shifted = |base: &str, sigma: &str, sign: char| format!("({base} {sign} {sigma})");
    let variants = [
        ("", X_CORR.to_string(), Y_CORR.to_string()),
        ("_stat_xup", shifted(X_CORR, SIGMA_X, '+'), Y_CORR.to_string()),
        ("_stat_xdn", shifted(X_CORR, SIGMA_X, '-'), Y_CORR.to_string()),
        ("_stat_yup", X_CORR.to_string(), shifted(Y_CORR, SIGMA_Y, '+')),
        ("_stat_ydn", X_CORR.to_string(), shifted(Y_CORR, SIGMA_Y, '-')),
    ];

    let mut out = Vec::with_capacity(10);
    for (idx, (suffix, x, y)) in variants.iter().enumerate() {
        out.push((format!("pt{suffix}"), format!("sqrt(pow({x},2) + pow({y},2))")));
        if idx == 0 {
            out.push(("phi".to_string(), format!("atan2({y}, {x})")));
        }
    }
    for (suffix, x, y) in variants.iter().skip(1) {
        out.push((format!("phi{suffix}"), format!("atan2({y}, {x})")));
    }
    out
}

/// All `pt_phi` key suffixes available for a dataset kind (`""` is nominal).
pub fn variation_suffixes(kind: DatasetKind) -> Vec<&'static str> {
    let mut out = vec![""];
    out.extend(STAT_SUFFIXES);
    if kind == DatasetKind::Mc {
        out.extend(PU_SUFFIXES);
    }
    out
}

/// Schema file name for a single epoch.
pub fn schema_file_name(year: &str) -> String {
    format!("schemaV2_{year}.json")
}

/// Schema file name for a multi-epoch combination.
pub fn combined_file_name(years: &[String]) -> String {
    format!("schemaV2_{}.json", years.join("_"))
}

/// Pick the pileup proxy that is packaged: `PV_npvsGood` if requested, else the first one.
pub fn packaged_pileup(pileups: &[String]) -> Option<&str> {
    pileups
        .iter()
        .find(|p| p.as_str() == PACKAGED_PILEUP)
        .or_else(|| pileups.first())
        .map(String::as_str)
}

fn formula(expression: &str, x: &FitParams, y: &FitParams) -> Formula {
    Formula::tformula(
        expression.to_string(),
        &FORMULA_VARIABLES,
        FitParams::formula_parameters(x, y),
    )
}

fn met_inputs() -> [Variable; 3] {
    [
        Variable::new("met_pt", VarType::Real).described("uncorrected MET pt (x)"),
        Variable::new("met_phi", VarType::Real).described("uncorrected MET phi (y)"),
        Variable::new("npvGood", VarType::Real).described("number of good primary vertices (z)"),
    ]
}

fn missing_fit(err: String) -> AppError {
    AppError::new(2, format!("Cannot build correction schema: {err}"))
}

/// `pt_phi` category for one MET type with the nominal and stat keys, plus
/// the pileup-weight keys when `with_pu` is set.
fn pt_phi_category(
    params: &CorrectionParams,
    met: &str,
    pileup: &str,
    variation: WeightVariation,
    with_pu: bool,
) -> Result<Category, AppError> {
    let (x, y) = params.pair(met, pileup, variation).map_err(missing_fit)?;
    let pu_pairs = if with_pu {
        let up = params.pair(met, pileup, WeightVariation::PuUp).map_err(missing_fit)?;
        let dn = params.pair(met, pileup, WeightVariation::PuDn).map_err(missing_fit)?;
        vec![(PU_SUFFIXES[0], up), (PU_SUFFIXES[1], dn)]
    } else {
        Vec::new()
    };

    let mut cat = Category::new("pt_phi");
    for (key, expr) in formula_expressions() {
        cat.push(key.as_str(), formula(&expr, x, y));
        if !key.contains("_stat") {
            for (suffix, (px, py)) in &pu_pairs {
                cat.push(format!("{key}{suffix}"), formula(&expr, px, py));
            }
        }
    }
    Ok(cat)
}

/// Build the single-epoch schema: `dtmc → met_type → pt_phi → formula`.
pub fn build_correction(
    year: &str,
    version: &str,
    params: &BTreeMap<DatasetKind, CorrectionParams>,
    mets: &[String],
    pileup: &str,
) -> Result<CorrectionSet, AppError> {
    if params.is_empty() {
        return Err(AppError::new(3, "No fit parameters available to build a schema."));
    }

    let mut dtmc = Category::new("dtmc");
    for (kind, kind_params) in params {
        let mut met_cat = Category::new("met_type");
        for met in mets {
            let cat = pt_phi_category(
                kind_params,
                met,
                pileup,
                WeightVariation::Nominal,
                *kind == DatasetKind::Mc,
            )
            .map_err(|e| e.context(kind.as_str()))?;
            met_cat.push(met.as_str(), cat);
        }
        dtmc.push(kind.as_str(), met_cat);
    }

    let mut inputs = vec![
        Variable::new("pt_phi", VarType::String).described("corrected quantity and variation"),
        Variable::new("met_type", VarType::String).described("MET or PuppiMET"),
        Variable::new("dtmc", VarType::String).described("DATA or MC"),
    ];
    inputs.extend(met_inputs());

    let correction = Correction {
        name: CORRECTION_NAME.to_string(),
        description: Some("Apply MET xy corrections to PuppiMET or MET".to_string()),
        version: 1,
        inputs,
        output: Variable::new("pt_corr", VarType::Real).described("corrected MET pt or phi"),
        data: dtmc.into(),
    };

    Ok(CorrectionSet::new(
        format!("MET xy corrections for {year} ({version})"),
        vec![correction],
    ))
}

/// Build a multi-epoch schema: `met_type → epoch → dtmc → variation → pt_phi → formula`.
///
/// `epochs` pairs each epoch label with its per-dataset fit parameters.
pub fn build_combined(
    version: &str,
    epochs: &[(String, BTreeMap<DatasetKind, CorrectionParams>)],
    mets: &[String],
    pileup: &str,
) -> Result<CorrectionSet, AppError> {
    if epochs.is_empty() {
        return Err(AppError::new(2, "No epochs given to combine."));
    }

    let mut met_cat = Category::new("met_type");
    for met in mets {
        let mut epoch_cat = Category::new("epoch");
        for (epoch, params) in epochs {
            let mut dtmc = Category::new("dtmc");
            for (kind, kind_params) in params {
                let variations = kind_params.paired_variations(met, pileup);
                if !variations.contains(&WeightVariation::Nominal) {
                    return Err(AppError::new(
                        2,
                        format!("Epoch {epoch} {kind}: no nominal fit for met={met}, pileup={pileup}."),
                    ));
                }
                let mut var_cat = Category::new("variation");
                for variation in variations {
                    let cat = pt_phi_category(kind_params, met, pileup, variation, false)?;
                    var_cat.push(variation.key(), cat);
                }
                dtmc.push(kind.as_str(), var_cat);
            }
            epoch_cat.push(epoch.as_str(), dtmc);
        }
        met_cat.push(met.as_str(), epoch_cat);
    }

    let mut inputs = vec![
        Variable::new("pt_phi", VarType::String).described("corrected quantity and stat variation"),
        Variable::new("met_type", VarType::String).described("MET or PuppiMET"),
        Variable::new("epoch", VarType::String).described("data-taking epoch"),
        Variable::new("dtmc", VarType::String).described("DATA or MC"),
        Variable::new("variation", VarType::String).described("nom, pu_up or pu_dn"),
    ];
    inputs.extend(met_inputs());

    let labels: Vec<&str> = epochs.iter().map(|(e, _)| e.as_str()).collect();
    let correction = Correction {
        name: CORRECTION_NAME.to_string(),
        description: Some(format!(
            "MET xy corrections for epochs {}",
            labels.join(", ")
        )),
        version: 1,
        inputs,
        output: Variable::new("pt_corr", VarType::Real).described("corrected MET pt or phi"),
        data: met_cat.into(),
    };

    Ok(CorrectionSet::new(
        format!("Combined MET xy corrections ({version})"),
        vec![correction],
    ))
}

/// Typed front-end for evaluating a single-epoch MET xy schema.
#[derive(Debug, Clone)]
pub struct MetCorrector {
    correction: CompiledCorrection,
}

impl MetCorrector {
    pub fn new(cset: &CorrectionSet) -> Result<Self, EvalError> {
        Ok(Self {
            correction: CompiledCorrection::from_set(cset, CORRECTION_NAME)?,
        })
    }

    /// Evaluate key `pt_phi` (e.g. `pt`, `phi_stat_xup`, `pt_pu_dn`).
    pub fn evaluate(
        &self,
        pt_phi: &str,
        met_type: &str,
        dtmc: DatasetKind,
        met_pt: f64,
        met_phi: f64,
        npv_good: f64,
    ) -> Result<f64, EvalError> {
        self.correction.evaluate(&[
            Input::Str(pt_phi),
            Input::Str(met_type),
            Input::Str(dtmc.as_str()),
            Input::Real(met_pt),
            Input::Real(met_phi),
            Input::Real(npv_good),
        ])
    }
}
