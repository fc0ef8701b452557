//! Shared domain types.
//!
//! Plain serializable types, shared by:
//!
//! - histogram filling and fitting
//! - the per-dataset fit JSON files
//! - the schema builder and the validation stage

use std::collections::BTreeMap;
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which kind of dataset is processed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
pub enum DatasetKind {
    /// Recorded collision data (filtered by the golden JSON, unit pileup weights).
    #[serde(rename = "DATA")]
    #[value(name = "DATA")]
    Data,
    /// Simulation (pileup-reweighted, with up/down weight variations).
    #[serde(rename = "MC")]
    #[value(name = "MC")]
    Mc,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 2] = [DatasetKind::Data, DatasetKind::Mc];

    /// Key used in file names, JSON keys and schema categories.
    pub fn as_str(self) -> &'static str {
        match self {
            DatasetKind::Data => "DATA",
            DatasetKind::Mc => "MC",
        }
    }

    pub fn is_data(self) -> bool {
        self == DatasetKind::Data
    }

    /// Pileup-weight variations that are fitted for this dataset kind.
    pub fn variations(self) -> &'static [WeightVariation] {
        match self {
            DatasetKind::Data => &[WeightVariation::Nominal],
            DatasetKind::Mc => &[
                WeightVariation::Nominal,
                WeightVariation::PuUp,
                WeightVariation::PuDn,
            ],
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DATA" => Some(DatasetKind::Data),
            "MC" => Some(DatasetKind::Mc),
            _ => None,
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cartesian MET component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Component {
    #[serde(rename = "_x")]
    X,
    #[serde(rename = "_y")]
    Y,
}

impl Component {
    pub const ALL: [Component; 2] = [Component::X, Component::Y];

    /// Column/histogram suffix (`_x` or `_y`).
    pub fn suffix(self) -> &'static str {
        match self {
            Component::X => "_x",
            Component::Y => "_y",
        }
    }
}

/// Pileup-weight variation used when filling and fitting histograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WeightVariation {
    #[serde(rename = "nom")]
    Nominal,
    #[serde(rename = "pu_up")]
    PuUp,
    #[serde(rename = "pu_dn")]
    PuDn,
}

impl WeightVariation {
    pub const ALL: [WeightVariation; 3] = [
        WeightVariation::Nominal,
        WeightVariation::PuUp,
        WeightVariation::PuDn,
    ];

    /// Key in the fit-parameter JSON (`nom`, `pu_up`, `pu_dn`).
    pub fn key(self) -> &'static str {
        match self {
            WeightVariation::Nominal => "nom",
            WeightVariation::PuUp => "pu_up",
            WeightVariation::PuDn => "pu_dn",
        }
    }

    /// Snapshot column holding the event weight for this variation.
    pub fn weight_column(self) -> &'static str {
        match self {
            WeightVariation::Nominal => "puWeight",
            WeightVariation::PuUp => "puWeightUp",
            WeightVariation::PuDn => "puWeightDn",
        }
    }

    /// Histogram-name suffix for this variation.
    pub fn hist_suffix(self) -> &'static str {
        match self {
            WeightVariation::Nominal => "_puweight",
            WeightVariation::PuUp => "_puweightUp",
            WeightVariation::PuDn => "_puweightDn",
        }
    }

    /// Label of the pileup-reweighting correction evaluated for this variation.
    pub fn pileup_weight_label(self) -> &'static str {
        match self {
            WeightVariation::Nominal => "nominal",
            WeightVariation::PuUp => "up",
            WeightVariation::PuDn => "down",
        }
    }
}

/// Name of the 2D histogram of one MET component vs. one pileup proxy.
///
/// Example: `PV_npvsGood_PuppiMET_x_puweightUp`.
pub fn hist_name(pileup: &str, met: &str, component: Component, variation: WeightVariation) -> String {
    format!(
        "{pileup}_{met}{}{}",
        component.suffix(),
        variation.hist_suffix()
    )
}

/// Name of a snapshot column holding one MET component.
pub fn component_column(met: &str, component: Component) -> String {
    format!("{met}{}", component.suffix())
}

/// Columns a raw event file must provide, in the order synthetic files use.
pub fn raw_columns(kind: DatasetKind, mets: &[String], pileups: &[String]) -> Vec<String> {
    let mut cols = vec!["run".to_string(), "luminosityBlock".to_string()];
    cols.extend(pileups.iter().cloned());
    for met in mets {
        cols.push(format!("{met}_pt"));
        cols.push(format!("{met}_phi"));
    }
    if kind == DatasetKind::Mc {
        cols.push(TRUE_INTERACTIONS.to_string());
    }
    cols
}

/// Raw column with the true number of pileup interactions (MC only).
pub const TRUE_INTERACTIONS: &str = "Pileup_nTrueInt";

/// Result of one linear fit `y = m·x + c` of a MET component vs. pileup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitParams {
    pub m: f64,
    pub m_stat: f64,
    pub c: f64,
    pub c_stat: f64,
    /// Correlation coefficient between `m` and `c`.
    pub correlation: f64,
}

impl FitParams {
    /// Fitted pileup-dependent bias at pileup `x`.
    pub fn value_at(&self, x: f64) -> f64 {
        self.m * x + self.c
    }

    /// First-order propagated uncertainty of the fitted value at pileup `x`:
    /// `sqrt(x²σm² + σc² + 2xσmσcρ)`.
    ///
    /// The radicand is a variance and therefore non-negative for `|ρ| ≤ 1`;
    /// rounding can push it a hair below zero, so it is clamped.
    pub fn sigma_at(&self, x: f64) -> f64 {
        let var = x * x * self.m_stat * self.m_stat
            + self.c_stat * self.c_stat
            + 2.0 * x * self.m_stat * self.c_stat * self.correlation;
        var.max(0.0).sqrt()
    }

    pub fn up_at(&self, x: f64) -> f64 {
        self.value_at(x) + self.sigma_at(x)
    }

    pub fn down_at(&self, x: f64) -> f64 {
        self.value_at(x) - self.sigma_at(x)
    }

    /// The ten formula parameters for an x/y pair, in schema order:
    /// `m_x, c_x, m_y, c_y, σm_x, σc_x, ρ_x, σm_y, σc_y, ρ_y`.
    pub fn formula_parameters(x: &FitParams, y: &FitParams) -> Vec<f64> {
        vec![
            x.m,
            x.c,
            y.m,
            y.c,
            x.m_stat,
            x.c_stat,
            x.correlation,
            y.m_stat,
            y.c_stat,
            y.correlation,
        ]
    }
}

type VariationMap = BTreeMap<WeightVariation, FitParams>;
type ComponentMap = BTreeMap<Component, VariationMap>;

/// All fit results for one dataset kind.
///
/// Serialized as `met → pileup → "_x"|"_y" → "nom"|"pu_up"|"pu_dn" → FitParams`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrectionParams {
    entries: BTreeMap<String, BTreeMap<String, ComponentMap>>,
}

impl CorrectionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        met: &str,
        pileup: &str,
        component: Component,
        variation: WeightVariation,
        params: FitParams,
    ) {
        self.entries
            .entry(met.to_string())
            .or_default()
            .entry(pileup.to_string())
            .or_default()
            .entry(component)
            .or_default()
            .insert(variation, params);
    }

    pub fn get(
        &self,
        met: &str,
        pileup: &str,
        component: Component,
        variation: WeightVariation,
    ) -> Option<&FitParams> {
        self.entries
            .get(met)?
            .get(pileup)?
            .get(&component)?
            .get(&variation)
    }

    /// MET types present in the file (sorted).
    pub fn met_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Pileup variables fitted for a MET type (sorted).
    pub fn pileups(&self, met: &str) -> Vec<&str> {
        self.entries
            .get(met)
            .map(|p| p.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Variations for which both the x and the y fit exist.
    pub fn paired_variations(&self, met: &str, pileup: &str) -> Vec<WeightVariation> {
        WeightVariation::ALL
            .into_iter()
            .filter(|v| {
                self.get(met, pileup, Component::X, *v).is_some()
                    && self.get(met, pileup, Component::Y, *v).is_some()
            })
            .collect()
    }

    /// The x and y fit of one variation, or a descriptive error.
    pub fn pair(
        &self,
        met: &str,
        pileup: &str,
        variation: WeightVariation,
    ) -> Result<(&FitParams, &FitParams), String> {
        let x = self.get(met, pileup, Component::X, variation);
        let y = self.get(met, pileup, Component::Y, variation);
        match (x, y) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(format!(
                "missing x/y fit for met={met}, pileup={pileup}, variation={}",
                variation.key()
            )),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(m: f64, c: f64, m_stat: f64, c_stat: f64, correlation: f64) -> FitParams {
        FitParams {
            m,
            m_stat,
            c,
            c_stat,
            correlation,
        }
    }

    #[test]
    fn envelope_brackets_nominal_for_non_negative_pileup() {
        let rhos = [-1.0, -0.97, -0.5, 0.0, 0.5, 1.0];
        let stats = [0.0, 1e-4, 0.01, 0.3, 2.0];
        for &rho in &rhos {
            for &sm in &stats {
                for &sc in &stats {
                    let p = params(-0.4, 1.7, sm, sc, rho);
                    for i in 0..=200 {
                        let x = i as f64 * 0.5;
                        let nom = p.value_at(x);
                        assert!(p.up_at(x) >= nom, "up < nominal at x={x}, rho={rho}");
                        assert!(p.down_at(x) <= nom, "down > nominal at x={x}, rho={rho}");
                    }
                }
            }
        }
    }

    #[test]
    fn sigma_matches_closed_form() {
        let p = params(0.2, -1.0, 0.01, 0.5, -0.8);
        let x = 30.0;
        let expected = (x * x * 0.01 * 0.01 + 0.25 + 2.0 * x * 0.01 * 0.5 * -0.8_f64).sqrt();
        assert!((p.sigma_at(x) - expected).abs() < 1e-12);
    }

    #[test]
    fn correction_params_roundtrip_uses_original_keys() {
        let mut cp = CorrectionParams::new();
        cp.insert("MET", "PV_npvsGood", Component::X, WeightVariation::Nominal, params(1.0, 2.0, 0.1, 0.2, -0.9));
        cp.insert("MET", "PV_npvsGood", Component::Y, WeightVariation::PuUp, params(3.0, 4.0, 0.3, 0.4, -0.5));

        let json = serde_json::to_value(&cp).unwrap();
        assert_eq!(json["MET"]["PV_npvsGood"]["_x"]["nom"]["m"], 1.0);
        assert_eq!(json["MET"]["PV_npvsGood"]["_y"]["pu_up"]["c"], 4.0);

        let back: CorrectionParams = serde_json::from_value(json).unwrap();
        assert_eq!(back, cp);
        assert!(back.pair("MET", "PV_npvsGood", WeightVariation::Nominal).is_err());
    }

    #[test]
    fn hist_names_follow_convention() {
        assert_eq!(
            hist_name("PV_npvsGood", "PuppiMET", Component::Y, WeightVariation::PuDn),
            "PV_npvsGood_PuppiMET_y_puweightDn"
        );
        assert_eq!(component_column("MET", Component::X), "MET_x");
    }
}
