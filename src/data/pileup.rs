//! Pileup-reweighting lookup for simulation.
//!
//! The weights come from a schema-v2 correction (normally `puweights`) with a
//! real input for the true number of interactions and a string input
//! selecting `nominal`, `up` or `down`.

use std::path::Path;

use crate::domain::WeightVariation;
use crate::error::AppError;
use crate::schema::model::{CorrectionSet, VarType};
use crate::schema::{CompiledCorrection, Input};

pub const PILEUP_CORRECTION: &str = "puweights";

#[derive(Debug, Clone)]
pub struct PileupWeights {
    correction: CompiledCorrection,
    /// Position of the string input; the other input is the real one.
    label_slot: usize,
}

impl PileupWeights {
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let cset = CorrectionSet::from_file(path)?;
        Self::from_set(&cset).map_err(|e| e.context(path.display()))
    }

    /// Use `puweights`, or the only correction in the set.
    pub fn from_set(cset: &CorrectionSet) -> Result<Self, AppError> {
        let correction = match (cset.get(PILEUP_CORRECTION), cset.corrections.as_slice()) {
            (Some(c), _) => c,
            (None, [only]) => only,
            _ => {
                return Err(AppError::new(
                    2,
                    format!("No '{PILEUP_CORRECTION}' correction in pileup-weight file."),
                ));
            }
        };

        let kinds: Vec<VarType> = correction.inputs.iter().map(|v| v.kind).collect();
        let label_slot = match kinds.as_slice() {
            [VarType::Real, VarType::String] => 1,
            [VarType::String, VarType::Real] => 0,
            _ => {
                return Err(AppError::new(
                    2,
                    format!(
                        "Pileup correction '{}' must take one real and one string input.",
                        correction.name
                    ),
                ));
            }
        };

        Ok(Self {
            correction: CompiledCorrection::compile(correction)?,
            label_slot,
        })
    }

    /// Weight for an event with `n_true` interactions under `variation`.
    pub fn weight(&self, n_true: f64, variation: WeightVariation) -> Result<f64, AppError> {
        let label = Input::Str(variation.pileup_weight_label());
        let value = Input::Real(n_true);
        let inputs = if self.label_slot == 1 {
            [value, label]
        } else {
            [label, value]
        };
        Ok(self.correction.evaluate(&inputs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::{Binning, Category, Content, Correction, Flow, FlowMode, Variable};

    fn weights_set(name: &str) -> CorrectionSet {
        let mut cat = Category::new("weights");
        for (label, w) in [("nominal", 1.0), ("up", 1.2), ("down", 0.8)] {
            cat.push(
                label,
                Binning {
                    input: "NumTrueInteractions".to_string(),
                    edges: vec![0.0, 50.0, 100.0],
                    content: vec![Content::Value(w), Content::Value(2.0 * w)],
                    flow: Flow::Mode(FlowMode::Clamp),
                },
            );
        }
        let corr = Correction {
            name: name.to_string(),
            description: None,
            version: 1,
            inputs: vec![
                Variable::new("NumTrueInteractions", VarType::Real),
                Variable::new("weights", VarType::String),
            ],
            output: Variable::new("weight", VarType::Real),
            data: cat.into(),
        };
        CorrectionSet::new("pileup", vec![corr])
    }

    #[test]
    fn up_and_down_use_their_own_labels() {
        let pu = PileupWeights::from_set(&weights_set(PILEUP_CORRECTION)).unwrap();
        assert_eq!(pu.weight(20.0, WeightVariation::Nominal).unwrap(), 1.0);
        assert_eq!(pu.weight(20.0, WeightVariation::PuUp).unwrap(), 1.2);
        assert_eq!(pu.weight(20.0, WeightVariation::PuDn).unwrap(), 0.8);
        assert_eq!(pu.weight(70.0, WeightVariation::PuUp).unwrap(), 2.4);
    }

    #[test]
    fn single_correction_is_used_whatever_its_name() {
        let pu = PileupWeights::from_set(&weights_set("Collisions2022_puWeights")).unwrap();
        assert_eq!(pu.weight(60.0, WeightVariation::Nominal).unwrap(), 2.0);
    }
}
