//! Runtime evaluation of correction trees.
//!
//! A `Correction` is compiled once into a `CompiledCorrection`: input names are
//! resolved to positions, formulas are parsed with their parameters bound, and
//! categories are indexed by key. `evaluate` then walks the compiled tree for a
//! concrete set of inputs.

use std::collections::HashMap;

use thiserror::Error;

use crate::schema::formula::CompiledFormula;
use crate::schema::model::{
    Binning, Category, CategoryKey, Content, Correction, CorrectionSet, Flow, FlowMode, Formula,
    Node, VarType, Variable,
};

/// Highest number of variables a TFormula expression can address (`x y z t`).
const MAX_FORMULA_VARS: usize = 4;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("correction '{0}' not found")]
    UnknownCorrection(String),
    #[error("expected {expected} inputs, got {got}")]
    InputCount { expected: usize, got: usize },
    #[error("input '{name}' expects a {expected} value")]
    InputType { name: String, expected: &'static str },
    #[error("node references unknown input '{0}'")]
    UnknownInput(String),
    #[error("no entry '{key}' for input '{input}'")]
    MissingKey { input: String, key: String },
    #[error("value {value} for input '{input}' is outside the binning")]
    OutOfRange { input: String, value: f64 },
    #[error("invalid binning on '{input}': {reason}")]
    InvalidBinning { input: String, reason: String },
    #[error("formula error: {0}")]
    Formula(String),
}

/// One runtime input value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Input<'a> {
    Real(f64),
    Str(&'a str),
}

impl From<f64> for Input<'_> {
    fn from(value: f64) -> Self {
        Input::Real(value)
    }
}

impl<'a> From<&'a str> for Input<'a> {
    fn from(value: &'a str) -> Self {
        Input::Str(value)
    }
}

#[derive(Debug, Clone)]
enum CompiledNode {
    Value(f64),
    Category {
        input: usize,
        by_str: HashMap<String, CompiledNode>,
        by_int: HashMap<i64, CompiledNode>,
        default: Option<Box<CompiledNode>>,
    },
    Formula {
        formula: CompiledFormula,
        vars: Vec<usize>,
    },
    Binning {
        input: usize,
        edges: Vec<f64>,
        content: Vec<CompiledNode>,
        flow: CompiledFlow,
    },
}

#[derive(Debug, Clone)]
enum CompiledFlow {
    Clamp,
    Error,
    Default(Box<CompiledNode>),
}

/// A correction ready for repeated evaluation.
#[derive(Debug, Clone)]
pub struct CompiledCorrection {
    pub name: String,
    pub inputs: Vec<Variable>,
    root: CompiledNode,
}

impl CompiledCorrection {
    pub fn compile(correction: &Correction) -> Result<Self, EvalError> {
        let root = compile_content(&correction.data, &correction.inputs)?;
        Ok(Self {
            name: correction.name.clone(),
            inputs: correction.inputs.clone(),
            root,
        })
    }

    /// Compile the correction called `name` from a set.
    pub fn from_set(cset: &CorrectionSet, name: &str) -> Result<Self, EvalError> {
        let correction = cset
            .get(name)
            .ok_or_else(|| EvalError::UnknownCorrection(name.to_string()))?;
        Self::compile(correction)
    }

    /// Evaluate the correction; `inputs` follow the declared input order.
    pub fn evaluate(&self, inputs: &[Input<'_>]) -> Result<f64, EvalError> {
        if inputs.len() != self.inputs.len() {
            return Err(EvalError::InputCount {
                expected: self.inputs.len(),
                got: inputs.len(),
            });
        }
        for (var, value) in self.inputs.iter().zip(inputs) {
            let ok = match (var.kind, value) {
                (VarType::String, Input::Str(_)) => true,
                (VarType::Real | VarType::Int, Input::Real(_)) => true,
                _ => false,
            };
            if !ok {
                return Err(EvalError::InputType {
                    name: var.name.clone(),
                    expected: type_label(var.kind),
                });
            }
        }
        self.eval_node(&self.root, inputs)
    }

    fn eval_node(&self, node: &CompiledNode, inputs: &[Input<'_>]) -> Result<f64, EvalError> {
        match node {
            CompiledNode::Value(v) => Ok(*v),
            CompiledNode::Category {
                input,
                by_str,
                by_int,
                default,
            } => {
                let found = match inputs[*input] {
                    Input::Str(key) => by_str.get(key),
                    Input::Real(v) => {
                        if v.fract() == 0.0 && v.is_finite() {
                            by_int.get(&(v as i64))
                        } else {
                            None
                        }
                    }
                };
                match (found, default) {
                    (Some(next), _) => self.eval_node(next, inputs),
                    (None, Some(next)) => self.eval_node(next, inputs),
                    (None, None) => Err(EvalError::MissingKey {
                        input: self.inputs[*input].name.clone(),
                        key: match inputs[*input] {
                            Input::Str(s) => s.to_string(),
                            Input::Real(v) => v.to_string(),
                        },
                    }),
                }
            }
            CompiledNode::Formula { formula, vars } => {
                let mut values = [0.0f64; MAX_FORMULA_VARS];
                for (slot, &idx) in values.iter_mut().zip(vars) {
                    *slot = self.real_input(inputs, idx)?;
                }
                Ok(formula.eval(&values[..vars.len()]))
            }
            CompiledNode::Binning {
                input,
                edges,
                content,
                flow,
            } => {
                let x = self.real_input(inputs, *input)?;
                let last = content.len() - 1;
                let out_of_range = || EvalError::OutOfRange {
                    input: self.inputs[*input].name.clone(),
                    value: x,
                };
                if x.is_nan() {
                    return Err(out_of_range());
                }
                let idx = if x < edges[0] || x >= edges[edges.len() - 1] {
                    match flow {
                        CompiledFlow::Clamp => {
                            if x < edges[0] {
                                0
                            } else {
                                last
                            }
                        }
                        CompiledFlow::Error => return Err(out_of_range()),
                        CompiledFlow::Default(node) => return self.eval_node(node, inputs),
                    }
                } else {
                    edges.partition_point(|e| *e <= x) - 1
                };
                self.eval_node(&content[idx.min(last)], inputs)
            }
        }
    }

    fn real_input(&self, inputs: &[Input<'_>], idx: usize) -> Result<f64, EvalError> {
        match inputs[idx] {
            Input::Real(v) => Ok(v),
            Input::Str(_) => Err(EvalError::InputType {
                name: self.inputs[idx].name.clone(),
                expected: "real",
            }),
        }
    }
}

fn type_label(kind: VarType) -> &'static str {
    match kind {
        VarType::String => "string",
        VarType::Real => "real",
        VarType::Int => "int",
    }
}

fn input_index(inputs: &[Variable], name: &str) -> Result<usize, EvalError> {
    inputs
        .iter()
        .position(|v| v.name == name)
        .ok_or_else(|| EvalError::UnknownInput(name.to_string()))
}

fn compile_content(content: &Content, inputs: &[Variable]) -> Result<CompiledNode, EvalError> {
    match content {
        Content::Value(v) => Ok(CompiledNode::Value(*v)),
        Content::Node(Node::Category(cat)) => compile_category(cat, inputs),
        Content::Node(Node::Formula(formula)) => compile_formula(formula, inputs),
        Content::Node(Node::Binning(binning)) => compile_binning(binning, inputs),
    }
}

fn compile_category(cat: &Category, inputs: &[Variable]) -> Result<CompiledNode, EvalError> {
    let input = input_index(inputs, &cat.input)?;
    let mut by_str = HashMap::new();
    let mut by_int = HashMap::new();
    for item in &cat.content {
        let node = compile_content(&item.value, inputs)?;
        match &item.key {
            CategoryKey::Str(k) => {
                by_str.insert(k.clone(), node);
            }
            CategoryKey::Int(k) => {
                by_int.insert(*k, node);
            }
        }
    }
    let default = match &cat.default {
        Some(d) => Some(Box::new(compile_content(d, inputs)?)),
        None => None,
    };
    Ok(CompiledNode::Category {
        input,
        by_str,
        by_int,
        default,
    })
}

fn compile_formula(formula: &Formula, inputs: &[Variable]) -> Result<CompiledNode, EvalError> {
    if formula.parser != "TFormula" {
        return Err(EvalError::Formula(format!(
            "unsupported formula parser '{}'",
            formula.parser
        )));
    }
    if formula.variables.len() > MAX_FORMULA_VARS {
        return Err(EvalError::Formula(format!(
            "formula declares {} variables; at most {MAX_FORMULA_VARS} are addressable",
            formula.variables.len()
        )));
    }
    let vars = formula
        .variables
        .iter()
        .map(|name| input_index(inputs, name))
        .collect::<Result<Vec<_>, _>>()?;
    let compiled = CompiledFormula::compile(&formula.expression, vars.len(), &formula.parameters)?;
    Ok(CompiledNode::Formula {
        formula: compiled,
        vars,
    })
}

fn compile_binning(binning: &Binning, inputs: &[Variable]) -> Result<CompiledNode, EvalError> {
    let input = input_index(inputs, &binning.input)?;
    let invalid = |reason: &str| EvalError::InvalidBinning {
        input: binning.input.clone(),
        reason: reason.to_string(),
    };
    if binning.edges.len() < 2 {
        return Err(invalid("needs at least two edges"));
    }
    if binning.edges.windows(2).any(|w| !(w[0] < w[1])) {
        return Err(invalid("edges must be strictly increasing"));
    }
    if binning.content.len() != binning.edges.len() - 1 {
        return Err(invalid("content length must be one less than edges"));
    }
    let content = binning
        .content
        .iter()
        .map(|c| compile_content(c, inputs))
        .collect::<Result<Vec<_>, _>>()?;
    let flow = match &binning.flow {
        Flow::Mode(FlowMode::Clamp) => CompiledFlow::Clamp,
        Flow::Mode(FlowMode::Error) => CompiledFlow::Error,
        Flow::Default(c) => CompiledFlow::Default(Box::new(compile_content(c, inputs)?)),
    };
    Ok(CompiledNode::Binning {
        input,
        edges: binning.edges.clone(),
        content,
        flow,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pileup_weights(flow: Flow) -> Correction {
        let binning = Binning {
            input: "NumTrueInteractions".to_string(),
            edges: vec![0.0, 10.0, 20.0, 30.0],
            content: vec![Content::Value(0.5), Content::Value(1.0), Content::Value(2.0)],
            flow,
        };
        let mut cat = Category::new("weights");
        cat.push("nominal", binning);
        cat.push("up", Content::Value(3.0));
        Correction {
            name: "puweights".to_string(),
            description: None,
            version: 1,
            inputs: vec![
                Variable::new("NumTrueInteractions", VarType::Real),
                Variable::new("weights", VarType::String),
            ],
            output: Variable::new("weight", VarType::Real),
            data: cat.into(),
        }
    }

    #[test]
    fn binning_and_category_lookup() {
        let c = CompiledCorrection::compile(&pileup_weights(Flow::Mode(FlowMode::Clamp))).unwrap();
        let eval = |x: f64, w: &str| c.evaluate(&[Input::Real(x), Input::Str(w)]);

        assert_eq!(eval(5.0, "nominal").unwrap(), 0.5);
        assert_eq!(eval(10.0, "nominal").unwrap(), 1.0);
        assert_eq!(eval(29.9, "nominal").unwrap(), 2.0);
        assert_eq!(eval(-3.0, "nominal").unwrap(), 0.5);
        assert_eq!(eval(99.0, "nominal").unwrap(), 2.0);
        assert_eq!(eval(12.0, "up").unwrap(), 3.0);
    }

    #[test]
    fn missing_key_is_an_error() {
        let c = CompiledCorrection::compile(&pileup_weights(Flow::Mode(FlowMode::Clamp))).unwrap();
        let err = c.evaluate(&[Input::Real(5.0), Input::Str("down")]).unwrap_err();
        assert_eq!(
            err,
            EvalError::MissingKey {
                input: "weights".to_string(),
                key: "down".to_string()
            }
        );
    }

    #[test]
    fn error_flow_and_default_flow() {
        let c = CompiledCorrection::compile(&pileup_weights(Flow::Mode(FlowMode::Error))).unwrap();
        assert!(matches!(
            c.evaluate(&[Input::Real(30.0), Input::Str("nominal")]),
            Err(EvalError::OutOfRange { .. })
        ));

        let c = CompiledCorrection::compile(&pileup_weights(Flow::Default(Box::new(Content::Value(
            7.0,
        )))))
        .unwrap();
        assert_eq!(c.evaluate(&[Input::Real(31.0), Input::Str("nominal")]).unwrap(), 7.0);
    }

    #[test]
    fn input_arity_and_types_are_checked() {
        let c = CompiledCorrection::compile(&pileup_weights(Flow::Mode(FlowMode::Clamp))).unwrap();
        assert!(matches!(
            c.evaluate(&[Input::Real(5.0)]),
            Err(EvalError::InputCount { expected: 2, got: 1 })
        ));
        assert!(matches!(
            c.evaluate(&[Input::Str("5"), Input::Str("nominal")]),
            Err(EvalError::InputType { .. })
        ));
    }

    #[test]
    fn unknown_input_rejected_at_compile_time() {
        let mut corr = pileup_weights(Flow::Mode(FlowMode::Clamp));
        corr.inputs.pop();
        assert_eq!(
            CompiledCorrection::compile(&corr).unwrap_err(),
            EvalError::UnknownInput("weights".to_string())
        );
    }

    #[test]
    fn formula_reads_named_inputs() {
        let corr = Correction {
            name: "shift".to_string(),
            description: None,
            version: 1,
            inputs: vec![
                Variable::new("a", VarType::Real),
                Variable::new("b", VarType::Real),
            ],
            output: Variable::new("out", VarType::Real),
            data: Formula::tformula("x - [0]*y".to_string(), &["b", "a"], vec![2.0]).into(),
        };
        let c = CompiledCorrection::compile(&corr).unwrap();
        // x = b = 10, y = a = 3
        assert_eq!(c.evaluate(&[Input::Real(3.0), Input::Real(10.0)]).unwrap(), 4.0);
    }
}
