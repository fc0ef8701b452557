//! Portable correction schema: data model, formula engine, evaluator and builder.
//!
//! - `model`: serde types for schema-v2 documents
//! - `formula`: TFormula-subset compiler
//! - `eval`: compiled evaluation of a correction tree
//! - `build`: MET xy schema assembly from fit parameters

pub mod build;
pub mod eval;
pub mod formula;
pub mod model;

pub use build::{MetCorrector, build_combined, build_correction};
pub use eval::{CompiledCorrection, EvalError, Input};
pub use model::CorrectionSet;
