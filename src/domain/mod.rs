//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - dataset/variation enums (`DatasetKind`, `Component`, `WeightVariation`)
//! - the correction parameter record (`FitParams`) and its nested container
//!   (`CorrectionParams`)
//! - the naming conventions shared by snapshots, histograms and fit files

pub mod types;

pub use types::*;
