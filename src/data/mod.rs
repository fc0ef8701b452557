//! Input data sources.
//!
//! - dataset discovery into file lists (`das`)
//! - certified-luminosity filter (`golden`)
//! - pileup reweighting for simulation (`pileup`)
//! - synthetic raw events with an injected bias (`synth`)

pub mod das;
pub mod golden;
pub mod pileup;
pub mod synth;

pub use das::{DasClient, FileCatalog, discover_files};
pub use golden::GoldenJson;
pub use pileup::PileupWeights;
pub use synth::{SynthConfig, write_sample};
