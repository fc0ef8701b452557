//! `met-xy-corrs` library crate.
//!
//! The binary (`xycorr`) is a thin wrapper around this library so that:
//!
//! - every stage is testable without spawning processes
//! - the schema builder and evaluator can be used from other tools
//! - the pipeline stays easy to navigate stage by stage

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod report;
pub mod schema;
pub mod stages;
