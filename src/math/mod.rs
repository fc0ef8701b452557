//! Numerical utilities: weighted least squares and binned histograms.

pub mod histogram;
pub mod ols;

pub use histogram::*;
pub use ols::*;
