//! Correction fitting.
//!
//! - `linear`: weighted straight-line fit of one 2D histogram
//! - `extract`: fit every histogram of a dataset kind into `CorrectionParams`

pub mod extract;
pub mod linear;

pub use extract::*;
pub use linear::*;
