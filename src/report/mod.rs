//! Reporting utilities: terminal tables for the fit and validation stages.

mod format;

pub use format::{format_fit_summary, format_validation};
