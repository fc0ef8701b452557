//! Weighted least squares solver.
//!
//! The correction fit is a straight line through the bin centers of a 2D
//! histogram, weighted by the bin contents:
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! Implementation choices:
//! - Rows are scaled by `sqrt(w_i)` so the problem becomes ordinary least squares.
//! - The solve uses SVD, which handles the tall design matrix (hundreds of bins,
//!   two columns) directly; nalgebra's `QR::solve` expects square systems.
//! - The parameter covariance needs `(XᵀWX)⁻¹`, computed from the same scaled
//!   design matrix.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Inverse of the normal matrix `XᵀX` of an already weight-scaled design matrix.
///
/// Returns `None` when the matrix is singular (e.g. every row has the same x).
pub fn normal_matrix_inverse(x: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let normal = x.transpose() * x;
    let inv = normal.try_inverse()?;
    if inv.iter().all(|v| v.is_finite()) {
        Some(inv)
    } else {
        None
    }
}
