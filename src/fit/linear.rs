//! Straight-line fit of a MET component vs. pileup.
//!
//! Given a 2D histogram (pileup on x, MET component on y) and a restricted
//! pileup range, we fit
//!
//! ```text
//! y = m·x + c
//! ```
//!
//! by weighted least squares over the centers of every non-empty bin inside the
//! range, using the bin content as weight. The bin contents are treated as
//! frequency weights, so the residual variance is
//!
//! ```text
//! σ̂² = Σ w·r² / (Σw − 2)
//! ```
//!
//! and the parameter covariance is `σ̂²·(XᵀWX)⁻¹`. The m/c correlation comes
//! from the normalised `(XᵀWX)⁻¹` and is therefore defined even for a perfect
//! (noise-free) fit.
//!
//! Degenerate input never produces parameters: empty histograms, ranges
//! without entries and single-column data are reported as errors.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::domain::FitParams;
use crate::error::AppError;
use crate::math::{Hist2D, normal_matrix_inverse, solve_least_squares};

/// Inclusive pileup range whose bin centers take part in the fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitRange {
    pub lo: f64,
    pub hi: f64,
}

impl Default for FitRange {
    fn default() -> Self {
        Self { lo: 10.0, hi: 70.0 }
    }
}

impl FitRange {
    pub fn contains(&self, x: f64) -> bool {
        x >= self.lo && x <= self.hi
    }
}

/// A linear fit plus the diagnostics that went into it.
#[derive(Debug, Clone)]
pub struct LinearFit {
    pub params: FitParams,
    /// Number of histogram bins used.
    pub n_points: usize,
    /// Sum of bin contents inside the fit range.
    pub sum_w: f64,
    /// Weighted sum of squared residuals.
    pub chi2: f64,
}

/// Fit `y = m·x + c` to the histogram inside `range`.
pub fn fit_line(hist: &Hist2D, range: FitRange) -> Result<LinearFit, AppError> {
    if !(range.lo.is_finite() && range.hi.is_finite() && range.hi > range.lo) {
        return Err(AppError::new(
            2,
            format!("Invalid fit range [{}, {}].", range.lo, range.hi),
        ));
    }

    hist.validate()?;

    if hist.entries == 0 || (hist.integral() == 0.0 && hist.outside == 0.0) {
        return Err(AppError::new(
            4,
            format!("Histogram '{}' has no entries; refusing to fit.", hist.name),
        ));
    }

    let points: Vec<(f64, f64, f64)> = hist
        .filled_bins()
        .filter(|&(x, _, w)| range.contains(x) && w > 0.0)
        .collect();

    if points.is_empty() {
        return Err(AppError::new(
            4,
            format!(
                "Histogram '{}' has no entries inside the fit range [{}, {}].",
                hist.name, range.lo, range.hi
            ),
        ));
    }

    let sum_w: f64 = points.iter().map(|p| p.2).sum();
    if sum_w <= 2.0 {
        return Err(AppError::new(
            4,
            format!(
                "Histogram '{}' has too few weighted entries in the fit range (Σw = {sum_w:.3}).",
                hist.name
            ),
        ));
    }

    let degenerate = || {
        AppError::new(
            4,
            format!(
                "Fit of histogram '{}' is degenerate: entries span a single pileup value in [{}, {}].",
                hist.name, range.lo, range.hi
            ),
        )
    };

    // A single column of bin centers leaves the slope undefined.
    let x0 = points[0].0;
    if points.iter().all(|p| p.0 == x0) {
        return Err(degenerate());
    }

    let n = points.len();
    let mut xw = DMatrix::<f64>::zeros(n, 2);
    let mut yw = DVector::<f64>::zeros(n);
    for (i, &(x, y, w)) in points.iter().enumerate() {
        let sw = w.sqrt();
        xw[(i, 0)] = x * sw;
        xw[(i, 1)] = sw;
        yw[i] = y * sw;
    }

    let inv = normal_matrix_inverse(&xw).ok_or_else(degenerate)?;
    let beta = solve_least_squares(&xw, &yw).ok_or_else(degenerate)?;
    let (m, c) = (beta[0], beta[1]);

    let chi2: f64 = points
        .iter()
        .map(|&(x, y, w)| {
            let r = y - (m * x + c);
            w * r * r
        })
        .sum();
    let sigma2 = chi2 / (sum_w - 2.0);

    let (v_m, v_c, v_mc) = (inv[(0, 0)], inv[(1, 1)], inv[(0, 1)]);
    let correlation = if v_m > 0.0 && v_c > 0.0 {
        (v_mc / (v_m * v_c).sqrt()).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    let params = FitParams {
        m,
        m_stat: (sigma2 * v_m).max(0.0).sqrt(),
        c,
        c_stat: (sigma2 * v_c).max(0.0).sqrt(),
        correlation,
    };

    let all_finite = [params.m, params.m_stat, params.c, params.c_stat, params.correlation]
        .iter()
        .all(|v| v.is_finite());
    if !all_finite {
        return Err(AppError::new(
            4,
            format!("Fit of histogram '{}' produced non-finite parameters.", hist.name),
        ));
    }

    Ok(LinearFit {
        params,
        n_points: n,
        sum_w,
        chi2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Axis;

    /// Axes with integer bin centers so a noise-free line lands exactly on them.
    fn integer_axes() -> (Axis, Axis) {
        (
            Axis::new(101, -0.5, 100.5).unwrap(),
            Axis::new(260, -0.5, 259.5).unwrap(),
        )
    }

    #[test]
    fn recovers_noise_free_line() {
        let (xa, ya) = integer_axes();
        let mut h = Hist2D::new("line", xa, ya);
        for x in 0..=100 {
            let x = x as f64;
            for _ in 0..5 {
                h.fill(x, 2.0 * x + 3.0, 1.0);
            }
        }

        let fit = fit_line(&h, FitRange { lo: 0.0, hi: 100.0 }).unwrap();
        assert!((fit.params.m - 2.0).abs() < 1e-9, "m = {}", fit.params.m);
        assert!((fit.params.c - 3.0).abs() < 1e-9, "c = {}", fit.params.c);
        assert!(fit.params.m_stat < 1e-6);
        assert!(fit.params.c_stat < 1e-6);
        assert!(fit.params.correlation < 0.0);
        assert_eq!(fit.n_points, 101);
    }

    #[test]
    fn restricted_range_ignores_outlying_columns() {
        let (xa, ya) = integer_axes();
        let mut h = Hist2D::new("kink", xa, ya);
        for x in 0..=100 {
            let xf = x as f64;
            // Inside [10, 70] the line is y = x + 5; outside it is flat.
            let y = if (10..=70).contains(&x) { xf + 5.0 } else { 200.0 };
            h.fill(xf, y, 3.0);
        }

        let fit = fit_line(&h, FitRange::default()).unwrap();
        assert!((fit.params.m - 1.0).abs() < 1e-9);
        assert!((fit.params.c - 5.0).abs() < 1e-9);
        assert_eq!(fit.n_points, 61);
    }

    #[test]
    fn noisy_fit_has_positive_uncertainties() {
        let (xa, ya) = integer_axes();
        let mut h = Hist2D::new("noisy", xa, ya);
        for x in 10..=70 {
            let xf = x as f64;
            h.fill(xf, xf + 20.0, 1.0);
            h.fill(xf, xf + 24.0, 1.0);
        }
        let fit = fit_line(&h, FitRange::default()).unwrap();
        // Symmetric scatter around y = x + 22.
        assert!((fit.params.m - 1.0).abs() < 1e-9);
        assert!((fit.params.c - 22.0).abs() < 1e-9);
        assert!(fit.params.m_stat > 0.0);
        assert!(fit.params.c_stat > 0.0);
        assert!(fit.params.correlation > -1.0 && fit.params.correlation < 0.0);
    }

    #[test]
    fn empty_histogram_fails_loudly() {
        let (xa, ya) = integer_axes();
        let h = Hist2D::new("empty", xa, ya);
        let err = fit_line(&h, FitRange::default()).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.message().contains("no entries"));
    }

    #[test]
    fn entries_outside_range_fail_without_panicking() {
        let (xa, ya) = integer_axes();
        let mut h = Hist2D::new("outside", xa, ya);
        for x in 80..=100 {
            h.fill(x as f64, 10.0, 1.0);
        }
        let err = fit_line(&h, FitRange::default()).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.message().contains("fit range"));
    }

    #[test]
    fn single_pileup_column_is_degenerate() {
        let (xa, ya) = integer_axes();
        let mut h = Hist2D::new("column", xa, ya);
        for y in 0..50 {
            h.fill(40.0, y as f64, 1.0);
        }
        let err = fit_line(&h, FitRange::default()).unwrap_err();
        assert!(err.message().contains("degenerate"));
    }

    #[test]
    fn corrupt_histogram_is_an_error_not_a_panic() {
        let (xa, ya) = integer_axes();
        let mut h = Hist2D::new("short", xa, ya);
        h.content = vec![1.0, 2.0];
        let err = fit_line(&h, FitRange::default()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn single_pileup_column_with_fractional_weights_is_degenerate() {
        let xa = Axis::new(100, 0.0, 100.0).unwrap();
        let ya = Axis::new(200, -100.0, 100.0).unwrap();
        for w in [0.7, 1.3, 0.37, 2.9, 0.123] {
            let mut h = Hist2D::new("column", xa, ya);
            for i in 0..50 {
                h.fill(40.3, i as f64 * 0.9 - 20.0, w + i as f64 * 1e-3);
            }
            let err = fit_line(&h, FitRange::default()).unwrap_err();
            assert_eq!(err.exit_code(), 4, "w = {w}");
            assert!(err.message().contains("degenerate"), "w = {w}");
        }
    }
}
