//! Fixed-width weighted histograms.
//!
//! The histograms mirror what the fit and validation stages need and nothing
//! more: uniform axes, sum of weights and sum of squared weights per bin, and
//! an entry count. Values outside the axis range are not stored per bin; their
//! summed weight is kept in `outside` so nothing is silently dropped.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A uniform binning `[min, max)` with `bins` equal-width bins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub bins: usize,
    pub min: f64,
    pub max: f64,
}

impl Axis {
    pub fn new(bins: usize, min: f64, max: f64) -> Result<Self, AppError> {
        let axis = Axis { bins, min, max };
        axis.validate()?;
        Ok(axis)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.bins == 0 {
            return Err(AppError::new(2, "Histogram axis needs at least one bin."));
        }
        if !(self.min.is_finite() && self.max.is_finite() && self.max > self.min) {
            return Err(AppError::new(
                2,
                format!("Invalid histogram axis range [{}, {}].", self.min, self.max),
            ));
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        (self.max - self.min) / self.bins as f64
    }

    /// Bin index of `v`, or `None` for values outside `[min, max)` and NaN.
    pub fn find_bin(&self, v: f64) -> Option<usize> {
        if !(v >= self.min && v < self.max) {
            return None;
        }
        let idx = ((v - self.min) / self.width()) as usize;
        Some(idx.min(self.bins - 1))
    }

    pub fn center(&self, idx: usize) -> f64 {
        self.min + (idx as f64 + 0.5) * self.width()
    }

    pub fn low_edge(&self, idx: usize) -> f64 {
        self.min + idx as f64 * self.width()
    }
}

/// One-dimensional weighted histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist1D {
    pub name: String,
    pub axis: Axis,
    pub content: Vec<f64>,
    pub sumw2: Vec<f64>,
    pub entries: u64,
    pub outside: f64,
}

impl Hist1D {
    pub fn new(name: impl Into<String>, axis: Axis) -> Self {
        Self {
            name: name.into(),
            axis,
            content: vec![0.0; axis.bins],
            sumw2: vec![0.0; axis.bins],
            entries: 0,
            outside: 0.0,
        }
    }

    pub fn fill(&mut self, v: f64, w: f64) {
        self.entries += 1;
        match self.axis.find_bin(v) {
            Some(i) => {
                self.content[i] += w;
                self.sumw2[i] += w * w;
            }
            None => self.outside += w,
        }
    }

    pub fn integral(&self) -> f64 {
        self.content.iter().sum()
    }

    /// Weighted mean of the in-range bin centers.
    pub fn mean(&self) -> Option<f64> {
        let sw = self.integral();
        if sw == 0.0 {
            return None;
        }
        let sx: f64 = self
            .content
            .iter()
            .enumerate()
            .map(|(i, w)| w * self.axis.center(i))
            .sum();
        Some(sx / sw)
    }

    /// Weighted standard deviation of the in-range bin centers.
    pub fn rms(&self) -> Option<f64> {
        let mean = self.mean()?;
        let sw = self.integral();
        let var: f64 = self
            .content
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let d = self.axis.center(i) - mean;
                w * d * d
            })
            .sum::<f64>()
            / sw;
        Some(var.max(0.0).sqrt())
    }

    pub fn merge(&mut self, other: &Hist1D) -> Result<(), AppError> {
        if self.axis != other.axis {
            return Err(AppError::new(
                4,
                format!("Cannot merge histograms '{}' and '{}': axes differ.", self.name, other.name),
            ));
        }
        for (a, b) in self.content.iter_mut().zip(&other.content) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.entries += other.entries;
        self.outside += other.outside;
        Ok(())
    }
}

/// Two-dimensional weighted histogram; `x` is the pileup axis and `y` the
/// MET-component axis. Contents are stored row-major by x bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist2D {
    pub name: String,
    pub x: Axis,
    pub y: Axis,
    pub content: Vec<f64>,
    pub sumw2: Vec<f64>,
    pub entries: u64,
    pub outside: f64,
}

impl Hist2D {
    pub fn new(name: impl Into<String>, x: Axis, y: Axis) -> Self {
        let n = x.bins * y.bins;
        Self {
            name: name.into(),
            x,
            y,
            content: vec![0.0; n],
            sumw2: vec![0.0; n],
            entries: 0,
            outside: 0.0,
        }
    }

    /// Check a histogram read from disk: valid axes and one value per bin.
    pub fn validate(&self) -> Result<(), AppError> {
        let corrupt = |e: AppError| e.context(format!("Histogram '{}'", self.name));
        self.x.validate().map_err(corrupt)?;
        self.y.validate().map_err(corrupt)?;
        let expected = self.x.bins.checked_mul(self.y.bins);
        for (field, len) in [("content", self.content.len()), ("sumw2", self.sumw2.len())] {
            if expected != Some(len) {
                return Err(AppError::new(
                    2,
                    format!(
                        "Histogram '{}' is corrupt: {field} has {len} values for {}x{} bins.",
                        self.name, self.x.bins, self.y.bins
                    ),
                ));
            }
        }
        Ok(())
    }

    fn index(&self, ix: usize, iy: usize) -> usize {
        ix * self.y.bins + iy
    }

    pub fn fill(&mut self, x: f64, y: f64, w: f64) {
        self.entries += 1;
        match (self.x.find_bin(x), self.y.find_bin(y)) {
            (Some(ix), Some(iy)) => {
                let idx = self.index(ix, iy);
                self.content[idx] += w;
                self.sumw2[idx] += w * w;
            }
            _ => self.outside += w,
        }
    }

    pub fn bin_content(&self, ix: usize, iy: usize) -> f64 {
        self.content[self.index(ix, iy)]
    }

    pub fn integral(&self) -> f64 {
        self.content.iter().sum()
    }

    /// Iterate over `(x_center, y_center, content)` of every non-empty bin.
    pub fn filled_bins(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        (0..self.x.bins).flat_map(move |ix| {
            (0..self.y.bins).filter_map(move |iy| {
                let w = self.bin_content(ix, iy);
                (w != 0.0).then(|| (self.x.center(ix), self.y.center(iy), w))
            })
        })
    }

    pub fn merge(&mut self, other: &Hist2D) -> Result<(), AppError> {
        if self.x != other.x || self.y != other.y {
            return Err(AppError::new(
                4,
                format!("Cannot merge histograms '{}' and '{}': axes differ.", self.name, other.name),
            ));
        }
        for (a, b) in self.content.iter_mut().zip(&other.content) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.entries += other.entries;
        self.outside += other.outside;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_bins_and_centers() {
        let axis = Axis::new(100, 0.0, 100.0).unwrap();
        assert_eq!(axis.find_bin(0.0), Some(0));
        assert_eq!(axis.find_bin(99.999), Some(99));
        assert_eq!(axis.find_bin(100.0), None);
        assert_eq!(axis.find_bin(-0.1), None);
        assert_eq!(axis.find_bin(f64::NAN), None);
        assert!((axis.center(10) - 10.5).abs() < 1e-12);
        assert!(Axis::new(0, 0.0, 1.0).is_err());
        assert!(Axis::new(5, 1.0, 1.0).is_err());
    }

    #[test]
    fn fill_tracks_weights_and_outside() {
        let x = Axis::new(10, 0.0, 10.0).unwrap();
        let y = Axis::new(4, -2.0, 2.0).unwrap();
        let mut h = Hist2D::new("h", x, y);
        h.fill(3.2, 0.5, 2.0);
        h.fill(3.7, 0.9, 0.5);
        h.fill(30.0, 0.0, 1.0);

        assert_eq!(h.entries, 3);
        assert!((h.bin_content(3, 2) - 2.5).abs() < 1e-12);
        assert!((h.sumw2[3 * 4 + 2] - 4.25).abs() < 1e-12);
        assert!((h.outside - 1.0).abs() < 1e-12);
        assert_eq!(h.filled_bins().count(), 1);
    }

    #[test]
    fn hist1d_mean_and_rms() {
        let mut h = Hist1D::new("pt", Axis::new(4, 0.0, 4.0).unwrap());
        h.fill(0.5, 1.0);
        h.fill(2.5, 1.0);
        assert!((h.mean().unwrap() - 1.5).abs() < 1e-12);
        assert!((h.rms().unwrap() - 1.0).abs() < 1e-12);
        assert!(Hist1D::new("e", h.axis).mean().is_none());
    }

    #[test]
    fn validate_rejects_mismatched_storage() {
        let x = Axis::new(100, 0.0, 100.0).unwrap();
        let y = Axis::new(200, -100.0, 100.0).unwrap();
        let mut h = Hist2D::new("h", x, y);
        h.validate().unwrap();

        h.content.truncate(2);
        let err = h.validate().unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.message().contains("content has 2 values"));

        let mut h = Hist2D::new("h", x, y);
        h.sumw2.pop();
        assert!(h.validate().unwrap_err().message().contains("sumw2"));

        let mut h = Hist2D::new("h", x, y);
        h.y.bins = 0;
        h.content.clear();
        h.sumw2.clear();
        assert_eq!(h.validate().unwrap_err().exit_code(), 2);
    }

    #[test]
    fn merge_requires_matching_axes() {
        let a = Axis::new(2, 0.0, 2.0).unwrap();
        let b = Axis::new(3, 0.0, 2.0).unwrap();
        let mut h1 = Hist2D::new("a", a, a);
        let h2 = Hist2D::new("b", b, a);
        assert!(h1.merge(&h2).is_err());

        let mut h3 = Hist2D::new("c", a, a);
        h3.fill(0.5, 0.5, 1.0);
        h1.merge(&h3).unwrap();
        assert_eq!(h1.entries, 1);
        assert!((h1.integral() - 1.0).abs() < 1e-12);
    }
}
