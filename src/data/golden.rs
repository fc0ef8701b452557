//! Certified-luminosity ("golden") JSON filter.
//!
//! Format: `{"<run>": [[first_lumi, last_lumi], ...], ...}` with inclusive
//! luminosity-block ranges.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::AppError;
use crate::io::read_json;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoldenJson {
    runs: HashMap<u64, Vec<(u64, u64)>>,
}

impl GoldenJson {
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw: BTreeMap<String, Vec<[u64; 2]>> = read_json(path, "golden JSON")?;
        Self::from_map(raw).map_err(|e| e.context(path.display()))
    }

    pub fn from_map(raw: BTreeMap<String, Vec<[u64; 2]>>) -> Result<Self, AppError> {
        let mut runs = HashMap::with_capacity(raw.len());
        for (run, ranges) in raw {
            let run: u64 = run
                .trim()
                .parse()
                .map_err(|_| AppError::new(2, format!("Invalid run number '{run}' in golden JSON.")))?;
            let ranges = ranges.into_iter().map(|[lo, hi]| (lo, hi)).collect();
            runs.insert(run, ranges);
        }
        Ok(Self { runs })
    }

    /// Whether a (run, luminosity block) pair is certified.
    pub fn contains(&self, run: u64, lumi: u64) -> bool {
        self.runs
            .get(&run)
            .is_some_and(|ranges| ranges.iter().any(|&(lo, hi)| lumi >= lo && lumi <= hi))
    }

    pub fn n_runs(&self) -> usize {
        self.runs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inclusive_ranges_per_run() {
        let raw: BTreeMap<String, Vec<[u64; 2]>> =
            serde_json::from_str(r#"{"355100": [[1, 5], [10, 12]], "355101": [[3, 3]]}"#).unwrap();
        let golden = GoldenJson::from_map(raw).unwrap();

        assert_eq!(golden.n_runs(), 2);
        assert!(golden.contains(355100, 1));
        assert!(golden.contains(355100, 5));
        assert!(!golden.contains(355100, 6));
        assert!(golden.contains(355100, 12));
        assert!(golden.contains(355101, 3));
        assert!(!golden.contains(355101, 4));
        assert!(!golden.contains(355102, 1));
    }

    #[test]
    fn non_numeric_run_is_rejected() {
        let mut raw = BTreeMap::new();
        raw.insert("run1".to_string(), vec![[1, 2]]);
        assert_eq!(GoldenJson::from_map(raw).unwrap_err().exit_code(), 2);
    }
}
