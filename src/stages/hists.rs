//! Histogram filling: MET component vs. pileup, one 2D histogram per
//! (pileup variable, MET type, component, weight variation).
//!
//! Files are filled in parallel and merged in file order, so the same
//! snapshots always give bit-identical histograms.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::info;

use crate::config::BinningConfig;
use crate::domain::{Component, DatasetKind, component_column, hist_name};
use crate::error::AppError;
use crate::io::{HistogramFile, read_table, write_histogram_file};
use crate::math::Hist2D;
use crate::stages::StageContext;

/// One histogram to fill and the snapshot columns it reads.
#[derive(Debug, Clone)]
struct Target {
    name: String,
    pileup: String,
    component: String,
    weight: &'static str,
}

fn targets(kind: DatasetKind, mets: &[String], pileups: &[String]) -> Vec<Target> {
    let mut out = Vec::new();
    for pileup in pileups {
        for met in mets {
            for component in Component::ALL {
                for &variation in kind.variations() {
                    out.push(Target {
                        name: hist_name(pileup, met, component, variation),
                        pileup: pileup.clone(),
                        component: component_column(met, component),
                        weight: variation.weight_column(),
                    });
                }
            }
        }
    }
    out
}

fn required_columns(targets: &[Target]) -> Vec<String> {
    let mut cols: Vec<String> = Vec::new();
    for t in targets {
        for c in [t.pileup.as_str(), t.component.as_str(), t.weight] {
            if !cols.iter().any(|have| have == c) {
                cols.push(c.to_string());
            }
        }
    }
    cols
}

fn empty_hists(targets: &[Target], binning: &BinningConfig) -> BTreeMap<String, Hist2D> {
    targets
        .iter()
        .map(|t| (t.name.clone(), Hist2D::new(t.name.clone(), binning.pileup, binning.met)))
        .collect()
}

fn fill_file(
    path: &Path,
    targets: &[Target],
    columns: &[String],
    binning: &BinningConfig,
) -> Result<(BTreeMap<String, Hist2D>, usize), AppError> {
    let read = read_table(path, columns)?;
    if !read.row_errors.is_empty() {
        return Err(AppError::new(
            2,
            format!(
                "Snapshot '{}' has {} malformed row(s); rerun the snapshot check.",
                path.display(),
                read.row_errors.len()
            ),
        ));
    }
    let table = read.table;

    let mut hists = empty_hists(targets, binning);
    for t in targets {
        let pileup = table.column(&t.pileup)?;
        let value = table.column(&t.component)?;
        let weight = table.column(t.weight)?;
        if let Some(h) = hists.get_mut(&t.name) {
            for i in 0..table.len() {
                h.fill(pileup[i], value[i], weight[i]);
            }
        }
    }
    Ok((hists, table.len()))
}

/// Fill every histogram of `kind` from `files`.
pub fn fill_histograms(
    files: &[PathBuf],
    year: &str,
    kind: DatasetKind,
    mets: &[String],
    pileups: &[String],
    binning: &BinningConfig,
) -> Result<HistogramFile, AppError> {
    let targets = targets(kind, mets, pileups);
    let columns = required_columns(&targets);

    let per_file: Vec<(BTreeMap<String, Hist2D>, usize)> = files
        .par_iter()
        .map(|path| fill_file(path, &targets, &columns, binning))
        .collect::<Result<_, _>>()?;

    let mut merged = empty_hists(&targets, binning);
    let mut events = 0;
    for (hists, n) in &per_file {
        events += n;
        for (name, h) in hists {
            if let Some(total) = merged.get_mut(name) {
                total.merge(h)?;
            }
        }
    }
    if events == 0 {
        return Err(AppError::new(
            3,
            format!("No {kind} events in {} snapshot file(s).", files.len()),
        ));
    }
    info!("{kind}: filled {} histogram(s) from {events} event(s)", merged.len());

    let mut out = HistogramFile::new(year, kind);
    out.hists = merged;
    Ok(out)
}

/// Run the histogram stage for every selected dataset kind.
pub fn run(ctx: &StageContext) -> Result<Vec<PathBuf>, AppError> {
    let mut written = Vec::with_capacity(ctx.kinds.len());
    for &kind in &ctx.kinds {
        let files = ctx.snapshot_files(kind)?;
        info!("Filling {kind} histograms from {} snapshot(s)", files.len());
        let hists = fill_histograms(
            &files,
            &ctx.year,
            kind,
            &ctx.mets,
            &ctx.pileups,
            &ctx.settings.binning,
        )?;
        let path = ctx.paths.hist_file(kind);
        write_histogram_file(&path, &hists)?;
        info!("Histograms saved in {}", path.display());
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::domain::WeightVariation;

    fn write_snapshot(path: &Path, rows: &[(f64, f64, f64, f64)]) {
        let mut text = String::from("PV_npvsGood,MET_x,MET_y,puWeight,puWeightUp,puWeightDn\n");
        for (npv, x, y, w) in rows {
            text.push_str(&format!("{npv},{x},{y},{w},{},{}\n", w * 1.5, w * 0.5));
        }
        fs::write(path, text).unwrap();
    }

    #[test]
    fn mc_histograms_use_their_weight_columns() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("file_0.csv");
        write_snapshot(&a, &[(20.0, 5.0, -5.0, 1.0), (40.0, 10.0, 0.0, 2.0)]);
        let mets = vec!["MET".to_string()];
        let pileups = vec!["PV_npvsGood".to_string()];

        let out = fill_histograms(
            &[a],
            "2022_Summer22",
            DatasetKind::Mc,
            &mets,
            &pileups,
            &BinningConfig::default(),
        )
        .unwrap();
        assert_eq!(out.hists.len(), 6);
        let nom = out
            .get(&hist_name("PV_npvsGood", "MET", Component::X, WeightVariation::Nominal))
            .unwrap();
        let up = out
            .get(&hist_name("PV_npvsGood", "MET", Component::X, WeightVariation::PuUp))
            .unwrap();
        assert_eq!(nom.integral(), 3.0);
        assert_eq!(up.integral(), 4.5);
        assert_eq!(nom.entries, 2);
    }

    #[test]
    fn refilling_is_bit_identical_and_empty_input_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<PathBuf> = (0..4).map(|i| dir.path().join(format!("file_{i}.csv"))).collect();
        for (i, f) in files.iter().enumerate() {
            let rows: Vec<_> = (0..50)
                .map(|j| {
                    let npv = (i * 7 + j) as f64 % 60.0;
                    (npv, 0.1 * npv + 0.37 * j as f64, -0.2 * npv, 0.9 + 0.01 * j as f64)
                })
                .collect();
            write_snapshot(f, &rows);
        }
        let mets = vec!["MET".to_string()];
        let pileups = vec!["PV_npvsGood".to_string()];
        let fill = || {
            fill_histograms(&files, "y", DatasetKind::Data, &mets, &pileups, &BinningConfig::default())
                .unwrap()
        };
        let first = serde_json::to_string(&fill()).unwrap();
        let second = serde_json::to_string(&fill()).unwrap();
        assert_eq!(first, second);

        let empty = dir.path().join("file_9.csv");
        write_snapshot(&empty, &[]);
        let err = fill_histograms(&[empty], "y", DatasetKind::Data, &mets, &pileups, &BinningConfig::default())
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
