//! Snapshot files on disk: naming, listing and health checks.
//!
//! A snapshot is `snap_dir/<DTMC>/file_<idx>.csv`, one per input file, where
//! `idx` is the position of the input in the file list.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::AppError;

pub fn snapshot_file_name(idx: usize) -> String {
    format!("file_{idx}.csv")
}

fn snapshot_index(path: &Path) -> Option<usize> {
    path.file_name()?
        .to_str()?
        .strip_prefix("file_")?
        .strip_suffix(".csv")?
        .parse()
        .ok()
}

/// Snapshot files of one directory, ordered by file index.
///
/// A missing directory yields an empty list.
pub fn list_snapshots(dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| {
        AppError::new(2, format!("Failed to list snapshots in '{}': {e}", dir.display()))
    })?;

    let mut files: Vec<(usize, PathBuf)> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter_map(|p| snapshot_index(&p).map(|i| (i, p)))
        .collect();
    files.sort_by_key(|(i, _)| *i);
    Ok(files.into_iter().map(|(_, p)| p).collect())
}

/// Problems found by `inspect_snapshots`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotCheck {
    /// Files that cannot be opened or parsed as CSV.
    pub unreadable: Vec<PathBuf>,
    /// Files without a header row.
    pub no_header: Vec<PathBuf>,
    /// Files with a header but zero events.
    pub no_events: Vec<PathBuf>,
    pub healthy: usize,
}

impl SnapshotCheck {
    pub fn failed(&self) -> Vec<&PathBuf> {
        self.unreadable
            .iter()
            .chain(&self.no_header)
            .chain(&self.no_events)
            .collect()
    }
}

enum Health {
    Ok,
    Unreadable,
    NoHeader,
    NoEvents,
}

fn classify(path: &Path) -> Health {
    let mut reader = match csv::ReaderBuilder::new().from_path(path) {
        Ok(r) => r,
        Err(_) => return Health::Unreadable,
    };
    match reader.headers() {
        Ok(h) if h.is_empty() => return Health::NoHeader,
        Ok(_) => {}
        Err(_) => return Health::Unreadable,
    }
    let mut events = 0usize;
    for record in reader.records() {
        if record.is_err() {
            return Health::Unreadable;
        }
        events += 1;
    }
    if events == 0 { Health::NoEvents } else { Health::Ok }
}

/// Classify every snapshot in `dirs`.
pub fn inspect_snapshots(dirs: &[PathBuf]) -> Result<SnapshotCheck, AppError> {
    let mut check = SnapshotCheck::default();
    for dir in dirs {
        info!("Checking snapshots in {}", dir.display());
        for path in list_snapshots(dir)? {
            match classify(&path) {
                Health::Ok => check.healthy += 1,
                Health::Unreadable => check.unreadable.push(path),
                Health::NoHeader => check.no_header.push(path),
                Health::NoEvents => check.no_events.push(path),
            }
        }
    }
    Ok(check)
}

/// Inspect snapshots, report broken ones and offer to delete them.
///
/// `confirm` is asked once; broken files are only removed on `true`.
pub fn check_snapshots(
    dirs: &[PathBuf],
    confirm: &mut dyn FnMut(&str) -> Result<bool, AppError>,
) -> Result<SnapshotCheck, AppError> {
    let check = inspect_snapshots(dirs)?;
    let show = |files: &[PathBuf]| {
        files
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    info!(
        "Snapshot check: {} healthy; unreadable: [{}]; no header: [{}]; zero events: [{}]",
        check.healthy,
        show(&check.unreadable),
        show(&check.no_header),
        show(&check.no_events)
    );

    let failed = check.failed();
    if failed.is_empty() {
        return Ok(check);
    }

    if confirm(&format!("Delete {} broken snapshot file(s)?", failed.len()))? {
        info!("Deleting broken snapshot files.");
        for path in failed {
            fs::remove_file(path).map_err(|e| {
                AppError::new(2, format!("Failed to delete '{}': {e}", path.display()))
            })?;
        }
    } else {
        warn!("Keeping broken snapshot files; later stages may fail on them.");
    }
    Ok(check)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_in_index_order_and_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["file_10.csv", "file_2.csv", "file_0.csv", "notes.txt", "file_x.csv"] {
            fs::write(dir.path().join(name), "a\n1\n").unwrap();
        }
        let files = list_snapshots(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["file_0.csv", "file_2.csv", "file_10.csv"]);
        assert!(list_snapshots(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn broken_files_are_classified_and_deleted_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        fs::write(p.join(snapshot_file_name(0)), "run,MET_x\n1,2.5\n").unwrap();
        fs::write(p.join(snapshot_file_name(1)), "").unwrap();
        fs::write(p.join(snapshot_file_name(2)), "run,MET_x\n").unwrap();
        fs::write(p.join(snapshot_file_name(3)), "run,MET_x\n1,2,3\n").unwrap();

        let dirs = vec![p.to_path_buf()];
        let mut asked = 0;
        let check = check_snapshots(&dirs, &mut |_| {
            asked += 1;
            Ok(false)
        })
        .unwrap();
        assert_eq!(asked, 1);
        assert_eq!(check.healthy, 1);
        assert_eq!(check.no_header, vec![p.join("file_1.csv")]);
        assert_eq!(check.no_events, vec![p.join("file_2.csv")]);
        assert_eq!(check.unreadable, vec![p.join("file_3.csv")]);
        assert_eq!(list_snapshots(p).unwrap().len(), 4);

        check_snapshots(&dirs, &mut |_| Ok(true)).unwrap();
        assert_eq!(list_snapshots(p).unwrap(), vec![p.join("file_0.csv")]);
    }
}
