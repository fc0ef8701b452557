//! Snapshot production: reduce raw event files to the columns the later
//! stages need.
//!
//! Per input file:
//!
//! - DATA keeps only events certified by the golden JSON, with unit weights
//! - MC gets `puWeight`/`puWeightUp`/`puWeightDn` from the pileup-reweighting
//!   correction evaluated at the true number of interactions
//! - each MET type is converted to its `_x`/`_y` components
//!
//! Output is `snap_dir/<DTMC>/file_<idx>.csv`, `idx` being the position of
//! the input in the file list.

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::data::{GoldenJson, PileupWeights};
use crate::domain::{
    Component, DatasetKind, TRUE_INTERACTIONS, WeightVariation, component_column, raw_columns,
};
use crate::error::AppError;
use crate::io::condor::{JobSpec, write_job_files};
use crate::io::{EventTable, read_file_lists, read_table, snapshot_file_name, write_table};
use crate::stages::StageContext;

/// Event-level treatment that differs between data and simulation.
#[derive(Debug, Clone)]
pub enum EventTreatment {
    /// Golden-JSON filter, unit weights.
    Data(GoldenJson),
    /// No filter, pileup weights.
    Mc(PileupWeights),
}

impl EventTreatment {
    pub fn load(ctx: &StageContext, kind: DatasetKind) -> Result<Self, AppError> {
        match kind {
            DatasetKind::Data => {
                let golden = GoldenJson::from_file(&ctx.paths.golden_json)?;
                info!("Golden JSON: {} certified run(s)", golden.n_runs());
                Ok(Self::Data(golden))
            }
            DatasetKind::Mc => Ok(Self::Mc(PileupWeights::from_file(&ctx.paths.pileup_json)?)),
        }
    }

    fn kind(&self) -> DatasetKind {
        match self {
            Self::Data(_) => DatasetKind::Data,
            Self::Mc(_) => DatasetKind::Mc,
        }
    }
}

/// Snapshot columns, in file order.
pub fn snapshot_columns(mets: &[String], pileups: &[String]) -> Vec<String> {
    let mut cols = vec!["run".to_string(), "luminosityBlock".to_string()];
    cols.extend(pileups.iter().cloned());
    for met in mets {
        for component in Component::ALL {
            cols.push(component_column(met, component));
        }
    }
    cols.extend(WeightVariation::ALL.iter().map(|v| v.weight_column().to_string()));
    cols
}

/// Counters of one processed file.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FileSummary {
    pub rows_read: usize,
    pub bad_rows: usize,
    pub kept: usize,
}

/// Turn one raw event file into one snapshot.
pub fn process_file(
    input: &Path,
    output: &Path,
    mets: &[String],
    pileups: &[String],
    treatment: &EventTreatment,
) -> Result<FileSummary, AppError> {
    let kind = treatment.kind();
    let read = read_table(input, &raw_columns(kind, mets, pileups))?;
    if !read.row_errors.is_empty() {
        warn!(
            "{}: skipped {} malformed row(s), first at line {}: {}",
            input.display(),
            read.row_errors.len(),
            read.row_errors[0].line,
            read.row_errors[0].message
        );
    }
    let raw = &read.table;

    let run = raw.column("run")?;
    let lumi = raw.column("luminosityBlock")?;
    let pu_cols = pileups
        .iter()
        .map(|p| raw.column(p))
        .collect::<Result<Vec<_>, _>>()?;
    let met_cols = mets
        .iter()
        .map(|m| Ok((raw.column(&format!("{m}_pt"))?, raw.column(&format!("{m}_phi"))?)))
        .collect::<Result<Vec<_>, AppError>>()?;
    let n_true = match treatment {
        EventTreatment::Mc(_) => Some(raw.column(TRUE_INTERACTIONS)?),
        EventTreatment::Data(_) => None,
    };

    let mut out = EventTable::new(snapshot_columns(mets, pileups));
    let mut row = Vec::with_capacity(out.names().len());
    for i in 0..raw.len() {
        let weights = match treatment {
            EventTreatment::Data(golden) => {
                if !golden.contains(run[i] as u64, lumi[i] as u64) {
                    continue;
                }
                [1.0; 3]
            }
            EventTreatment::Mc(pu) => {
                let n = n_true.map_or(0.0, |c| c[i]);
                [
                    pu.weight(n, WeightVariation::Nominal)?,
                    pu.weight(n, WeightVariation::PuUp)?,
                    pu.weight(n, WeightVariation::PuDn)?,
                ]
            }
        };

        row.clear();
        row.push(run[i]);
        row.push(lumi[i]);
        row.extend(pu_cols.iter().map(|c| c[i]));
        for (pt, phi) in &met_cols {
            row.push(pt[i] * phi[i].cos());
            row.push(pt[i] * phi[i].sin());
        }
        row.extend(weights);
        out.push_row(&row)?;
    }

    if out.is_empty() {
        warn!("{}: no events left after selection", input.display());
    }
    write_table(output, &out)?;
    debug!("{} -> {} ({} events)", input.display(), output.display(), out.len());

    Ok(FileSummary {
        rows_read: read.rows_read,
        bad_rows: read.row_errors.len(),
        kept: out.len(),
    })
}

/// What happened to one dataset kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    /// Files processed locally (or the single batch-mode file).
    Processed { files: usize, events: usize },
    /// Batch job templates written instead of running locally.
    JobsWritten(PathBuf),
}

/// Run the snapshot stage for every selected dataset kind.
///
/// `condor` selects a single input file (batch mode). Otherwise `confirm` is
/// asked whether to run locally; declining writes batch job templates.
pub fn run(
    ctx: &StageContext,
    condor: Option<usize>,
    confirm: &mut dyn FnMut(&str) -> Result<bool, AppError>,
) -> Result<Vec<(DatasetKind, SnapshotOutcome)>, AppError> {
    let lists = read_file_lists(&ctx.paths.file_lists)?;
    let mut outcomes = Vec::with_capacity(ctx.kinds.len());

    for &kind in &ctx.kinds {
        let files = lists.get(&kind).filter(|f| !f.is_empty()).ok_or_else(|| {
            AppError::new(
                3,
                format!(
                    "No {kind} input files in '{}'. Run --prep first.",
                    ctx.paths.file_lists.display()
                ),
            )
        })?;
        let out_dir = ctx.paths.snapshot_dir(kind);

        let outcome = match condor {
            Some(idx) => {
                let input = files.get(idx).ok_or_else(|| {
                    AppError::new(
                        2,
                        format!("Batch index {idx} out of range: {kind} has {} file(s).", files.len()),
                    )
                })?;
                let treatment = EventTreatment::load(ctx, kind)?;
                let summary = process_file(
                    Path::new(input),
                    &out_dir.join(snapshot_file_name(idx)),
                    &ctx.mets,
                    &ctx.pileups,
                    &treatment,
                )?;
                SnapshotOutcome::Processed {
                    files: 1,
                    events: summary.kept,
                }
            }
            None => {
                let question = format!("Run {} {kind} snapshot job(s) locally?", files.len());
                if confirm(&question)? {
                    run_local(ctx, kind, files, &out_dir)?
                } else {
                    let workdir = std::env::current_dir().map_err(|e| {
                        AppError::new(2, format!("Failed to resolve working directory: {e}"))
                    })?;
                    let dir = write_job_files(
                        &ctx.paths.condor_dir,
                        &JobSpec {
                            dataset: kind,
                            year: &ctx.year,
                            version: &ctx.version,
                            mets: &ctx.mets,
                            pileups: &ctx.pileups,
                            workdir: &workdir,
                            n_jobs: files.len(),
                        },
                    )?;
                    SnapshotOutcome::JobsWritten(dir)
                }
            }
        };
        outcomes.push((kind, outcome));
    }
    Ok(outcomes)
}

fn run_local(
    ctx: &StageContext,
    kind: DatasetKind,
    files: &[String],
    out_dir: &Path,
) -> Result<SnapshotOutcome, AppError> {
    let treatment = EventTreatment::load(ctx, kind)?;
    let threads = if ctx.jobs == 0 {
        rayon::current_num_threads()
    } else {
        ctx.jobs
    }
    .min(files.len())
    .max(1);
    info!("Processing {} {kind} file(s) with {threads} worker(s)", files.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| AppError::new(2, format!("Failed to start worker pool: {e}")))?;

    let bar = ProgressBar::new(files.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  "),
    );
    bar.set_message(kind.as_str());

    let results: Vec<Result<FileSummary, AppError>> = pool.install(|| {
        files
            .par_iter()
            .enumerate()
            .map(|(idx, input)| {
                let result = process_file(
                    Path::new(input),
                    &out_dir.join(snapshot_file_name(idx)),
                    &ctx.mets,
                    &ctx.pileups,
                    &treatment,
                );
                bar.inc(1);
                result
            })
            .collect()
    });
    bar.finish_and_clear();

    let mut events = 0;
    let mut failed = 0;
    for (input, result) in files.iter().zip(&results) {
        match result {
            Ok(summary) => events += summary.kept,
            Err(e) => {
                failed += 1;
                error!("{input}: {e}");
            }
        }
    }
    if failed > 0 {
        return Err(AppError::new(
            2,
            format!("{failed} of {} {kind} snapshot job(s) failed; see the log.", files.len()),
        ));
    }
    info!("{kind}: {events} event(s) in {} snapshot(s) under {}", files.len(), out_dir.display());
    Ok(SnapshotOutcome::Processed {
        files: files.len(),
        events,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use super::*;
    use crate::data::synth::pileup_weights;
    use crate::io::{FileLists, write_file_lists};
    use crate::stages::test_support::context;

    fn raw_data_file(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            path,
            "run,luminosityBlock,PV_npvsGood,MET_pt,MET_phi\n\
             1,1,20,10,0\n\
             1,2,30,10,1.5707963267948966\n\
             1,9,30,10,0\n\
             2,1,25,5,0\n\
             1,3,oops,5,0\n",
        )
        .unwrap();
    }

    #[test]
    fn data_keeps_certified_events_with_unit_weights() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.csv");
        raw_data_file(&input);
        let mut golden = BTreeMap::new();
        golden.insert("1".to_string(), vec![[1, 5]]);
        let treatment = EventTreatment::Data(GoldenJson::from_map(golden).unwrap());
        let mets = vec!["MET".to_string()];
        let pileups = vec!["PV_npvsGood".to_string()];
        let out = dir.path().join("snap").join("file_0.csv");

        let summary = process_file(&input, &out, &mets, &pileups, &treatment).unwrap();
        assert_eq!(
            summary,
            FileSummary {
                rows_read: 5,
                bad_rows: 1,
                kept: 2
            }
        );

        let snap = read_table(&out, &snapshot_columns(&mets, &pileups)).unwrap().table;
        assert_eq!(snap.column("MET_x").unwrap()[0], 10.0);
        assert_eq!(snap.column("MET_y").unwrap()[0], 0.0);
        assert!(snap.column("MET_x").unwrap()[1].abs() < 1e-12);
        assert!((snap.column("MET_y").unwrap()[1] - 10.0).abs() < 1e-12);
        assert_eq!(snap.column("puWeightUp").unwrap(), [1.0, 1.0]);
        assert_eq!(snap.column("PV_npvsGood").unwrap(), [20.0, 30.0]);
    }

    #[test]
    fn mc_gets_up_and_down_weights_in_their_own_columns() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.csv");
        fs::write(
            &input,
            "run,luminosityBlock,PV_npvsGood,MET_pt,MET_phi,Pileup_nTrueInt\n1,1,20,10,0,62.5\n",
        )
        .unwrap();
        let treatment = EventTreatment::Mc(PileupWeights::from_set(&pileup_weights()).unwrap());
        let mets = vec!["MET".to_string()];
        let pileups = vec!["PV_npvsGood".to_string()];
        let out = dir.path().join("file_0.csv");

        process_file(&input, &out, &mets, &pileups, &treatment).unwrap();
        let snap = read_table(&out, &snapshot_columns(&mets, &pileups)).unwrap().table;
        let nom = snap.column("puWeight").unwrap()[0];
        let up = snap.column("puWeightUp").unwrap()[0];
        let dn = snap.column("puWeightDn").unwrap()[0];
        assert_eq!(nom, 1.0);
        assert!(up > nom && dn < nom);
    }

    #[test]
    fn declining_local_run_writes_batch_templates() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), &[DatasetKind::Data]);
        let mut lists = FileLists::new();
        lists.insert(DatasetKind::Data, vec!["a.csv".to_string(), "b.csv".to_string()]);
        write_file_lists(&ctx.paths.file_lists, &lists).unwrap();

        let outcomes = run(&ctx, None, &mut |_| Ok(false)).unwrap();
        let job_dir = ctx.paths.condor_dir.join("DATA");
        assert_eq!(outcomes, vec![(DatasetKind::Data, SnapshotOutcome::JobsWritten(job_dir.clone()))]);
        assert!(fs::read_to_string(job_dir.join("submit.sub")).unwrap().contains("queue 2"));
    }

    #[test]
    fn batch_index_must_exist_and_failures_fail_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), &[DatasetKind::Data]);
        raw_data_file(&dir.path().join("raw/ok.csv"));
        fs::write(dir.path().join("raw/golden.json"), r#"{"1": [[1, 5]]}"#).unwrap();
        let mut lists = FileLists::new();
        lists.insert(
            DatasetKind::Data,
            vec![
                dir.path().join("raw/ok.csv").display().to_string(),
                dir.path().join("raw/missing.csv").display().to_string(),
            ],
        );
        write_file_lists(&ctx.paths.file_lists, &lists).unwrap();

        assert_eq!(run(&ctx, Some(5), &mut |_| Ok(true)).unwrap_err().exit_code(), 2);

        let outcomes = run(&ctx, Some(0), &mut |_| Ok(true)).unwrap();
        assert_eq!(outcomes[0].1, SnapshotOutcome::Processed { files: 1, events: 2 });

        let err = run(&ctx, None, &mut |_| Ok(true)).unwrap_err();
        assert!(err.message().contains("1 of 2"));
        assert!(ctx.paths.snapshot_dir(DatasetKind::Data).join("file_0.csv").exists());
    }
}
