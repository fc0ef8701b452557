//! Top-level application orchestration.
//!
//! `src/main.rs` only maps errors to exit codes; this module parses the
//! command line, sets up logging and configuration, and dispatches to the
//! stages.

use std::collections::BTreeMap;

use clap::Parser;
use tracing::{info, warn};

use crate::cli::prompt::confirm;
use crate::cli::{Cli, CombineArgs, Command, CommonArgs, EvaluateArgs, GenerateArgs, RunArgs};
use crate::config::Settings;
use crate::data::{SynthConfig, write_sample};
use crate::domain::DatasetKind;
use crate::error::AppError;
use crate::io::read_params;
use crate::schema::build::{PACKAGED_PILEUP, combined_file_name};
use crate::schema::{CorrectionSet, MetCorrector, build_combined};
use crate::stages::StageContext;

pub mod pipeline;

/// Entry point for the `xycorr` binary.
pub fn run() -> Result<(), AppError> {
    // `xycorr -S -H -C` is shorthand for `xycorr run -S -H -C`; clap needs
    // the subcommand spelled out, so argv is rewritten before parsing.
    let argv = rewrite_args(std::env::args().collect());
    let cli = Cli::parse_from(argv);

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Combine(args) => handle_combine(args),
        Command::Evaluate(args) => handle_evaluate(args),
        Command::Generate(args) => handle_generate(args),
    }
}

fn setup(common: &CommonArgs) -> Result<Settings, AppError> {
    crate::logging::init(common.debug, Some(common.log_file.as_path()))?;
    Settings::load(common.config.as_deref())
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let settings = setup(&args.common)?;
    if !args.any_stage() {
        warn!("No stage selected; pass any of --prep, -S, -H, -C, --convert, --validate.");
        return Ok(());
    }

    let mut ctx = StageContext::new(
        settings,
        &args.year,
        &args.version,
        args.met.clone(),
        args.pileup.clone(),
        args.processes.clone(),
    )?;
    ctx.jobs = args.jobs;
    info!(
        "Epoch {} ({}), version {}, MET {:?}, pileup {:?}, datasets {:?}",
        ctx.year,
        ctx.settings.epoch(&ctx.year)?.label,
        ctx.version,
        ctx.mets,
        ctx.pileups,
        ctx.kinds
    );

    let plan = pipeline::StagePlan {
        prep: args.prep,
        snapshot: args.snapshot,
        hists: args.hists,
        corr: args.corr,
        convert: args.convert,
        validate: args.validate,
        condor: usize::try_from(args.condor).ok(),
        skip_check: args.skip_check,
    };
    let assume_yes = args.yes;
    pipeline::run_stages(&ctx, &plan, &mut |q| confirm(q, assume_yes))
}

fn handle_combine(args: CombineArgs) -> Result<(), AppError> {
    let settings = setup(&args.common)?;
    if args.years.is_empty() {
        return Err(AppError::new(2, "No epochs given to combine."));
    }

    let mut epochs = Vec::with_capacity(args.years.len());
    for year in &args.years {
        settings.epoch(year)?;
        let paths = settings.paths(year, &args.version);
        let mut params = BTreeMap::new();
        for kind in DatasetKind::ALL {
            params.insert(kind, read_params(&paths.params_file(kind))?);
        }
        epochs.push((year.clone(), params));
    }

    let cset = build_combined(&args.version, &epochs, &args.met, PACKAGED_PILEUP)?;
    let out = settings
        .paths(&args.years[0], &args.version)
        .corrections_root
        .join(combined_file_name(&args.years));
    cset.write(&out)?;
    info!("Combined schema for {} epoch(s) saved in {}", epochs.len(), out.display());
    Ok(())
}

fn handle_evaluate(args: EvaluateArgs) -> Result<(), AppError> {
    let settings = setup(&args.common)?;
    let path = match &args.schema {
        Some(p) => p.clone(),
        None => settings.paths(&args.year, &args.version).schema,
    };
    let cset = CorrectionSet::from_file(&path)?;
    let corrector = MetCorrector::new(&cset)?;
    let value = corrector.evaluate(&args.key, &args.met, args.dtmc, args.pt, args.phi, args.npv)?;
    println!("{value}");
    Ok(())
}

fn handle_generate(args: GenerateArgs) -> Result<(), AppError> {
    crate::logging::init(args.common.debug, Some(args.common.log_file.as_path()))?;
    let pair = |v: &[f64], flag: &str| match v {
        [m, c] => Ok((*m, *c)),
        _ => Err(AppError::new(2, format!("--{flag} expects two values: m,c"))),
    };
    let config = SynthConfig {
        mets: args.met.clone(),
        pileups: args.pileup.clone(),
        files: args.files,
        events_per_file: args.events,
        seed: args.seed,
        bias_x: pair(&args.bias_x, "bias-x")?,
        bias_y: pair(&args.bias_y, "bias-y")?,
        ..SynthConfig::default()
    };
    let out = write_sample(&args.out, &args.processes, &config)?;
    println!("datasets config: {}", out.datasets_json.display());
    println!("golden JSON:     {}", out.golden_json.display());
    println!("pileup weights:  {}", out.pileup_json.display());
    Ok(())
}

/// Rewrite argv so bare stage flags default to `xycorr run`.
///
/// Rules:
/// - `xycorr`                 -> `xycorr run` (prints that no stage was selected)
/// - `xycorr -S -H ...`       -> `xycorr run -S -H ...`
/// - `xycorr --help/-h/help`  -> unchanged (top-level help)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("run".to_string());
        return argv;
    };

    if matches!(arg1.as_str(), "-h" | "--help" | "help") {
        return argv;
    }

    if matches!(arg1.as_str(), "run" | "combine" | "evaluate" | "generate") {
        return argv;
    }

    if arg1.starts_with('-') {
        argv.insert(1, "run".to_string());
    }
    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_flags_become_run() {
        assert_eq!(rewrite_args(args(&["xycorr"])), args(&["xycorr", "run"]));
        assert_eq!(
            rewrite_args(args(&["xycorr", "-S", "-V", "v3"])),
            args(&["xycorr", "run", "-S", "-V", "v3"])
        );
        assert_eq!(
            rewrite_args(args(&["xycorr", "combine", "-V", "v3"])),
            args(&["xycorr", "combine", "-V", "v3"])
        );
        assert_eq!(rewrite_args(args(&["xycorr", "--help"])), args(&["xycorr", "--help"]));
    }

    #[test]
    fn rewritten_flags_parse_as_run() {
        let cli = Cli::parse_from(rewrite_args(args(&["xycorr", "-H", "-C", "-y"])));
        let Command::Run(run) = cli.command else {
            panic!("expected run");
        };
        assert!(run.hists && run.corr && run.yes);
    }
}
