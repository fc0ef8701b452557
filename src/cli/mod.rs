//! Command-line parsing for the MET xy-corrections pipeline.
//!
//! Argument parsing and dispatch are kept apart from the stage code: the
//! structs here only describe flags, `app` turns them into stage runs.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::DatasetKind;

pub mod prompt;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "xycorr",
    about = "Derive, package and validate MET xy corrections"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run pipeline stages for one epoch (default when only flags are given).
    Run(RunArgs),
    /// Merge the fit parameters of several epochs into one schema.
    Combine(CombineArgs),
    /// Query a correction schema once and print the result.
    Evaluate(EvaluateArgs),
    /// Write synthetic raw event files with a known MET bias.
    Generate(GenerateArgs),
}

/// Options shared by every subcommand.
#[derive(Debug, Args, Clone)]
pub struct CommonArgs {
    /// Enable debug logging (RUST_LOG overrides).
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Configuration file (default: ./xycorr.toml when present).
    #[arg(long, value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// Log file written next to the console output.
    #[arg(long, value_name = "PATH", default_value = crate::logging::DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,
}

/// Stage selection and run parameters.
#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Query the dataset catalogue and write the per-epoch file lists.
    #[arg(long)]
    pub prep: bool,

    /// Produce snapshots from the raw event files.
    #[arg(short = 'S', long)]
    pub snapshot: bool,

    /// Fill histograms from the snapshots.
    #[arg(short = 'H', long)]
    pub hists: bool,

    /// Fit the histograms and write correction parameters.
    #[arg(short = 'C', long)]
    pub corr: bool,

    /// Convert the correction parameters into the evaluation schema.
    #[arg(long)]
    pub convert: bool,

    /// Validate the schema against the snapshots.
    #[arg(long)]
    pub validate: bool,

    /// Epoch to process.
    #[arg(short = 'Y', long, default_value = "2022_Summer22")]
    pub year: String,

    /// MET types, comma separated.
    #[arg(short = 'M', long, value_delimiter = ',', default_value = "MET,PuppiMET")]
    pub met: Vec<String>,

    /// Pileup variables, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "PV_npvsGood")]
    pub pileup: Vec<String>,

    /// Dataset types, comma separated.
    #[arg(long, value_enum, value_delimiter = ',', default_value = "DATA,MC")]
    pub processes: Vec<DatasetKind>,

    /// Version tag used in output paths.
    #[arg(short = 'V', long, default_value = "v0")]
    pub version: String,

    /// Worker threads for snapshot production (0: all cores).
    #[arg(short = 'j', long, default_value_t = 0)]
    pub jobs: usize,

    /// Process only input file N (batch mode); -1 runs all files locally.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub condor: i64,

    /// Skip the snapshot health check before filling histograms.
    #[arg(long)]
    pub skip_check: bool,

    /// Answer interactive prompts with yes.
    #[arg(short = 'y', long)]
    pub yes: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl RunArgs {
    pub fn any_stage(&self) -> bool {
        self.prep || self.snapshot || self.hists || self.corr || self.convert || self.validate
    }
}

/// Options for merging epochs.
#[derive(Debug, Args, Clone)]
pub struct CombineArgs {
    /// Epochs to merge, comma separated.
    #[arg(
        short = 'Y',
        long = "years",
        value_delimiter = ',',
        default_value = "2022_Summer22,2022_Summer22EE,2023_Summer23,2023_Summer23BPix"
    )]
    pub years: Vec<String>,

    /// MET types, comma separated.
    #[arg(short = 'M', long, value_delimiter = ',', default_value = "MET,PuppiMET")]
    pub met: Vec<String>,

    /// Version tag of the fits to merge.
    #[arg(short = 'V', long, default_value = "v0")]
    pub version: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// One schema query.
#[derive(Debug, Args, Clone)]
pub struct EvaluateArgs {
    /// Schema file; defaults to the schema of --year/--version.
    #[arg(long, value_name = "JSON")]
    pub schema: Option<PathBuf>,

    #[arg(short = 'Y', long, default_value = "2022_Summer22")]
    pub year: String,

    #[arg(short = 'V', long, default_value = "v0")]
    pub version: String,

    /// Variation key, e.g. pt, phi, pt_stat_xup, phi_pu_dn.
    #[arg(long, default_value = "pt")]
    pub key: String,

    #[arg(short = 'M', long, default_value = "PuppiMET")]
    pub met: String,

    #[arg(long, value_enum, default_value = "DATA")]
    pub dtmc: DatasetKind,

    /// Raw MET pt.
    #[arg(long)]
    pub pt: f64,

    /// Raw MET phi.
    #[arg(long, allow_negative_numbers = true)]
    pub phi: f64,

    /// Number of good primary vertices.
    #[arg(long)]
    pub npv: f64,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Synthetic sample options.
#[derive(Debug, Args, Clone)]
pub struct GenerateArgs {
    /// Output directory (one subdirectory per dataset type).
    #[arg(short = 'o', long, value_name = "DIR")]
    pub out: PathBuf,

    #[arg(long, value_enum, value_delimiter = ',', default_value = "DATA,MC")]
    pub processes: Vec<DatasetKind>,

    #[arg(short = 'M', long, value_delimiter = ',', default_value = "MET,PuppiMET")]
    pub met: Vec<String>,

    #[arg(long, value_delimiter = ',', default_value = "PV_npvsGood")]
    pub pileup: Vec<String>,

    /// Files per dataset type.
    #[arg(short = 'n', long, default_value_t = 2)]
    pub files: usize,

    #[arg(long, default_value_t = 20_000)]
    pub events: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Injected bias on x as `m,c`.
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true, default_values_t = [0.15, 1.0])]
    pub bias_x: Vec<f64>,

    /// Injected bias on y as `m,c`.
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true, default_values_t = [-0.1, -0.5])]
    pub bias_y: Vec<f64>,

    #[command(flatten)]
    pub common: CommonArgs,
}
