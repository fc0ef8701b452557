//! Stage sequencing for `xycorr run`.
//!
//! Order is fixed: prep → snapshot → (check) → hists → corr → convert →
//! validate. Only the selected stages run; each reads what the previous ones
//! left on disk.

use tracing::{info, warn};

use crate::error::AppError;
use crate::io::check_snapshots;
use crate::stages::{self, StageContext};

/// Which stages to run and how.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagePlan {
    pub prep: bool,
    pub snapshot: bool,
    pub hists: bool,
    pub corr: bool,
    pub convert: bool,
    pub validate: bool,
    /// Batch mode: process only this input file in the snapshot stage.
    pub condor: Option<usize>,
    pub skip_check: bool,
}

/// Execute the selected stages in pipeline order.
pub fn run_stages(
    ctx: &StageContext,
    plan: &StagePlan,
    confirm: &mut dyn FnMut(&str) -> Result<bool, AppError>,
) -> Result<(), AppError> {
    if plan.prep {
        stages::prep::run(ctx)?;
    }

    if plan.snapshot {
        for (kind, outcome) in stages::snapshot::run(ctx, plan.condor, confirm)? {
            info!("{kind} snapshots: {outcome:?}");
        }
    }

    if plan.hists {
        if plan.skip_check {
            warn!("Skipping the snapshot check.");
        } else {
            check_snapshots(&ctx.snapshot_dirs(), confirm)?;
        }
        stages::hists::run(ctx)?;
    }

    if plan.corr {
        stages::corr::run(ctx)?;
    }

    if plan.convert {
        stages::convert::run(ctx)?;
    }

    if plan.validate {
        stages::validate::run(ctx)?;
    }

    Ok(())
}
