//! Schema conversion stage: package the fit parameters of one epoch.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::AppError;
use crate::io::read_params;
use crate::schema::build::{PACKAGED_PILEUP, packaged_pileup};
use crate::schema::build_correction;
use crate::stages::StageContext;

pub fn run(ctx: &StageContext) -> Result<PathBuf, AppError> {
    let pileup = packaged_pileup(&ctx.pileups)
        .ok_or_else(|| AppError::new(2, "No pileup variable to package."))?;
    if pileup != PACKAGED_PILEUP {
        warn!("{PACKAGED_PILEUP} not requested; packaging fits against {pileup}");
    }

    let mut params = BTreeMap::new();
    for &kind in &ctx.kinds {
        params.insert(kind, read_params(&ctx.paths.params_file(kind))?);
    }

    let cset = build_correction(&ctx.year, &ctx.version, &params, &ctx.mets, pileup)?;
    cset.write(&ctx.paths.schema)?;
    info!("Correction schema saved in {}", ctx.paths.schema.display());
    Ok(ctx.paths.schema.clone())
}
