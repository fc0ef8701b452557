//! Correction extraction stage: fit the histograms and store the parameters.

use std::path::PathBuf;

use tracing::info;

use crate::error::AppError;
use crate::fit::extract_corrections;
use crate::io::{read_histogram_file, write_params};
use crate::stages::StageContext;

pub fn run(ctx: &StageContext) -> Result<Vec<PathBuf>, AppError> {
    let mut written = Vec::with_capacity(ctx.kinds.len());
    for &kind in &ctx.kinds {
        let hists = read_histogram_file(&ctx.paths.hist_file(kind))?;
        if hists.dataset != kind {
            return Err(AppError::new(
                2,
                format!(
                    "'{}' holds {} histograms, expected {kind}.",
                    ctx.paths.hist_file(kind).display(),
                    hists.dataset
                ),
            ));
        }

        let extraction =
            extract_corrections(&hists, &ctx.mets, &ctx.pileups, ctx.settings.fit_range)?;
        println!("{}", crate::report::format_fit_summary(&extraction));

        let path = ctx.paths.params_file(kind);
        write_params(&path, &extraction.params)?;
        info!("{kind}: {} fit(s) saved in {}", extraction.records.len(), path.display());
        written.push(path);
    }
    Ok(written)
}
