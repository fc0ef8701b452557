//! Dataset discovery stage.

use tracing::info;

use crate::data::{DasClient, FileCatalog, discover_files};
use crate::error::AppError;
use crate::io::FileLists;
use crate::stages::StageContext;

pub fn run(ctx: &StageContext) -> Result<FileLists, AppError> {
    let client = DasClient::new(ctx.settings.paths.redirector.clone());
    run_with(ctx, &client)
}

pub fn run_with(ctx: &StageContext, catalog: &dyn FileCatalog) -> Result<FileLists, AppError> {
    info!("Preparing file lists for {}", ctx.year);
    discover_files(&ctx.paths.datasets, &ctx.paths.file_lists, &ctx.kinds, catalog)
}
