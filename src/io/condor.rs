//! Batch job templates for running snapshot production on a cluster.
//!
//! Writes `condor_dir/<DTMC>/job.sh` and `condor_dir/<DTMC>/submit.sub`; each
//! batch job processes one input file via `xycorr run -S --condor <index>`.
//! Submission is left to the operator.

use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::domain::DatasetKind;
use crate::error::AppError;

/// What goes into a job script.
#[derive(Debug, Clone)]
pub struct JobSpec<'a> {
    pub dataset: DatasetKind,
    pub year: &'a str,
    pub version: &'a str,
    pub mets: &'a [String],
    pub pileups: &'a [String],
    /// Directory the job changes into before running.
    pub workdir: &'a Path,
    pub n_jobs: usize,
}

pub fn job_script(spec: &JobSpec<'_>) -> String {
    format!(
        "#!/bin/bash\n\
         # generated by xycorr on {stamp}\n\
         cd {workdir}\n\
         if [ -f env.sh ]; then source env.sh; fi\n\
         xycorr run -S --condor $1 --processes {dtmc} --year {year} --version {version} --met {mets} --pileup {pileups}\n",
        stamp = Local::now().format("%Y-%m-%d %H:%M:%S"),
        workdir = spec.workdir.display(),
        dtmc = spec.dataset,
        year = spec.year,
        version = spec.version,
        mets = spec.mets.join(","),
        pileups = spec.pileups.join(","),
    )
}

pub fn submit_file(n_jobs: usize) -> String {
    format!(
        "executable = ./job.sh\n\
         arguments = $(Process)\n\
         \n\
         # Output/Error/Log files\n\
         Output = logs/job_$(Cluster)_$(Process).out\n\
         Error  = logs/job_$(Cluster)_$(Process).err\n\
         Log    = logs/job_$(Cluster)_$(Process).log\n\
         \n\
         # job requirements\n\
         +RequestWalltime = 7200\n\
         RequestCPUs = 1\n\
         RequestMemory = 2000\n\
         getenv = True\n\
         \n\
         queue {n_jobs}\n"
    )
}

/// Write the job script and submit file; returns the job directory.
pub fn write_job_files(condor_dir: &Path, spec: &JobSpec<'_>) -> Result<PathBuf, AppError> {
    let dir = condor_dir.join(spec.dataset.as_str());
    create_dir_all(dir.join("logs")).map_err(|e| {
        AppError::new(2, format!("Failed to create condor directory '{}': {e}", dir.display()))
    })?;

    let write = |name: &str, content: String| {
        let path = dir.join(name);
        fs::write(&path, content)
            .map_err(|e| AppError::new(2, format!("Failed to write '{}': {e}", path.display())))?;
        Ok::<_, AppError>(path)
    };

    let job = write("job.sh", job_script(spec))?;
    set_executable(&job)?;
    let submit = write("submit.sub", submit_file(spec.n_jobs))?;

    info!("Saved submit file in {}", submit.display());
    info!("Submit via: cd {} && condor_submit submit.sub", dir.display());
    Ok(dir)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), AppError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| AppError::new(2, format!("Failed to chmod '{}': {e}", path.display())))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), AppError> {
    Ok(())
}
