//! Correction extraction: fit every histogram of one dataset kind.
//!
//! For each MET type, pileup proxy, component and weight variation the
//! matching 2D histogram is looked up by name and fitted with `fit_line`.
//! Fits are independent, so they run in parallel; results are collected in
//! job order so the output does not depend on scheduling.

use rayon::prelude::*;
use tracing::debug;

use crate::domain::{Component, CorrectionParams, DatasetKind, WeightVariation, hist_name};
use crate::error::AppError;
use crate::fit::linear::{FitRange, LinearFit, fit_line};
use crate::io::artifacts::HistogramFile;

/// One fitted histogram, kept for the terminal summary.
#[derive(Debug, Clone)]
pub struct FitRecord {
    pub met: String,
    pub pileup: String,
    pub component: Component,
    pub variation: WeightVariation,
    pub fit: LinearFit,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub dataset: DatasetKind,
    pub params: CorrectionParams,
    pub records: Vec<FitRecord>,
}

struct Job<'a> {
    met: &'a str,
    pileup: &'a str,
    component: Component,
    variation: WeightVariation,
}

/// Fit all histograms of `hists` needed for `mets × pileups`.
///
/// A missing histogram is an input error (exit code 2); a failed fit keeps
/// the fit's own error code with the histogram name as context.
pub fn extract_corrections(
    hists: &HistogramFile,
    mets: &[String],
    pileups: &[String],
    range: FitRange,
) -> Result<Extraction, AppError> {
    let dataset = hists.dataset;

    let mut jobs = Vec::new();
    for met in mets {
        for pileup in pileups {
            for &variation in dataset.variations() {
                for component in Component::ALL {
                    jobs.push(Job {
                        met,
                        pileup,
                        component,
                        variation,
                    });
                }
            }
        }
    }

    let fits: Vec<LinearFit> = jobs
        .par_iter()
        .map(|job| {
            let name = hist_name(job.pileup, job.met, job.component, job.variation);
            let hist = hists.get(&name)?;
            fit_line(hist, range).map_err(|e| e.context(format!("{dataset} {name}")))
        })
        .collect::<Result<_, _>>()?;

    let mut params = CorrectionParams::new();
    let mut records = Vec::with_capacity(jobs.len());
    for (job, fit) in jobs.iter().zip(fits) {
        debug!(
            dataset = %dataset,
            met = job.met,
            pileup = job.pileup,
            component = job.component.suffix(),
            variation = job.variation.key(),
            m = fit.params.m,
            c = fit.params.c,
            m_stat = fit.params.m_stat,
            c_stat = fit.params.c_stat,
            correlation = fit.params.correlation,
            "fitted"
        );
        params.insert(job.met, job.pileup, job.component, job.variation, fit.params);
        records.push(FitRecord {
            met: job.met.to_string(),
            pileup: job.pileup.to_string(),
            component: job.component,
            variation: job.variation,
            fit,
        });
    }

    Ok(Extraction {
        dataset,
        params,
        records,
    })
}
