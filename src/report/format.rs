//! Terminal tables for fit results and validation summaries.
//!
//! Formatting lives here so the fitting and validation code stays free of
//! presentation details.

use crate::domain::DatasetKind;
use crate::fit::Extraction;
use crate::stages::validate::ComparisonRow;

/// One line per fit: parameters, uncertainties and fit quality.
pub fn format_fit_summary(extraction: &Extraction) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== xycorr - {} fits ({}) ===\n",
        extraction.dataset,
        extraction.records.len()
    ));
    out.push_str(
        format!(
            "{:<36} {:>6} {:>12} {:>10} {:>12} {:>10} {:>7} {:>9} {:>6}\n",
            "histogram", "var", "m", "m_stat", "c", "c_stat", "rho", "chi2", "bins"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<36} {:-<6} {:-<12} {:-<10} {:-<12} {:-<10} {:-<7} {:-<9} {:-<6}\n",
            "", "", "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    for r in &extraction.records {
        let p = &r.fit.params;
        let label = format!("{}_{}{}", r.pileup, r.met, r.component.suffix());
        out.push_str(
            format!(
                "{:<36} {:>6} {:>12.6} {:>10.6} {:>12.4} {:>10.4} {:>7.3} {:>9.2} {:>6}\n",
                truncate(&label, 36),
                r.variation.key(),
                p.m,
                p.m_stat,
                p.c,
                p.c_stat,
                p.correlation,
                r.fit.chi2,
                r.fit.n_points,
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Mean, RMS and largest bin-wise change of every validation histogram.
pub fn format_validation(kind: DatasetKind, rows: &[ComparisonRow]) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== xycorr - {kind} validation ===\n"));
    out.push_str(
        format!(
            "{:<32} {:>10} {:>10} {:>12}\n",
            "histogram", "mean", "rms", "max |Δ|/raw"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<32} {:-<10} {:-<10} {:-<12}\n", "", "", "", "").trim_end());
    out.push('\n');

    for row in rows {
        out.push_str(
            format!(
                "{:<32} {:>10} {:>10} {:>12}\n",
                truncate(&row.name, 32),
                fmt_opt(row.mean, 4),
                fmt_opt(row.rms, 4),
                fmt_opt(row.max_rel_change, 4),
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

fn fmt_opt(v: Option<f64>, precision: usize) -> String {
    match v {
        Some(v) => format!("{v:.precision$}"),
        None => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Component, CorrectionParams, FitParams, WeightVariation};
    use crate::fit::{FitRecord, LinearFit};

    #[test]
    fn fit_table_has_one_line_per_record() {
        let params = FitParams {
            m: 0.125,
            m_stat: 0.001,
            c: -1.5,
            c_stat: 0.05,
            correlation: -0.8,
        };
        let record = |component| FitRecord {
            met: "PuppiMET".to_string(),
            pileup: "PV_npvsGood".to_string(),
            component,
            variation: WeightVariation::PuUp,
            fit: LinearFit {
                params,
                n_points: 120,
                sum_w: 1000.0,
                chi2: 98.5,
            },
        };
        let extraction = Extraction {
            dataset: DatasetKind::Mc,
            params: CorrectionParams::new(),
            records: vec![record(Component::X), record(Component::Y)],
        };

        let table = format_fit_summary(&extraction);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("MC fits (2)"));
        assert!(lines[3].starts_with("PV_npvsGood_PuppiMET_x"));
        assert!(lines[3].contains("pu_up"));
        assert!(lines[3].contains("0.125000"));
        assert!(lines[4].starts_with("PV_npvsGood_PuppiMET_y"));
        assert!(lines.iter().all(|l| !l.ends_with(' ')));
    }

    #[test]
    fn validation_table_marks_missing_values() {
        let rows = vec![
            ComparisonRow {
                name: "MET_pt".to_string(),
                mean: Some(31.25),
                rms: Some(12.0),
                max_rel_change: None,
            },
            ComparisonRow {
                name: "MET_pt_corr_stat_xup".to_string(),
                mean: None,
                rms: None,
                max_rel_change: Some(0.02),
            },
        ];
        let table = format_validation(DatasetKind::Data, &rows);
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[3].contains("31.2500") && lines[3].ends_with('-'));
        assert!(lines[4].contains("0.0200"));
    }

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
