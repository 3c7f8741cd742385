//! Plain CSV renderers for the comparison tables.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::info;

use super::{report::Report, ComparisonRecord, FailureBin, StatusRow};
use crate::err_io;

/// Quotes a field when it holds a comma, a quote, or a line break.
pub fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn row<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = fields
        .into_iter()
        .map(|field| csv_escape(field.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn ratio(value: f64) -> String {
    format!("{value:.4}")
}

// ============================================================================
// TABLES
// ============================================================================

/// One row per test with both outcomes side by side.
pub fn status_table(records: &[ComparisonRecord]) -> String {
    let mut out = row([
        "Test",
        "Test class",
        "RTL status",
        "RTL number of cycles",
        "PM status",
        "PM number of cycles",
        "Perf comparison",
        "Failure type",
        "PM diagnostic",
    ]);
    for record in records {
        let r = StatusRow::from(record);
        out.push_str(&row([
            r.test.to_string(),
            r.class.to_string(),
            r.ground_truth_status.to_string(),
            opt(r.ground_truth_cycles),
            r.model_status.to_string(),
            opt(r.model_cycles),
            r.ratio.map(ratio).unwrap_or_default(),
            r.failure_bin.unwrap_or_default(),
            opt(r.model_diagnostic),
        ]));
    }
    out
}

/// Model PASS / FAIL per class, with a closing Total row.
pub fn regression_table(report: &Report) -> String {
    let mut out = row(["Test class", "PASS", "FAIL", "PASS RATE"]);
    let (mut passed, mut failed) = (0, 0);
    for (class, summary) in &report.classes {
        let rate = summary.model_pass_rate();
        passed += summary.model_passed;
        failed += summary.model_failed;
        out.push_str(&row([
            class.to_string(),
            summary.model_passed.to_string(),
            summary.model_failed.to_string(),
            if rate.total == 0 { String::new() } else { ratio(rate.rate()) },
        ]));
    }
    let total = passed + failed;
    out.push_str(&row([
        "Total".to_string(),
        passed.to_string(),
        failed.to_string(),
        if total == 0 {
            String::new()
        } else {
            ratio(passed as f64 / total as f64)
        },
    ]));
    out
}

/// Class by failure-bin counts. Only bins and classes that occur appear.
pub fn failure_analysis_table(report: &Report) -> String {
    let bins: Vec<FailureBin> = FailureBin::ALL
        .into_iter()
        .filter(|bin| report.classes.values().any(|c| c.bins.contains_key(bin)))
        .collect();

    let mut header = vec!["Test class".to_string()];
    header.extend(bins.iter().map(FailureBin::label));
    header.push("Total".to_string());
    let mut out = row(header);

    let mut column_totals = vec![0usize; bins.len()];
    for (class, summary) in &report.classes {
        if summary.bins.is_empty() {
            continue;
        }
        let counts: Vec<usize> = bins
            .iter()
            .map(|bin| summary.bins.get(bin).map_or(0, Vec::len))
            .collect();
        for (total, count) in column_totals.iter_mut().zip(&counts) {
            *total += count;
        }
        let mut fields = vec![class.to_string()];
        fields.extend(counts.iter().map(usize::to_string));
        fields.push(counts.iter().sum::<usize>().to_string());
        out.push_str(&row(fields));
    }

    let mut fields = vec!["Total".to_string()];
    fields.extend(column_totals.iter().map(usize::to_string));
    fields.push(column_totals.iter().sum::<usize>().to_string());
    out.push_str(&row(fields));
    out
}

/// Ranked ratios, ready to plot as an S-curve.
pub fn s_curve_table(report: &Report) -> String {
    let mut out = row(["Rank", "Test", "Test class", "Perf comparison"]);
    for (rank, entry) in report.ranked.iter().enumerate() {
        out.push_str(&row([
            (rank + 1).to_string(),
            entry.test_id.clone(),
            entry.class.to_string(),
            ratio(entry.ratio),
        ]));
    }
    out
}

// ============================================================================
// FILES
// ============================================================================

/// Seconds since the epoch, used when no stamp is configured.
pub fn default_stamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
        .to_string()
}

/// Writes all four tables into `out_dir` and returns their paths.
pub fn write_reports(
    out_dir: &Path,
    stamp: &str,
    records: &[ComparisonRecord],
    report: &Report,
) -> Result<Vec<PathBuf>, crate::SimParityError> {
    fs::create_dir_all(out_dir)
        .map_err(|e| err_io!(e, "failed to create report directory {}", out_dir.display()))?;

    let tables = [
        ("status", status_table(records)),
        ("regression", regression_table(report)),
        ("failure_analysis", failure_analysis_table(report)),
        ("s_curve", s_curve_table(report)),
    ];

    let mut written = Vec::with_capacity(tables.len());
    for (name, contents) in tables {
        let path = out_dir.join(format!("{name}_{stamp}.csv"));
        fs::write(&path, contents).map_err(|e| err_io!(e, "failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote report");
        written.push(path);
    }
    Ok(written)
}
