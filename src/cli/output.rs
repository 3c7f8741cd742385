//! User-facing console output for the CLI.
//!
//! Everything here writes to a [`WriteColor`] so the same code renders to a
//! terminal or into a buffer in tests.

use std::{
    collections::BTreeSet,
    io::{self, Write},
    path::PathBuf,
};

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use unicode_width::UnicodeWidthStr;

use crate::{
    compare::{report::PassRate, Report},
    engine::{ExecutionSummary, PipelineKind},
};

/// Stdout with colors only when it is a terminal.
pub fn stdout_stream() -> StandardStream {
    let choice = if atty::is(atty::Stream::Stdout) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    StandardStream::stdout(choice)
}

// ============================================================================
// SELECT
// ============================================================================

pub fn print_selection(out: &mut impl Write, ids: &BTreeSet<String>) -> io::Result<()> {
    for id in ids {
        writeln!(out, "{id}")?;
    }
    Ok(())
}

// ============================================================================
// RUN / REPORT
// ============================================================================

/// One line per executed pipeline: how much was cached and how it went.
pub fn print_execution(
    out: &mut impl WriteColor,
    kind: PipelineKind,
    summary: &ExecutionSummary,
) -> io::Result<()> {
    heading(out, &format!("{kind}"))?;
    writeln!(
        out,
        "{} tests, {} cached, {} executed",
        summary.results.len(),
        summary.cached.len(),
        summary.executed.len()
    )?;
    Ok(())
}

/// Pass rates, the per-class table, tolerance bands, and model errors.
pub fn print_report(out: &mut impl WriteColor, report: &Report, written: &[PathBuf]) -> io::Result<()> {
    heading(out, "Pass rates")?;
    rate_line(out, "RTL", report.ground_truth)?;
    rate_line(out, "PM", report.model)?;

    heading(out, "Classes")?;
    let mut rows = vec![[
        "Class".to_string(),
        "Tests".to_string(),
        "RTL pass".to_string(),
        "PM pass".to_string(),
        "PM fail".to_string(),
        "Unknown".to_string(),
        "Both pass".to_string(),
    ]];
    for (class, summary) in &report.classes {
        rows.push([
            class.to_string(),
            summary.total.to_string(),
            summary.ground_truth_passed.to_string(),
            summary.model_passed.to_string(),
            summary.model_failed.to_string(),
            summary.unknown.to_string(),
            percent(summary.both_pass_rate()),
        ]);
    }
    table(out, &rows)?;

    heading(out, "Cycle ratio (PM / RTL)")?;
    let tolerance = &report.tolerance;
    if tolerance.total == 0 {
        writeln!(out, "no test passed on both sides")?;
    } else {
        for (band, count) in &tolerance.within {
            writeln!(
                out,
                "within {:>3.0}%: {}/{} ({:.1}%)",
                band * 100.0,
                count,
                tolerance.total,
                tolerance.fraction(*count) * 100.0
            )?;
        }
        writeln!(
            out,
            "ratio <= 1: {}/{} ({:.1}%)",
            tolerance.at_most_one,
            tolerance.total,
            tolerance.fraction(tolerance.at_most_one) * 100.0
        )?;
        for (class, ranked) in &report.ranked_by_class {
            if let (Some(low), Some(high)) = (ranked.first(), ranked.last()) {
                writeln!(
                    out,
                    "  {class}: {} ratios, {:.3} ({}) .. {:.3} ({})",
                    ranked.len(),
                    low.ratio,
                    low.test_id,
                    high.ratio,
                    high.test_id
                )?;
            }
        }
    }

    if !report.model_errors.is_empty() {
        heading(out, "PM errors")?;
        for (diagnostic, ids) in &report.model_errors {
            out.set_color(ColorSpec::new().set_fg(Some(Color::Red)))?;
            write!(out, "{:>4}", ids.len())?;
            out.reset()?;
            writeln!(out, "  {diagnostic}")?;
        }
    }

    if !written.is_empty() {
        heading(out, "Reports")?;
        for path in written {
            writeln!(out, "{}", path.display())?;
        }
    }
    Ok(())
}

// ============================================================================
// PRIVATE HELPERS
// ============================================================================

fn heading(out: &mut impl WriteColor, title: &str) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)).set_bold(true))?;
    writeln!(out, "--- {title} ---")?;
    out.reset()
}

fn rate_line(out: &mut impl WriteColor, label: &str, rate: PassRate) -> io::Result<()> {
    write!(out, "{label:<4}")?;
    let color = if rate.total > 0 && rate.passed == rate.total {
        Color::Green
    } else if rate.passed == 0 {
        Color::Red
    } else {
        Color::Yellow
    };
    out.set_color(ColorSpec::new().set_fg(Some(color)))?;
    write!(out, "{}/{}", rate.passed, rate.total)?;
    out.reset()?;
    writeln!(out, " passed ({})", percent(rate))
}

fn percent(rate: PassRate) -> String {
    if rate.total == 0 {
        "-".to_string()
    } else {
        format!("{:.1}%", rate.rate() * 100.0)
    }
}

/// Left-aligned first column, right-aligned numbers, widths by display width.
fn table<const N: usize>(out: &mut impl Write, rows: &[[String; N]]) -> io::Result<()> {
    let mut widths = [0usize; N];
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(cell.as_str()));
        }
    }
    for row in rows {
        let mut line = String::new();
        for (i, (cell, width)) in row.iter().zip(widths).enumerate() {
            let pad = " ".repeat(width - UnicodeWidthStr::width(cell.as_str()));
            if i == 0 {
                line.push_str(cell);
                line.push_str(&pad);
            } else {
                line.push_str("  ");
                line.push_str(&pad);
                line.push_str(cell);
            }
        }
        writeln!(out, "{}", line.trim_end())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compare::{compare, Report},
        result::ExecutionResult,
    };
    use std::collections::BTreeMap;
    use termcolor::Buffer;

    fn render(report: &Report) -> String {
        let mut buffer = Buffer::no_color();
        print_report(&mut buffer, report, &[PathBuf::from("reports/status_1.csv")]).unwrap();
        String::from_utf8(buffer.into_inner()).unwrap()
    }

    #[test]
    fn test_report_sections() {
        let gt: BTreeMap<String, ExecutionResult> = [
            ("t-n1-matmul".to_string(), ExecutionResult::pass(1000)),
            ("t-n1-upk".to_string(), ExecutionResult::pass(400)),
        ]
        .into_iter()
        .collect();
        let model: BTreeMap<String, ExecutionResult> = [
            ("t-n1-matmul".to_string(), ExecutionResult::pass(1100)),
            ("t-n1-upk".to_string(), ExecutionResult::fail("IndexError: list index")),
        ]
        .into_iter()
        .collect();
        let records = compare(&gt, &model).unwrap();
        let text = render(&Report::build(&records, &[0.1, 0.2]));

        assert!(text.contains("RTL 2/2 passed (100.0%)"));
        assert!(text.contains("PM  1/2 passed (50.0%)"));
        assert!(text.contains("within  10%: 1/1 (100.0%)"));
        assert!(text.contains("   1  IndexError: list index"));
        assert!(text.contains("reports/status_1.csv"));
    }

    #[test]
    fn test_table_alignment() {
        let mut out = Vec::new();
        table(
            &mut out,
            &[
                ["Class".to_string(), "Tests".to_string()],
                ["UPK".to_string(), "12".to_string()],
            ],
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "Class  Tests\nUPK       12\n");
    }

    #[test]
    fn test_empty_report() {
        let text = render(&Report::build(&[], &[0.1]));
        assert!(text.contains("no test passed on both sides"));
        assert!(text.contains("RTL 0/0 passed (-)"));
    }
}
