//! Report Module
//!
//! Boxed end-of-run summary for batch operations.

use crate::batch::BatchResult;
use crate::progress::{format_bytes, format_duration, percent_saved};
use std::fmt::Write as _;
use std::time::Duration;

const WIDTH: usize = 62;

/// Everything the summary box shows.
#[derive(Debug, Clone)]
pub struct SummaryReport<'a> {
    pub operation_name: &'a str,
    pub result: &'a BatchResult,
    /// Label and count per outcome, e.g. `("webp", 12)`, printed in order
    pub distribution: Vec<(String, usize)>,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub duration: Duration,
}

fn row(out: &mut String, label: &str, value: &str) {
    let body = format!("  {:<22}{:>14}", label, value);
    let _ = writeln!(out, "║{:<width$}║", body, width = WIDTH);
}

fn rule(out: &mut String, left: char, right: char) {
    let _ = writeln!(out, "{}{}{}", left, "═".repeat(WIDTH), right);
}

pub fn render_summary_report(report: &SummaryReport<'_>) -> String {
    let result = report.result;
    let mut out = String::new();

    rule(&mut out, '╔', '╗');
    let title = format!("{} Summary", report.operation_name);
    let _ = writeln!(out, "║{:^width$}║", title, width = WIDTH);
    rule(&mut out, '╠', '╣');
    row(&mut out, "Files processed:", &result.total.to_string());
    row(&mut out, "Succeeded:", &result.succeeded.to_string());
    row(&mut out, "Failed:", &result.failed.to_string());
    row(&mut out, "Skipped:", &result.skipped.to_string());
    row(
        &mut out,
        "Success rate:",
        &format!("{:.1}%", result.success_rate()),
    );

    if !report.distribution.is_empty() {
        rule(&mut out, '╠', '╣');
        for (label, count) in &report.distribution {
            let share = if result.total > 0 {
                *count as f64 / result.total as f64 * 100.0
            } else {
                0.0
            };
            row(
                &mut out,
                &format!("Kept as {}:", label),
                &format!("{} ({:.1}%)", count, share),
            );
        }
    }

    rule(&mut out, '╠', '╣');
    row(&mut out, "Input size:", &format_bytes(report.input_bytes));
    row(&mut out, "Output size:", &format_bytes(report.output_bytes));
    row(
        &mut out,
        "Saved:",
        &format_bytes(report.input_bytes.saturating_sub(report.output_bytes)),
    );
    row(
        &mut out,
        "Size reduction:",
        &format!(
            "{:.1}%",
            percent_saved(report.input_bytes, report.output_bytes)
        ),
    );
    rule(&mut out, '╠', '╣');
    row(&mut out, "Total time:", &format_duration(report.duration));
    if result.total > 0 {
        row(
            &mut out,
            "Avg time/file:",
            &format!(
                "{:.2}s",
                report.duration.as_secs_f64() / result.total as f64
            ),
        );
    }
    rule(&mut out, '╚', '╝');

    if !result.errors.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Errors encountered:");
        let _ = writeln!(out, "{}", "━".repeat(WIDTH + 2));
        for (path, error) in &result.errors {
            let _ = writeln!(out, "   {} → {}", path.display(), error);
        }
    }

    out
}

pub fn print_summary_report(report: &SummaryReport<'_>) {
    println!();
    print!("{}", render_summary_report(report));
}
