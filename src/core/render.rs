//! Text, JSON and Markdown renderings of reports.
//!
//! JSON carries everything; text and Markdown are for people and may drop
//! INFO noise. Rendering is pure: the caller decides where output goes.

use crate::core::certification::CertificationResult;
use crate::core::error::CoraError;
use crate::core::report::{Severity, ValidationFinding, ValidationReport};
use colored::Colorize;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Markdown,
}

fn marker(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Error => "✗".bright_red(),
        Severity::Warning => "⚠".bright_yellow(),
        Severity::Info => "ℹ".bright_blue(),
    }
}

fn score_text(score: Option<f64>) -> String {
    match score {
        Some(s) => format!("{:.1}%", s * 100.0),
        None => "n/a".to_string(),
    }
}

/// Single terminal line, cut at `max` characters.
fn one_line(message: &str, max: usize) -> String {
    let mut words = message.split_whitespace();
    let mut line = words.next().unwrap_or_default().to_string();
    for w in words {
        line.push(' ');
        line.push_str(w);
    }
    match line.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line,
    }
}

fn first_few(items: &[String], shown: usize) -> String {
    let mut text = items
        .iter()
        .take(shown)
        .map(|i| one_line(i, 110))
        .collect::<Vec<_>>()
        .join("; ");
    if items.len() > shown {
        let _ = write!(text, " and {} more", items.len() - shown);
    }
    text
}

fn finding_line(out: &mut String, f: &ValidationFinding) {
    let _ = writeln!(
        out,
        "    {} [{}] {}: {}",
        marker(f.severity),
        f.category,
        f.location,
        one_line(&f.message, 160)
    );
    if let Some(fix) = &f.suggested_fix {
        let _ = writeln!(out, "        {} {}", "fix:".dimmed(), fix);
    }
}

fn report_text(out: &mut String, report: &ValidationReport) {
    if !report.is_available() {
        let _ = writeln!(
            out,
            "  {} {} {}: {}",
            "○".bright_black(),
            report.validator().bold(),
            "UNAVAILABLE".bright_yellow().bold(),
            report.unavailable_reason().unwrap_or("unknown")
        );
        return;
    }

    let head = if report.passed() {
        "✓".bright_green()
    } else {
        "✗".bright_red()
    };
    let source = report
        .source()
        .map(|s| format!(" (source: {})", s))
        .unwrap_or_default();
    let _ = writeln!(
        out,
        "  {} {} checks={} errors={} warnings={} score={}{}",
        head,
        report.validator().bold(),
        report.checks(),
        report.error_count(),
        report.warning_count(),
        score_text(report.score()),
        source
    );

    let mut findings: Vec<&ValidationFinding> = report.findings().iter().collect();
    findings.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.location.cmp(&b.location))
    });
    for f in findings {
        finding_line(out, f);
    }
}

pub fn render_report(report: &ValidationReport, format: OutputFormat) -> Result<String, CoraError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            let mut out = String::new();
            report_text(&mut out, report);
            Ok(out)
        }
        OutputFormat::Markdown => {
            let mut out = String::new();
            report_markdown(&mut out, report);
            Ok(out)
        }
    }
}

pub fn render_certification(
    result: &CertificationResult,
    format: OutputFormat,
) -> Result<String, CoraError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        OutputFormat::Text => Ok(certification_text(result)),
        OutputFormat::Markdown => Ok(certification_markdown(result)),
    }
}

fn certification_text(result: &CertificationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "cora validate: {}", result.target.display());
    if let Some(run_id) = &result.run_id {
        let _ = writeln!(out, "  run {}", run_id.dimmed());
    }
    for report in result.reports.values() {
        report_text(&mut out, report);
    }

    let level = result.level.to_string();
    let level = match result.level {
        crate::core::certification::Level::None => level.bright_red().bold(),
        _ => level.bright_green().bold(),
    };
    let _ = writeln!(
        out,
        "certification: level={} score={} errors={}",
        level,
        score_text(result.overall_score),
        result.total_errors()
    );

    let unavailable: Vec<String> = result
        .unavailable()
        .into_iter()
        .map(|(v, reason)| format!("{} ({})", v, reason))
        .collect();
    if !unavailable.is_empty() {
        let _ = writeln!(
            out,
            "{} partial run, unavailable {}: {}",
            "⚠".bright_yellow(),
            unavailable.len(),
            first_few(&unavailable, 4)
        );
    }
    out
}

fn md_escape(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

fn report_markdown(out: &mut String, report: &ValidationReport) {
    let _ = writeln!(out, "### {}", report.validator());
    let _ = writeln!(out);
    if !report.is_available() {
        let _ = writeln!(
            out,
            "**UNAVAILABLE**: {}",
            md_escape(report.unavailable_reason().unwrap_or("unknown"))
        );
        let _ = writeln!(out);
        return;
    }
    if report.findings().is_empty() {
        let _ = writeln!(out, "No findings ({} checks).", report.checks());
        let _ = writeln!(out);
        return;
    }
    let _ = writeln!(out, "| Severity | Category | Location | Message |");
    let _ = writeln!(out, "|---|---|---|---|");
    for f in report.findings() {
        let _ = writeln!(
            out,
            "| {} | {} | `{}` | {} |",
            f.severity,
            md_escape(&f.category),
            f.location,
            md_escape(&f.message)
        );
    }
    let _ = writeln!(out);
}

fn certification_markdown(result: &CertificationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# CORA certification: {}", result.level);
    let _ = writeln!(out);
    let _ = writeln!(out, "- Target: `{}`", result.target.display());
    let _ = writeln!(out, "- Overall score: {}", score_text(result.overall_score));
    if let Some(run_id) = &result.run_id {
        let _ = writeln!(out, "- Run: `{}`", run_id);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "| Validator | Status | Errors | Warnings | Score |");
    let _ = writeln!(out, "|---|---|---|---|---|");
    for r in result.reports.values() {
        let status = if !r.is_available() {
            "UNAVAILABLE"
        } else if r.passed() {
            "PASS"
        } else {
            "FAIL"
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} |",
            r.validator(),
            status,
            r.error_count(),
            r.warning_count(),
            score_text(r.score())
        );
    }
    let _ = writeln!(out);
    for r in result.reports.values() {
        report_markdown(&mut out, r);
    }
    out
}
