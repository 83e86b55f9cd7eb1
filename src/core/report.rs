//! Findings and per-validator reports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "ERROR"),
            Self::Warning => write!(f, "WARNING"),
            Self::Info => write!(f, "INFO"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Location {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            line: None,
        }
    }

    pub fn line(path: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            path: path.into(),
            line: Some(line),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.path.display(), line),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub severity: Severity,
    pub category: String,
    pub location: Location,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

impl ValidationFinding {
    pub fn new(
        severity: Severity,
        category: &str,
        location: Location,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category: category.to_string(),
            location,
            message: message.into(),
            suggested_fix: None,
        }
    }

    pub fn error(category: &str, location: Location, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, location, message)
    }

    pub fn warning(category: &str, location: Location, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, location, message)
    }

    pub fn info(category: &str, location: Location, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, category, location, message)
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
    Completed,
    Unavailable,
}

/// Deduction per warning relative to one failed check.
pub const WARNING_PENALTY: f64 = 0.25;

/// One validator run. Counts and score are always derived from `findings`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    validator: String,
    status: ReportStatus,
    findings: Vec<ValidationFinding>,
    checks: u32,
    source: Option<String>,
    unavailable_reason: Option<String>,
}

impl ValidationReport {
    pub fn new(validator: &str) -> Self {
        Self {
            validator: validator.to_string(),
            status: ReportStatus::Completed,
            findings: Vec::new(),
            checks: 0,
            source: None,
            unavailable_reason: None,
        }
    }

    pub fn unavailable(validator: &str, reason: impl Into<String>) -> Self {
        Self {
            status: ReportStatus::Unavailable,
            unavailable_reason: Some(reason.into()),
            ..Self::new(validator)
        }
    }

    pub fn push(&mut self, finding: ValidationFinding) {
        self.findings.push(finding);
    }

    pub fn extend(&mut self, findings: impl IntoIterator<Item = ValidationFinding>) {
        self.findings.extend(findings);
    }

    /// Count one evaluated check (pass or fail).
    pub fn record_check(&mut self) {
        self.checks += 1;
    }

    pub fn record_checks(&mut self, n: u32) {
        self.checks += n;
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = Some(source.into());
    }

    /// Sort findings into a stable presentation order.
    pub fn finalize(mut self) -> Self {
        self.findings.sort_by(|a, b| {
            (a.severity, &a.location, &a.category, &a.message).cmp(&(
                b.severity,
                &b.location,
                &b.category,
                &b.message,
            ))
        });
        self
    }

    pub fn validator(&self) -> &str {
        &self.validator
    }

    pub fn status(&self) -> ReportStatus {
        self.status
    }

    pub fn is_available(&self) -> bool {
        self.status == ReportStatus::Completed
    }

    pub fn findings(&self) -> &[ValidationFinding] {
        &self.findings
    }

    pub fn checks(&self) -> u32 {
        self.checks
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable_reason.as_deref()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// Zero errors and the validator actually ran.
    pub fn passed(&self) -> bool {
        self.is_available() && self.error_count() == 0
    }

    /// Weighted pass ratio in `[0, 1]`: each error costs one check, each
    /// warning a quarter. `None` when the validator was unavailable.
    pub fn score(&self) -> Option<f64> {
        if !self.is_available() {
            return None;
        }
        let deductions =
            self.error_count() as f64 + WARNING_PENALTY * self.warning_count() as f64;
        let checks = (self.checks as f64).max(self.error_count() as f64);
        if checks == 0.0 {
            return Some(1.0);
        }
        Some(((checks - deductions) / checks).clamp(0.0, 1.0))
    }

    pub fn findings_in(&self, path: &Path) -> impl Iterator<Item = &ValidationFinding> {
        self.findings.iter().filter(move |f| f.location.path == path)
    }
}

#[derive(Serialize)]
struct ReportView<'a> {
    validator: &'a str,
    status: ReportStatus,
    errors: usize,
    warnings: usize,
    checks: u32,
    score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    findings: &'a [ValidationFinding],
}

impl Serialize for ValidationReport {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ReportView {
            validator: &self.validator,
            status: self.status,
            errors: self.error_count(),
            warnings: self.warning_count(),
            checks: self.checks,
            score: self.score().map(round3),
            source: self.source(),
            reason: self.unavailable_reason(),
            findings: &self.findings,
        }
        .serialize(serializer)
    }
}

pub fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
