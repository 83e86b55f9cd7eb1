//! Portability scan: hardcoded deployment-specific values in project source.
//!
//! Matching is file-by-file, line-by-line. Infrastructure-as-code files are
//! expected to carry literal accounts and regions and are exempt by
//! extension, except for patterns marked as never exempt (credentials).

use crate::core::config::PortabilitySettings;
use crate::core::error::CoraError;
use crate::core::report::{Location, Severity, ValidationFinding, ValidationReport};
use crate::core::walk;
use rayon::prelude::*;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};

pub const NAME: &str = "portability";

/// Inline marker that silences every pattern on its line.
pub const SUPPRESS_MARKER: &str = "cora:allow-hardcoded";

/// Text files worth scanning.
const SCANNED_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "json", "yaml", "yml", "toml", "sh", "bash",
    "sql", "env", "tf", "tfvars", "hcl",
];

/// Generated files full of hashes and pinned numbers.
const SKIPPED_FILES: &[&str] = &[
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "poetry.lock",
    "cora.lock.json",
];

static UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

#[derive(Debug, Clone)]
pub struct NamedPattern {
    pub name: String,
    pub regex: Regex,
    pub severity: Severity,
    /// Finding category, e.g. `hardcoded-account-id`.
    pub category: String,
    /// A line matching any of these is not reported for this pattern.
    pub context_exclusions: Vec<Regex>,
    pub exempt_in_infra: bool,
    /// Suppress matches that sit inside a UUID-shaped token.
    pub uuid_guard: bool,
}

impl NamedPattern {
    fn builtin(
        name: &str,
        regex: &str,
        severity: Severity,
        exclusions: &[&str],
        exempt_in_infra: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            regex: Regex::new(regex).unwrap(),
            severity,
            category: format!("hardcoded-{}", name),
            context_exclusions: exclusions.iter().map(|e| Regex::new(e).unwrap()).collect(),
            exempt_in_infra,
            uuid_guard: false,
        }
    }

    /// Byte ranges on `line` this pattern reports.
    pub fn matches_in<'l>(&self, line: &'l str) -> Vec<regex::Match<'l>> {
        if self.context_exclusions.iter().any(|e| e.is_match(line)) {
            return Vec::new();
        }
        let uuids: Vec<(usize, usize)> = if self.uuid_guard {
            UUID.find_iter(line).map(|m| (m.start(), m.end())).collect()
        } else {
            Vec::new()
        };
        self.regex
            .find_iter(line)
            .filter(|m| {
                !uuids
                    .iter()
                    .any(|(start, end)| m.start() >= *start && m.end() <= *end)
            })
            .collect()
    }
}

/// Patterns every scan carries. `project_names` become templating warnings.
pub fn builtin_patterns(project_names: &[String]) -> Vec<NamedPattern> {
    let mut account = NamedPattern::builtin(
        "account-id",
        r"\b\d{12}\b",
        Severity::Error,
        &[r"(?i)(timestamp|epoch|_ms\b|millis|phone|\btel\b|isbn)"],
        true,
    );
    account.uuid_guard = true;

    let mut patterns = vec![
        account,
        NamedPattern::builtin(
            "region",
            r"\b(us|eu|ap|sa|ca|me|af|il|mx)-(north|south|east|west|central|northeast|southeast|northwest|southwest)-\d\b",
            Severity::Warning,
            &[],
            true,
        ),
        NamedPattern::builtin(
            "url",
            r"https?://[A-Za-z0-9.-]+\.(execute-api\.[a-z0-9-]+\.amazonaws\.com|lambda-url\.[a-z0-9-]+\.on\.aws|supabase\.co|cloudfront\.net|amplifyapp\.com|vercel\.app|azurewebsites\.net|run\.app)\b",
            Severity::Warning,
            &[],
            true,
        ),
        NamedPattern::builtin(
            "credential",
            r"\b(AKIA|ASIA|AGPA|AIDA|AROA)[0-9A-Z]{16}\b",
            Severity::Error,
            &[],
            false,
        ),
    ];

    for project in project_names.iter().filter(|p| !p.trim().is_empty()) {
        let mut p = NamedPattern::builtin(
            "project-name",
            &format!(r"\b{}\b", regex::escape(project.trim())),
            Severity::Warning,
            &[],
            true,
        );
        p.name = format!("project-name:{}", project.trim());
        patterns.push(p);
    }
    patterns
}

/// Built-ins plus `[[portability.patterns]]` from `cora.toml`.
pub fn patterns_from_settings(settings: &PortabilitySettings) -> Result<Vec<NamedPattern>, CoraError> {
    let mut patterns = builtin_patterns(&settings.project_names);
    for custom in &settings.patterns {
        let regex = Regex::new(&custom.regex).map_err(|e| {
            CoraError::ConfigError(format!("portability pattern '{}': {}", custom.name, e))
        })?;
        let severity: Severity = custom
            .severity
            .parse()
            .map_err(|e| CoraError::ConfigError(format!("portability pattern '{}': {}", custom.name, e)))?;
        let context_exclusions = custom
            .exclusions
            .iter()
            .map(|e| {
                Regex::new(e).map_err(|err| {
                    CoraError::ConfigError(format!("portability exclusion '{}': {}", e, err))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        patterns.push(NamedPattern {
            name: custom.name.clone(),
            regex,
            severity,
            category: format!("hardcoded-{}", custom.name),
            context_exclusions,
            exempt_in_infra: custom.exempt_in_infra,
            uuid_guard: false,
        });
    }
    Ok(patterns)
}

fn is_infra_file(path: &Path, settings: &PortabilitySettings) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| settings.exempt_extensions.iter().any(|x| x == ext))
}

fn is_scanned(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if SKIPPED_FILES.contains(&name) {
        return false;
    }
    if name.starts_with(".env") {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SCANNED_EXTENSIONS.contains(&e))
}

fn fix_for(pattern: &NamedPattern) -> String {
    match pattern.name.as_str() {
        "account-id" => "read the account id from configuration or the deployment environment".to_string(),
        "region" => "take the region from configuration (e.g. AWS_REGION)".to_string(),
        "url" => "inject the endpoint through environment configuration".to_string(),
        "credential" => "remove the key from source and rotate it".to_string(),
        _ => format!(
            "template this value or mark the line with '{}' if intentional",
            SUPPRESS_MARKER
        ),
    }
}

/// Scan one file's content. `rel` is the reported location.
pub fn scan_content(
    rel: &Path,
    content: &str,
    infra: bool,
    patterns: &[NamedPattern],
) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.contains(SUPPRESS_MARKER) {
            continue;
        }
        for pattern in patterns {
            if infra && pattern.exempt_in_infra {
                continue;
            }
            for m in pattern.matches_in(line) {
                findings.push(
                    ValidationFinding::new(
                        pattern.severity,
                        &pattern.category,
                        Location::line(rel, idx + 1),
                        format!("hardcoded {} '{}'", pattern.name, m.as_str()),
                    )
                    .with_fix(fix_for(pattern)),
                );
            }
        }
    }
    findings
}

pub fn validate(
    root: &Path,
    patterns: &[NamedPattern],
    settings: &PortabilitySettings,
) -> Result<ValidationReport, CoraError> {
    if !root.is_dir() {
        return Err(CoraError::ValidationError(format!(
            "target {} is not a directory",
            root.display()
        )));
    }

    let files: Vec<PathBuf> = walk::collect_files(root)?
        .into_iter()
        .filter(|p| is_scanned(p))
        .filter(|p| {
            let rel = walk::relative(root, p).to_string_lossy().replace('\\', "/");
            !settings
                .exempt_paths
                .iter()
                .any(|glob| walk::glob_match(glob, &rel))
        })
        .collect();
    debug!(files = files.len(), patterns = patterns.len(), "portability scan starting");

    let per_file: Vec<Vec<ValidationFinding>> = files
        .par_iter()
        .map(|path| {
            let rel = walk::relative(root, path);
            let Some(content) = walk::read_text(path) else {
                return vec![ValidationFinding::warning(
                    "unreadable-file",
                    Location::file(rel),
                    "file could not be read, so it was not scanned",
                )];
            };
            scan_content(&rel, &content, is_infra_file(path, settings), patterns)
        })
        .collect();

    let mut report = ValidationReport::new(NAME);
    report.record_checks(files.len() as u32);
    report.extend(per_file.into_iter().flatten());
    let report = report.finalize();
    info!(
        files = files.len(),
        errors = report.error_count(),
        warnings = report.warning_count(),
        "portability scan finished"
    );
    Ok(report)
}
