//! Structure validator: module directories honor their manifest contract.

use crate::core::config::StructureSettings;
use crate::core::error::CoraError;
use crate::core::registry::{self, ModuleDescriptor};
use crate::core::report::{Location, ValidationFinding, ValidationReport};
use crate::core::walk;
use crate::validators::introspect::parse_declared_schema;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const NAME: &str = "structure";

/// Package-level dependency declarations.
const DEPENDENCY_FILES: &[&str] = &["package.json", "pyproject.toml", "requirements.txt"];

/// Subdirectories where a dependency file is expected in nested layouts.
const LANGUAGE_DIRS: &[&str] = &["frontend", "backend", "web", "app", "ui", "server"];

const FRONTEND_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs"];
const HANDLER_EXTENSIONS: &[&str] = &["py", "ts", "js", "mjs"];

/// Tolerated alternatives for each conventional directory.
fn layout_variants(required: &str) -> &'static [&'static str] {
    match required {
        "backend" => &["src/backend", "server", "lambdas", "api"],
        "frontend" => &["src/frontend", "web", "ui", "app"],
        "db/schema" => &["db", "database/schema", "schema", "migrations", "sql"],
        "docs" => &["doc", "documentation"],
        _ => &[],
    }
}

fn module_dirs(container: &Path) -> Result<Vec<PathBuf>, CoraError> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(container)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.') && !walk::SKIP_DIRS.contains(&n))
        })
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// First existing directory among `required` and its tolerated variants.
fn locate_dir(module: &Path, required: &str) -> Option<(PathBuf, bool)> {
    let primary = module.join(required);
    if primary.is_dir() {
        return Some((primary, true));
    }
    layout_variants(required)
        .iter()
        .map(|v| module.join(v))
        .find(|p| p.is_dir())
        .map(|p| (p, false))
}

pub fn validate(root: &Path, settings: &StructureSettings) -> Result<ValidationReport, CoraError> {
    let mut report = ValidationReport::new(NAME);
    let container = root.join(&settings.modules_dir);

    report.record_check();
    if !container.is_dir() {
        report.push(
            ValidationFinding::error(
                "missing-directory",
                Location::file(&settings.modules_dir),
                format!("module container '{}' does not exist", settings.modules_dir),
            )
            .with_fix("scaffold modules with `cora scaffold` or set [structure].modules_dir"),
        );
        return Ok(report.finalize());
    }

    let modules = module_dirs(&container)?;
    if modules.is_empty() {
        report.push(ValidationFinding::warning(
            "no-modules",
            Location::file(&settings.modules_dir),
            "module container is empty",
        ));
    }

    for module in &modules {
        check_module(root, module, settings, &mut report)?;
    }

    let report = report.finalize();
    info!(
        modules = modules.len(),
        errors = report.error_count(),
        warnings = report.warning_count(),
        "structure check finished"
    );
    Ok(report)
}

fn check_module(
    root: &Path,
    module: &Path,
    settings: &StructureSettings,
    report: &mut ValidationReport,
) -> Result<(), CoraError> {
    let rel = walk::relative(root, module);
    let dir_name = module
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    debug!(module = %dir_name, "checking module layout");

    report.record_check();
    let descriptor = match registry::find_descriptor(module) {
        None => {
            report.push(
                ValidationFinding::error(
                    "missing-manifest",
                    Location::file(&rel),
                    format!("module '{}' has no module.toml or module.json", dir_name),
                )
                .with_fix("add a module.toml declaring name, tier and dependencies"),
            );
            None
        }
        Some(path) => {
            let content = fs::read_to_string(&path)?;
            match registry::parse_descriptor(&path, &content) {
                Ok(d) => Some(d),
                Err(e) => {
                    report.push(ValidationFinding::error(
                        "invalid-manifest",
                        Location::file(walk::relative(root, &path)),
                        e.to_string(),
                    ));
                    None
                }
            }
        }
    };

    for required in &settings.required_dirs {
        report.record_check();
        match locate_dir(module, required) {
            Some((_, true)) => {}
            Some((found, false)) => report.push(
                ValidationFinding::warning(
                    "nonstandard-layout",
                    Location::file(walk::relative(root, &found)),
                    format!("'{}' used in place of '{}'", walk::relative(module, &found).display(), required),
                )
                .with_fix(format!("rename to '{}'", required)),
            ),
            None => report.push(
                ValidationFinding::error(
                    "missing-directory",
                    Location::file(rel.join(required)),
                    format!("module '{}' is missing required directory '{}'", dir_name, required),
                )
                .with_fix(format!("create {}/", rel.join(required).display())),
            ),
        }
    }

    check_dependency_file(root, module, descriptor.as_ref(), report)?;

    let Some(descriptor) = descriptor else {
        return Ok(());
    };

    report.record_check();
    if descriptor.name != dir_name {
        report.push(ValidationFinding::warning(
            "name-mismatch",
            Location::file(walk::relative(root, &descriptor.source)),
            format!(
                "manifest name '{}' differs from directory name '{}'",
                descriptor.name, dir_name
            ),
        ));
    }

    check_frontend_exports(root, module, &descriptor, report)?;
    check_route_handlers(root, module, &descriptor, report);
    check_tables(root, module, &descriptor, report)?;
    Ok(())
}

/// Dependency files may sit at the module root or one level down in a
/// language directory. A module with none anywhere fails.
fn check_dependency_file(
    root: &Path,
    module: &Path,
    descriptor: Option<&ModuleDescriptor>,
    report: &mut ValidationReport,
) -> Result<(), CoraError> {
    report.record_check();
    let at = |dir: &Path| DEPENDENCY_FILES.iter().map(|f| dir.join(f)).find(|p| p.is_file());

    if at(module).is_some() {
        return Ok(());
    }
    for lang in LANGUAGE_DIRS {
        if let Some(found) = at(&module.join(lang)) {
            report.push(ValidationFinding::info(
                "nested-dependency-file",
                Location::file(walk::relative(root, &found)),
                format!("dependency file found in language directory '{}'", lang),
            ));
            return Ok(());
        }
    }
    for sub in module_dirs(module)? {
        if let Some(found) = at(&sub) {
            report.push(
                ValidationFinding::warning(
                    "nonstandard-layout",
                    Location::file(walk::relative(root, &found)),
                    "dependency file lives in a non-standard subdirectory",
                )
                .with_fix("move it to the module root or a frontend/backend directory"),
            );
            return Ok(());
        }
    }

    let rel = walk::relative(root, module);
    let needs_package = descriptor.is_some_and(|d| !d.provided_frontend_exports.is_empty());
    let finding = if needs_package {
        ValidationFinding::error(
            "missing-file",
            Location::file(rel.join("package.json")),
            "module exports frontend symbols but declares no package.json",
        )
    } else {
        ValidationFinding::error(
            "missing-file",
            Location::file(&rel),
            "module has no dependency declaration file at its root or in any subdirectory",
        )
    };
    report.push(finding.with_fix("add package.json (or pyproject.toml) at the module root"));
    Ok(())
}

fn export_regex(symbol: &str) -> Option<Regex> {
    let s = regex::escape(symbol);
    Regex::new(&format!(
        r"export\s+(?:default\s+)?(?:async\s+)?(?:function\*?|const|let|var|class|interface|type|enum)\s+{s}\b|export\s*\{{[^}}]*\b{s}\b[^}}]*\}}|export\s+default\s+{s}\b"
    ))
    .ok()
}

fn check_frontend_exports(
    root: &Path,
    module: &Path,
    descriptor: &ModuleDescriptor,
    report: &mut ValidationReport,
) -> Result<(), CoraError> {
    if descriptor.provided_frontend_exports.is_empty() {
        return Ok(());
    }
    let search_root = locate_dir(module, "frontend")
        .map(|(p, _)| p)
        .unwrap_or_else(|| module.to_path_buf());
    let sources: Vec<(PathBuf, String)> = walk::collect_with_extensions(&search_root, FRONTEND_EXTENSIONS)?
        .into_iter()
        .filter_map(|p| walk::read_text(&p).map(|c| (p, c)))
        .collect();

    for symbol in &descriptor.provided_frontend_exports {
        report.record_check();
        let Some(re) = export_regex(symbol) else {
            continue;
        };
        let by_file_name = sources.iter().any(|(p, c)| {
            p.file_stem().and_then(|s| s.to_str()) == Some(symbol.as_str())
                && c.contains("export default")
        });
        if by_file_name || sources.iter().any(|(_, c)| re.is_match(c)) {
            continue;
        }
        report.push(
            ValidationFinding::error(
                "missing-export",
                Location::file(walk::relative(root, &search_root)),
                format!("declared frontend export '{}' is not exported by any source file", symbol),
            )
            .with_fix(format!("export '{}' or remove it from provides.frontend", symbol)),
        );
    }
    Ok(())
}

/// Candidate files for a handler reference like `lambdas/orgs/app.handler`.
fn handler_candidates(base: &Path, handler: &str) -> Vec<PathBuf> {
    let mut out = vec![base.join(handler)];
    if let Some((file, _symbol)) = handler.rsplit_once('.') {
        out.push(base.join(file));
        out.extend(HANDLER_EXTENSIONS.iter().map(|ext| base.join(format!("{}.{}", file, ext))));
    }
    out.extend(HANDLER_EXTENSIONS.iter().map(|ext| base.join(format!("{}.{}", handler, ext))));
    out
}

fn check_route_handlers(
    root: &Path,
    module: &Path,
    descriptor: &ModuleDescriptor,
    report: &mut ValidationReport,
) {
    let backend = locate_dir(module, "backend").map(|(p, _)| p);
    for route in &descriptor.provided_routes {
        let Some(handler) = &route.handler else {
            continue;
        };
        report.record_check();
        let found = [backend.as_deref(), Some(module)]
            .into_iter()
            .flatten()
            .flat_map(|base| handler_candidates(base, handler))
            .any(|p| p.exists());
        if !found {
            report.push(
                ValidationFinding::error(
                    "missing-handler",
                    Location::file(walk::relative(root, &descriptor.source)),
                    format!(
                        "route {} {} references handler '{}' which does not exist",
                        route.method, route.path, handler
                    ),
                )
                .with_fix("add the handler source or correct provides.routes"),
            );
        }
    }
}

fn check_tables(
    root: &Path,
    module: &Path,
    descriptor: &ModuleDescriptor,
    report: &mut ValidationReport,
) -> Result<(), CoraError> {
    if descriptor.provided_tables.is_empty() {
        return Ok(());
    }
    let Some((schema_dir, _)) = locate_dir(module, "db/schema") else {
        // Already reported as a missing directory.
        return Ok(());
    };
    let mut declared = BTreeSet::new();
    for sql_file in walk::collect_with_extensions(&schema_dir, &["sql"])? {
        if let Some(sql) = walk::read_text(&sql_file) {
            declared.extend(parse_declared_schema(&sql).into_keys());
        }
    }
    for table in &descriptor.provided_tables {
        report.record_check();
        if declared.contains(&table.to_ascii_lowercase()) {
            continue;
        }
        report.push(
            ValidationFinding::error(
                "missing-table-definition",
                Location::file(walk::relative(root, &schema_dir)),
                format!("declared table '{}' has no CREATE TABLE statement", table),
            )
            .with_fix(format!("add CREATE TABLE {} to a schema file", table)),
        );
    }
    Ok(())
}
