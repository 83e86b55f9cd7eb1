use cora::core::config::StructureSettings;
use cora::core::report::{Severity, ValidationReport};
use cora::validators::structure;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, content).expect("write");
}

fn mkdir(root: &Path, rel: &str) {
    fs::create_dir_all(root.join(rel)).expect("mkdir");
}

/// A module that satisfies every rule; tests then break one thing.
fn good_module(root: &Path, name: &str) {
    let base = format!("packages/{}", name);
    write(
        root,
        &format!("{}/module.toml", base),
        &format!(
            r#"name = "{name}"
tier = 1

[provides]
tables = ["{name}_items"]
routes = [{{ method = "GET", path = "/{name}", handler = "lambdas/{name}/app.handler" }}]
frontend = ["use{name}"]
"#
        ),
    );
    write(root, &format!("{}/package.json", base), "{\"private\": true}\n");
    write(
        root,
        &format!("{}/backend/lambdas/{}/app.py", base, name),
        "def handler(event, context):\n    return {}\n",
    );
    write(
        root,
        &format!("{}/frontend/hooks.ts", base),
        &format!("export const use{} = () => null;\n", name),
    );
    write(
        root,
        &format!("{}/db/schema/001_init.sql", base),
        &format!("CREATE TABLE IF NOT EXISTS {}_items (id uuid PRIMARY KEY);\n", name),
    );
    mkdir(root, &format!("{}/docs", base));
}

fn run(root: &Path) -> ValidationReport {
    structure::validate(root, &StructureSettings::default()).expect("structure runs")
}

fn categories(report: &ValidationReport, severity: Severity) -> Vec<&str> {
    report
        .findings()
        .iter()
        .filter(|f| f.severity == severity)
        .map(|f| f.category.as_str())
        .collect()
}

#[test]
fn conforming_module_passes_cleanly() {
    let tmp = tempdir().expect("tempdir");
    good_module(tmp.path(), "orgs");

    let report = run(tmp.path());
    assert!(report.passed(), "{:#?}", report.findings());
    assert_eq!(report.warning_count(), 0, "{:#?}", report.findings());
    assert_eq!(report.score(), Some(1.0));
}

#[test]
fn dependency_file_in_a_nested_directory_still_passes() {
    let tmp = tempdir().expect("tempdir");
    good_module(tmp.path(), "orgs");
    let module = tmp.path().join("packages/orgs");
    fs::remove_file(module.join("package.json")).expect("rm");
    write(&module, "sub/package.json", "{\"private\": true}\n");

    let report = run(tmp.path());
    assert_eq!(report.error_count(), 0, "{:#?}", report.findings());
    assert_eq!(categories(&report, Severity::Warning), vec!["nonstandard-layout"]);
}

#[test]
fn dependency_file_in_a_language_directory_is_informational() {
    let tmp = tempdir().expect("tempdir");
    good_module(tmp.path(), "orgs");
    let module = tmp.path().join("packages/orgs");
    fs::remove_file(module.join("package.json")).expect("rm");
    write(&module, "frontend/package.json", "{\"private\": true}\n");

    let report = run(tmp.path());
    assert!(report.passed());
    assert_eq!(categories(&report, Severity::Info), vec!["nested-dependency-file"]);
}

#[test]
fn module_exporting_frontend_symbols_needs_a_package_file() {
    let tmp = tempdir().expect("tempdir");
    good_module(tmp.path(), "orgs");
    fs::remove_file(tmp.path().join("packages/orgs/package.json")).expect("rm");

    let report = run(tmp.path());
    assert_eq!(categories(&report, Severity::Error), vec!["missing-file"]);
}

#[test]
fn module_without_any_dependency_file_fails() {
    let tmp = tempdir().expect("tempdir");
    good_module(tmp.path(), "orgs");
    let module = tmp.path().join("packages/orgs");
    fs::remove_file(module.join("package.json")).expect("rm");
    fs::write(module.join("module.toml"), "name = \"orgs\"\ntier = 1\n").expect("rewrite manifest");

    let report = run(tmp.path());
    assert!(!report.passed());
    assert_eq!(categories(&report, Severity::Error), vec!["missing-file"]);
    let missing = report
        .findings()
        .iter()
        .find(|f| f.category == "missing-file")
        .expect("finding");
    assert_eq!(missing.location.path, Path::new("packages/orgs"));
}

#[test]
fn manifest_promises_are_checked_against_sources() {
    let tmp = tempdir().expect("tempdir");
    good_module(tmp.path(), "orgs");
    let module = tmp.path().join("packages/orgs");
    fs::remove_file(module.join("frontend/hooks.ts")).expect("rm");
    fs::remove_file(module.join("backend/lambdas/orgs/app.py")).expect("rm");
    fs::write(module.join("db/schema/001_init.sql"), "-- empty\n").expect("write");

    let report = run(tmp.path());
    let mut errors = categories(&report, Severity::Error);
    errors.sort();
    assert_eq!(
        errors,
        vec!["missing-export", "missing-handler", "missing-table-definition"]
    );
}

#[test]
fn layout_variants_warn_and_absences_fail() {
    let tmp = tempdir().expect("tempdir");
    good_module(tmp.path(), "orgs");
    let module = tmp.path().join("packages/orgs");
    fs::rename(module.join("docs"), module.join("documentation")).expect("rename");
    fs::remove_dir_all(module.join("db")).expect("rm db");
    // The table check has nothing to read without a schema directory.
    fs::write(
        module.join("module.toml"),
        "name = \"orgs\"\ntier = 1\n[provides]\nfrontend = [\"useorgs\"]\n",
    )
    .expect("rewrite manifest");

    let report = run(tmp.path());
    assert_eq!(categories(&report, Severity::Warning), vec!["nonstandard-layout"]);
    assert_eq!(categories(&report, Severity::Error), vec!["missing-directory"]);
    let missing = report
        .findings()
        .iter()
        .find(|f| f.category == "missing-directory")
        .expect("finding");
    assert_eq!(missing.location.path, Path::new("packages/orgs/db/schema"));
}

#[test]
fn manifest_problems_are_reported_per_module() {
    let tmp = tempdir().expect("tempdir");
    good_module(tmp.path(), "orgs");
    good_module(tmp.path(), "billing");
    fs::remove_file(tmp.path().join("packages/billing/module.toml")).expect("rm");
    good_module(tmp.path(), "audit");
    fs::write(
        tmp.path().join("packages/audit/module.toml"),
        "name = \"audit-log\"\ntier = 1\n",
    )
    .expect("rename manifest");

    let report = run(tmp.path());
    assert_eq!(categories(&report, Severity::Error), vec!["missing-manifest"]);
    assert_eq!(categories(&report, Severity::Warning), vec!["name-mismatch"]);
}

#[test]
fn missing_or_empty_container() {
    let tmp = tempdir().expect("tempdir");
    let report = run(tmp.path());
    assert_eq!(categories(&report, Severity::Error), vec!["missing-directory"]);

    mkdir(tmp.path(), "packages");
    let report = run(tmp.path());
    assert!(report.passed());
    assert_eq!(categories(&report, Severity::Warning), vec!["no-modules"]);
}
