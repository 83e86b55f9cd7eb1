use cora::core::certification::Level;
use cora::core::config::ProjectConfig;
use cora::core::error::CoraError;
use cora::core::orchestrator::{Orchestrator, ValidatorAdapter};
use cora::core::report::{Location, ReportStatus, ValidationFinding, ValidationReport};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

enum Behaviour {
    Clean,
    Warn,
    Fail,
    Error,
    Panic,
    Sleep(Duration),
}

struct Scripted {
    name: &'static str,
    behaviour: Behaviour,
}

impl Scripted {
    fn new(name: &'static str, behaviour: Behaviour) -> Arc<dyn ValidatorAdapter> {
        Arc::new(Self { name, behaviour })
    }
}

impl ValidatorAdapter for Scripted {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&self, _target: &Path) -> Result<ValidationReport, CoraError> {
        let mut report = ValidationReport::new(self.name);
        report.record_checks(4);
        match &self.behaviour {
            Behaviour::Clean => {}
            Behaviour::Warn => report.push(ValidationFinding::warning(
                "w",
                Location::file("a"),
                "warned",
            )),
            Behaviour::Fail => {
                report.push(ValidationFinding::error("e", Location::file("a"), "failed"))
            }
            Behaviour::Error => {
                return Err(CoraError::unavailable(self.name, "no database credentials"));
            }
            Behaviour::Panic => panic!("adapter exploded"),
            Behaviour::Sleep(d) => thread::sleep(*d),
        }
        Ok(report)
    }
}

fn all(selected: &[&str]) -> BTreeSet<String> {
    selected.iter().map(|s| s.to_string()).collect()
}

#[test]
fn failing_adapters_degrade_without_losing_other_reports() {
    for parallel in [true, false] {
        let orch = Orchestrator::new(vec![
            Scripted::new("structure", Behaviour::Clean),
            Scripted::new("portability", Behaviour::Warn),
            Scripted::new("schema", Behaviour::Error),
            Scripted::new("api-contract", Behaviour::Panic),
        ])
        .parallel(parallel)
        .deterministic(true);

        let result = orch
            .run_all(Path::new("."), &BTreeSet::new())
            .expect("run completes");

        assert_eq!(result.reports.len(), 4);
        assert_eq!(result.reports["structure"].status(), ReportStatus::Completed);
        assert_eq!(result.reports["portability"].status(), ReportStatus::Completed);
        assert_eq!(result.reports["schema"].status(), ReportStatus::Unavailable);
        assert_eq!(
            result.reports["schema"].unavailable_reason(),
            Some("no database credentials")
        );
        let panic_reason = result.reports["api-contract"]
            .unavailable_reason()
            .expect("panic recorded");
        assert!(panic_reason.contains("adapter exploded"), "{panic_reason}");

        // structure 1.0 at weight 2, portability 0.9375 at weight 1.
        let score = result.overall_score.expect("score");
        assert!((score - (2.0 + 0.9375) / 3.0).abs() < 1e-9, "score {score}");
        assert_eq!(result.level, Level::Bronze);
        assert!(result.is_partial());
        assert_eq!(result.unavailable().len(), 2);
    }
}

#[test]
fn late_validators_are_marked_unavailable() {
    let orch = Orchestrator::new(vec![
        Scripted::new("structure", Behaviour::Clean),
        Scripted::new("schema", Behaviour::Sleep(Duration::from_secs(5))),
    ])
    .with_timeout(Duration::from_secs(1));

    let started = Instant::now();
    let result = orch
        .run_all(Path::new("."), &BTreeSet::new())
        .expect("run completes");
    assert!(started.elapsed() < Duration::from_secs(4));

    assert!(result.reports["structure"].passed());
    let schema = &result.reports["schema"];
    assert!(!schema.is_available());
    assert_eq!(schema.unavailable_reason(), Some("did not finish within 1s"));
}

#[test]
fn sequential_runs_honour_the_deadline() {
    let orch = Orchestrator::new(vec![
        Scripted::new("portability", Behaviour::Clean),
        Scripted::new("structure", Behaviour::Sleep(Duration::from_secs(3))),
    ])
    .parallel(false)
    .with_timeout(Duration::from_secs(1));

    let started = Instant::now();
    let result = orch
        .run_all(Path::new("."), &BTreeSet::new())
        .expect("run completes");
    assert!(started.elapsed() < Duration::from_secs(3));

    assert!(result.reports["portability"].passed());
    let structure = &result.reports["structure"];
    assert_eq!(structure.status(), ReportStatus::Unavailable);
    assert_eq!(structure.unavailable_reason(), Some("did not finish within 1s"));
}

#[test]
fn selection_limits_the_run() {
    let orch = Orchestrator::new(vec![
        Scripted::new("structure", Behaviour::Clean),
        Scripted::new("portability", Behaviour::Fail),
    ]);
    let result = orch
        .run_all(Path::new("."), &all(&["structure"]))
        .expect("run completes");
    assert_eq!(result.reports.keys().collect::<Vec<_>>(), vec!["structure"]);
    assert_eq!(result.overall_score, Some(1.0));
}

#[test]
fn configured_weights_override_defaults() {
    let weights: BTreeMap<String, f64> = [("portability".to_string(), 3.0)].into_iter().collect();
    let orch = Orchestrator::new(vec![
        Scripted::new("structure", Behaviour::Clean),
        Scripted::new("portability", Behaviour::Fail),
    ])
    .with_weights(weights);
    let result = orch
        .run_all(Path::new("."), &BTreeSet::new())
        .expect("run completes");
    // structure 1.0 x 2, portability 0.75 x 3.
    let score = result.overall_score.expect("score");
    assert!((score - (2.0 + 2.25) / 5.0).abs() < 1e-9, "score {score}");
}

#[test]
fn every_validator_unavailable_means_no_score() {
    let orch = Orchestrator::new(vec![
        Scripted::new("structure", Behaviour::Error),
        Scripted::new("schema", Behaviour::Error),
    ]);
    let result = orch
        .run_all(Path::new("."), &BTreeSet::new())
        .expect("run completes");
    assert_eq!(result.overall_score, None);
    assert_eq!(result.level, Level::None);
}

#[test]
fn missing_target_is_rejected() {
    let tmp = tempdir().expect("tempdir");
    let orch = Orchestrator::new(vec![Scripted::new("structure", Behaviour::Clean)]);
    assert!(matches!(
        orch.run_all(&tmp.path().join("absent"), &BTreeSet::new()),
        Err(CoraError::ValidationError(_))
    ));
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, content).expect("write");
}

fn compliant_project(root: &Path) {
    write(
        root,
        "packages/users/module.toml",
        r#"name = "users"
tier = 1

[provides]
tables = ["users"]
routes = [{ method = "GET", path = "/users/{id}", handler = "lambdas/users/app.handler" }]
frontend = ["useUsers"]
"#,
    );
    write(root, "packages/users/package.json", "{\"name\": \"users\", \"private\": true}\n");
    write(
        root,
        "packages/users/backend/lambdas/users/app.py",
        "def handler(event, context):\n    return {\"statusCode\": 200}\n",
    );
    write(
        root,
        "packages/users/frontend/useUsers.ts",
        "export function useUsers() {\n  return [];\n}\n",
    );
    write(
        root,
        "packages/users/db/schema/001_users.sql",
        "CREATE TABLE users (\n  id uuid PRIMARY KEY,\n  email text NOT NULL\n);\n",
    );
    write(root, "packages/users/docs/README.md", "# users\n");
    write(root, "cora.toml", "[schema]\nsource = \"declared\"\n");
}

#[test]
fn default_adapters_certify_a_project_without_a_gateway() {
    let tmp = tempdir().expect("tempdir");
    compliant_project(tmp.path());

    let config = ProjectConfig::load(tmp.path()).expect("config");
    let result = Orchestrator::from_config(&config)
        .deterministic(true)
        .run_all(tmp.path(), &BTreeSet::new())
        .expect("run completes");

    assert_eq!(result.reports.len(), 4);
    assert!(result.reports["structure"].passed(), "{:?}", result.reports["structure"]);
    assert!(result.reports["portability"].passed());
    assert_eq!(result.reports["schema"].source(), Some("declared"));
    assert!(result.reports["schema"].passed());

    // Nothing declares routes outside the manifest, so the contract check
    // has no route source to compare against.
    assert!(!result.reports["api-contract"].is_available());
    assert_eq!(result.level, Level::Bronze);
    assert!(result.meets(Level::Bronze));
    assert!(!result.meets(Level::Silver));
}
