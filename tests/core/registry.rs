use cora::core::error::CoraError;
use cora::core::registry::{ModuleDescriptor, Registry, Tier, parse_descriptor};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_module(catalog: &Path, dir: &str, file: &str, content: &str) {
    let module_dir = catalog.join(dir);
    fs::create_dir_all(&module_dir).expect("module dir");
    fs::write(module_dir.join(file), content).expect("descriptor");
}

fn descriptor(name: &str, tier: &str, deps: &[&str]) -> ModuleDescriptor {
    let deps = deps
        .iter()
        .map(|d| format!("\"{}\"", d))
        .collect::<Vec<_>>()
        .join(", ");
    let toml = format!("name = \"{}\"\ntier = {}\ndependencies = [{}]\n", name, tier, deps);
    parse_descriptor(Path::new("module.toml"), &toml).expect("descriptor parses")
}

#[test]
fn load_all_reads_toml_and_json_descriptors() {
    let tmp = tempdir().expect("tempdir");
    let catalog = tmp.path();

    write_module(
        catalog,
        "access",
        "module.toml",
        r#"
name = "access"
tier = 1
version = "1.2.0"
description = "Identity and org membership"

[provides]
tables = ["orgs", "org_members"]
routes = [{ method = "get", path = "/orgs/{id}" }]
frontend = ["useOrg"]

[config]
locked = ["auth.provider"]

[config.values.auth]
provider = "cognito"
"#,
    );
    write_module(
        catalog,
        "ai",
        "module.json",
        r#"{"name": "ai", "tier": "tier-2", "dependencies": ["access"]}"#,
    );
    // Directories without a descriptor are not modules.
    fs::create_dir_all(catalog.join("shared-assets")).expect("stray dir");

    let registry = Registry::load_all(catalog).expect("catalog loads");
    assert_eq!(registry.len(), 2);

    let access = registry.get("access").expect("access");
    assert_eq!(access.tier, Tier::Numbered(1));
    assert_eq!(access.version, "1.2.0");
    assert!(access.provided_tables.contains("org_members"));
    assert_eq!(access.provided_routes[0].method, "GET");
    assert!(access.provided_frontend_exports.contains("useOrg"));
    assert!(access.config.locked.contains("auth.provider"));
    assert_eq!(access.source, catalog.join("access").join("module.toml"));

    let ai = registry.get("ai").expect("ai");
    assert_eq!(ai.tier, Tier::Numbered(2));
    assert_eq!(ai.version, "0.0.0");
    assert!(ai.dependencies.contains("access"));

    let fragments = registry.config_fragments();
    assert!(fragments["ai"].is_empty());
    assert!(!fragments["access"].is_empty());
}

#[test]
fn malformed_descriptor_aborts_the_load() {
    let tmp = tempdir().expect("tempdir");
    write_module(tmp.path(), "ok", "module.toml", "name = \"ok\"\ntier = 1\n");
    write_module(tmp.path(), "broken", "module.toml", "name = \"broken\"\n");

    let err = Registry::load_all(tmp.path()).expect_err("missing tier must fail");
    match err {
        CoraError::CatalogParse { path, reason } => {
            assert!(path.ends_with("broken/module.toml"));
            assert!(reason.contains("tier"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn descriptor_rules_are_enforced() {
    let p = Path::new("module.toml");
    let cases = [
        "name = \"Bad Name\"\ntier = 1\n",
        "name = \"base\"\ntier = 1\ndependencies = [\"other\"]\n",
        "name = \"loop\"\ntier = 2\ndependencies = [\"loop\"]\n",
        "name = \"x\"\ntier = 0\n",
        "name = \"x\"\ntier = 2\n[provides]\nroutes = [{ method = \"FETCH\", path = \"/a\" }]\n",
        "name = \"x\"\ntier = 2\n[provides]\nroutes = [{ method = \"GET\", path = \"a\" }]\n",
        "name = \"x\"\ntier = [1]\n",
    ];
    for case in cases {
        assert!(
            matches!(parse_descriptor(p, case), Err(CoraError::CatalogParse { .. })),
            "expected CatalogParse for:\n{case}"
        );
    }

    let functional = parse_descriptor(p, "name = \"reports\"\ntier = \"functional\"\n")
        .expect("functional tier parses");
    assert_eq!(functional.tier, Tier::Functional);
}

#[test]
fn duplicate_names_are_rejected() {
    let err = Registry::from_descriptors(vec![
        descriptor("access", "1", &[]),
        descriptor("access", "2", &[]),
    ])
    .expect_err("duplicates must fail");
    assert_eq!(err.category(), "CATALOG_PARSE");
}

#[test]
fn missing_catalog_is_a_catalog_error() {
    let tmp = tempdir().expect("tempdir");
    let err = Registry::load_all(&tmp.path().join("nope")).expect_err("no catalog");
    assert!(matches!(err, CoraError::CatalogParse { .. }));
    assert!(err.remediation().is_some());
}

#[test]
fn lookup_of_unknown_module_names_it() {
    let registry = Registry::from_descriptors(vec![descriptor("access", "1", &[])]).expect("registry");
    assert!(registry.contains("access"));
    match registry.get("billing") {
        Err(CoraError::ModuleNotFound { name, required_by }) => {
            assert_eq!(name, "billing");
            assert!(required_by.is_none());
        }
        other => panic!("unexpected: {other:?}"),
    }
}
