use cora::core::error::CoraError;
use cora::core::merge::merge;
use cora::core::registry::{ModuleDescriptor, Registry, parse_descriptor};
use cora::core::resolver::resolve;
use serde_json::json;
use std::path::Path;

fn module(toml: &str) -> ModuleDescriptor {
    parse_descriptor(Path::new("module.toml"), toml).expect("descriptor parses")
}

fn stack() -> Registry {
    Registry::from_descriptors(vec![
        module(
            r#"
name = "access"
tier = 1

[config]
locked = ["auth.provider"]

[config.values.auth]
provider = "cognito"
session_minutes = 60

[config.values.features]
enabled = ["orgs"]
"#,
        ),
        module(
            r#"
name = "ai"
tier = 2
dependencies = ["access"]

[config.values.auth]
session_minutes = 30

[config.values.features]
enabled = ["chat"]

[config.values.ai]
model = "small"
"#,
        ),
        module(
            r#"
name = "mgmt"
tier = 3
dependencies = ["ai"]

[config]
replace = ["features.enabled"]

[config.values.features]
enabled = ["admin"]
"#,
        ),
    ])
    .expect("registry")
}

#[test]
fn fragments_apply_in_resolution_order() {
    let reg = stack();
    let resolved = resolve(&["ai"], &reg).expect("resolves");
    let merged = merge(&resolved, &reg.config_fragments()).expect("merges");

    assert_eq!(merged.get("auth.provider"), Some(&json!("cognito")));
    assert_eq!(merged.get("auth.session_minutes"), Some(&json!(30)));
    assert_eq!(merged.provenance("auth.session_minutes"), Some("ai"));
    assert_eq!(merged.get("features.enabled"), Some(&json!(["orgs", "chat"])));
    assert!(merged.is_locked("auth.provider"));
    assert!(!merged.is_locked("ai.model"));

    assert_eq!(
        merged.to_tree(),
        json!({
            "ai": {"model": "small"},
            "auth": {"provider": "cognito", "session_minutes": 30},
            "features": {"enabled": ["orgs", "chat"]}
        })
    );
}

#[test]
fn replace_overwrites_lists_instead_of_appending() {
    let reg = stack();
    let resolved = resolve(&["mgmt"], &reg).expect("resolves");
    let merged = merge(&resolved, &reg.config_fragments()).expect("merges");
    assert_eq!(merged.get("features.enabled"), Some(&json!(["admin"])));
    assert_eq!(merged.provenance("features.enabled"), Some("mgmt"));
}

#[test]
fn overriding_a_locked_key_names_both_modules() {
    let reg = Registry::from_descriptors(vec![
        module(
            "name = \"access\"\ntier = 1\n[config]\nlocked = [\"auth\"]\n[config.values.auth]\nprovider = \"cognito\"\n",
        ),
        module(
            "name = \"sso\"\ntier = 2\ndependencies = [\"access\"]\n[config.values.auth]\nprovider = \"okta\"\n",
        ),
    ])
    .expect("registry");

    let resolved = resolve(&["sso"], &reg).expect("resolves");
    match merge(&resolved, &reg.config_fragments()) {
        Err(CoraError::ConfigConflict {
            key,
            locked_by,
            writer,
        }) => {
            assert_eq!(key, "auth.provider");
            assert_eq!(locked_by, "access");
            assert_eq!(writer, "sso");
        }
        other => panic!("expected a conflict, got {other:?}"),
    }
}

#[test]
fn rewriting_a_locked_key_with_the_same_value_is_allowed() {
    let reg = Registry::from_descriptors(vec![
        module(
            "name = \"access\"\ntier = 1\n[config]\nlocked = [\"auth.provider\"]\n[config.values.auth]\nprovider = \"cognito\"\n",
        ),
        module(
            "name = \"sso\"\ntier = 2\ndependencies = [\"access\"]\n[config.values.auth]\nprovider = \"cognito\"\n",
        ),
    ])
    .expect("registry");

    let resolved = resolve(&["sso"], &reg).expect("resolves");
    let merged = merge(&resolved, &reg.config_fragments()).expect("same value is fine");
    assert!(merged.is_locked("auth.provider"));
    assert_eq!(merged.provenance("auth.provider"), Some("access"));
}

#[test]
fn replacing_a_locked_subtree_with_a_scalar_conflicts() {
    let reg = Registry::from_descriptors(vec![
        module(
            "name = \"access\"\ntier = 1\n[config]\nlocked = [\"auth\"]\n[config.values.auth]\nprovider = \"cognito\"\n",
        ),
        module(
            "name = \"sso\"\ntier = 2\ndependencies = [\"access\"]\n[config.values]\nauth = \"disabled\"\n",
        ),
    ])
    .expect("registry");

    let resolved = resolve(&["sso"], &reg).expect("resolves");
    assert!(matches!(
        merge(&resolved, &reg.config_fragments()),
        Err(CoraError::ConfigConflict { .. })
    ));
}

#[test]
fn merging_twice_is_idempotent() {
    let reg = stack();
    let resolved = resolve(&["mgmt"], &reg).expect("resolves");
    let fragments = reg.config_fragments();
    let first = merge(&resolved, &fragments).expect("first merge");
    let second = merge(&resolved, &fragments).expect("second merge");
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first.to_tree()).expect("json"),
        serde_json::to_string(&second.to_tree()).expect("json")
    );
}
