use cora::core::error::CoraError;
use cora::core::registry::{ModuleDescriptor, Registry, parse_descriptor};
use cora::core::resolver::resolve;
use std::collections::BTreeMap;
use std::path::Path;

fn module(name: &str, tier: &str, deps: &[&str]) -> ModuleDescriptor {
    let deps = deps
        .iter()
        .map(|d| format!("\"{}\"", d))
        .collect::<Vec<_>>()
        .join(", ");
    let tier = if tier.parse::<u32>().is_ok() {
        tier.to_string()
    } else {
        format!("\"{}\"", tier)
    };
    let toml = format!(
        "name = \"{}\"\ntier = {}\nversion = \"1.0.0\"\ndependencies = [{}]\n",
        name, tier, deps
    );
    parse_descriptor(Path::new(&format!("catalog/{}/module.toml", name)), &toml)
        .expect("descriptor parses")
}

fn registry(modules: Vec<ModuleDescriptor>) -> Registry {
    Registry::from_descriptors(modules).expect("registry")
}

#[test]
fn layered_request_resolves_lowest_tier_first() {
    let reg = registry(vec![
        module("access", "1", &[]),
        module("ai", "2", &["access"]),
        module("mgmt", "3", &["access", "ai"]),
    ]);

    let resolved = resolve(&["mgmt"], &reg).expect("resolves");
    assert_eq!(resolved.names(), vec!["access", "ai", "mgmt"]);
    assert!(resolved.was_requested("mgmt"));
    assert!(!resolved.was_requested("access"));

    let entries = resolved.entries();
    assert_eq!(entries[0].tier, "1");
    assert!(entries[2].requested);
}

#[test]
fn two_module_cycle_names_both_members() {
    let reg = registry(vec![module("a", "2", &["b"]), module("b", "2", &["a"])]);
    match resolve(&["a"], &reg) {
        Err(CoraError::CyclicDependency { members }) => {
            assert_eq!(members, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn modules_hanging_off_a_cycle_are_not_named() {
    let reg = registry(vec![
        module("core", "1", &[]),
        module("x", "3", &["y", "core"]),
        module("y", "3", &["x"]),
        module("top", "4", &["x"]),
    ]);
    match resolve(&["top"], &reg) {
        Err(CoraError::CyclicDependency { members }) => {
            assert_eq!(members, vec!["x".to_string(), "y".to_string()]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn missing_dependency_reports_who_needs_it() {
    let reg = registry(vec![module("ai", "2", &["access"])]);
    let err = resolve(&["ai"], &reg).expect_err("access is absent");
    match &err {
        CoraError::ModuleNotFound { name, required_by } => {
            assert_eq!(name, "access");
            assert_eq!(required_by.as_deref(), Some("ai"));
        }
        other => panic!("unexpected: {other}"),
    }
    let hint = err.remediation().expect("hint");
    assert!(hint.contains("add 'access' to the registry"));
}

#[test]
fn upward_tier_dependency_is_rejected() {
    let reg = registry(vec![
        module("reports", "functional", &[]),
        module("billing", "2", &["reports"]),
    ]);
    match resolve(&["billing"], &reg) {
        Err(CoraError::TierViolation {
            module, dependency, ..
        }) => {
            assert_eq!(module, "billing");
            assert_eq!(dependency, "reports");
        }
        other => panic!("expected tier violation, got {other:?}"),
    }

    let same_tier = registry(vec![module("p", "2", &[]), module("q", "2", &["p"])]);
    assert!(matches!(
        resolve(&["q"], &same_tier),
        Err(CoraError::TierViolation { .. })
    ));
}

#[test]
fn functional_modules_may_depend_on_each_other() {
    let reg = registry(vec![
        module("access", "1", &[]),
        module("reports", "functional", &["access"]),
        module("dashboards", "functional", &["reports"]),
    ]);
    let resolved = resolve(&["dashboards"], &reg).expect("resolves");
    assert_eq!(resolved.names(), vec!["access", "reports", "dashboards"]);
}

/// Small deterministic generator so the property checks need no extra crates.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

fn layered_catalog(seed: u64, tiers: u32, per_tier: u32) -> Vec<ModuleDescriptor> {
    let mut rng = Lcg(seed);
    let mut out = Vec::new();
    for tier in 1..=tiers {
        for i in 0..per_tier {
            let name = format!("m{}-{}", tier, i);
            let mut deps = Vec::new();
            if tier > 1 {
                for _ in 0..(rng.next() % 4) {
                    let dep_tier = 1 + (rng.next() % (tier as u64 - 1)) as u32;
                    let dep = format!("m{}-{}", dep_tier, rng.next() % per_tier as u64);
                    if !deps.contains(&dep) {
                        deps.push(dep);
                    }
                }
            }
            let dep_refs: Vec<&str> = deps.iter().map(String::as_str).collect();
            out.push(module(&name, &tier.to_string(), &dep_refs));
        }
    }
    out
}

#[test]
fn every_dependency_precedes_its_dependent() {
    for seed in 1..20 {
        let reg = registry(layered_catalog(seed, 5, 6));
        let requested: Vec<String> = (0..6).map(|i| format!("m5-{}", i)).collect();
        let resolved = resolve(&requested, &reg).expect("acyclic catalog resolves");

        let position: BTreeMap<&str, usize> = resolved
            .names()
            .into_iter()
            .enumerate()
            .map(|(i, n)| (n, i))
            .collect();
        for m in resolved.modules() {
            for dep in &m.dependencies {
                assert!(
                    position[dep.as_str()] < position[m.name.as_str()],
                    "seed {seed}: {dep} must precede {}",
                    m.name
                );
            }
        }
    }
}

#[test]
fn resolution_is_deterministic() {
    let reg = registry(layered_catalog(7, 4, 8));
    let requested = ["m4-3", "m4-1", "m3-7"];
    let first = resolve(&requested, &reg).expect("resolves");
    for _ in 0..10 {
        let again = resolve(&requested, &reg).expect("resolves");
        assert_eq!(first.names(), again.names());
        assert_eq!(first.fingerprint(), again.fingerprint());
    }

    // Request order does not matter either.
    let reversed = ["m3-7", "m4-1", "m4-3"];
    assert_eq!(
        resolve(&reversed, &reg).expect("resolves").names(),
        first.names()
    );
}

#[test]
fn fingerprint_tracks_versions() {
    let a = registry(vec![module("access", "1", &[])]);
    let mut bumped = module("access", "1", &[]);
    bumped.version = "1.0.1".to_string();
    let b = registry(vec![bumped]);
    assert_ne!(
        resolve(&["access"], &a).expect("a").fingerprint(),
        resolve(&["access"], &b).expect("b").fingerprint()
    );
}
