//! Dependency resolution over the module registry.
//!
//! Produces a deterministic installation order with Kahn's algorithm. Ready
//! nodes are drained lowest `(tier, name)` first, so identical inputs always
//! yield byte-identical output.

use crate::core::error::CoraError;
use crate::core::registry::{ModuleDescriptor, Registry, Tier};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Modules in installation order. Every module's dependencies precede it.
#[derive(Debug, Clone)]
pub struct ResolvedModuleSet<'r> {
    ordered: Vec<&'r ModuleDescriptor>,
    requested: BTreeSet<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolvedEntry<'a> {
    pub name: &'a str,
    pub tier: String,
    pub version: &'a str,
    pub requested: bool,
}

impl<'r> ResolvedModuleSet<'r> {
    pub fn modules(&self) -> &[&'r ModuleDescriptor] {
        &self.ordered
    }

    pub fn names(&self) -> Vec<&'r str> {
        self.ordered.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ordered.iter().any(|m| m.name == name)
    }

    /// Whether `name` was asked for explicitly rather than pulled in.
    pub fn was_requested(&self, name: &str) -> bool {
        self.requested.contains(name)
    }

    pub fn entries(&self) -> Vec<ResolvedEntry<'r>> {
        self.ordered
            .iter()
            .map(|m| ResolvedEntry {
                name: &m.name,
                tier: m.tier.to_string(),
                version: &m.version,
                requested: self.requested.contains(&m.name),
            })
            .collect()
    }

    /// SHA-256 over `name@version` lines in order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for m in &self.ordered {
            hasher.update(m.name.as_bytes());
            hasher.update(b"@");
            hasher.update(m.version.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Resolve `requested` plus everything it transitively needs.
pub fn resolve<'r, S: AsRef<str>>(
    requested: &[S],
    registry: &'r Registry,
) -> Result<ResolvedModuleSet<'r>, CoraError> {
    let requested: BTreeSet<String> = requested
        .iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let closure = transitive_closure(&requested, registry)?;
    let ordered = kahn_order(&closure)?;
    check_tiers(&ordered, &closure)?;

    info!(
        requested = requested.len(),
        resolved = ordered.len(),
        "dependency resolution complete"
    );
    Ok(ResolvedModuleSet { ordered, requested })
}

fn transitive_closure<'r>(
    requested: &BTreeSet<String>,
    registry: &'r Registry,
) -> Result<BTreeMap<&'r str, &'r ModuleDescriptor>, CoraError> {
    let mut closure: BTreeMap<&'r str, &'r ModuleDescriptor> = BTreeMap::new();
    let mut stack: Vec<(String, Option<String>)> =
        requested.iter().rev().map(|n| (n.clone(), None)).collect();

    while let Some((name, required_by)) = stack.pop() {
        if closure.contains_key(name.as_str()) {
            continue;
        }
        let module = registry.get(&name).map_err(|_| CoraError::ModuleNotFound {
            name: name.clone(),
            required_by: required_by.clone(),
        })?;
        closure.insert(module.name.as_str(), module);
        for dep in module.dependencies.iter().rev() {
            if !closure.contains_key(dep.as_str()) {
                stack.push((dep.clone(), Some(module.name.clone())));
            }
        }
    }

    debug!(modules = closure.len(), "transitive closure computed");
    Ok(closure)
}

fn kahn_order<'r>(
    closure: &BTreeMap<&'r str, &'r ModuleDescriptor>,
) -> Result<Vec<&'r ModuleDescriptor>, CoraError> {
    let mut in_degree: BTreeMap<&'r str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&'r str, Vec<&'r str>> = BTreeMap::new();

    for (&name, module) in closure {
        in_degree.insert(name, module.dependencies.len());
        for dep in &module.dependencies {
            if let Some((&dep_name, _)) = closure.get_key_value(dep.as_str()) {
                dependents.entry(dep_name).or_default().push(name);
            }
        }
    }

    let mut ready: BTreeSet<(Tier, &'r str)> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(&n, _)| (closure[n].tier, n))
        .collect();

    let mut ordered = Vec::with_capacity(closure.len());
    while let Some(next) = ready.pop_first() {
        let (_, name) = next;
        ordered.push(closure[name]);
        if let Some(children) = dependents.get(name) {
            for &child in children {
                if let Some(d) = in_degree.get_mut(child) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert((closure[child].tier, child));
                    }
                }
            }
        }
    }

    if ordered.len() < closure.len() {
        let placed: BTreeSet<&str> = ordered.iter().map(|m| m.name.as_str()).collect();
        let remaining: BTreeSet<&'r str> = closure
            .keys()
            .copied()
            .filter(|n| !placed.contains(n))
            .collect();
        return Err(CoraError::CyclicDependency {
            members: cycle_members(remaining, closure),
        });
    }

    Ok(ordered)
}

/// Strip nodes that only hang off a cycle: repeatedly drop anything no other
/// remaining node depends on.
fn cycle_members<'r>(
    mut remaining: BTreeSet<&'r str>,
    closure: &BTreeMap<&'r str, &'r ModuleDescriptor>,
) -> Vec<String> {
    loop {
        let depended_on: BTreeSet<&str> = remaining
            .iter()
            .flat_map(|n| closure[n].dependencies.iter().map(String::as_str))
            .filter(|d| remaining.contains(d))
            .collect();
        let before = remaining.len();
        remaining.retain(|n| depended_on.contains(n));
        if remaining.len() == before {
            break;
        }
    }
    remaining.into_iter().map(str::to_string).collect()
}

fn check_tiers(
    ordered: &[&ModuleDescriptor],
    closure: &BTreeMap<&str, &ModuleDescriptor>,
) -> Result<(), CoraError> {
    for module in ordered {
        for dep in &module.dependencies {
            let dependency = closure[dep.as_str()];
            if !module.tier.may_depend_on(dependency.tier) {
                return Err(CoraError::TierViolation {
                    module: module.name.clone(),
                    module_tier: module.tier.to_string(),
                    dependency: dependency.name.clone(),
                    dependency_tier: dependency.tier.to_string(),
                });
            }
        }
    }
    Ok(())
}
