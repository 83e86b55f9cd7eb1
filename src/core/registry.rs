//! Module catalog loading.
//!
//! A catalog is a directory with one subdirectory per module, each holding a
//! `module.toml` (or `module.json`) descriptor. The registry is built once and
//! handed around by reference; nothing mutates it after `load_all`.

use crate::core::error::CoraError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Descriptor file names, in lookup order.
pub const DESCRIPTOR_FILES: &[&str] = &["module.toml", "module.json"];

pub const HTTP_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "HEAD", "ANY",
];

/// Architectural layer of a module. `Functional` ranks above every numbered
/// tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Numbered(u32),
    Functional,
}

impl Tier {
    pub fn parse(raw: &RawTier) -> Result<Tier, String> {
        match raw {
            RawTier::Number(n) if *n >= 1 && *n <= u32::MAX as i64 => Ok(Tier::Numbered(*n as u32)),
            RawTier::Number(n) => Err(format!("tier must be >= 1, got {}", n)),
            RawTier::Name(s) => {
                let s = s.trim().to_ascii_lowercase();
                if s == "functional" {
                    return Ok(Tier::Functional);
                }
                let digits = s.strip_prefix("tier").unwrap_or(s.as_str()).trim_start_matches(['-', '_']);
                match digits.parse::<u32>() {
                    Ok(n) if n >= 1 => Ok(Tier::Numbered(n)),
                    _ => Err(format!("invalid tier '{}'", s)),
                }
            }
        }
    }

    /// Whether a module at `self` may depend on a module at `dependency`.
    pub fn may_depend_on(self, dependency: Tier) -> bool {
        match (self, dependency) {
            (Tier::Functional, _) => true,
            (Tier::Numbered(_), Tier::Functional) => false,
            (Tier::Numbered(a), Tier::Numbered(b)) => a > b,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Numbered(n) => write!(f, "{}", n),
            Tier::Functional => write!(f, "functional"),
        }
    }
}

impl Serialize for Tier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Tier::Numbered(n) => serializer.serialize_u32(*n),
            Tier::Functional => serializer.serialize_str("functional"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTier {
    Number(i64),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecl {
    pub method: String,
    pub path: String,
    /// Handler reference relative to the module's backend directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

/// Per-module configuration fragment merged at scaffold time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFragment {
    #[serde(default)]
    pub values: serde_json::Map<String, serde_json::Value>,
    /// Dotted keys later modules may not change.
    #[serde(default)]
    pub locked: BTreeSet<String>,
    /// Dotted list keys this module overwrites instead of appending to.
    #[serde(default)]
    pub replace: BTreeSet<String>,
}

impl ConfigFragment {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.locked.is_empty() && self.replace.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawProvides {
    #[serde(default)]
    tables: Vec<String>,
    #[serde(default)]
    routes: Vec<RouteDecl>,
    #[serde(default)]
    frontend: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDescriptor {
    name: Option<String>,
    tier: Option<RawTier>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    provides: RawProvides,
    #[serde(default)]
    config: ConfigFragment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub tier: Tier,
    pub version: String,
    pub description: String,
    pub dependencies: BTreeSet<String>,
    pub provided_tables: BTreeSet<String>,
    pub provided_routes: Vec<RouteDecl>,
    pub provided_frontend_exports: BTreeSet<String>,
    #[serde(skip_serializing_if = "ConfigFragment::is_empty")]
    pub config: ConfigFragment,
    /// Descriptor file this module was loaded from.
    pub source: PathBuf,
}

fn valid_module_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Parse one descriptor. `path` only feeds error messages and the
/// descriptor's `source`.
pub fn parse_descriptor(path: &Path, content: &str) -> Result<ModuleDescriptor, CoraError> {
    let bad = |reason: String| CoraError::CatalogParse {
        path: path.to_path_buf(),
        reason,
    };

    let raw: RawDescriptor = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(content).map_err(|e| bad(e.to_string()))?
    } else {
        toml::from_str(content).map_err(|e| bad(e.to_string()))?
    };

    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .ok_or_else(|| bad("missing required field 'name'".to_string()))?;
    if !valid_module_name(&name) {
        return Err(bad(format!(
            "invalid module name '{}' (lowercase letters, digits, '-' and '_' only)",
            name
        )));
    }

    let raw_tier = raw
        .tier
        .ok_or_else(|| bad("missing required field 'tier'".to_string()))?;
    let tier = Tier::parse(&raw_tier).map_err(bad)?;

    let mut dependencies = BTreeSet::new();
    for dep in raw.dependencies {
        let dep = dep.trim().to_string();
        if dep.is_empty() {
            return Err(bad("empty dependency name".to_string()));
        }
        if dep == name {
            return Err(bad(format!("module '{}' depends on itself", name)));
        }
        dependencies.insert(dep);
    }

    if tier == Tier::Numbered(1) && !dependencies.is_empty() {
        return Err(bad(format!(
            "tier-1 module '{}' must not declare dependencies (found: {})",
            name,
            dependencies.iter().cloned().collect::<Vec<_>>().join(", ")
        )));
    }

    let mut provided_routes = Vec::with_capacity(raw.provides.routes.len());
    for mut route in raw.provides.routes {
        route.method = route.method.trim().to_ascii_uppercase();
        if !HTTP_METHODS.contains(&route.method.as_str()) {
            return Err(bad(format!("unknown HTTP method '{}'", route.method)));
        }
        if !route.path.starts_with('/') {
            return Err(bad(format!("route path '{}' must start with '/'", route.path)));
        }
        provided_routes.push(route);
    }

    Ok(ModuleDescriptor {
        name,
        tier,
        version: raw.version.unwrap_or_else(|| "0.0.0".to_string()),
        description: raw.description,
        dependencies,
        provided_tables: raw.provides.tables.into_iter().collect(),
        provided_routes,
        provided_frontend_exports: raw.provides.frontend.into_iter().collect(),
        config: raw.config,
        source: path.to_path_buf(),
    })
}

/// Locate the descriptor file inside a module directory.
pub fn find_descriptor(module_dir: &Path) -> Option<PathBuf> {
    DESCRIPTOR_FILES
        .iter()
        .map(|f| module_dir.join(f))
        .find(|p| p.is_file())
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    modules: BTreeMap<String, ModuleDescriptor>,
}

impl Registry {
    /// Load every descriptor under `catalog`. Directories without a
    /// descriptor are skipped; a malformed descriptor aborts the load.
    pub fn load_all(catalog: &Path) -> Result<Self, CoraError> {
        if !catalog.is_dir() {
            return Err(CoraError::CatalogParse {
                path: catalog.to_path_buf(),
                reason: "catalog directory does not exist".to_string(),
            });
        }

        let mut dirs = Vec::new();
        for entry in fs::read_dir(catalog)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();

        let mut descriptors = Vec::new();
        for dir in dirs {
            let Some(descriptor_path) = find_descriptor(&dir) else {
                debug!(dir = %dir.display(), "no module descriptor, skipping");
                continue;
            };
            let content = fs::read_to_string(&descriptor_path)?;
            descriptors.push(parse_descriptor(&descriptor_path, &content)?);
        }

        let registry = Self::from_descriptors(descriptors)?;
        debug!(
            catalog = %catalog.display(),
            modules = registry.len(),
            "module catalog loaded"
        );
        Ok(registry)
    }

    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ModuleDescriptor>,
    ) -> Result<Self, CoraError> {
        let mut modules: BTreeMap<String, ModuleDescriptor> = BTreeMap::new();
        for descriptor in descriptors {
            if let Some(previous) = modules.get(&descriptor.name) {
                return Err(CoraError::CatalogParse {
                    path: descriptor.source.clone(),
                    reason: format!(
                        "duplicate module name '{}' (also declared in {})",
                        descriptor.name,
                        previous.source.display()
                    ),
                });
            }
            modules.insert(descriptor.name.clone(), descriptor);
        }
        Ok(Self { modules })
    }

    pub fn get(&self, name: &str) -> Result<&ModuleDescriptor, CoraError> {
        self.modules
            .get(name)
            .ok_or_else(|| CoraError::ModuleNotFound {
                name: name.to_string(),
                required_by: None,
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Descriptors in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn config_fragments(&self) -> BTreeMap<String, ConfigFragment> {
        self.modules
            .values()
            .map(|m| (m.name.clone(), m.config.clone()))
            .collect()
    }
}
