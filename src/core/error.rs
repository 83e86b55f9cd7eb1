use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoraError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Malformed module descriptor {}: {reason}", .path.display())]
    CatalogParse { path: PathBuf, reason: String },
    #[error("Module '{name}' not found in registry{}", required_by_suffix(.required_by))]
    ModuleNotFound {
        name: String,
        required_by: Option<String>,
    },
    #[error("Cyclic dependency between modules: {}", .members.join(", "))]
    CyclicDependency { members: Vec<String> },
    #[error(
        "Module '{module}' (tier {module_tier}) may not depend on '{dependency}' (tier {dependency_tier})"
    )]
    TierViolation {
        module: String,
        module_tier: String,
        dependency: String,
        dependency_tier: String,
    },
    #[error("Config key '{key}' is locked by '{locked_by}' and cannot be overridden by '{writer}'")]
    ConfigConflict {
        key: String,
        locked_by: String,
        writer: String,
    },
    #[error("Validator '{validator}' unavailable: {reason}")]
    ValidatorUnavailable { validator: String, reason: String },
    #[error("{operation} timed out after {}s", .timeout.as_secs())]
    IntrospectionTimeout {
        operation: String,
        timeout: Duration,
    },
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

fn required_by_suffix(required_by: &Option<String>) -> String {
    match required_by {
        Some(parent) => format!(" (required by '{}')", parent),
        None => String::new(),
    }
}

impl CoraError {
    pub fn unavailable(validator: &str, reason: impl Into<String>) -> Self {
        CoraError::ValidatorUnavailable {
            validator: validator.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable tag printed by the CLI and used in JSON envelopes.
    pub fn category(&self) -> &'static str {
        match self {
            CoraError::IoError(_) => "IO",
            CoraError::RusqliteError(_) => "SQLITE",
            CoraError::JsonError(_) => "JSON",
            CoraError::HttpError(_) => "HTTP",
            CoraError::CatalogParse { .. } => "CATALOG_PARSE",
            CoraError::ModuleNotFound { .. } => "MODULE_NOT_FOUND",
            CoraError::CyclicDependency { .. } => "CYCLIC_DEPENDENCY",
            CoraError::TierViolation { .. } => "TIER_VIOLATION",
            CoraError::ConfigConflict { .. } => "CONFIG_CONFLICT",
            CoraError::ValidatorUnavailable { .. } => "VALIDATOR_UNAVAILABLE",
            CoraError::IntrospectionTimeout { .. } => "INTROSPECTION_TIMEOUT",
            CoraError::ConfigError(_) => "CONFIG",
            CoraError::ValidationError(_) => "VALIDATION",
        }
    }

    /// Validation-time failures that downgrade a single validator instead of
    /// aborting the run.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            CoraError::ValidatorUnavailable { .. } | CoraError::IntrospectionTimeout { .. }
        )
    }

    pub fn remediation(&self) -> Option<String> {
        match self {
            CoraError::CatalogParse { path, .. } => Some(format!(
                "fix the descriptor at {} (required: name, tier; tier-1 modules declare no dependencies)",
                path.display()
            )),
            CoraError::ModuleNotFound {
                name,
                required_by: Some(parent),
            } => Some(format!(
                "module '{}' depends on undeclared module '{}': add '{}' to the registry or remove the dependency",
                parent, name, name
            )),
            CoraError::ModuleNotFound {
                name,
                required_by: None,
            } => Some(format!(
                "check the spelling of '{}' or run `cora modules` to list the catalog",
                name
            )),
            CoraError::CyclicDependency { members } => Some(format!(
                "break the cycle by removing one dependency edge among: {}",
                members.join(", ")
            )),
            CoraError::TierViolation { module, .. } => Some(format!(
                "raise the tier of '{}' or drop the dependency on the higher-tier module",
                module
            )),
            CoraError::ConfigConflict { key, writer, .. } => Some(format!(
                "remove '{}' from the config of '{}' or unlock it in the owning module",
                key, writer
            )),
            CoraError::ValidatorUnavailable { validator, .. } => Some(format!(
                "provide the connection settings '{}' needs (see cora.toml) or deselect it with --validators",
                validator
            )),
            CoraError::IntrospectionTimeout { .. } => {
                Some("raise the timeout in cora.toml or check network reachability".to_string())
            }
            _ => None,
        }
    }
}
