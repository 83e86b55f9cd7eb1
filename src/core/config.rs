//! Project-level settings from `<target>/cora.toml` plus environment overrides.
//!
//! A missing file is not an error: every section has defaults.

use crate::core::error::CoraError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE: &str = "cora.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub validate: ValidateSettings,
    pub structure: StructureSettings,
    pub portability: PortabilitySettings,
    pub schema: SchemaSettings,
    pub gateway: GatewaySettings,
    pub api: ApiSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidateSettings {
    pub timeout_secs: u64,
    pub min_level: String,
    pub parallel: bool,
    pub weights: BTreeMap<String, f64>,
}

impl Default for ValidateSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            min_level: "bronze".to_string(),
            parallel: true,
            weights: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StructureSettings {
    pub modules_dir: String,
    pub required_dirs: Vec<String>,
}

impl Default for StructureSettings {
    fn default() -> Self {
        Self {
            modules_dir: "packages".to_string(),
            required_dirs: vec![
                "backend".to_string(),
                "frontend".to_string(),
                "db/schema".to_string(),
                "docs".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PatternSettings {
    pub name: String,
    pub regex: String,
    #[serde(default = "default_pattern_severity")]
    pub severity: String,
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default = "default_true")]
    pub exempt_in_infra: bool,
}

fn default_pattern_severity() -> String {
    "warning".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortabilitySettings {
    pub exempt_extensions: Vec<String>,
    pub exempt_paths: Vec<String>,
    pub project_names: Vec<String>,
    pub patterns: Vec<PatternSettings>,
}

impl Default for PortabilitySettings {
    fn default() -> Self {
        Self {
            exempt_extensions: ["tf", "tfvars", "hcl", "tfstate"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exempt_paths: Vec::new(),
            project_names: Vec::new(),
            patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaSourceMode {
    /// Direct connection, then sampling, else unavailable.
    #[default]
    Auto,
    /// Read `CREATE TABLE` statements from the project's SQL files.
    Declared,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchemaSettings {
    pub database_url: Option<String>,
    pub rest_url: Option<String>,
    /// Environment variable holding the REST credential.
    pub rest_key_env: String,
    pub sample_rows: usize,
    pub timeout_secs: u64,
    pub source: SchemaSourceMode,
    pub db_schema: String,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            rest_url: None,
            rest_key_env: "CORA_REST_KEY".to_string(),
            sample_rows: 50,
            timeout_secs: 30,
            source: SchemaSourceMode::Auto,
            db_schema: "public".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub api_id: Option<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub page_size: u32,
    pub timeout_secs: u64,
    /// Directories scanned for route declarations when the live gateway is
    /// not reachable. Empty means the whole project.
    pub infra_dirs: Vec<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            api_id: None,
            region: None,
            profile: None,
            page_size: 100,
            timeout_secs: 30,
            infra_dirs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiSettings {
    pub frontend_roots: Vec<String>,
    pub backend_roots: Vec<String>,
}

impl ProjectConfig {
    /// Load `<root>/cora.toml` if present, then apply environment overrides.
    pub fn load(root: &Path) -> Result<Self, CoraError> {
        let path = root.join(CONFIG_FILE);
        let mut config = if path.is_file() {
            let content = fs::read_to_string(&path)?;
            toml::from_str::<ProjectConfig>(&content)
                .map_err(|e| CoraError::ConfigError(format!("{}: {}", path.display(), e)))?
        } else {
            ProjectConfig::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        debug!(root = %root.display(), from_file = path.is_file(), "project config loaded");
        Ok(config)
    }

    /// Environment wins over the file. `lookup` is injectable for tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty("CORA_DATABASE_URL") {
            self.schema.database_url = Some(v);
        }
        if let Some(v) = non_empty("CORA_REST_URL") {
            self.schema.rest_url = Some(v);
        }
        if let Some(v) = non_empty("CORA_GATEWAY_API_ID") {
            self.gateway.api_id = Some(v);
        }
        if let Some(v) = non_empty("AWS_REGION") {
            self.gateway.region = Some(v);
        }
        if let Some(v) = non_empty("AWS_PROFILE") {
            self.gateway.profile = Some(v);
        }
        if let Some(secs) = non_empty("CORA_VALIDATE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.validate.timeout_secs = secs;
        }
    }

    pub fn validate_timeout(&self) -> Duration {
        Duration::from_secs(self.validate.timeout_secs.max(1))
    }
}
