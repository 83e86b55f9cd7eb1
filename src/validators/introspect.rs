//! Schema introspection for the schema validator.
//!
//! Strategies, in preference order:
//! - `direct`: system catalogs over a database connection (`sqlite:` via
//!   rusqlite, `postgres://` via `psql`). Sees columns of empty tables.
//! - `sampled`: rows fetched from a PostgREST-style endpoint. Only columns
//!   holding a non-null value in some sampled row are visible.
//! - `declared`: `CREATE TABLE` / `ALTER TABLE ... ADD COLUMN` statements
//!   read from the project's SQL files. Opt-in only.
//!
//! Every snapshot carries its provenance so reports can discount
//! sampled-only results.

use crate::core::config::{SchemaSettings, SchemaSourceMode};
use crate::core::error::CoraError;
use crate::core::exec;
use crate::core::walk;
use regex::Regex;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::schema::NAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaProvenance {
    Direct,
    Sampled,
    Declared,
}

impl fmt::Display for SchemaProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Sampled => write!(f, "sampled"),
            Self::Declared => write!(f, "declared"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub columns: BTreeSet<String>,
    /// Rows seen when sampling; `None` for catalog-backed snapshots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampled_rows: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaSnapshot {
    pub provenance: SchemaProvenance,
    pub tables: BTreeMap<String, TableSchema>,
}

impl SchemaSnapshot {
    pub fn new(provenance: SchemaProvenance) -> Self {
        Self {
            provenance,
            tables: BTreeMap::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn with_table<I, S>(mut self, name: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.insert(
            name.to_string(),
            TableSchema {
                columns: columns.into_iter().map(Into::into).collect(),
                sampled_rows: None,
            },
        );
        self
    }
}

/// Everything introspection needs, resolved from settings and environment.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub database_url: Option<String>,
    pub rest_url: Option<String>,
    pub rest_key: Option<String>,
    pub sample_rows: usize,
    pub timeout: Duration,
    pub db_schema: String,
    pub mode: SchemaSourceMode,
    /// Searched for SQL files in declared mode.
    pub project_root: PathBuf,
}

impl ConnectionConfig {
    pub fn from_settings(
        settings: &SchemaSettings,
        project_root: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        Self {
            database_url: settings.database_url.clone().filter(|s| !s.trim().is_empty()),
            rest_url: settings.rest_url.clone().filter(|s| !s.trim().is_empty()),
            rest_key: lookup(&settings.rest_key_env).filter(|s| !s.trim().is_empty()),
            sample_rows: settings.sample_rows.max(1),
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
            db_schema: settings.db_schema.clone(),
            mode: settings.source,
            project_root: project_root.to_path_buf(),
        }
    }
}

/// Build a snapshot. `tables_hint` names the tables worth sampling; catalog
/// strategies ignore it.
pub fn introspect_schema(
    config: &ConnectionConfig,
    tables_hint: &BTreeSet<String>,
) -> Result<SchemaSnapshot, CoraError> {
    if config.mode == SchemaSourceMode::Declared {
        return declared_snapshot(&config.project_root);
    }

    if let Some(url) = &config.database_url {
        match direct_snapshot(url, config) {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) if e.is_degradable() && config.rest_url.is_some() => {
                warn!(error = %e, "direct introspection failed, falling back to sampling");
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(rest) = &config.rest_url {
        return sampled_snapshot(rest, config, tables_hint);
    }

    Err(CoraError::unavailable(
        NAME,
        "no database connection or REST endpoint configured (set CORA_DATABASE_URL or CORA_REST_URL)",
    ))
}

fn direct_snapshot(url: &str, config: &ConnectionConfig) -> Result<SchemaSnapshot, CoraError> {
    if let Some(path) = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
    {
        let path = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            config.project_root.join(path)
        };
        return sqlite_snapshot(&path, config.timeout);
    }
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        return postgres_snapshot(url, config);
    }
    Err(CoraError::unavailable(
        NAME,
        format!("unsupported database URL scheme in '{}'", redact_url(url)),
    ))
}

/// Read-only catalog walk over a SQLite file.
pub fn sqlite_snapshot(path: &Path, timeout: Duration) -> Result<SchemaSnapshot, CoraError> {
    if !path.is_file() {
        return Err(CoraError::unavailable(
            NAME,
            format!("database file {} does not exist", path.display()),
        ));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(timeout)?;

    let mut names = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables: Vec<String> = names
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    let mut snapshot = SchemaSnapshot::new(SchemaProvenance::Direct);
    for table in tables {
        let mut info = conn.prepare(&format!(
            "PRAGMA table_info(\"{}\")",
            table.replace('"', "\"\"")
        ))?;
        let columns: BTreeSet<String> = info
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;
        snapshot.tables.insert(
            table,
            TableSchema {
                columns,
                sampled_rows: None,
            },
        );
    }
    debug!(tables = snapshot.tables.len(), path = %path.display(), "sqlite catalog read");
    Ok(snapshot)
}

fn postgres_snapshot(url: &str, config: &ConnectionConfig) -> Result<SchemaSnapshot, CoraError> {
    if !config
        .db_schema
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(CoraError::ConfigError(format!(
            "invalid schema name '{}'",
            config.db_schema
        )));
    }
    let query = format!(
        "SELECT table_name, column_name FROM information_schema.columns \
         WHERE table_schema = '{}' ORDER BY table_name, ordinal_position",
        config.db_schema
    );
    let mut cmd = Command::new("psql");
    cmd.arg(url)
        .args(["-X", "-A", "-t", "-F", "\t", "-v", "ON_ERROR_STOP=1", "-c"])
        .arg(&query);

    let output = exec::run_with_timeout(cmd, config.timeout, NAME, "schema introspection")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CoraError::unavailable(
            NAME,
            format!(
                "psql failed against {}: {}",
                redact_url(url),
                stderr.lines().next().unwrap_or("unknown error")
            ),
        ));
    }

    let snapshot = parse_catalog_rows(&String::from_utf8_lossy(&output.stdout));
    info!(tables = snapshot.tables.len(), "postgres catalog read");
    Ok(snapshot)
}

/// `table<TAB>column` rows as printed by `psql -A -t -F '\t'`.
pub fn parse_catalog_rows(stdout: &str) -> SchemaSnapshot {
    let mut snapshot = SchemaSnapshot::new(SchemaProvenance::Direct);
    for line in stdout.lines() {
        let Some((table, column)) = line.split_once('\t') else {
            continue;
        };
        snapshot
            .tables
            .entry(table.trim().to_string())
            .or_default()
            .columns
            .insert(column.trim().to_string());
    }
    snapshot
}

fn sampled_snapshot(
    rest: &str,
    config: &ConnectionConfig,
    tables: &BTreeSet<String>,
) -> Result<SchemaSnapshot, CoraError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(config.timeout)
        .build()?;
    let base = rest.trim_end_matches('/');
    let mut snapshot = SchemaSnapshot::new(SchemaProvenance::Sampled);

    for table in tables {
        let url = format!("{}/{}?select=*&limit={}", base, table, config.sample_rows);
        let mut request = client.get(&url);
        if let Some(key) = &config.rest_key {
            request = request
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().map_err(|e| http_failure(e, config.timeout))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(%table, "table absent from REST endpoint");
            continue;
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CoraError::unavailable(
                NAME,
                format!("REST endpoint rejected credentials ({})", status),
            ));
        }
        if !status.is_success() {
            return Err(CoraError::unavailable(
                NAME,
                format!("REST endpoint returned {} for table '{}'", status, table),
            ));
        }

        let rows: Vec<serde_json::Map<String, serde_json::Value>> =
            response.json().map_err(|e| http_failure(e, config.timeout))?;
        snapshot
            .tables
            .insert(table.clone(), columns_from_rows(&rows));
    }
    info!(tables = snapshot.tables.len(), "sampled schema built");
    Ok(snapshot)
}

fn http_failure(e: reqwest::Error, timeout: Duration) -> CoraError {
    if e.is_timeout() {
        CoraError::IntrospectionTimeout {
            operation: "schema sampling".to_string(),
            timeout,
        }
    } else if e.is_connect() {
        CoraError::unavailable(NAME, format!("REST endpoint unreachable: {}", e))
    } else {
        CoraError::HttpError(e)
    }
}

/// Columns visible in sampled rows: a key counts only with a non-null value.
pub fn columns_from_rows(rows: &[serde_json::Map<String, serde_json::Value>]) -> TableSchema {
    let columns = rows
        .iter()
        .flat_map(|row| row.iter())
        .filter(|(_, v)| !v.is_null())
        .map(|(k, _)| k.clone())
        .collect();
    TableSchema {
        columns,
        sampled_rows: Some(rows.len()),
    }
}

fn declared_snapshot(root: &Path) -> Result<SchemaSnapshot, CoraError> {
    let mut snapshot = SchemaSnapshot::new(SchemaProvenance::Declared);
    for file in walk::collect_with_extensions(root, &["sql"])? {
        let Some(sql) = walk::read_text(&file) else {
            continue;
        };
        for (table, columns) in parse_declared_schema(&sql) {
            snapshot
                .tables
                .entry(table)
                .or_default()
                .columns
                .extend(columns);
        }
    }
    info!(tables = snapshot.tables.len(), "declared schema read");
    Ok(snapshot)
}

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bcreate\s+(?:unlogged\s+|temp(?:orary)?\s+)?table\s+(?:if\s+not\s+exists\s+)?([A-Za-z0-9_."]+)\s*\("#)
        .unwrap()
});

static ALTER_ADD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\balter\s+table\s+(?:if\s+exists\s+)?(?:only\s+)?([A-Za-z0-9_."]+)\s+add\s+(?:column\s+)?(?:if\s+not\s+exists\s+)?"?([A-Za-z0-9_]+)"?"#)
        .unwrap()
});

const NON_COLUMN_ITEMS: &[&str] = &[
    "constraint",
    "primary",
    "foreign",
    "unique",
    "check",
    "exclude",
    "like",
];

fn unquote_ident(raw: &str) -> String {
    let last = raw.rsplit('.').next().unwrap_or(raw);
    last.trim_matches('"').to_ascii_lowercase()
}

fn strip_line_comments(sql: &str) -> String {
    sql.lines()
        .map(|l| match l.find("--") {
            Some(i) => &l[..i],
            None => l,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Body between the parenthesis at `open` and its balanced close.
fn balanced_body(s: &str, open: usize) -> Option<&str> {
    let mut depth = 0usize;
    for (i, c) in s[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[open + 1..open + i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(body: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&body[start..]);
    items
}

/// Tables and columns declared by DDL in `sql`. Names are lowercased and
/// schema-qualified names keep only the table part.
pub fn parse_declared_schema(sql: &str) -> BTreeMap<String, BTreeSet<String>> {
    let sql = strip_line_comments(sql);
    let mut tables: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for caps in CREATE_TABLE.captures_iter(&sql) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let table = unquote_ident(name.as_str());
        let columns = tables.entry(table).or_default();
        let open = whole.end() - 1;
        let Some(body) = balanced_body(&sql, open) else {
            continue;
        };
        for item in split_top_level(body) {
            let Some(first) = item.split_whitespace().next() else {
                continue;
            };
            let ident = first.trim_matches('"').to_ascii_lowercase();
            if ident.is_empty() || NON_COLUMN_ITEMS.contains(&ident.as_str()) {
                continue;
            }
            columns.insert(ident);
        }
    }

    for caps in ALTER_ADD.captures_iter(&sql) {
        let (Some(name), Some(column)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let column = column.as_str().to_ascii_lowercase();
        if NON_COLUMN_ITEMS.contains(&column.as_str()) {
            continue;
        }
        tables
            .entry(unquote_ident(name.as_str()))
            .or_default()
            .insert(column);
    }
    tables
}

/// Hide credentials in connection strings before they reach logs or reports.
pub fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => format!("{}://***@{}", &url[..scheme], &url[at + 1..]),
        _ => url.to_string(),
    }
}
