//! Schema validator: table/column references in source vs. the real schema.
//!
//! Extraction is purely static. Introspection never runs application
//! queries and never writes.

use crate::core::error::CoraError;
use crate::core::report::{Location, ValidationFinding, ValidationReport};
use crate::core::walk;
use crate::validators::introspect::{self, ConnectionConfig, SchemaProvenance, SchemaSnapshot};
use crate::validators::syntax::{
    self, ChainCall, chained_calls, keyword_arg, line_of, matching_close, object_keys,
    split_args, string_literal,
};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};

pub const NAME: &str = "schema";

const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "py"];

/// Receivers whose `.from()` is not a query builder.
const NON_QUERY_RECEIVERS: &[&str] = &[
    "Array",
    "Buffer",
    "console",
    "storage",
    "Object",
    "Uint8Array",
    "Set",
    "Map",
    "Promise",
    "Observable",
    "Readable",
    "Stream",
    "itertools",
];

const FILTER_METHODS: &[&str] = &[
    "eq", "neq", "gt", "gte", "lt", "lte", "like", "ilike", "is_", "is", "in_", "in", "contains",
    "containedBy", "order", "not_", "textSearch", "filter",
];

const HELPERS: &[&str] = &[
    "find_one",
    "find_many",
    "insert_one",
    "update_one",
    "delete_one",
    "upsert_one",
];

static BUILDER_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z_$][\w$]*)?\s*\.\s*(from_|from|table)\s*\(").unwrap()
});

static HELPER_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(find_one|find_many|insert_one|update_one|delete_one|upsert_one)\s*\(").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum TableRef {
    Static(String),
    /// The expression that computes the table name.
    Dynamic(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOperation {
    Select,
    Insert,
    Update,
    Delete,
    Upsert,
}

impl fmt::Display for QueryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Upsert => "upsert",
        };
        write!(f, "{}", s)
    }
}

impl QueryOperation {
    fn from_method(method: &str) -> Option<Self> {
        match method {
            "select" => Some(Self::Select),
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "upsert" => Some(Self::Upsert),
            _ => None,
        }
    }

    fn from_helper(helper: &str) -> Self {
        match helper {
            "insert_one" => Self::Insert,
            "update_one" => Self::Update,
            "delete_one" => Self::Delete,
            "upsert_one" => Self::Upsert,
            _ => Self::Select,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryReference {
    pub file: PathBuf,
    pub line: usize,
    pub table: TableRef,
    pub columns: BTreeSet<String>,
    pub operation: QueryOperation,
}

/// Column names a PostgREST select string touches on the base table.
/// Embedded resources (`rel(...)`) belong to other tables and are skipped.
pub fn parse_select_columns(select: &str) -> BTreeSet<String> {
    let mut columns = BTreeSet::new();
    for item in split_args(select) {
        if item.contains('(') || item.starts_with("...") {
            continue;
        }
        let item = item.split("::").next().unwrap_or(item);
        let item = item.split("->").next().unwrap_or(item);
        let item = item.split_once(':').map_or(item, |(_, column)| column);
        let name = item.trim().trim_matches('"');
        if name.is_empty() || name == "*" || !syntax::is_identifier(name) {
            continue;
        }
        columns.insert(name.to_string());
    }
    columns
}

/// Strip JSON path operators from a filter column (`data->>kind` -> `data`).
fn filter_column(arg: &str) -> Option<String> {
    let col = string_literal(arg)?;
    let col = col.split("->").next().unwrap_or(&col).trim().to_string();
    syntax::is_identifier(&col).then_some(col)
}

fn apply_chain(calls: &[ChainCall<'_>], columns: &mut BTreeSet<String>) -> QueryOperation {
    let mut operation = None;
    for call in calls {
        let args = split_args(call.args);
        if let Some(op) = QueryOperation::from_method(call.method) {
            if operation.is_none() || op != QueryOperation::Select {
                operation = Some(op);
            }
            match op {
                QueryOperation::Select => {
                    if let Some(sel) = args.first().and_then(|a| string_literal(a)) {
                        columns.extend(parse_select_columns(&sel));
                    }
                }
                QueryOperation::Insert | QueryOperation::Update | QueryOperation::Upsert => {
                    if let Some(payload) = args.first() {
                        columns.extend(object_keys(payload));
                    }
                }
                QueryOperation::Delete => {}
            }
        } else if FILTER_METHODS.contains(&call.method) {
            if let Some(col) = args.first().and_then(|a| filter_column(a)) {
                columns.insert(col);
            }
        } else if call.method == "match" {
            if let Some(obj) = args.first() {
                columns.extend(object_keys(obj));
            }
        }
    }
    operation.unwrap_or(QueryOperation::Select)
}

fn table_ref(arg: &str) -> TableRef {
    match string_literal(arg) {
        Some(name) => TableRef::Static(name),
        None => TableRef::Dynamic(arg.trim().to_string()),
    }
}

/// References in one file's content. `file` is recorded verbatim.
pub fn extract_from_source(file: &Path, content: &str) -> Vec<QueryReference> {
    let mut refs = Vec::new();

    for caps in BUILDER_CALL.captures_iter(content) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if let Some(receiver) = caps.get(1) {
            if NON_QUERY_RECEIVERS.contains(&receiver.as_str()) {
                continue;
            }
        }
        let open = whole.end() - 1;
        let Some(close) = matching_close(content, open) else {
            continue;
        };
        let args = split_args(&content[open + 1..close]);
        let Some(first) = args.first() else {
            continue;
        };
        let calls = chained_calls(content, close + 1);
        // `x.from('a')` or `x.table(rows)` with nothing chained is too weak
        // to call a query.
        if calls.is_empty() && caps.get(2).is_some_and(|m| matches!(m.as_str(), "from" | "table")) {
            continue;
        }
        let mut columns = BTreeSet::new();
        let operation = apply_chain(&calls, &mut columns);
        refs.push(QueryReference {
            file: file.to_path_buf(),
            line: line_of(content, whole.start() + whole.as_str().find('.').unwrap_or(0)),
            table: table_ref(first),
            columns,
            operation,
        });
    }

    for caps in HELPER_CALL.captures_iter(content) {
        let (Some(whole), Some(helper)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let open = whole.end() - 1;
        let Some(close) = matching_close(content, open) else {
            continue;
        };
        let mut table = None;
        let mut columns = BTreeSet::new();
        for (idx, arg) in split_args(&content[open + 1..close]).into_iter().enumerate() {
            match keyword_arg(arg) {
                Some(("table" | "table_name", value)) => table = Some(table_ref(value)),
                Some(("select" | "columns", value)) => {
                    if let Some(sel) = string_literal(value) {
                        columns.extend(parse_select_columns(&sel));
                    }
                }
                Some(("filters" | "where" | "data" | "values" | "record", value)) => {
                    columns.extend(object_keys(value));
                }
                Some(_) => {}
                None if idx == 0 => table = Some(table_ref(arg)),
                None => {}
            }
        }
        let Some(table) = table else {
            continue;
        };
        refs.push(QueryReference {
            file: file.to_path_buf(),
            line: line_of(content, whole.start()),
            table,
            columns,
            operation: QueryOperation::from_helper(helper.as_str()),
        });
    }

    refs.sort_by_key(|r| r.line);
    refs
}

/// Walk `root` for source files and extract every query reference.
pub fn extract_queries(root: &Path) -> Result<Vec<QueryReference>, CoraError> {
    let mut refs = Vec::new();
    for path in walk::collect_with_extensions(root, SOURCE_EXTENSIONS)? {
        if walk::has_component(root, &path, &["tests", "__tests__", "test"]) {
            continue;
        }
        let Some(content) = walk::read_text(&path) else {
            continue;
        };
        refs.extend(extract_from_source(&walk::relative(root, &path), &content));
    }
    debug!(references = refs.len(), "query references extracted");
    Ok(refs)
}

/// Tables worth sampling: every statically named table.
pub fn referenced_tables(queries: &[QueryReference]) -> BTreeSet<String> {
    queries
        .iter()
        .filter_map(|q| match &q.table {
            TableRef::Static(name) => Some(name.clone()),
            TableRef::Dynamic(_) => None,
        })
        .collect()
}

pub fn diff(queries: &[QueryReference], snapshot: &SchemaSnapshot) -> ValidationReport {
    let mut report = ValidationReport::new(NAME);
    report.set_source(snapshot.provenance.to_string());
    let sampled = snapshot.provenance == SchemaProvenance::Sampled;

    if sampled {
        report.push(
            ValidationFinding::info(
                "sampled-introspection",
                Location::file("."),
                "schema was sampled from live rows; columns that are null in every sampled row are invisible",
            )
            .with_fix("configure a direct database URL for catalog-level introspection"),
        );
    }

    for query in queries {
        report.record_check();
        let location = Location::line(&query.file, query.line);
        let table_name = match &query.table {
            TableRef::Dynamic(expr) => {
                report.push(ValidationFinding::warning(
                    "dynamic-table-name",
                    location,
                    format!(
                        "{} on a computed table name `{}` cannot be checked statically",
                        query.operation, expr
                    ),
                ));
                continue;
            }
            TableRef::Static(name) => name,
        };

        let Some(table) = snapshot.table(table_name) else {
            report.push(
                ValidationFinding::error(
                    "missing-table",
                    location,
                    format!("table '{}' does not exist in the {} schema", table_name, snapshot.provenance),
                )
                .with_fix(format!("create '{}' in a migration or fix the table name", table_name)),
            );
            continue;
        };

        let missing: Vec<&String> = query
            .columns
            .iter()
            .filter(|c| !table.columns.contains(c.as_str()))
            .collect();
        if missing.is_empty() {
            continue;
        }

        if sampled && table.sampled_rows == Some(0) {
            report.push(ValidationFinding::warning(
                "unverifiable-columns",
                location,
                format!(
                    "table '{}' returned no rows; cannot verify column(s) {}",
                    table_name,
                    join_quoted(&missing)
                ),
            ));
            continue;
        }

        for column in missing {
            let mut message = format!("column '{}.{}' does not exist", table_name, column);
            if sampled {
                message.push_str(" in sampled rows (it may exist with only null values)");
            }
            report.push(
                ValidationFinding::error("missing-column", location.clone(), message)
                    .with_fix(format!("add '{}' to '{}' or fix the column name", column, table_name)),
            );
        }
    }
    report.finalize()
}

fn join_quoted(items: &[&String]) -> String {
    items
        .iter()
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Extract, introspect, diff. Introspection failures propagate so the
/// caller can degrade the validator.
pub fn validate(root: &Path, config: &ConnectionConfig) -> Result<ValidationReport, CoraError> {
    let queries = extract_queries(root)?;
    let snapshot = introspect::introspect_schema(config, &referenced_tables(&queries))?;
    let report = diff(&queries, &snapshot);
    info!(
        queries = queries.len(),
        tables = snapshot.tables.len(),
        provenance = %snapshot.provenance,
        errors = report.error_count(),
        "schema diff finished"
    );
    Ok(report)
}
