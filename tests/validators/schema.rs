use cora::core::config::{SchemaSettings, SchemaSourceMode};
use cora::core::error::CoraError;
use cora::core::report::{Severity, ValidationReport};
use cora::validators::introspect::{
    ConnectionConfig, SchemaProvenance, SchemaSnapshot, TableSchema, sqlite_snapshot,
};
use cora::validators::schema::{self, QueryOperation, QueryReference, TableRef, extract_queries};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::tempdir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, content).expect("write");
}

const ORGS_QUERY: &str = r#"
export async function listOrgs(uid: string) {
  const { data } = await supabase
    .from('orgs')
    .select('id, name, plan')
    .eq('owner_id', uid);
  return data;
}
"#;

const MEMBERS_QUERY: &str = r#"
def load_member(uid):
    return find_one(table='members', filters={'user_id': uid})
"#;

fn sources(root: &Path) {
    write(root, "web/src/orgs.ts", ORGS_QUERY);
    write(root, "backend/lambdas/members/app.py", MEMBERS_QUERY);
}

fn sqlite_db(path: &Path) {
    let conn = Connection::open(path).expect("open db");
    conn.execute_batch(
        "CREATE TABLE orgs (id TEXT PRIMARY KEY, name TEXT NOT NULL, owner_id TEXT);",
    )
    .expect("create table");
}

fn config(root: &Path, settings: SchemaSettings) -> ConnectionConfig {
    ConnectionConfig::from_settings(&settings, root, |_| None)
}

fn errors(report: &ValidationReport) -> Vec<(&str, &str)> {
    report
        .findings()
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .map(|f| (f.category.as_str(), f.message.as_str()))
        .collect()
}

#[test]
fn sqlite_catalog_sees_columns_of_empty_tables() {
    let tmp = tempdir().expect("tempdir");
    let db = tmp.path().join("app.db");
    sqlite_db(&db);

    let snapshot = sqlite_snapshot(&db, Duration::from_secs(5)).expect("snapshot");
    assert_eq!(snapshot.provenance, SchemaProvenance::Direct);
    let orgs = snapshot.table("orgs").expect("orgs table");
    assert_eq!(
        orgs.columns.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["id", "name", "owner_id"]
    );
    assert_eq!(orgs.sampled_rows, None);
}

#[test]
fn direct_introspection_reports_unknown_tables_and_columns() {
    let tmp = tempdir().expect("tempdir");
    sources(tmp.path());
    sqlite_db(&tmp.path().join("app.db"));

    let settings = SchemaSettings {
        database_url: Some("sqlite:app.db".to_string()),
        ..SchemaSettings::default()
    };
    let report = schema::validate(tmp.path(), &config(tmp.path(), settings)).expect("validates");

    assert_eq!(report.source(), Some("direct"));
    let mut found = errors(&report);
    found.sort();
    assert_eq!(found.len(), 2, "{:#?}", report.findings());
    assert_eq!(found[0].0, "missing-column");
    assert!(found[0].1.contains("orgs.plan"));
    assert_eq!(found[1].0, "missing-table");
    assert!(found[1].1.contains("members"));
}

#[test]
fn missing_database_file_is_unavailable() {
    let tmp = tempdir().expect("tempdir");
    sources(tmp.path());
    let settings = SchemaSettings {
        database_url: Some("sqlite:absent.db".to_string()),
        ..SchemaSettings::default()
    };
    let err = schema::validate(tmp.path(), &config(tmp.path(), settings)).expect_err("no db");
    assert!(err.is_degradable());
}

#[test]
fn nothing_configured_means_unavailable() {
    let tmp = tempdir().expect("tempdir");
    sources(tmp.path());
    let err = schema::validate(tmp.path(), &config(tmp.path(), SchemaSettings::default()))
        .expect_err("no connection");
    match err {
        CoraError::ValidatorUnavailable { reason, .. } => {
            assert!(reason.contains("CORA_DATABASE_URL"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn declared_mode_reads_project_sql() {
    let tmp = tempdir().expect("tempdir");
    sources(tmp.path());
    write(
        tmp.path(),
        "packages/orgs/db/schema/001_orgs.sql",
        "CREATE TABLE IF NOT EXISTS orgs (\n  id uuid PRIMARY KEY,\n  name text NOT NULL,\n  owner_id uuid\n);\n",
    );
    write(
        tmp.path(),
        "packages/orgs/db/schema/002_plan.sql",
        "ALTER TABLE orgs ADD COLUMN plan text;\nCREATE TABLE members (user_id uuid, org_id uuid);\n",
    );

    let settings = SchemaSettings {
        source: SchemaSourceMode::Declared,
        ..SchemaSettings::default()
    };
    let report = schema::validate(tmp.path(), &config(tmp.path(), settings)).expect("validates");
    assert_eq!(report.source(), Some("declared"));
    assert!(report.passed(), "{:#?}", report.findings());
    assert_eq!(report.checks(), 2);
}

fn reference(table: &str, columns: &[&str]) -> QueryReference {
    QueryReference {
        file: PathBuf::from("web/src/q.ts"),
        line: 4,
        table: TableRef::Static(table.to_string()),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        operation: QueryOperation::Select,
    }
}

fn sampled_table(columns: &[&str], rows: usize) -> TableSchema {
    TableSchema {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        sampled_rows: Some(rows),
    }
}

#[test]
fn sampled_snapshots_soften_what_they_cannot_see() {
    let mut snapshot = SchemaSnapshot::new(SchemaProvenance::Sampled);
    snapshot
        .tables
        .insert("events".to_string(), sampled_table(&[], 0));
    snapshot
        .tables
        .insert("orgs".to_string(), sampled_table(&["id", "name"], 5));

    let queries = vec![
        reference("events", &["kind", "payload"]),
        reference("orgs", &["id", "archived_at"]),
    ];
    let report = schema::diff(&queries, &snapshot);

    assert_eq!(report.source(), Some("sampled"));
    let by_category = |category: &str| {
        report
            .findings()
            .iter()
            .filter(|f| f.category == category)
            .collect::<Vec<_>>()
    };
    let info = by_category("sampled-introspection");
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].severity, Severity::Info);

    let unverifiable = by_category("unverifiable-columns");
    assert_eq!(unverifiable.len(), 1);
    assert_eq!(unverifiable[0].severity, Severity::Warning);
    assert!(unverifiable[0].message.contains("'kind', 'payload'"));

    let missing = by_category("missing-column");
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].severity, Severity::Error);
    assert!(missing[0].message.contains("orgs.archived_at"));
    assert!(missing[0].message.contains("null values"));
}

#[test]
fn computed_table_names_are_warnings() {
    let mut query = reference("ignored", &["id"]);
    query.table = TableRef::Dynamic("`${prefix}_events`".to_string());
    let snapshot = SchemaSnapshot::new(SchemaProvenance::Direct).with_table("orgs", ["id"]);

    let report = schema::diff(&[query], &snapshot);
    assert_eq!(report.error_count(), 0);
    assert_eq!(report.warning_count(), 1);
    assert_eq!(report.findings()[0].category, "dynamic-table-name");
}

#[test]
fn extraction_walks_sources_but_skips_tests() {
    let tmp = tempdir().expect("tempdir");
    sources(tmp.path());
    write(tmp.path(), "web/src/__tests__/orgs.test.ts", ORGS_QUERY);

    let refs = extract_queries(tmp.path()).expect("extract");
    let tables: BTreeSet<String> = refs
        .iter()
        .filter_map(|r| match &r.table {
            TableRef::Static(t) => Some(t.clone()),
            TableRef::Dynamic(_) => None,
        })
        .collect();
    assert_eq!(refs.len(), 2);
    assert_eq!(
        tables.into_iter().collect::<Vec<_>>(),
        vec!["members".to_string(), "orgs".to_string()]
    );

    let orgs = refs
        .iter()
        .find(|r| r.table == TableRef::Static("orgs".to_string()))
        .expect("orgs query");
    assert_eq!(orgs.file, Path::new("web/src/orgs.ts"));
    assert_eq!(orgs.line, 4);
    assert!(orgs.columns.contains("owner_id"));
    assert!(orgs.columns.contains("plan"));
}
