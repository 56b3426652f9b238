//! SQLite runner for query units
//!
//! Connections are opened once from `[databases.<name>]` and shared behind
//! `Arc<Mutex<Connection>>`; a call locks its connection on a blocking
//! thread. Statement parameters are bound by name (`:limit`, `@limit`,
//! `$limit`) from the resolved arguments.

use crate::error::{Result, RunnerError};
use crate::shape::shape_rows;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags, ToSql};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tessera_config::DatabaseSection;
use tessera_core::{Descriptor, RunRequest, Runner, RunnerFailure, SourceKind, TypeExpr};
use tracing::{debug, info};

/// Connection used when a unit names none
pub const DEFAULT_CONNECTION: &str = "default";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default, Clone)]
pub struct SqliteRunner {
    connections: HashMap<String, Arc<Mutex<Connection>>>,
}

impl SqliteRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open every configured database, resolving relative paths against `root`
    pub fn open(databases: &BTreeMap<String, DatabaseSection>, root: &Path) -> Result<Self> {
        let mut runner = Self::new();
        for (name, section) in databases {
            let conn = open_connection(name, section, root)?;
            runner.connections.insert(name.clone(), Arc::new(Mutex::new(conn)));
        }
        Ok(runner)
    }

    pub fn with_connection(mut self, name: impl Into<String>, conn: Connection) -> Self {
        self.connections.insert(name.into(), Arc::new(Mutex::new(conn)));
        self
    }

    pub fn connection_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn connection_for(&self, descriptor: &Descriptor) -> std::result::Result<Arc<Mutex<Connection>>, RunnerFailure> {
        let name = descriptor
            .handler
            .connection
            .as_deref()
            .unwrap_or(DEFAULT_CONNECTION);
        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| RunnerFailure::UnknownConnection(name.to_string()))
    }
}

fn open_connection(name: &str, section: &DatabaseSection, root: &Path) -> Result<Connection> {
    let path = section.resolve(root);
    let open_error = |source| RunnerError::Open {
        name: name.to_string(),
        path: path.clone(),
        source,
    };

    let conn = if section.is_memory() {
        Connection::open_in_memory().map_err(open_error)?
    } else if section.read_only {
        Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI)
            .map_err(open_error)?
    } else {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| RunnerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Connection::open(&path).map_err(open_error)?
    };
    conn.busy_timeout(BUSY_TIMEOUT).map_err(open_error)?;
    info!(connection = name, path = %path.display(), read_only = section.read_only, "Opened database");
    Ok(conn)
}

#[async_trait]
impl Runner for SqliteRunner {
    fn source_kind(&self) -> SourceKind {
        SourceKind::Query
    }

    async fn run(&self, request: RunRequest) -> std::result::Result<JsonValue, RunnerFailure> {
        let conn = self.connection_for(&request.descriptor)?;
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            execute(&conn, &request.descriptor, &request.arguments)
        })
        .await
        .map_err(|e| RunnerFailure::Execution(format!("query task failed: {}", e)))?
    }

    fn check(&self, descriptor: &Descriptor) -> std::result::Result<(), String> {
        self.connection_for(descriptor).map(|_| ()).map_err(|e| e.to_string())
    }
}

fn execute(
    conn: &Connection,
    descriptor: &Descriptor,
    arguments: &Map<String, JsonValue>,
) -> std::result::Result<JsonValue, RunnerFailure> {
    let failed = |e: rusqlite::Error| RunnerFailure::Execution(e.to_string());
    let mut stmt = conn.prepare(&descriptor.body).map_err(failed)?;

    let mut bound: Vec<(String, SqlValue)> = Vec::with_capacity(stmt.parameter_count());
    for index in 1..=stmt.parameter_count() {
        let Some(name) = stmt.parameter_name(index) else {
            return Err(RunnerFailure::Execution(format!(
                "parameter {} is positional; use :name placeholders",
                index
            )));
        };
        let key = name.trim_start_matches(&[':', '@', '$'][..]);
        bound.push((name.to_string(), to_sql(arguments.get(key))));
    }
    let params: Vec<(&str, &dyn ToSql)> = bound
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect();

    debug!(unit = %descriptor.name, params = params.len(), "Executing query");
    if descriptor.signature.return_shape == TypeExpr::Void {
        let affected = stmt.execute(params.as_slice()).map_err(failed)?;
        return Ok(json!(affected));
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params.as_slice()).map_err(failed)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(failed)? {
        let mut object = Map::new();
        for (i, column) in columns.iter().enumerate() {
            object.insert(column.clone(), from_sql(row.get_ref(i).map_err(failed)?));
        }
        out.push(object);
    }
    shape_rows(out, &descriptor.signature.return_shape)
}

fn to_sql(value: Option<&JsonValue>) -> SqlValue {
    match value {
        None | Some(JsonValue::Null) => SqlValue::Null,
        Some(JsonValue::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(JsonValue::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Some(JsonValue::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => json!(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::unit;
    use tempfile::TempDir;

    fn seeded() -> SqliteRunner {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, active INTEGER);
             INSERT INTO users (name, active) VALUES ('ada', 1), ('grace', 1), ('linus', 0);",
        )
        .unwrap();
        SqliteRunner::new().with_connection(DEFAULT_CONNECTION, conn)
    }

    fn request(body: &str, args: &[(&str, TypeExpr)], ret: &str, input: JsonValue) -> RunRequest {
        RunRequest {
            descriptor: unit(SourceKind::Query, "q", body, args, TypeExpr::parse(ret).unwrap()),
            arguments: serde_json::from_value(input).unwrap(),
            budget: None,
            nested: None,
        }
    }

    #[tokio::test]
    async fn test_rows_come_back_as_objects() {
        let out = seeded()
            .run(request(
                "SELECT id, name FROM users WHERE active = :active ORDER BY id LIMIT :limit",
                &[("active", TypeExpr::Bool), ("limit", TypeExpr::Int)],
                "dict[]",
                json!({"active": true, "limit": 5}),
            ))
            .await
            .unwrap();
        assert_eq!(out, json!([{"id": 1, "name": "ada"}, {"id": 2, "name": "grace"}]));
    }

    #[tokio::test]
    async fn test_void_returns_affected_rows() {
        let runner = seeded();
        let out = runner
            .run(request(
                "UPDATE users SET active = 0 WHERE active = 1",
                &[],
                "void",
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(out, json!(2));

        let count = runner
            .run(request("SELECT count(*) AS n FROM users WHERE active = 0", &[], "int", json!({})))
            .await
            .unwrap();
        assert_eq!(count, json!(3));
    }

    #[tokio::test]
    async fn test_unknown_connection_fails_check_and_run() {
        let runner = seeded();
        let mut descriptor = (*unit(SourceKind::Query, "q", "SELECT 1", &[], TypeExpr::Any)).clone();
        descriptor.handler.connection = Some("reporting".into());
        assert!(runner.check(&descriptor).unwrap_err().contains("reporting"));

        let err = runner
            .run(RunRequest {
                descriptor: Arc::new(descriptor),
                arguments: Map::new(),
                budget: None,
                nested: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerFailure::UnknownConnection(ref n) if n == "reporting"));
    }

    #[tokio::test]
    async fn test_bad_sql_is_an_execution_failure() {
        let err = seeded()
            .run(request("SELEC nope", &[], "any", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerFailure::Execution(_)));
    }

    #[test]
    fn test_open_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let mut databases = BTreeMap::new();
        databases.insert(
            "default".to_string(),
            DatabaseSection {
                path: "data/app.db".into(),
                read_only: false,
            },
        );
        databases.insert(
            "scratch".to_string(),
            DatabaseSection {
                path: tessera_config::MEMORY.into(),
                read_only: false,
            },
        );
        let runner = SqliteRunner::open(&databases, dir.path()).unwrap();
        assert_eq!(runner.connection_names(), vec!["default", "scratch"]);
        assert!(dir.path().join("data").is_dir());
    }
}
