//! `SQLite` executor.
//!
//! A single `rusqlite` connection behind a mutex; statements run on the
//! blocking thread pool. Timestamps are stored as `YYYY-MM-DD HH:MM:SS`
//! text and read back as dates for columns declared `DATETIME`/`TIMESTAMP`.

use super::{Dialect, SqlExecutor, Statement};
use crate::models::Record;
use crate::models::value::{SQL_DATETIME_FORMAT, Value};
use crate::storage::acquire_lock;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::Connection;
use rusqlite::types::{ToSqlOutput, ValueRef};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Sql::Null),
            Self::Bool(b) => ToSqlOutput::Owned(Sql::Integer(i64::from(*b))),
            Self::Int(i) => ToSqlOutput::Owned(Sql::Integer(*i)),
            Self::Float(f) => ToSqlOutput::Owned(Sql::Real(*f)),
            Self::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Date(d) => ToSqlOutput::Owned(Sql::Text(d.format(SQL_DATETIME_FORMAT).to_string())),
        })
    }
}

fn is_datetime_type(decl: &str) -> bool {
    let decl = decl.to_ascii_uppercase();
    decl.contains("DATE") || decl.contains("TIME")
}

fn read_value(value: ValueRef<'_>, as_date: bool) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            let parsed = as_date
                .then(|| NaiveDateTime::parse_from_str(&text, SQL_DATETIME_FORMAT).ok())
                .flatten();
            parsed.map_or(Value::String(text), |d| Value::Date(d.and_utc()))
        },
    }
}

/// Configures a connection: WAL for files, a busy timeout, and a
/// case-sensitive `LIKE`.
fn configure_connection(conn: &Connection, file_backed: bool) -> Result<()> {
    if file_backed {
        // journal_mode answers with a row, so it cannot go through execute_batch.
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
    }
    conn.busy_timeout(Duration::from_secs(5))
        .and_then(|()| {
            conn.execute_batch("PRAGMA synchronous = NORMAL; PRAGMA case_sensitive_like = ON;")
        })
        .map_err(|e| Error::operation("configure_sqlite", e))
}

/// Executor over one `SQLite` database file.
pub struct SqliteExecutor {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteExecutor {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_sqlite_dir".to_string(),
                cause: format!("{}: {e}", parent.display()),
            })?;
        }
        let conn = Connection::open(path).map_err(|e| Error::OperationFailed {
            operation: "open_sqlite".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        configure_connection(&conn, true)?;
        tracing::info!(path = %path.display(), "Opened SQLite database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be configured.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::operation("open_sqlite", e))?;
        configure_connection(&conn, false)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Database file, `None` for in-memory databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn run<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = acquire_lock(&conn);
            work(&guard)
        })
        .await
        .map_err(|e| Error::operation(operation, e))?
        .map_err(|e| Error::operation(operation, e))
    }
}

#[async_trait]
impl SqlExecutor for SqliteExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query(&self, stmt: &Statement) -> Result<Vec<Record>> {
        let Statement { sql, params } = stmt.clone();
        self.run("sqlite_query", move |conn| {
            let mut prepared = conn.prepare(&sql)?;
            let names: Vec<String> = prepared
                .column_names()
                .into_iter()
                .map(String::from)
                .collect();
            let dates: Vec<bool> = prepared
                .columns()
                .iter()
                .map(|c| c.decl_type().is_some_and(is_datetime_type))
                .collect();

            let mut rows = prepared.query(rusqlite::params_from_iter(params.iter()))?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = Record::new();
                for (i, name) in names.iter().enumerate() {
                    record.insert(name.as_str(), read_value(row.get_ref(i)?, dates[i]));
                }
                records.push(record);
            }
            Ok(records)
        })
        .await
    }

    async fn execute(&self, stmt: &Statement) -> Result<u64> {
        let Statement { sql, params } = stmt.clone();
        self.run("sqlite_execute", move |conn| {
            conn.execute(&sql, rusqlite::params_from_iter(params.iter()))
                .map(|n| n as u64)
        })
        .await
    }

    async fn insert(&self, stmt: &Statement) -> Result<i64> {
        let Statement { sql, params } = stmt.clone();
        self.run("sqlite_insert", move |conn| {
            conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stmt(sql: &str, params: Vec<Value>) -> Statement {
        Statement {
            sql: sql.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_values_round_trip_through_columns() {
        let db = SqliteExecutor::in_memory().unwrap();
        db.execute(&stmt(
            "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, n INTEGER, f REAL, s TEXT, d DATETIME)",
            Vec::new(),
        ))
        .await
        .unwrap();

        let when = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let id = db
            .insert(&stmt(
                "INSERT INTO t (n, f, s, d) VALUES (?, ?, ?, ?)",
                vec![Value::Int(3), Value::Float(1.5), Value::from("x"), Value::Date(when)],
            ))
            .await
            .unwrap();
        assert_eq!(id, 1);

        let rows = db.query(&stmt("SELECT * FROM t", Vec::new())).await.unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Int(3)));
        assert_eq!(rows[0].get("f"), Some(&Value::Float(1.5)));
        assert_eq!(rows[0].get("s"), Some(&Value::from("x")));
        assert_eq!(rows[0].get("d"), Some(&Value::Date(when)));
    }

    #[tokio::test]
    async fn test_like_is_case_sensitive() {
        let db = SqliteExecutor::in_memory().unwrap();
        db.execute(&stmt("CREATE TABLE t (s TEXT)", Vec::new()))
            .await
            .unwrap();
        db.execute(&stmt("INSERT INTO t (s) VALUES ('Hello')", Vec::new()))
            .await
            .unwrap();
        let rows = db
            .query(&stmt("SELECT s FROM t WHERE s LIKE ?", vec![Value::from("hello")]))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.sqlite");
        let db = SqliteExecutor::open(&path).unwrap();
        assert_eq!(db.path(), Some(path.as_path()));
        assert!(path.exists());
    }
}
