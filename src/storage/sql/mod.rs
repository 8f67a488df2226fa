//! Relational backends.
//!
//! [`SqlBuilder`] compiles filters to SQL, a [`SqlExecutor`] runs the
//! statements on one database, and [`RelationalAdapter`] turns the rows
//! into normalized records. One executor (one pool) is shared by the
//! adapters of every table.

mod builder;
#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgres")]
mod postgresql;
pub mod schema;
mod sqlite;

pub use builder::{Dialect, GROUP_ALIAS_PREFIX, ID_COLUMN, LIKE_ESCAPE, SqlBuilder, Statement, native_id};
#[cfg(feature = "mysql")]
pub use mysql::MySqlExecutor;
#[cfg(feature = "postgres")]
pub use postgresql::PostgresExecutor;
pub use schema::ensure_schema;
pub use sqlite::SqliteExecutor;

use super::normalize::{restore_case, with_object_id};
use super::observe;
use super::traits::StorageAdapter;
use crate::models::{
    CountResult, Filter, GroupedCount, OBJECT_ID, QueryOptions, Record, UpdateData, Value,
};
use crate::{Error, Result, current_datetime};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Runs rendered statements against one database.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// SQL flavour the database speaks.
    fn dialect(&self) -> Dialect;

    /// Runs a query; column names are returned as the database reports them.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    async fn query(&self, stmt: &Statement) -> Result<Vec<Record>>;

    /// Runs a statement and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    async fn execute(&self, stmt: &Statement) -> Result<u64>;

    /// Runs an `INSERT` and returns the generated key.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    async fn insert(&self, stmt: &Statement) -> Result<i64>;
}

/// [`StorageAdapter`] over any [`SqlExecutor`].
pub struct RelationalAdapter<X: SqlExecutor + ?Sized> {
    executor: Arc<X>,
    backend: &'static str,
    table: String,
    builder: SqlBuilder,
}

impl<X: SqlExecutor + ?Sized> RelationalAdapter<X> {
    /// Creates an adapter for `table`, stored as `{prefix}{table}`.
    #[must_use]
    pub fn new(executor: Arc<X>, backend: &'static str, table: &str, prefix: &str) -> Self {
        let builder = SqlBuilder::new(executor.dialect(), format!("{prefix}{table}"));
        Self {
            executor,
            backend,
            table: table.to_string(),
            builder,
        }
    }

    fn normalize(&self, row: Record) -> Record {
        let row = if self.builder.dialect() == Dialect::Postgres {
            restore_case(row)
        } else {
            row
        };
        with_object_id(row, ID_COLUMN)
    }

    async fn observe<T>(
        &self,
        operation: &'static str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        observe(self.backend, &self.table, operation, work).await
    }

    async fn select_rows(&self, filter: &Filter, options: &QueryOptions) -> Result<Vec<Record>> {
        let stmt = self.builder.select(filter, options);
        let rows = self.executor.query(&stmt).await?;
        Ok(rows.into_iter().map(|row| self.normalize(row)).collect())
    }
}

fn count_of(row: &Record) -> Result<u64> {
    row.get("count")
        .and_then(Value::as_i64)
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| Error::operation("count", "count column missing from result"))
}

#[async_trait]
impl<X: SqlExecutor + ?Sized> StorageAdapter for RelationalAdapter<X> {
    fn backend_name(&self) -> &'static str {
        self.backend
    }

    fn table(&self) -> &str {
        &self.table
    }

    async fn select(&self, filter: &Filter, options: &QueryOptions) -> Result<Vec<Record>> {
        self.observe("select", self.select_rows(filter, options)).await
    }

    async fn count(&self, filter: &Filter, options: &QueryOptions) -> Result<CountResult> {
        self.observe("count", async {
            let stmt = self.builder.count(filter, options);
            let rows = self.executor.query(&stmt).await?;
            let Some(group) = options.group_fields() else {
                return match rows.first() {
                    Some(row) => Ok(CountResult::Total(count_of(row)?)),
                    None => Ok(CountResult::Total(0)),
                };
            };
            let mut grouped = Vec::with_capacity(rows.len());
            for mut row in rows {
                let count = count_of(&row)?;
                let fields = group
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let value = row
                            .remove(&format!("{GROUP_ALIAS_PREFIX}{i}"))
                            .unwrap_or_default();
                        (name.clone(), value)
                    })
                    .collect();
                grouped.push(GroupedCount { fields, count });
            }
            Ok(CountResult::Grouped(grouped))
        })
        .await
    }

    async fn add(&self, record: Record) -> Result<Record> {
        self.observe("add", async {
            let mut row = record;
            if let Some(id) = row.remove(OBJECT_ID) {
                let id = native_id(&id).ok_or_else(|| {
                    Error::InvalidInput(format!("objectId '{id}' is not a numeric key"))
                })?;
                row.insert(ID_COLUMN, id);
            }
            let now = current_datetime();
            for field in ["createdAt", "updatedAt"] {
                if row.get(field).is_none_or(Value::is_null) {
                    row.insert(field, now);
                }
            }

            let id = self.executor.insert(&self.builder.insert(&row)).await?;
            row.remove(ID_COLUMN);
            row.insert(OBJECT_ID, id.to_string());
            Ok(row)
        })
        .await
    }

    async fn update(&self, data: &UpdateData, filter: &Filter) -> Result<Vec<Record>> {
        self.observe("update", async {
            let matched = self.select_rows(filter, &QueryOptions::default()).await?;
            let mut updated = Vec::with_capacity(matched.len());
            for current in matched {
                let changes = data.resolve(&current);
                let id = current.get(OBJECT_ID).and_then(native_id);
                if let Some(stmt) = id.and_then(|id| self.builder.update_by_id(&changes, id)) {
                    self.executor.execute(&stmt).await?;
                }
                let mut record = current;
                record.merge(changes);
                updated.push(record);
            }
            Ok(updated)
        })
        .await
    }

    async fn delete(&self, filter: &Filter) -> Result<()> {
        self.observe("delete", async {
            let removed = self.executor.execute(&self.builder.delete(filter)).await?;
            tracing::debug!(backend = self.backend, table = %self.table, removed, "Deleted rows");
            Ok(())
        })
        .await
    }

    async fn set_sequence(&self, next_id: u64) -> Result<()> {
        self.observe("set_sequence", async {
            let changed = self.executor.execute(&self.builder.set_sequence(next_id)).await?;
            // sqlite_sequence only has a row once the table has seen an insert.
            if changed == 0 && self.builder.dialect() == Dialect::Sqlite {
                let seq = i64::try_from(next_id.saturating_sub(1)).unwrap_or(i64::MAX);
                let stmt = Statement {
                    sql: "INSERT INTO sqlite_sequence (name, seq) VALUES (?, ?)".to_string(),
                    params: vec![Value::from(self.builder.table()), Value::Int(seq)],
                };
                self.executor.execute(&stmt).await?;
            }
            tracing::info!(backend = self.backend, table = %self.table, next_id, "Sequence reset");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn adapter(table: &str) -> RelationalAdapter<SqliteExecutor> {
        let executor = Arc::new(SqliteExecutor::in_memory().unwrap());
        ensure_schema(executor.as_ref(), "wl_").await.unwrap();
        RelationalAdapter::new(executor, "sqlite", table, "wl_")
    }

    #[tokio::test]
    async fn test_add_assigns_string_id_and_timestamps() {
        let comments = adapter("Comment").await;
        let added = comments
            .add(Record::new().with("nick", "a").with("url", "/p"))
            .await
            .unwrap();
        assert_eq!(added.object_id(), Some("1"));
        assert!(added.get("createdAt").and_then(Value::as_datetime).is_some());

        let rows = comments
            .select(&Filter::by_id("1"), &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("nick"), Some(&Value::from("a")));
        assert!(rows[0].get("insertedAt").and_then(Value::as_datetime).is_some());
        assert!(!rows[0].contains_key("id"));
    }

    #[tokio::test]
    async fn test_add_rejects_non_numeric_object_id() {
        let comments = adapter("Comment").await;
        let err = comments
            .add(Record::new().with("objectId", "abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_set_sequence_on_empty_table() {
        let users = adapter("Users").await;
        users.set_sequence(50).await.unwrap();
        let added = users.add(Record::new().with("email", "a@b.c")).await.unwrap();
        assert_eq!(added.object_id(), Some("50"));

        users.set_sequence(80).await.unwrap();
        let added = users.add(Record::new().with("email", "d@e.f")).await.unwrap();
        assert_eq!(added.object_id(), Some("80"));
    }

    #[tokio::test]
    async fn test_grouped_count_maps_aliases_back() {
        let comments = adapter("Comment").await;
        for url in ["/a", "/a", "/b"] {
            comments.add(Record::new().with("url", url)).await.unwrap();
        }
        let CountResult::Grouped(groups) = comments
            .count(&Filter::new(), &QueryOptions::new().group(["url"]))
            .await
            .unwrap()
        else {
            panic!("expected grouped count");
        };
        let a = groups
            .iter()
            .find(|g| g.fields.get("url") == Some(&Value::from("/a")))
            .unwrap();
        assert_eq!(a.count, 2);
        assert_eq!(groups.len(), 2);
    }
}
