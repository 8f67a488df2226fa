//! MySQL and `TiDB` executor.
//!
//! Built on an `sqlx` pool. Columns are decoded by the type name the server
//! reports; anything without a native mapping is read as text.

use super::{Dialect, SqlExecutor, Statement};
use crate::config::SqlConfig;
use crate::models::{Record, Value};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use secrecy::ExposeSecret;
use sqlx::mysql::{
    MySql, MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow,
    MySqlSslMode,
};
use sqlx::query::Query;
use sqlx::{Column, Row, TypeInfo};
use std::time::Duration;

/// Default maximum connections in the pool.
const DEFAULT_POOL_MAX_SIZE: u32 = 10;

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::String(s) => query.bind(s.clone()),
        Value::Date(d) => query.bind(d.naive_utc()),
    }
}

fn prepare(stmt: &Statement) -> Query<'_, MySql, MySqlArguments> {
    stmt.params
        .iter()
        .fold(sqlx::query(&stmt.sql), bind_value)
}

fn decode(row: &MySqlRow, i: usize) -> std::result::Result<Value, sqlx::Error> {
    let type_name = row.columns()[i].type_info().name();
    match type_name {
        "BOOLEAN" => row.try_get::<Option<bool>, _>(i).map(Value::from),
        "FLOAT" => row
            .try_get::<Option<f32>, _>(i)
            .map(|v| v.map(f64::from).into()),
        "DOUBLE" => row.try_get::<Option<f64>, _>(i).map(Value::from),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(i)
            .map(|v| v.map(|d| d.and_utc()).into()),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(i).map(|v| {
            v.and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc())
                .into()
        }),
        name if name.contains("INT") && name.ends_with("UNSIGNED") => row
            .try_get::<Option<u64>, _>(i)
            .map(|v| v.and_then(|n| i64::try_from(n).ok()).into()),
        name if name.contains("INT") => row.try_get::<Option<i64>, _>(i).map(Value::from),
        "NULL" => Ok(Value::Null),
        _ => match row.try_get::<Option<String>, _>(i) {
            Ok(text) => Ok(text.into()),
            Err(_) => row
                .try_get_unchecked::<Option<Vec<u8>>, _>(i)
                .map(|v| v.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()).into()),
        },
    }
}

fn row_to_record(row: &MySqlRow) -> Result<Record> {
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = decode(row, i).map_err(|e| Error::OperationFailed {
            operation: "mysql_decode".to_string(),
            cause: format!("column {}: {e}", column.name()),
        })?;
        record.insert(column.name(), value);
    }
    Ok(record)
}

/// Executor over a MySQL-protocol connection pool.
pub struct MySqlExecutor {
    pool: MySqlPool,
}

impl MySqlExecutor {
    /// Creates the pool. Connections are opened lazily on first use.
    ///
    /// `verify_server` requires a certificate matching the host (`TiDB`
    /// Cloud); otherwise `config.ssl` requires TLS without verifying the
    /// certificate and the default is opportunistic TLS.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be built.
    pub fn connect(config: &SqlConfig, verify_server: bool) -> Result<Self> {
        let ssl_mode = if verify_server {
            MySqlSslMode::VerifyIdentity
        } else if config.ssl {
            MySqlSslMode::Required
        } else {
            MySqlSslMode::Preferred
        };
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .charset(&config.charset)
            .ssl_mode(ssl_mode);
        if let Some(user) = &config.user {
            options = options.username(user);
        }
        if let Some(password) = &config.password {
            options = options.password(password.expose_secret());
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(DEFAULT_POOL_MAX_SIZE)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy_with(options);
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            ssl_mode = ?ssl_mode,
            "Created MySQL pool"
        );
        Ok(Self { pool })
    }
}

#[async_trait]
impl SqlExecutor for MySqlExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn query(&self, stmt: &Statement) -> Result<Vec<Record>> {
        let rows = prepare(stmt)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::operation("mysql_query", e))?;
        rows.iter().map(row_to_record).collect()
    }

    async fn execute(&self, stmt: &Statement) -> Result<u64> {
        prepare(stmt)
            .execute(&self.pool)
            .await
            .map(|done| done.rows_affected())
            .map_err(|e| Error::operation("mysql_execute", e))
    }

    async fn insert(&self, stmt: &Statement) -> Result<i64> {
        let done = prepare(stmt)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::operation("mysql_insert", e))?;
        i64::try_from(done.last_insert_id())
            .map_err(|e| Error::operation("mysql_insert", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_is_lazy() {
        let config = SqlConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            database: "waline".to_string(),
            user: Some("root".to_string()),
            password: None,
            prefix: "wl_".to_string(),
            charset: "utf8mb4".to_string(),
            ssl: false,
        };
        let executor = MySqlExecutor::connect(&config, false).unwrap();
        assert_eq!(executor.dialect(), Dialect::MySql);
    }
}
