//! PostgreSQL executor.
//!
//! Runs on a `deadpool-postgres` pool. Parameters are bound through
//! [`PgParam`], which encodes a [`Value`] as whatever type the server
//! inferred for the placeholder, so one statement shape works for every
//! column type.

use super::{Dialect, SqlExecutor, Statement};
use crate::config::SqlConfig;
use crate::models::Record;
use crate::models::value::{Value, format_datetime, parse_datetime};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts};
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{NoTls, Row};

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// Default maximum connections in the pool.
const DEFAULT_POOL_MAX_SIZE: usize = 10;

fn pool_error(e: impl std::fmt::Display) -> Error {
    Error::OperationFailed {
        operation: "postgres_get_client".to_string(),
        cause: e.to_string(),
    }
}

fn is_text(ty: &Type) -> bool {
    [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME, Type::UNKNOWN].contains(ty)
}

fn is_int(ty: &Type) -> bool {
    [Type::INT2, Type::INT4, Type::INT8].contains(ty)
}

fn mismatch(kind: &str, ty: &Type) -> BoxError {
    format!("cannot encode {kind} as {ty}").into()
}

fn encode_int(i: i64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    if *ty == Type::INT2 {
        i16::try_from(i)?.to_sql(ty, out)
    } else if *ty == Type::INT4 {
        i32::try_from(i)?.to_sql(ty, out)
    } else if *ty == Type::INT8 {
        i.to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (i as f32).to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        (i as f64).to_sql(ty, out)
    } else if *ty == Type::BOOL {
        (i != 0).to_sql(ty, out)
    } else if is_text(ty) {
        i.to_string().to_sql(ty, out)
    } else {
        Err(mismatch("integer", ty))
    }
}

fn encode_float(f: f64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    if *ty == Type::FLOAT8 {
        f.to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (f as f32).to_sql(ty, out)
    } else if is_int(ty) && f.fract() == 0.0 {
        encode_int(f as i64, ty, out)
    } else if is_text(ty) {
        f.to_string().to_sql(ty, out)
    } else {
        Err(mismatch("float", ty))
    }
}

fn encode_date(d: &DateTime<Utc>, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    if *ty == Type::TIMESTAMP {
        d.naive_utc().to_sql(ty, out)
    } else if *ty == Type::TIMESTAMPTZ {
        d.to_sql(ty, out)
    } else if *ty == Type::DATE {
        d.date_naive().to_sql(ty, out)
    } else if is_text(ty) {
        format_datetime(d).to_sql(ty, out)
    } else {
        Err(mismatch("timestamp", ty))
    }
}

fn encode_text(s: &str, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    if is_text(ty) {
        s.to_sql(ty, out)
    } else if is_int(ty) {
        encode_int(s.trim().parse()?, ty, out)
    } else if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 {
        encode_float(s.trim().parse()?, ty, out)
    } else if *ty == Type::BOOL {
        s.trim().parse::<bool>()?.to_sql(ty, out)
    } else if [Type::TIMESTAMP, Type::TIMESTAMPTZ, Type::DATE].contains(ty) {
        let parsed = parse_datetime(s).ok_or_else(|| mismatch("text", ty))?;
        encode_date(&parsed, ty, out)
    } else {
        Err(mismatch("text", ty))
    }
}

/// A [`Value`] bound as a PostgreSQL parameter.
#[derive(Debug)]
struct PgParam<'a>(&'a Value);

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) if *ty == Type::BOOL => b.to_sql(ty, out),
            Value::Bool(b) if is_text(ty) => b.to_string().to_sql(ty, out),
            Value::Bool(b) => encode_int(i64::from(*b), ty, out),
            Value::Int(i) => encode_int(*i, ty, out),
            Value::Float(f) => encode_float(*f, ty, out),
            Value::String(s) => encode_text(s, ty, out),
            Value::Date(d) => encode_date(d, ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn decode(row: &Row, i: usize) -> Result<Value> {
    let ty = row.columns()[i].type_();
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(i).map(Value::from)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(i)
            .map(|v| v.map(i64::from).into())
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(i)
            .map(|v| v.map(i64::from).into())
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(i).map(Value::from)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(i)
            .map(|v| v.map(f64::from).into())
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(i).map(Value::from)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(i)
            .map(|v| v.map(|d| d.and_utc()).into())
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(i).map(Value::from)
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(i).map(|v| {
            v.and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc())
                .into()
        })
    } else if is_text(ty) {
        row.try_get::<_, Option<String>>(i).map(Value::from)
    } else {
        tracing::debug!(
            column = row.columns()[i].name(),
            column_type = %ty,
            "Unsupported PostgreSQL column type, reading as null"
        );
        return Ok(Value::Null);
    };
    value.map_err(|e| Error::operation("postgres_decode", e))
}

fn row_to_record(row: &Row) -> Result<Record> {
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        record.insert(column.name(), decode(row, i)?);
    }
    Ok(record)
}

/// Builds the TLS connector trusting the public web PKI roots.
#[cfg(feature = "postgres-tls")]
fn tls_pool(cfg: &Config) -> Result<Pool> {
    use std::sync::Arc;

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::operation("postgres_tls_config", e))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    cfg.create_pool(
        Some(Runtime::Tokio1),
        tokio_postgres_rustls::MakeRustlsConnect::new(tls),
    )
    .map_err(|e| Error::operation("postgres_create_pool", e))
}

#[cfg(not(feature = "postgres-tls"))]
fn tls_pool(_cfg: &Config) -> Result<Pool> {
    Err(Error::FeatureNotEnabled("postgres-tls".to_string()))
}

/// Executor over a PostgreSQL connection pool.
pub struct PostgresExecutor {
    pool: Pool,
}

impl PostgresExecutor {
    /// Creates the pool. Connections are opened lazily on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be built, or TLS is requested
    /// without the `postgres-tls` feature.
    pub fn connect(config: &SqlConfig) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.database.clone());
        cfg.user.clone_from(&config.user);
        cfg.password = config
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string());
        cfg.pool = Some(PoolConfig {
            max_size: DEFAULT_POOL_MAX_SIZE,
            timeouts: Timeouts {
                wait: Some(Duration::from_secs(5)),
                create: Some(Duration::from_secs(5)),
                recycle: Some(Duration::from_secs(5)),
            },
            ..Default::default()
        });
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = if config.ssl {
            tls_pool(&cfg)?
        } else {
            cfg.create_pool(Some(Runtime::Tokio1), NoTls)
                .map_err(|e| Error::operation("postgres_create_pool", e))?
        };
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            ssl = config.ssl,
            "Created PostgreSQL pool"
        );
        Ok(Self { pool })
    }
}

#[async_trait]
impl SqlExecutor for PostgresExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query(&self, stmt: &Statement) -> Result<Vec<Record>> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let params: Vec<PgParam<'_>> = stmt.params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = client
            .query(stmt.sql.as_str(), &refs)
            .await
            .map_err(|e| Error::operation("postgres_query", e))?;
        rows.iter().map(row_to_record).collect()
    }

    async fn execute(&self, stmt: &Statement) -> Result<u64> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let params: Vec<PgParam<'_>> = stmt.params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        client
            .execute(stmt.sql.as_str(), &refs)
            .await
            .map_err(|e| Error::operation("postgres_execute", e))
    }

    async fn insert(&self, stmt: &Statement) -> Result<i64> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let params: Vec<PgParam<'_>> = stmt.params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let row = client
            .query_one(stmt.sql.as_str(), &refs)
            .await
            .map_err(|e| Error::operation("postgres_insert", e))?;
        decode(&row, 0)?
            .as_i64()
            .ok_or_else(|| Error::operation("postgres_insert", "insert returned no key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encode(value: &Value, ty: &Type) -> std::result::Result<Vec<u8>, BoxError> {
        let mut out = BytesMut::new();
        PgParam(value).to_sql(ty, &mut out)?;
        Ok(out.to_vec())
    }

    #[test]
    fn test_int_follows_column_width() {
        assert_eq!(encode(&Value::Int(7), &Type::INT4).unwrap(), 7_i32.to_be_bytes());
        assert_eq!(encode(&Value::Int(7), &Type::INT8).unwrap(), 7_i64.to_be_bytes());
        assert!(encode(&Value::Int(i64::MAX), &Type::INT2).is_err());
    }

    #[test]
    fn test_string_parsed_for_typed_columns() {
        assert_eq!(
            encode(&Value::from("42"), &Type::INT4).unwrap(),
            42_i32.to_be_bytes()
        );
        assert_eq!(encode(&Value::from("abc"), &Type::TEXT).unwrap(), b"abc");
        assert!(encode(&Value::from("abc"), &Type::INT4).is_err());
        assert!(encode(&Value::from("2024-01-01T00:00:00Z"), &Type::TIMESTAMP).is_ok());
    }

    #[test]
    fn test_bool_and_date_encoding() {
        assert_eq!(encode(&Value::Bool(true), &Type::BOOL).unwrap(), [1]);
        assert_eq!(encode(&Value::Bool(true), &Type::INT4).unwrap(), 1_i32.to_be_bytes());

        let when = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(encode(&Value::Date(when), &Type::TIMESTAMPTZ).is_ok());
        assert_eq!(
            encode(&Value::Date(when), &Type::TEXT).unwrap(),
            b"2024-01-01T00:00:00.000Z"
        );
        assert!(encode(&Value::Date(when), &Type::INT4).is_err());
    }

    #[test]
    fn test_null_is_null() {
        let mut out = BytesMut::new();
        assert!(matches!(
            PgParam(&Value::Null).to_sql(&Type::INT4, &mut out).unwrap(),
            IsNull::Yes
        ));
    }
}
