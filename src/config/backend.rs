//! Backend selection and connection settings.
//!
//! The backend is chosen from environment-style variables, first match wins:
//!
//! | Backend | Trigger |
//! |---------|---------|
//! | MongoDB | `MONGO_DB` |
//! | PostgreSQL | `PG_DB` or `POSTGRES_DATABASE` |
//! | `SQLite` | `SQLITE_PATH` |
//! | MySQL | `MYSQL_DB` |
//! | `TiDB` | `TIDB_DB` |
//! | GitHub CSV | `GITHUB_TOKEN` + `GITHUB_REPO` + `GITHUB_PATH` |

use crate::{Error, Result};
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default table prefix for relational backends.
pub const DEFAULT_TABLE_PREFIX: &str = "wl_";

/// Default GitHub REST API base.
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

/// Prefix of pass-through MongoDB URI options.
const MONGO_OPTION_PREFIX: &str = "MONGO_OPT_";

/// Backend kind, without connection details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageBackendType {
    /// MongoDB document store.
    MongoDb,
    /// PostgreSQL.
    PostgreSql,
    /// MySQL.
    MySql,
    /// `TiDB` (MySQL protocol, TLS required).
    TiDb,
    /// `SQLite` file.
    Sqlite,
    /// CSV files in a GitHub repository.
    GitHub,
}

impl StorageBackendType {
    /// Short name used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MongoDb => "mongodb",
            Self::PostgreSql => "postgresql",
            Self::MySql => "mysql",
            Self::TiDb => "tidb",
            Self::Sqlite => "sqlite",
            Self::GitHub => "github",
        }
    }

    /// Whether reads are cached unless configured otherwise.
    #[must_use]
    pub const fn caches_by_default(self) -> bool {
        matches!(self, Self::MongoDb | Self::GitHub)
    }
}

impl std::fmt::Display for StorageBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MongoDB connection settings.
#[derive(Debug)]
pub struct MongoConfig {
    /// One host, or one per replica set member.
    pub hosts: Vec<String>,
    /// One port for all hosts, or one per host.
    pub ports: Vec<u16>,
    /// Database name.
    pub database: String,
    /// Username.
    pub user: Option<String>,
    /// Password.
    pub password: Option<SecretString>,
    /// Replica set name.
    pub replica_set: Option<String>,
    /// Authentication database.
    pub auth_source: Option<String>,
    /// Extra URI options (`MONGO_OPT_MAX_POOL_SIZE=5` becomes `maxPoolSize=5`).
    pub options: BTreeMap<String, String>,
}

impl MongoConfig {
    /// `host:port` pairs, pairing ports with hosts by position.
    ///
    /// A single port applies to every host; missing ports default to 27017.
    #[must_use]
    pub fn host_list(&self) -> Vec<String> {
        self.hosts
            .iter()
            .enumerate()
            .map(|(i, host)| {
                let port = self
                    .ports
                    .get(i)
                    .or_else(|| self.ports.first())
                    .copied()
                    .unwrap_or(27017);
                format!("{host}:{port}")
            })
            .collect()
    }
}

/// Connection settings shared by PostgreSQL, MySQL and `TiDB`.
#[derive(Debug)]
pub struct SqlConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Username.
    pub user: Option<String>,
    /// Password.
    pub password: Option<SecretString>,
    /// Table name prefix (`wl_` by default).
    pub prefix: String,
    /// Connection charset (MySQL family only).
    pub charset: String,
    /// Whether to connect over TLS.
    pub ssl: bool,
}

/// `SQLite` settings.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Directory holding the database file.
    pub path: PathBuf,
    /// Database name; the file is `<path>/<database>.sqlite`.
    pub database: String,
    /// Table name prefix.
    pub prefix: String,
}

impl SqliteConfig {
    /// Full path of the database file.
    #[must_use]
    pub fn file_path(&self) -> PathBuf {
        self.path.join(format!("{}.sqlite", self.database))
    }
}

/// GitHub CSV store settings.
#[derive(Debug)]
pub struct GitHubConfig {
    /// Personal access token.
    pub token: SecretString,
    /// `owner/name` of the data repository.
    pub repo: String,
    /// Directory inside the repository holding `<Table>.csv` files.
    pub path: String,
    /// REST API base URL.
    pub api_base: String,
}

/// Selected backend with its connection settings.
#[derive(Debug)]
pub enum BackendConfig {
    /// MongoDB.
    MongoDb(MongoConfig),
    /// PostgreSQL.
    PostgreSql(SqlConfig),
    /// MySQL.
    MySql(SqlConfig),
    /// `TiDB`.
    TiDb(SqlConfig),
    /// `SQLite`.
    Sqlite(SqliteConfig),
    /// GitHub CSV.
    GitHub(GitHubConfig),
}

impl BackendConfig {
    /// The backend kind.
    #[must_use]
    pub const fn backend_type(&self) -> StorageBackendType {
        match self {
            Self::MongoDb(_) => StorageBackendType::MongoDb,
            Self::PostgreSql(_) => StorageBackendType::PostgreSql,
            Self::MySql(_) => StorageBackendType::MySql,
            Self::TiDb(_) => StorageBackendType::TiDb,
            Self::Sqlite(_) => StorageBackendType::Sqlite,
            Self::GitHub(_) => StorageBackendType::GitHub,
        }
    }

    /// Selects and parses the backend from environment-style variables.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if no backend is configured or a
    /// value (port, host list) cannot be parsed.
    pub fn from_vars(vars: &BTreeMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let first = |keys: &[&str]| keys.iter().find_map(|k| get(k));

        if let Some(database) = get("MONGO_DB") {
            return Ok(Self::MongoDb(MongoConfig {
                hosts: parse_hosts(get("MONGO_HOST").as_deref())?,
                ports: parse_ports(get("MONGO_PORT").as_deref())?,
                database,
                user: get("MONGO_USER"),
                password: get("MONGO_PASSWORD").map(SecretString::from),
                replica_set: get("MONGO_REPLICASET"),
                auth_source: get("MONGO_AUTHSOURCE"),
                options: vars
                    .iter()
                    .filter_map(|(k, v)| {
                        k.strip_prefix(MONGO_OPTION_PREFIX)
                            .filter(|rest| !rest.is_empty())
                            .map(|rest| (camel_case(rest), v.clone()))
                    })
                    .collect(),
            }));
        }

        if let Some(database) = first(&["PG_DB", "POSTGRES_DATABASE"]) {
            return Ok(Self::PostgreSql(SqlConfig {
                host: first(&["PG_HOST", "POSTGRES_HOST"]).unwrap_or_else(|| "127.0.0.1".into()),
                port: parse_port(first(&["PG_PORT", "POSTGRES_PORT"]).as_deref(), 5432)?,
                database,
                user: first(&["PG_USER", "POSTGRES_USER"]),
                password: first(&["PG_PASSWORD", "POSTGRES_PASSWORD"]).map(SecretString::from),
                prefix: first(&["PG_PREFIX", "POSTGRES_PREFIX"])
                    .unwrap_or_else(|| DEFAULT_TABLE_PREFIX.into()),
                charset: "utf8".into(),
                ssl: first(&["PG_SSL", "POSTGRES_SSL"]).as_deref() == Some("true"),
            }));
        }

        if let Some(path) = get("SQLITE_PATH") {
            return Ok(Self::Sqlite(SqliteConfig {
                path: PathBuf::from(path),
                database: get("SQLITE_DB").unwrap_or_else(|| "waline".into()),
                prefix: get("SQLITE_PREFIX").unwrap_or_else(|| DEFAULT_TABLE_PREFIX.into()),
            }));
        }

        if let Some(database) = get("MYSQL_DB") {
            return Ok(Self::MySql(mysql_family(&get, "MYSQL", database, 3306)?));
        }

        if let Some(database) = get("TIDB_DB") {
            let mut config = mysql_family(&get, "TIDB", database, 4000)?;
            config.ssl = true;
            return Ok(Self::TiDb(config));
        }

        if let (Some(token), Some(repo), Some(path)) =
            (get("GITHUB_TOKEN"), get("GITHUB_REPO"), get("GITHUB_PATH"))
        {
            return Ok(Self::GitHub(GitHubConfig {
                token: SecretString::from(token),
                repo,
                path,
                api_base: get("GITHUB_API").unwrap_or_else(|| DEFAULT_GITHUB_API.into()),
            }));
        }

        Err(Error::InvalidInput(
            "no storage backend configured: set MONGO_DB, PG_DB, SQLITE_PATH, MYSQL_DB, \
             TIDB_DB or GITHUB_TOKEN/GITHUB_REPO/GITHUB_PATH"
                .to_string(),
        ))
    }
}

fn mysql_family(
    get: &impl Fn(&str) -> Option<String>,
    prefix: &str,
    database: String,
    default_port: u16,
) -> Result<SqlConfig> {
    let var = |name: &str| get(&format!("{prefix}_{name}"));
    Ok(SqlConfig {
        host: var("HOST").unwrap_or_else(|| "127.0.0.1".into()),
        port: parse_port(var("PORT").as_deref(), default_port)?,
        database,
        user: var("USER"),
        password: var("PASSWORD").map(SecretString::from),
        prefix: var("PREFIX").unwrap_or_else(|| DEFAULT_TABLE_PREFIX.into()),
        charset: var("CHARSET").unwrap_or_else(|| "utf8mb4".into()),
        ssl: var("SSL").as_deref() == Some("true"),
    })
}

fn parse_port(value: Option<&str>, default: u16) -> Result<u16> {
    value.map_or(Ok(default), |v| {
        v.parse()
            .map_err(|_| Error::InvalidInput(format!("invalid port '{v}'")))
    })
}

/// `MONGO_HOST`: a host name or a JSON array of host names.
fn parse_hosts(value: Option<&str>) -> Result<Vec<String>> {
    match value {
        None => Ok(vec!["127.0.0.1".to_string()]),
        Some(v) if v.starts_with('[') => serde_json::from_str(v)
            .map_err(|e| Error::InvalidInput(format!("invalid MONGO_HOST list: {e}"))),
        Some(v) => Ok(vec![v.to_string()]),
    }
}

/// `MONGO_PORT`: a port or a JSON array of ports (numbers or strings).
fn parse_ports(value: Option<&str>) -> Result<Vec<u16>> {
    match value {
        None => Ok(vec![27017]),
        Some(v) if v.starts_with('[') => {
            let items: Vec<serde_json::Value> = serde_json::from_str(v)
                .map_err(|e| Error::InvalidInput(format!("invalid MONGO_PORT list: {e}")))?;
            items
                .iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => parse_port(Some(s), 27017),
                    other => other
                        .as_u64()
                        .and_then(|n| u16::try_from(n).ok())
                        .ok_or_else(|| Error::InvalidInput(format!("invalid port {other}"))),
                })
                .collect()
        },
        Some(v) => Ok(vec![parse_port(Some(v), 27017)?]),
    }
}

/// `MAX_POOL_SIZE` -> `maxPoolSize`.
fn camel_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut upper_next = false;
    for c in raw.to_lowercase().chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}
