//! Backend selection and per-table adapter construction.

use super::cache::CachedAdapter;
use super::github::{ContentStore, CsvAdapter, GitHubContentStore, TableLocks};
use super::sql::{RelationalAdapter, SqlExecutor, SqliteExecutor, ensure_schema};
use super::traits::StorageAdapter;
use super::{StorageBackendType, acquire_lock};
use crate::config::{BackendConfig, CacheConfig, StorageConfig};
use crate::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Connection shared by every table adapter of one backend.
enum Connection {
    #[cfg(feature = "mongodb")]
    Document {
        database: mongodb::Database,
        retry: super::RetryPolicy,
    },
    Relational {
        executor: Arc<dyn SqlExecutor>,
        prefix: String,
    },
    Files {
        store: Arc<dyn ContentStore>,
        dir: String,
        locks: TableLocks,
    },
}

/// Builds [`StorageAdapter`]s for the configured backend.
///
/// Only the selected backend's connection is created. Adapters are memoized
/// per table, so every handle of a table shares one cache and, for the CSV
/// backend, one write lock.
pub struct StorageFactory {
    backend_type: StorageBackendType,
    connection: Connection,
    cache: CacheConfig,
    adapters: Mutex<HashMap<String, Arc<dyn StorageAdapter>>>,
}

impl StorageFactory {
    /// Connects to the backend selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FeatureNotEnabled`] if the backend was compiled out,
    /// or an error if the connection cannot be set up.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let backend_type = config.backend.backend_type();
        let connection = match &config.backend {
            #[cfg(feature = "mongodb")]
            BackendConfig::MongoDb(mongo) => Connection::Document {
                database: super::mongo::connect(mongo).await?,
                retry: super::RetryPolicy::new(&config.retry),
            },
            #[cfg(not(feature = "mongodb"))]
            BackendConfig::MongoDb(_) => {
                return Err(crate::Error::FeatureNotEnabled("mongodb".to_string()));
            },
            #[cfg(feature = "postgres")]
            BackendConfig::PostgreSql(sql) => Connection::Relational {
                executor: Arc::new(super::sql::PostgresExecutor::connect(sql)?),
                prefix: sql.prefix.clone(),
            },
            #[cfg(feature = "mysql")]
            BackendConfig::MySql(sql) => Connection::Relational {
                executor: Arc::new(super::sql::MySqlExecutor::connect(sql, false)?),
                prefix: sql.prefix.clone(),
            },
            #[cfg(feature = "mysql")]
            BackendConfig::TiDb(sql) => Connection::Relational {
                executor: Arc::new(super::sql::MySqlExecutor::connect(sql, true)?),
                prefix: sql.prefix.clone(),
            },
            #[cfg(not(feature = "postgres"))]
            BackendConfig::PostgreSql(_) => {
                return Err(crate::Error::FeatureNotEnabled("postgres".to_string()));
            },
            #[cfg(not(feature = "mysql"))]
            BackendConfig::MySql(_) | BackendConfig::TiDb(_) => {
                return Err(crate::Error::FeatureNotEnabled("mysql".to_string()));
            },
            BackendConfig::Sqlite(sqlite) => Connection::Relational {
                executor: Arc::new(SqliteExecutor::open(&sqlite.file_path())?),
                prefix: sqlite.prefix.clone(),
            },
            BackendConfig::GitHub(github) => Connection::Files {
                store: Arc::new(GitHubContentStore::new(github)?),
                dir: github.path.clone(),
                locks: TableLocks::new(),
            },
        };
        tracing::info!(backend = %backend_type, "Storage backend selected");
        Ok(Self::with_connection(
            backend_type,
            connection,
            config.cache.clone(),
        ))
    }

    /// Factory over an existing SQL executor.
    #[must_use]
    pub fn relational(
        backend_type: StorageBackendType,
        executor: Arc<dyn SqlExecutor>,
        prefix: &str,
        cache: CacheConfig,
    ) -> Self {
        let connection = Connection::Relational {
            executor,
            prefix: prefix.to_string(),
        };
        Self::with_connection(backend_type, connection, cache)
    }

    /// CSV factory over any [`ContentStore`].
    #[must_use]
    pub fn files(store: Arc<dyn ContentStore>, dir: &str, cache: CacheConfig) -> Self {
        let connection = Connection::Files {
            store,
            dir: dir.to_string(),
            locks: TableLocks::new(),
        };
        Self::with_connection(StorageBackendType::GitHub, connection, cache)
    }

    fn with_connection(
        backend_type: StorageBackendType,
        connection: Connection,
        cache: CacheConfig,
    ) -> Self {
        Self {
            backend_type,
            connection,
            cache,
            adapters: Mutex::new(HashMap::new()),
        }
    }

    /// The selected backend.
    #[must_use]
    pub const fn backend_type(&self) -> StorageBackendType {
        self.backend_type
    }

    /// Adapter for `table`, created on first use.
    pub fn adapter(&self, table: &str) -> Arc<dyn StorageAdapter> {
        let mut adapters = acquire_lock(&self.adapters);
        if let Some(adapter) = adapters.get(table) {
            return Arc::clone(adapter);
        }
        let adapter = self.build(table);
        adapters.insert(table.to_string(), Arc::clone(&adapter));
        tracing::debug!(backend = %self.backend_type, table, "Created table adapter");
        adapter
    }

    fn build(&self, table: &str) -> Arc<dyn StorageAdapter> {
        match &self.connection {
            #[cfg(feature = "mongodb")]
            Connection::Document { database, retry } => {
                self.finish(super::mongo::MongoAdapter::new(database, table, retry.clone()))
            },
            Connection::Relational { executor, prefix } => self.finish(RelationalAdapter::new(
                Arc::clone(executor),
                self.backend_type.as_str(),
                table,
                prefix,
            )),
            Connection::Files { store, dir, locks } => {
                self.finish(CsvAdapter::new(Arc::clone(store), dir, table, locks))
            },
        }
    }

    fn finish<A: StorageAdapter + 'static>(&self, adapter: A) -> Arc<dyn StorageAdapter> {
        if self.cache.enabled_for(self.backend_type) {
            Arc::new(CachedAdapter::new(adapter, &self.cache))
        } else {
            Arc::new(adapter)
        }
    }

    /// Creates any missing tables. A no-op for schemaless backends.
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        match &self.connection {
            Connection::Relational { executor, prefix } => {
                ensure_schema(executor.as_ref(), prefix).await
            },
            _ => {
                tracing::debug!(backend = %self.backend_type, "Backend is schemaless");
                Ok(())
            },
        }
    }
}
