//! Configuration management.
//!
//! Everything is driven by environment-style variables. A TOML file may
//! supply the same variables in its `[env]` table plus `[cache]`, `[retry]`
//! and `[logging]` sections; the process environment always wins.
//!
//! ```toml
//! [env]
//! SQLITE_PATH = "/var/lib/murmur"
//!
//! [cache]
//! enabled = true
//! ttl_secs = 600
//!
//! [retry]
//! max_attempts = 5
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

mod backend;

pub use backend::{
    BackendConfig, DEFAULT_GITHUB_API, DEFAULT_TABLE_PREFIX, GitHubConfig, MongoConfig,
    SqlConfig, SqliteConfig, StorageBackendType,
};

use crate::storage::RetryConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Query cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Forces the cache on or off; `None` uses the backend default.
    pub enabled: Option<bool>,
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
    /// Maximum entries per namespace.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            ttl_secs: 43_200,
            capacity: 1_024,
        }
    }
}

impl CacheConfig {
    /// Applies `MURMUR_CACHE`, `MURMUR_CACHE_TTL_SECS` and `MURMUR_CACHE_CAPACITY`.
    #[must_use]
    pub fn with_overrides_from(mut self, vars: &BTreeMap<String, String>) -> Self {
        if let Some(v) = vars.get("MURMUR_CACHE").and_then(|v| parse_switch(v)) {
            self.enabled = Some(v);
        }
        if let Some(v) = vars
            .get("MURMUR_CACHE_TTL_SECS")
            .and_then(|v| v.trim().parse().ok())
        {
            self.ttl_secs = v;
        }
        if let Some(v) = vars
            .get("MURMUR_CACHE_CAPACITY")
            .and_then(|v| v.trim().parse().ok())
        {
            self.capacity = v;
        }
        self
    }

    /// Whether reads should be cached for `backend`.
    #[must_use]
    pub fn enabled_for(&self, backend: StorageBackendType) -> bool {
        self.enabled.unwrap_or_else(|| backend.caches_by_default())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`warn`, `murmur=debug`, ...). `RUST_LOG` wins over it.
    pub level: Option<String>,
    /// Output format.
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Applies `LOG_LEVEL` and `LOG_FORMAT`.
    #[must_use]
    pub fn with_overrides_from(mut self, vars: &BTreeMap<String, String>) -> Self {
        if let Some(level) = vars.get("LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.level = Some(level.trim().to_string());
        }
        if let Some(format) = vars.get("LOG_FORMAT") {
            self.format = if format.trim().eq_ignore_ascii_case("json") {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            };
        }
        self
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ConfigFile {
    /// Environment-style variables.
    pub env: BTreeMap<String, String>,
    /// Cache section.
    pub cache: Option<CacheConfig>,
    /// Retry section.
    pub retry: Option<RetryConfig>,
    /// Logging section.
    pub logging: Option<LoggingConfig>,
}

impl ConfigFile {
    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::parse(&contents)
    }

    /// Parses configuration file contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })
    }
}

/// Complete storage configuration.
#[derive(Debug)]
pub struct StorageConfig {
    /// Selected backend.
    pub backend: BackendConfig,
    /// Query cache settings.
    pub cache: CacheConfig,
    /// Retry settings for the document store.
    pub retry: RetryConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl StorageConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if no backend is configured.
    pub fn from_env() -> Result<Self> {
        Self::from_parts(process_vars(), ConfigFile::default())
    }

    /// Loads configuration from a TOML file overlaid by the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or no backend is configured.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_parts(process_vars(), ConfigFile::load(path)?)
    }

    /// Builds configuration from explicit variables only.
    ///
    /// # Errors
    ///
    /// Returns an error if no backend is configured.
    pub fn from_vars(vars: &BTreeMap<String, String>) -> Result<Self> {
        Self::from_parts(vars.clone(), ConfigFile::default())
    }

    /// Merges file and variables: variables win over the file's `[env]`
    /// table and over its sections.
    ///
    /// # Errors
    ///
    /// Returns an error if no backend is configured.
    pub fn from_parts(vars: BTreeMap<String, String>, file: ConfigFile) -> Result<Self> {
        let mut merged = file.env;
        merged.extend(vars);

        let backend = BackendConfig::from_vars(&merged)?;
        let cache = file
            .cache
            .unwrap_or_default()
            .with_overrides_from(&merged);
        let retry = file
            .retry
            .unwrap_or_default()
            .with_overrides_from(|key| merged.get(key).cloned());
        let logging = file
            .logging
            .unwrap_or_default()
            .with_overrides_from(&merged);

        tracing::debug!(backend = %backend.backend_type(), "Storage configuration loaded");
        Ok(Self {
            backend,
            cache,
            retry,
            logging,
        })
    }
}

fn process_vars() -> BTreeMap<String, String> {
    std::env::vars().collect()
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
