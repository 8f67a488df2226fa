//! # Murmur
//!
//! Storage adapter layer for a self-hosted comment service.
//!
//! Comments, page counters and users are stored through one uniform query
//! contract (`select`, `count`, `add`, `update`, `delete`) over a small
//! declarative filter DSL, whatever the backend happens to be.
//!
//! ## Features
//!
//! - Pluggable backends: MongoDB, PostgreSQL, MySQL/TiDB, `SQLite` and a
//!   GitHub-hosted CSV store
//! - One filter language compiled per backend (document queries, SQL, predicates)
//! - Transient-error retry for the document store
//! - TTL query cache with whole-table invalidation on writes
//! - Export/import of every table for migrations between backends
//!
//! ## Example
//!
//! ```rust,ignore
//! use murmur::{Filter, QueryOptions, StorageConfig, StorageFactory};
//!
//! let config = StorageConfig::from_env()?;
//! let factory = StorageFactory::connect(&config).await?;
//! let comments = factory.adapter("Comment");
//!
//! let latest = comments
//!     .select(
//!         &Filter::new().eq("url", "/posts/hello").not_in("status", ["spam"]),
//!         &QueryOptions::new().desc("insertedAt").limit(10),
//!     )
//!     .await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
// Current duplicates come from the database drivers' TLS stacks.
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod cli;
pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::{BackendConfig, CacheConfig, StorageConfig};
pub use models::{
    Condition, CountResult, Filter, GroupedCount, LikePattern, Logic, OBJECT_ID, QueryOptions,
    Record, UpdateData, Value,
};
pub use services::TransferService;
pub use storage::{StorageAdapter, StorageBackendType, StorageFactory};

/// Error type for storage operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed filter JSON, missing configuration, bad table names |
/// | `OperationFailed` | Driver errors, I/O errors, remote API failures |
/// | `Transient` | The backend reported a server-side error worth retrying |
/// | `FeatureNotEnabled` | The configured backend was compiled out |
/// | `Unsupported` | An operation the selected backend cannot express |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A filter or options document is not valid JSON of the expected shape
    /// - No storage backend is configured in the environment
    /// - A configuration value cannot be parsed
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed permanently.
    ///
    /// Raised when:
    /// - A database query is rejected (malformed query, auth failure, refused connection)
    /// - The GitHub contents API returns an unexpected status
    /// - CSV content cannot be parsed or written
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A transient backend failure.
    ///
    /// Raised when the document store answers with a server error. These are
    /// retried by [`storage::RetryPolicy`] before being surfaced.
    #[error("transient failure in '{operation}': {cause}")]
    Transient {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),

    /// The backend cannot perform the requested operation.
    #[error("unsupported by {backend}: {operation}")]
    Unsupported {
        /// Backend name.
        backend: &'static str,
        /// Operation that was requested.
        operation: &'static str,
    },
}

impl Error {
    /// Builds an [`Error::OperationFailed`] from any displayable cause.
    pub fn operation(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns true if the error is worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current UTC time truncated to whole seconds.
///
/// Relational backends store timestamps with second precision, so stamping
/// with a truncated clock keeps the value returned by `add` identical to the
/// value read back later.
#[must_use]
pub fn current_datetime() -> chrono::DateTime<chrono::Utc> {
    let now = chrono::Utc::now();
    chrono::DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::operation("select", "connection refused");
        assert_eq!(
            err.to_string(),
            "operation 'select' failed: connection refused"
        );

        let err = Error::Unsupported {
            backend: "github",
            operation: "set_sequence",
        };
        assert_eq!(err.to_string(), "unsupported by github: set_sequence");
    }

    #[test]
    fn test_only_transient_errors_are_retryable() {
        let transient = Error::Transient {
            operation: "select".to_string(),
            cause: "server hiccup".to_string(),
        };
        assert!(transient.is_transient());
        assert!(!Error::operation("select", "bad query").is_transient());
        assert!(!Error::InvalidInput("x".to_string()).is_transient());
    }

    #[test]
    fn test_current_datetime_has_no_subsecond_part() {
        use chrono::Timelike;
        assert_eq!(current_datetime().nanosecond(), 0);
    }
}
