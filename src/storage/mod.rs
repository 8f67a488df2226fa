//! Storage layer.
//!
//! Every backend implements [`StorageAdapter`] for one table:
//! - **Document**: `MongoDB`
//! - **Relational**: MySQL, `TiDB`, PostgreSQL, `SQLite`
//! - **File**: CSV files in a GitHub repository
//!
//! [`StorageFactory`] builds the configured backend, optionally wrapped in
//! a [`CachedAdapter`].

// Allow cast precision loss for timing and count conversions.
#![allow(clippy::cast_precision_loss)]
// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]
// Allow manual_let_else for clearer error handling in some contexts.
#![allow(clippy::manual_let_else)]
// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]
// Allow or_fun_call - the error path is uncommon.
#![allow(clippy::or_fun_call)]
// Allow unused_self for methods kept for API consistency.
#![allow(clippy::unused_self)]

pub mod cache;
mod factory;
pub mod github;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod normalize;
pub mod resilience;
pub mod sql;
mod traits;

pub use crate::config::StorageBackendType;
pub use cache::{CachedAdapter, QueryCache};
pub use factory::StorageFactory;
pub use resilience::{RetryConfig, RetryPolicy};
pub use traits::StorageAdapter;

use crate::Result;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Acquires a mutex, recovering the data if a previous holder panicked.
pub(crate) fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Storage mutex was poisoned, recovering");
            metrics::counter!("storage_lock_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Counts one backend call.
pub(crate) fn record_request(backend: &'static str, operation: &'static str, status: &'static str) {
    metrics::counter!(
        "storage_requests_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// Runs one adapter operation, recording its outcome and duration.
pub(crate) async fn observe<T>(
    backend: &'static str,
    table: &str,
    operation: &'static str,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    let started = Instant::now();
    let result = work.await;
    let status = if result.is_ok() { "success" } else { "error" };
    record_request(backend, operation, status);
    metrics::histogram!(
        "storage_request_duration_ms",
        "backend" => backend,
        "operation" => operation
    )
    .record(started.elapsed().as_secs_f64() * 1000.0);
    match &result {
        Ok(_) => tracing::debug!(
            backend,
            table,
            operation,
            elapsed_ms = started.elapsed().as_millis(),
            "Storage call finished"
        ),
        Err(e) => tracing::warn!(backend, table, operation, error = %e, "Storage call failed"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_acquire_lock_recovers_from_poison() {
        let mutex = Arc::new(Mutex::new(1));
        let poisoner = Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(mutex.is_poisoned());
        *acquire_lock(&mutex) += 1;
        assert_eq!(*acquire_lock(&mutex), 2);
    }

    #[tokio::test]
    async fn test_observe_passes_result_through() {
        let ok = observe("sqlite", "Comment", "select", async { Ok(3) }).await;
        assert_eq!(ok.unwrap(), 3);
        let err: Result<()> = observe("sqlite", "Comment", "select", async {
            Err(crate::Error::InvalidInput("bad".to_string()))
        })
        .await;
        assert!(err.is_err());
    }
}
