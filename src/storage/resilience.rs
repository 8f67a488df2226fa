//! Retry policy for transient backend failures.
//!
//! The document store can answer with server-side errors that go away on
//! their own (elections, shutdowns, a cleared pool). Those surface as
//! [`Error::Transient`] and are retried with a fixed backoff; every other
//! error aborts immediately.
//!
//! ```text
//! attempt 1 --transient--> sleep(backoff) --> attempt 2 --transient--> ... attempt N --> Err
//!     |                                           |
//!     +--ok / permanent--> return                 +--ok / permanent--> return
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use murmur::storage::RetryPolicy;
//!
//! let policy = RetryPolicy::default();
//! let docs = policy
//!     .run("mongodb", "select", || async { collection.find(query.clone()).await })
//!     .await?;
//! ```

use crate::Result;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Fixed delay between attempts in milliseconds.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1_000,
        }
    }
}

impl RetryConfig {
    /// Loads retry configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`.
    ///
    /// Recognises `MURMUR_RETRY_MAX_ATTEMPTS` (at least 1) and
    /// `MURMUR_RETRY_BACKOFF_MS`. Unparseable values are ignored.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(parsed) =
            lookup("MURMUR_RETRY_MAX_ATTEMPTS").and_then(|v| v.trim().parse::<u32>().ok())
        {
            self.max_attempts = parsed.max(1);
        }
        if let Some(parsed) =
            lookup("MURMUR_RETRY_BACKOFF_MS").and_then(|v| v.trim().parse::<u64>().ok())
        {
            self.backoff_ms = parsed;
        }
        self
    }

    /// Sets the attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the backoff in milliseconds.
    #[must_use]
    pub const fn with_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }
}

/// Sequential retry loop around one backend call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Creates a policy from configuration.
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    /// Total attempts allowed.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `call` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// # Errors
    ///
    /// Returns the first permanent error, or the last transient error once
    /// every attempt has been used.
    pub async fn run<T, F, Fut>(
        &self,
        backend: &'static str,
        operation: &'static str,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    tracing::warn!(
                        backend,
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Transient storage failure, retrying"
                    );
                    metrics::counter!(
                        "storage_retries_total",
                        "backend" => backend,
                        "operation" => operation
                    )
                    .increment(1);
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}
