//! Storage adapter trait definition.

use crate::models::{CountResult, Filter, QueryOptions, Record, UpdateData};
use crate::{Error, Result};
use async_trait::async_trait;

/// Uniform query contract implemented by every backend.
///
/// One adapter instance serves one table. Records crossing this boundary
/// always identify themselves through the string `objectId` field; native
/// keys never leak out.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Short backend name used in logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Logical table this adapter serves (e.g. `Comment`).
    fn table(&self) -> &str;

    /// Returns the records matching `filter`.
    ///
    /// Sorting by `options.desc` happens first, then `offset`/`limit`, then
    /// the `options.field` projection (`objectId` always kept).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend query fails.
    async fn select(&self, filter: &Filter, options: &QueryOptions) -> Result<Vec<Record>>;

    /// Counts the records matching `filter`, grouped by `options.group` when set.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend query fails.
    async fn count(&self, filter: &Filter, options: &QueryOptions) -> Result<CountResult>;

    /// Inserts a record and returns it with its `objectId`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    async fn add(&self, record: Record) -> Result<Record>;

    /// Applies `data` to every record matching `filter`.
    ///
    /// Matching and writing are separate steps: the batch is not atomic.
    ///
    /// # Returns
    ///
    /// The updated records.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend read or write fails. Records written
    /// before the failure stay written.
    async fn update(&self, data: &UpdateData, filter: &Filter) -> Result<Vec<Record>>;

    /// Removes every record matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    async fn delete(&self, filter: &Filter) -> Result<()>;

    /// Resets the auto-increment sequence so the next insert gets `next_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] unless the backend is relational.
    async fn set_sequence(&self, next_id: u64) -> Result<()> {
        let _ = next_id;
        Err(Error::Unsupported {
            backend: self.backend_name(),
            operation: "set_sequence",
        })
    }
}
