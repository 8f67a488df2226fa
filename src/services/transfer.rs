//! Export and import of whole tables.
//!
//! Moves comment data between backends: `export` dumps every table into one
//! bundle, `import_bundle` replays a bundle record by record through `add`.

use crate::models::{
    Filter, OBJECT_ID, QueryOptions, Record, TABLES, TIMESTAMP_FIELDS, UpdateData, Value,
};
use crate::models::value::parse_datetime;
use crate::storage::StorageFactory;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Bundle type marker.
pub const BUNDLE_TYPE: &str = "waline";

/// Current bundle format version.
pub const BUNDLE_VERSION: u32 = 1;

/// Every record of every table, as written by [`TransferService::export`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    /// Always [`BUNDLE_TYPE`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Format version.
    pub version: u32,
    /// Export time in milliseconds since the epoch.
    pub time: i64,
    /// Tables present in `data`, in export order.
    pub tables: Vec<String>,
    /// Records per table.
    pub data: BTreeMap<String, Vec<Record>>,
}

/// Statistics from an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Records written.
    pub imported: usize,
    /// Tables listed in the bundle without any data.
    pub empty_tables: usize,
}

/// Table export, import and maintenance over one backend.
pub struct TransferService {
    factory: Arc<StorageFactory>,
}

/// Converts a timestamp given as text or epoch milliseconds to a date.
fn to_date(value: Value) -> Value {
    let parsed = match &value {
        Value::String(s) => parse_datetime(s),
        Value::Int(ms) => DateTime::<Utc>::from_timestamp_millis(*ms),
        _ => None,
    };
    parsed.map_or(value, Value::Date)
}

impl TransferService {
    /// Creates a service over `factory`.
    #[must_use]
    pub const fn new(factory: Arc<StorageFactory>) -> Self {
        Self { factory }
    }

    /// Dumps every table.
    ///
    /// # Errors
    ///
    /// Returns an error if reading any table fails.
    pub async fn export(&self) -> Result<ExportBundle> {
        let start = Instant::now();
        let mut data = BTreeMap::new();
        for table in TABLES {
            let records = self
                .factory
                .adapter(table)
                .select(&Filter::new(), &QueryOptions::default())
                .await?;
            tracing::debug!(table, rows = records.len(), "Exported table");
            data.insert(table.to_string(), records);
        }
        metrics::histogram!("transfer_duration_ms", "direction" => "export")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        Ok(ExportBundle {
            kind: BUNDLE_TYPE.to_string(),
            version: BUNDLE_VERSION,
            time: Utc::now().timestamp_millis(),
            tables: TABLES.iter().map(ToString::to_string).collect(),
            data,
        })
    }

    /// Adds one exported record to `table`.
    ///
    /// The exported `objectId` is dropped so the target backend assigns its
    /// own; timestamp fields given as text are converted to dates.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn import_record(&self, table: &str, record: Record) -> Result<Record> {
        let mut record = record;
        record.remove(OBJECT_ID);
        for field in TIMESTAMP_FIELDS {
            if let Some(value) = record.remove(field) {
                record.insert(field, to_date(value));
            }
        }
        self.factory.adapter(table).add(record).await
    }

    /// Imports every record of every table listed in `bundle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown bundle version, or the
    /// first write error. Records imported before the failure stay imported.
    pub async fn import_bundle(&self, bundle: ExportBundle) -> Result<ImportStats> {
        if bundle.version > BUNDLE_VERSION {
            return Err(Error::InvalidInput(format!(
                "unsupported bundle version {}",
                bundle.version
            )));
        }
        if bundle.kind != BUNDLE_TYPE {
            tracing::warn!(kind = %bundle.kind, "Importing bundle of unexpected type");
        }

        let start = Instant::now();
        let mut stats = ImportStats::default();
        let mut data = bundle.data;
        for table in &bundle.tables {
            let records = data.remove(table).unwrap_or_default();
            if records.is_empty() {
                stats.empty_tables += 1;
                continue;
            }
            for record in records {
                self.import_record(table, record).await?;
                stats.imported += 1;
            }
            tracing::info!(table = %table, imported = stats.imported, "Imported table");
        }
        metrics::histogram!("transfer_duration_ms", "direction" => "import")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        Ok(stats)
    }

    /// Updates one record by id. Identity and timestamp fields in `data`
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_record(
        &self,
        table: &str,
        object_id: &str,
        data: Record,
    ) -> Result<Vec<Record>> {
        let mut data = data;
        for field in [OBJECT_ID, "createdAt", "updatedAt"] {
            data.remove(field);
        }
        self.factory
            .adapter(table)
            .update(&UpdateData::from(data), &Filter::by_id(object_id))
            .await
    }

    /// Deletes every record of `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear(&self, table: &str) -> Result<()> {
        self.factory.adapter(table).delete(&Filter::new()).await?;
        tracing::info!(table, "Cleared table");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::storage::github::MemoryContentStore;

    fn service() -> TransferService {
        let factory =
            StorageFactory::files(Arc::new(MemoryContentStore::new()), "", CacheConfig::default());
        TransferService::new(Arc::new(factory))
    }

    #[test]
    fn test_to_date_accepts_text_and_millis() {
        assert!(matches!(to_date(Value::from("2024-01-02T03:04:05.000Z")), Value::Date(_)));
        assert!(matches!(to_date(Value::Int(1_700_000_000_000)), Value::Date(_)));
        assert_eq!(to_date(Value::from("soon")), Value::from("soon"));
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let source = service();
        source
            .import_record(
                "Comment",
                Record::new()
                    .with("objectId", "old")
                    .with("comment", "hi")
                    .with("insertedAt", "2024-01-02T03:04:05.000Z"),
            )
            .await
            .unwrap();
        let bundle = source.export().await.unwrap();
        assert_eq!(bundle.kind, "waline");
        assert_eq!(bundle.tables, ["Comment", "Counter", "Users"]);
        assert_eq!(bundle.data["Comment"].len(), 1);
        assert_ne!(bundle.data["Comment"][0].object_id(), Some("old"));

        let json = serde_json::to_string(&bundle).unwrap();
        let parsed: ExportBundle = serde_json::from_str(&json).unwrap();

        let target = service();
        let stats = target.import_bundle(parsed).await.unwrap();
        assert_eq!(stats.imported, 1);
        assert_eq!(stats.empty_tables, 2);
    }

    #[tokio::test]
    async fn test_update_record_ignores_identity_fields() {
        let svc = service();
        let added = svc
            .import_record("Users", Record::new().with("email", "a@b.c"))
            .await
            .unwrap();
        let id = added.object_id().unwrap().to_string();

        let updated = svc
            .update_record(
                "Users",
                &id,
                Record::new()
                    .with("objectId", "other")
                    .with("createdAt", "2000-01-01T00:00:00.000Z")
                    .with("label", "admin"),
            )
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].object_id(), Some(id.as_str()));
        assert_eq!(updated[0].get("label"), Some(&Value::from("admin")));
        assert!(updated[0].get_or_null("createdAt").is_null());
    }

    #[tokio::test]
    async fn test_clear_empties_table() {
        let svc = service();
        for i in 0..3_i64 {
            svc.import_record("Counter", Record::new().with("time", i))
                .await
                .unwrap();
        }
        svc.clear("Counter").await.unwrap();
        let count = svc
            .factory
            .adapter("Counter")
            .count(&Filter::new(), &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(count.total(), 0);
    }

    #[tokio::test]
    async fn test_newer_bundle_version_is_rejected() {
        let bundle = ExportBundle {
            kind: BUNDLE_TYPE.to_string(),
            version: 2,
            time: 0,
            tables: Vec::new(),
            data: BTreeMap::new(),
        };
        assert!(matches!(
            service().import_bundle(bundle).await,
            Err(Error::InvalidInput(_))
        ));
    }
}
