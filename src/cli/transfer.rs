//! Export and import commands.

use super::write_line;
use crate::services::{ExportBundle, TransferService};
use crate::{Error, Result};
use std::io::Write;
use std::path::Path;

/// Writes the export bundle to `output`, or to `out` when no file is given.
///
/// # Errors
///
/// Returns an error if a table cannot be read or the file cannot be written.
pub async fn cmd_export(
    service: &TransferService,
    output: Option<&Path>,
    out: &mut dyn Write,
) -> Result<()> {
    let bundle = service.export().await?;
    let json =
        serde_json::to_string_pretty(&bundle).map_err(|e| Error::operation("serialize_bundle", e))?;
    match output {
        Some(path) => {
            std::fs::write(path, json).map_err(|e| Error::OperationFailed {
                operation: "write_bundle".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;
            let rows: usize = bundle.data.values().map(Vec::len).sum();
            write_line(out, &format!("exported {rows} records to {}", path.display()))
        },
        None => write_line(out, &json),
    }
}

/// Imports the bundle stored in `file`.
///
/// # Errors
///
/// Returns an error if the file is not a bundle or a write fails.
pub async fn cmd_import(service: &TransferService, file: &Path, out: &mut dyn Write) -> Result<()> {
    let text = std::fs::read_to_string(file).map_err(|e| Error::OperationFailed {
        operation: "read_bundle".to_string(),
        cause: format!("{}: {e}", file.display()),
    })?;
    let bundle: ExportBundle = serde_json::from_str(&text)
        .map_err(|e| Error::InvalidInput(format!("{} is not an export bundle: {e}", file.display())))?;
    let stats = service.import_bundle(bundle).await?;
    write_line(out, &format!("imported {} records", stats.imported))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::models::{Filter, QueryOptions, Record};
    use crate::storage::StorageFactory;
    use crate::storage::github::MemoryContentStore;
    use std::sync::Arc;

    fn service() -> (Arc<StorageFactory>, TransferService) {
        let factory = Arc::new(StorageFactory::files(
            Arc::new(MemoryContentStore::new()),
            "",
            CacheConfig::default(),
        ));
        (Arc::clone(&factory), TransferService::new(factory))
    }

    #[tokio::test]
    async fn test_export_to_file_then_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");

        let (source_factory, source) = service();
        source_factory
            .adapter("Users")
            .add(Record::new().with("email", "a@b.c"))
            .await
            .unwrap();
        let mut out = Vec::new();
        cmd_export(&source, Some(&path), &mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("exported 1 records"));

        let (target_factory, target) = service();
        let mut out = Vec::new();
        cmd_import(&target, &path, &mut out).await.unwrap();
        let users = target_factory
            .adapter("Users")
            .select(&Filter::new(), &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].get("email").and_then(|v| v.as_str()), Some("a@b.c"));
    }

    #[tokio::test]
    async fn test_import_rejects_non_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[]").unwrap();
        let (_, service) = service();
        let err = cmd_import(&service, &path, &mut Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
