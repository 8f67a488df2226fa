//! CSV-in-a-repository backend.
//!
//! Each table is one `<Table>.csv` file. Reads fetch and parse the whole
//! file; writes are a read-modify-write of the whole file under the table's
//! lock, committed with the `sha` the file was read at.

mod content;
mod predicate;

pub use content::{ContentStore, FileContent, GitHubContentStore, MemoryContentStore};
pub use predicate::matches;

use super::traits::StorageAdapter;
use super::{acquire_lock, observe};
use crate::models::schema::{column_type, table_columns};
use crate::models::{
    CountResult, Filter, GroupedCount, OBJECT_ID, QueryOptions, Record, UpdateData, Value,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const BACKEND: &str = "github";

type TableLock = Arc<tokio::sync::Mutex<()>>;

/// Write locks, one per table, shared by every adapter handle of a table.
#[derive(Debug, Clone, Default)]
pub struct TableLocks {
    locks: Arc<Mutex<HashMap<String, TableLock>>>,
}

impl TableLocks {
    /// Creates an empty lock registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `table`.
    #[must_use]
    pub fn lock_for(&self, table: &str) -> TableLock {
        Arc::clone(acquire_lock(&self.locks).entry(table.to_string()).or_default())
    }
}

/// A parsed table file.
struct Table {
    headers: Vec<String>,
    records: Vec<Record>,
    sha: Option<String>,
}

/// Header row for a table that has no file yet.
fn default_headers(table: &str) -> Vec<String> {
    let mut headers = vec![OBJECT_ID.to_string()];
    match table_columns(table) {
        Some(columns) => headers.extend(columns.iter().map(|c| c.name.to_string())),
        None => headers.extend(["createdAt".to_string(), "updatedAt".to_string()]),
    }
    headers
}

/// Parses a table file. Cells stay text unless the table's schema types
/// the column; the empty cell is null.
fn parse_csv(table: &str, data: &str) -> Result<(Vec<String>, Vec<Record>)> {
    let data = data.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(data.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::operation("parse_csv", e))?
        .iter()
        .map(String::from)
        .collect();
    let types: Vec<_> = headers.iter().map(|h| column_type(table, h)).collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| Error::operation("parse_csv", e))?;
        let record = headers
            .iter()
            .zip(&types)
            .zip(row.iter())
            .map(|((header, ty), cell)| {
                let value = match ty {
                    _ if cell.is_empty() => Value::Null,
                    Some(ty) => ty.decode_cell(cell),
                    None => Value::String(cell.to_string()),
                };
                (header.clone(), value)
            })
            .collect();
        records.push(record);
    }
    Ok((headers, records))
}

fn write_csv(headers: &[String], records: &[Record]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(headers)
        .map_err(|e| Error::operation("write_csv", e))?;
    for record in records {
        writer
            .write_record(headers.iter().map(|h| {
                record
                    .get(h)
                    .map(Value::to_csv_cell)
                    .unwrap_or_default()
            }))
            .map_err(|e| Error::operation("write_csv", e))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::operation("write_csv", e))?;
    String::from_utf8(bytes).map_err(|e| Error::operation("write_csv", e))
}

/// Orders records by `field` descending; records without a comparable
/// value sort last.
fn sort_desc(records: &mut [Record], field: &str) {
    records.sort_by(|a, b| {
        match (a.get_or_null(field), b.get_or_null(field)) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            (x, y) => y.compare(x).unwrap_or(Ordering::Equal),
        }
    });
}

/// [`StorageAdapter`] over one CSV file in a [`ContentStore`].
pub struct CsvAdapter {
    store: Arc<dyn ContentStore>,
    table: String,
    path: String,
    lock: TableLock,
}

impl CsvAdapter {
    /// Creates an adapter for `table`, stored as `<dir>/<table>.csv`.
    #[must_use]
    pub fn new(store: Arc<dyn ContentStore>, dir: &str, table: &str, locks: &TableLocks) -> Self {
        let dir = dir.trim_matches('/');
        let path = if dir.is_empty() {
            format!("{table}.csv")
        } else {
            format!("{dir}/{table}.csv")
        };
        Self {
            store,
            table: table.to_string(),
            path,
            lock: locks.lock_for(table),
        }
    }

    /// Path of the table file inside the store.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    async fn load(&self) -> Result<Table> {
        match self.store.get(&self.path).await? {
            Some(file) => {
                let (headers, records) = parse_csv(&self.table, &file.data)?;
                Ok(Table {
                    headers,
                    records,
                    sha: Some(file.sha),
                })
            },
            None => Ok(Table {
                headers: default_headers(&self.table),
                records: Vec::new(),
                sha: None,
            }),
        }
    }

    async fn save(&self, mut table: Table) -> Result<()> {
        for record in &table.records {
            for key in record.keys() {
                if !table.headers.contains(key) {
                    table.headers.push(key.clone());
                }
            }
        }
        let data = write_csv(&table.headers, &table.records)?;
        let message = format!("feat(murmur): update {} data", self.table);
        self.store
            .put(&self.path, &data, table.sha.as_deref(), &message)
            .await?;
        tracing::debug!(table = %self.table, rows = table.records.len(), "Saved table file");
        Ok(())
    }

    async fn matching(&self, filter: &Filter) -> Result<Vec<Record>> {
        let table = self.load().await?;
        Ok(table
            .records
            .into_iter()
            .filter(|record| matches(filter, record))
            .collect())
    }
}

#[async_trait]
impl StorageAdapter for CsvAdapter {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn table(&self) -> &str {
        &self.table
    }

    async fn select(&self, filter: &Filter, options: &QueryOptions) -> Result<Vec<Record>> {
        observe(BACKEND, &self.table, "select", async {
            let mut records = self.matching(filter).await?;
            if let Some(field) = &options.desc {
                sort_desc(&mut records, field);
            }
            let offset = options
                .offset
                .and_then(|o| usize::try_from(o).ok())
                .unwrap_or(0);
            let limit = options
                .limit
                .and_then(|l| usize::try_from(l).ok())
                .unwrap_or(usize::MAX);
            let page = records.into_iter().skip(offset).take(limit);
            Ok(match &options.field {
                Some(fields) => page.map(|r| r.project(fields)).collect(),
                None => page.collect(),
            })
        })
        .await
    }

    async fn count(&self, filter: &Filter, options: &QueryOptions) -> Result<CountResult> {
        observe(BACKEND, &self.table, "count", async {
            let records = self.matching(filter).await?;
            let Some(group) = options.group_fields() else {
                return Ok(CountResult::Total(records.len() as u64));
            };

            let mut index: HashMap<Vec<String>, usize> = HashMap::new();
            let mut grouped: Vec<GroupedCount> = Vec::new();
            for record in &records {
                let key: Vec<String> = group
                    .iter()
                    .map(|g| record.get_or_null(g).to_csv_cell())
                    .collect();
                if let Some(&i) = index.get(&key) {
                    grouped[i].count += 1;
                } else {
                    index.insert(key, grouped.len());
                    grouped.push(GroupedCount {
                        fields: group
                            .iter()
                            .map(|g| (g.clone(), record.get_or_null(g).clone()))
                            .collect(),
                        count: 1,
                    });
                }
            }
            Ok(CountResult::Grouped(grouped))
        })
        .await
    }

    async fn add(&self, record: Record) -> Result<Record> {
        observe(BACKEND, &self.table, "add", async {
            let _guard = self.lock.lock().await;
            let mut table = self.load().await?;
            let mut record = record;
            let id = match record.remove(OBJECT_ID) {
                Some(Value::Null) | None => uuid::Uuid::new_v4().simple().to_string(),
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
            };
            record.insert(OBJECT_ID, id);
            table.records.push(record.clone());
            self.save(table).await?;
            Ok(record)
        })
        .await
    }

    async fn update(&self, data: &UpdateData, filter: &Filter) -> Result<Vec<Record>> {
        observe(BACKEND, &self.table, "update", async {
            let _guard = self.lock.lock().await;
            let mut table = self.load().await?;
            let mut updated = Vec::new();
            for record in &mut table.records {
                if matches(filter, record) {
                    let changes = data.resolve(record);
                    record.merge(changes);
                    updated.push(record.clone());
                }
            }
            if !updated.is_empty() {
                self.save(table).await?;
            }
            Ok(updated)
        })
        .await
    }

    async fn delete(&self, filter: &Filter) -> Result<()> {
        observe(BACKEND, &self.table, "delete", async {
            let _guard = self.lock.lock().await;
            let mut table = self.load().await?;
            let before = table.records.len();
            table.records.retain(|record| !matches(filter, record));
            let removed = before - table.records.len();
            if removed > 0 {
                self.save(table).await?;
            }
            tracing::debug!(table = %self.table, removed, "Deleted rows");
            Ok(())
        })
        .await
    }
}
