//! Table query and maintenance commands.

use super::write_line;
use crate::models::{CountResult, Filter, GroupedCount, QueryOptions};
use crate::services::TransferService;
use crate::storage::StorageFactory;
use crate::{Error, Result};
use clap::Args;
use std::io::Write;

/// Filter argument shared by `select` and `count`.
#[derive(Debug, Clone, Default, Args)]
pub struct QueryArgs {
    /// Filter as JSON, e.g. `{"status":["NOT IN",["spam"]]}`.
    #[arg(long)]
    pub filter: Option<String>,
}

impl QueryArgs {
    /// Parses the filter; no filter matches everything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the filter is not valid.
    pub fn filter(&self) -> Result<Filter> {
        self.filter
            .as_deref()
            .map_or_else(|| Ok(Filter::new()), Filter::parse)
    }
}

fn to_pretty_json(value: &impl serde::Serialize) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| Error::operation("serialize_output", e))
}

/// Prints matching records as a JSON array.
///
/// # Errors
///
/// Returns an error if the filter is invalid or the query fails.
pub async fn cmd_select(
    factory: &StorageFactory,
    table: &str,
    query: &QueryArgs,
    options: &QueryOptions,
    out: &mut dyn Write,
) -> Result<()> {
    let records = factory
        .adapter(table)
        .select(&query.filter()?, options)
        .await?;
    write_line(out, &to_pretty_json(&records)?)
}

/// One JSON object per group: the group values plus an unsigned `count`.
fn group_rows(groups: Vec<GroupedCount>) -> Vec<serde_json::Value> {
    groups
        .into_iter()
        .map(|g| {
            let mut row = g.fields.to_json();
            if let Some(fields) = row.as_object_mut() {
                fields.insert("count".to_string(), serde_json::json!(g.count));
            }
            row
        })
        .collect()
}

/// Prints a total, or one JSON object per group.
///
/// # Errors
///
/// Returns an error if the filter is invalid or the query fails.
pub async fn cmd_count(
    factory: &StorageFactory,
    table: &str,
    query: &QueryArgs,
    group: Vec<String>,
    out: &mut dyn Write,
) -> Result<()> {
    let mut options = QueryOptions::new();
    if !group.is_empty() {
        options = options.group(group);
    }
    match factory.adapter(table).count(&query.filter()?, &options).await? {
        CountResult::Total(total) => write_line(out, &total.to_string()),
        CountResult::Grouped(groups) => write_line(out, &to_pretty_json(&group_rows(groups))?),
    }
}

/// Deletes every record of `table`.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub async fn cmd_clear(service: &TransferService, table: &str, out: &mut dyn Write) -> Result<()> {
    service.clear(table).await?;
    write_line(out, &format!("cleared {table}"))
}

/// Resets the auto-increment sequence of `table`.
///
/// # Errors
///
/// Returns [`Error::Unsupported`] on non-relational backends.
pub async fn cmd_set_sequence(
    factory: &StorageFactory,
    table: &str,
    next_id: u64,
    out: &mut dyn Write,
) -> Result<()> {
    factory.adapter(table).set_sequence(next_id).await?;
    write_line(out, &format!("{table}: next id {next_id}"))
}
