//! MongoDB adapter.
//!
//! Each table is one collection. Every driver call runs through the
//! [`RetryPolicy`]. Only errors the server marks as retryable are retried:
//! the `RetryableWriteError`/`TransientTransactionError` labels, failover
//! and shutdown codes, or a cleared connection pool. Auth failures, bad
//! values, duplicate keys and client-side errors abort immediately.

use super::normalize::with_object_id;
use super::observe;
use super::resilience::RetryPolicy;
use super::traits::StorageAdapter;
use crate::config::MongoConfig;
use crate::models::{
    CountResult, Filter, GroupedCount, Condition, Logic, OBJECT_ID, QueryOptions, Record,
    UpdateData, Value,
};
use crate::{Error, Result};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{Bson, Document, doc, oid::ObjectId};
use mongodb::error::{
    ErrorKind, RETRYABLE_WRITE_ERROR, TRANSIENT_TRANSACTION_ERROR, WriteFailure,
};
use mongodb::options::{ClientOptions, Credential, FindOptions, WriteConcern};
use mongodb::{Client, Collection, Database};
use secrecy::ExposeSecret;
use std::time::Duration;

const BACKEND: &str = "mongodb";
const NATIVE_ID: &str = "_id";

/// Server codes reporting failover, shutdown or an interrupted operation.
const RETRYABLE_CODES: &[i32] = &[
    6,     // HostUnreachable
    7,     // HostNotFound
    89,    // NetworkTimeout
    91,    // ShutdownInProgress
    189,   // PrimarySteppedDown
    262,   // ExceededTimeLimit
    9001,  // SocketException
    10107, // NotWritablePrimary
    11600, // InterruptedAtShutdown
    11602, // InterruptedDueToReplStateChange
    13435, // NotPrimaryNoSecondaryOk
    13436, // NotPrimaryOrSecondary
];

/// Whether an error of this kind is worth another attempt. `labelled` is
/// set when the server attached a retry label.
fn is_retryable(kind: &ErrorKind, labelled: bool) -> bool {
    if labelled {
        return true;
    }
    match kind {
        ErrorKind::Command(e) => RETRYABLE_CODES.contains(&e.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(e)) => RETRYABLE_CODES.contains(&e.code),
        ErrorKind::Write(WriteFailure::WriteError(e)) => RETRYABLE_CODES.contains(&e.code),
        ErrorKind::ConnectionPoolCleared { .. } => true,
        _ => false,
    }
}

/// Maps a driver error; retryable failures become [`Error::Transient`].
fn map_error(operation: &'static str) -> impl Fn(mongodb::error::Error) -> Error {
    move |e| {
        let labelled =
            e.contains_label(RETRYABLE_WRITE_ERROR) || e.contains_label(TRANSIENT_TRANSACTION_ERROR);
        if is_retryable(&e.kind, labelled) {
            Error::Transient {
                operation: operation.to_string(),
                cause: e.to_string(),
            }
        } else {
            Error::operation(operation, e)
        }
    }
}

fn to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int(i) => Bson::Int64(*i),
        Value::Float(f) => Bson::Double(*f),
        Value::String(s) => Bson::String(s.clone()),
        Value::Date(d) => Bson::DateTime(mongodb::bson::DateTime::from_millis(d.timestamp_millis())),
    }
}

fn from_bson(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::Int(i64::from(i)),
        Bson::Int64(i) => Value::Int(i),
        Bson::Double(f) => Value::Float(f),
        Bson::String(s) => Value::String(s),
        Bson::ObjectId(id) => Value::String(id.to_hex()),
        Bson::DateTime(d) => chrono::DateTime::from_timestamp_millis(d.timestamp_millis())
            .map_or(Value::Null, Value::Date),
        Bson::Array(_) | Bson::Document(_) => Value::String(value.into_relaxed_extjson().to_string()),
        other => Value::String(other.to_string()),
    }
}

/// Identifier operand: a valid ObjectId hex becomes an ObjectId, anything else stays as-is.
fn id_bson(value: &Value) -> Bson {
    match value {
        Value::String(s) => ObjectId::parse_str(s).map_or_else(|_| Bson::String(s.clone()), Bson::ObjectId),
        other => to_bson(other),
    }
}

fn field_name(field: &str) -> &str {
    if field == OBJECT_ID { NATIVE_ID } else { field }
}

fn to_document(record: Record) -> Document {
    let mut document = Document::new();
    for (field, value) in record {
        if field == OBJECT_ID {
            document.insert(NATIVE_ID, id_bson(&value));
        } else {
            document.insert(field, to_bson(&value));
        }
    }
    document
}

fn to_record(document: Document) -> Record {
    let record: Record = document
        .into_iter()
        .map(|(field, value)| (field, from_bson(value)))
        .collect();
    with_object_id(record, NATIVE_ID)
}

fn condition_bson(field: &str, condition: &Condition) -> Option<Bson> {
    let operand = |v: &Value| if field == OBJECT_ID { id_bson(v) } else { to_bson(v) };
    let list = |values: &[Value]| Bson::Array(values.iter().map(operand).collect());
    Some(match condition {
        Condition::Eq(v) => operand(v),
        Condition::IsNull => Bson::Null,
        Condition::In(values) => Bson::Document(doc! { "$in": list(values) }),
        Condition::NotIn(values) => Bson::Document(doc! { "$nin": list(values) }),
        Condition::Like(pattern) => Bson::Document(doc! { "$regex": pattern.to_regex() }),
        Condition::Ne(v) => Bson::Document(doc! { "$ne": operand(v) }),
        Condition::Gt(v) if v.is_null() => Bson::Document(doc! { "$in": [] }),
        Condition::Gt(v) => Bson::Document(doc! { "$gt": operand(v) }),
        Condition::Unsupported { operator } => {
            tracing::debug!(field, operator = %operator, "Skipping unsupported filter operator");
            return None;
        },
    })
}

/// Compiles a filter into a query document.
fn compile_filter(filter: &Filter) -> Document {
    let (logic, branches) = filter.branches();
    let mut compiled: Vec<Document> = branches
        .iter()
        .map(|branch| {
            let clauses: Vec<Document> = branch
                .iter()
                .filter_map(|(field, cond)| {
                    condition_bson(field, cond).map(|b| doc! { field_name(field): b })
                })
                .collect();
            let mut merged = Document::new();
            let unique = clauses.iter().all(|clause| {
                clause
                    .keys()
                    .all(|k| merged.insert(k.clone(), Bson::Null).is_none())
            });
            if unique {
                clauses.into_iter().flatten().collect()
            } else {
                doc! { "$and": clauses }
            }
        })
        .collect();

    if compiled.len() == 1 {
        return compiled.pop().unwrap_or_default();
    }
    let operator = match logic {
        Logic::And => "$and",
        Logic::Or => "$or",
    };
    doc! { operator: compiled }
}

fn find_options(options: &QueryOptions) -> FindOptions {
    let mut find = FindOptions::default();
    find.sort = options
        .desc
        .as_deref()
        .map(|field| doc! { field_name(field): -1 });
    find.skip = options.offset;
    find.limit = options.limit.and_then(|l| i64::try_from(l).ok());
    find.projection = options.field.as_ref().map(|fields| {
        fields
            .iter()
            .map(|f| (field_name(f).to_string(), Bson::Int32(1)))
            .collect()
    });
    find
}

fn count_value(value: Option<&Bson>) -> u64 {
    match value {
        Some(Bson::Int32(n)) => u64::try_from(*n).unwrap_or(0),
        Some(Bson::Int64(n)) => u64::try_from(*n).unwrap_or(0),
        _ => 0,
    }
}

/// Connects to the configured deployment and returns the database handle.
///
/// # Errors
///
/// Returns an error if the connection options are invalid.
pub async fn connect(config: &MongoConfig) -> Result<Database> {
    let mut uri = format!(
        "mongodb://{}/{}",
        config.host_list().join(","),
        config.database
    );
    if !config.options.is_empty() {
        let query = config
            .options
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        uri.push('?');
        uri.push_str(&query);
    }

    let mut options = ClientOptions::parse(&uri)
        .await
        .map_err(|e| Error::operation("mongodb_parse_options", e))?;
    options.connect_timeout.get_or_insert(Duration::from_secs(3));
    options
        .server_selection_timeout
        .get_or_insert(Duration::from_secs(3));
    options.max_pool_size.get_or_insert(3);
    options.min_pool_size.get_or_insert(1);
    options.max_idle_time.get_or_insert(Duration::from_secs(30));
    options.retry_writes.get_or_insert(true);
    if options.write_concern.is_none() {
        let mut concern = WriteConcern::majority();
        concern.w_timeout = Some(Duration::from_secs(4));
        options.write_concern = Some(concern);
    }
    if let Some(name) = &config.replica_set {
        options.repl_set_name = Some(name.clone());
    }
    if let Some(user) = &config.user {
        let mut credential = Credential::default();
        credential.username = Some(user.clone());
        credential.password = config
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string());
        credential.source.clone_from(&config.auth_source);
        options.credential = Some(credential);
    }

    let client =
        Client::with_options(options).map_err(|e| Error::operation("mongodb_connect", e))?;
    tracing::info!(
        hosts = %config.host_list().join(","),
        database = %config.database,
        "Created MongoDB client"
    );
    Ok(client.database(&config.database))
}

/// Adapter over one collection.
pub struct MongoAdapter {
    collection: Collection<Document>,
    table: String,
    retry: RetryPolicy,
}

impl MongoAdapter {
    /// Creates an adapter for `table` in `database`.
    #[must_use]
    pub fn new(database: &Database, table: &str, retry: RetryPolicy) -> Self {
        Self {
            collection: database.collection(table),
            table: table.to_string(),
            retry,
        }
    }

    async fn find(&self, query: Document, options: FindOptions) -> Result<Vec<Document>> {
        self.retry
            .run(BACKEND, "select", || {
                let collection = self.collection.clone();
                let query = query.clone();
                let options = options.clone();
                async move {
                    let cursor = collection
                        .find(query)
                        .with_options(options)
                        .await
                        .map_err(map_error("select"))?;
                    cursor.try_collect::<Vec<Document>>().await.map_err(map_error("select"))
                }
            })
            .await
    }
}

#[async_trait]
impl StorageAdapter for MongoAdapter {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn table(&self) -> &str {
        &self.table
    }

    async fn select(&self, filter: &Filter, options: &QueryOptions) -> Result<Vec<Record>> {
        observe(BACKEND, &self.table, "select", async {
            let documents = self.find(compile_filter(filter), find_options(options)).await?;
            tracing::debug!(table = %self.table, rows = documents.len(), "Selected documents");
            Ok(documents.into_iter().map(to_record).collect())
        })
        .await
    }

    async fn count(&self, filter: &Filter, options: &QueryOptions) -> Result<CountResult> {
        observe(BACKEND, &self.table, "count", async {
            let query = compile_filter(filter);
            let Some(group) = options.group_fields() else {
                let total = self
                    .retry
                    .run(BACKEND, "count", || {
                        let collection = self.collection.clone();
                        let query = query.clone();
                        async move {
                            collection
                                .count_documents(query)
                                .await
                                .map_err(map_error("count"))
                        }
                    })
                    .await?;
                return Ok(CountResult::Total(total));
            };

            let keys: Document = group
                .iter()
                .enumerate()
                .map(|(i, field)| {
                    (
                        format!("__g{i}"),
                        Bson::String(format!("${}", field_name(field))),
                    )
                })
                .collect();
            let pipeline = vec![
                doc! { "$match": query },
                doc! { "$group": { "_id": keys, "count": { "$sum": 1 } } },
            ];
            let documents: Vec<Document> = self
                .retry
                .run(BACKEND, "count", || {
                    let collection = self.collection.clone();
                    let pipeline = pipeline.clone();
                    async move {
                        let cursor = collection
                            .aggregate(pipeline)
                            .await
                            .map_err(map_error("count"))?;
                        cursor.try_collect::<Vec<Document>>().await.map_err(map_error("count"))
                    }
                })
                .await?;

            let grouped = documents
                .into_iter()
                .map(|document| {
                    let key = document.get_document(NATIVE_ID).cloned().unwrap_or_default();
                    let fields = group
                        .iter()
                        .enumerate()
                        .map(|(i, field)| {
                            let value = key.get(format!("__g{i}")).cloned().map_or(Value::Null, from_bson);
                            (field.clone(), value)
                        })
                        .collect();
                    GroupedCount {
                        fields,
                        count: count_value(document.get("count")),
                    }
                })
                .collect();
            Ok(CountResult::Grouped(grouped))
        })
        .await
    }

    async fn add(&self, record: Record) -> Result<Record> {
        observe(BACKEND, &self.table, "add", async {
            let document = to_document(record.clone());
            let inserted = self
                .retry
                .run(BACKEND, "add", || {
                    let collection = self.collection.clone();
                    let document = document.clone();
                    async move {
                        collection
                            .insert_one(document)
                            .await
                            .map_err(map_error("add"))
                    }
                })
                .await?;
            let mut added = record;
            let id = match inserted.inserted_id {
                Bson::ObjectId(id) => id.to_hex(),
                Bson::String(s) => s,
                other => other.to_string(),
            };
            added.insert(OBJECT_ID, id);
            Ok(added)
        })
        .await
    }

    async fn update(&self, data: &UpdateData, filter: &Filter) -> Result<Vec<Record>> {
        observe(BACKEND, &self.table, "update", async {
            let documents = self
                .find(compile_filter(filter), FindOptions::default())
                .await?;
            let mut updated = Vec::with_capacity(documents.len());
            for document in documents {
                let native_id = document.get(NATIVE_ID).cloned().unwrap_or(Bson::Null);
                let current = to_record(document);
                let changes = data.resolve(&current);
                if !changes.is_empty() {
                    let set: Document = changes
                        .iter()
                        .map(|(field, value)| (field.clone(), to_bson(value)))
                        .collect();
                    self.retry
                        .run(BACKEND, "update", || {
                            let collection = self.collection.clone();
                            let selector = doc! { NATIVE_ID: native_id.clone() };
                            let set = set.clone();
                            async move {
                                collection
                                    .update_one(selector, doc! { "$set": set })
                                    .await
                                    .map_err(map_error("update"))
                            }
                        })
                        .await?;
                }
                let mut record = current;
                record.merge(changes);
                updated.push(record);
            }
            Ok(updated)
        })
        .await
    }

    async fn delete(&self, filter: &Filter) -> Result<()> {
        observe(BACKEND, &self.table, "delete", async {
            let query = compile_filter(filter);
            let result = self
                .retry
                .run(BACKEND, "delete", || {
                    let collection = self.collection.clone();
                    let query = query.clone();
                    async move {
                        collection
                            .delete_many(query)
                            .await
                            .map_err(map_error("delete"))
                    }
                })
                .await?;
            tracing::debug!(table = %self.table, removed = result.deleted_count, "Deleted documents");
            Ok(())
        })
        .await
    }
}
