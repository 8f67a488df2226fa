//! Record normalization at the adapter boundary.
//!
//! Every backend hands its native rows to these helpers before returning
//! them, so callers see one shape: a string `objectId`, the service's
//! camel-cased timestamp names and no native key field.

use crate::models::{OBJECT_ID, Record, TIMESTAMP_FIELDS, Value};

/// Replaces the native key field `native_key` with a string `objectId`.
#[must_use]
pub fn with_object_id(mut record: Record, native_key: &str) -> Record {
    if let Some(id) = record.remove(native_key) {
        let id = match id {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        };
        if let Some(id) = id {
            record.insert(OBJECT_ID, id);
        }
    }
    record
}

/// Restores camel-cased timestamp names from a backend that folds
/// identifiers to lowercase.
#[must_use]
pub fn restore_case(mut record: Record) -> Record {
    for field in TIMESTAMP_FIELDS {
        let folded = field.to_lowercase();
        if let Some(value) = record.remove(&folded) {
            record.insert(field, value);
        }
    }
    record
}
