//! Uniform records and their identifiers.

use super::Value;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map;

/// Field name carrying the backend-opaque record identifier.
pub const OBJECT_ID: &str = "objectId";

/// A flat record: field name to scalar value.
///
/// Records returned by an adapter always carry [`OBJECT_ID`] as a string,
/// whatever the native key type of the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Parses a record from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `json` is not an object.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| Error::InvalidInput(format!("expected a JSON object, got {json}")))?;
        Ok(object
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect())
    }

    /// Converts the record to a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Returns the record identifier, if present and textual.
    #[must_use]
    pub fn object_id(&self) -> Option<&str> {
        self.0.get(OBJECT_ID).and_then(Value::as_str)
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns a field value, treating a missing field as null.
    #[must_use]
    pub fn get_or_null(&self, field: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.0.get(field).unwrap_or(NULL)
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Removes a field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Returns true if the field is present (even when null).
    #[must_use]
    pub fn contains_key(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Copies every field of `other` over this record.
    pub fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Keeps only the listed fields plus [`OBJECT_ID`].
    #[must_use]
    pub fn project(mut self, fields: &[String]) -> Self {
        self.0
            .retain(|k, _| k == OBJECT_ID || fields.iter().any(|f| f == k));
        self
    }

    /// Iterates fields in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Iterates field names in order.
    pub fn keys(&self) -> btree_map::Keys<'_, String, Value> {
        self.0.keys()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the record, returning the underlying map.
    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_only_when_textual() {
        let record = Record::new().with(OBJECT_ID, "abc");
        assert_eq!(record.object_id(), Some("abc"));

        let record = Record::new().with(OBJECT_ID, 5_i64);
        assert_eq!(record.object_id(), None);
    }

    #[test]
    fn test_projection_keeps_object_id() {
        let record = Record::new()
            .with(OBJECT_ID, "1")
            .with("nick", "alice")
            .with("mail", "a@example.com");
        let projected = record.project(&["nick".to_string()]);
        assert_eq!(projected.len(), 2);
        assert!(projected.contains_key(OBJECT_ID));
        assert!(!projected.contains_key("mail"));
    }

    #[test]
    fn test_json_round_trip() {
        let json = serde_json::json!({"objectId": "x", "count": 3, "url": "/a", "pid": null});
        let record = Record::from_json(&json).unwrap();
        assert_eq!(record.get("count"), Some(&Value::Int(3)));
        assert_eq!(record.get("pid"), Some(&Value::Null));
        assert_eq!(record.to_json(), json);

        assert!(Record::from_json(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_missing_field_reads_as_null() {
        let record = Record::new();
        assert!(record.get_or_null("anything").is_null());
    }
}
