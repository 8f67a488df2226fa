//! Query options, count results and update payloads.

use super::{OBJECT_ID, Record};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Options shaping a `select` or `count`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Sort descending by this field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    /// Maximum number of records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Records to skip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// Projection; the identifier is always included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<Vec<String>>,
    /// Group fields for `count`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<Vec<String>>,
}

impl QueryOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorts descending by `field`.
    #[must_use]
    pub fn desc(mut self, field: impl Into<String>) -> Self {
        self.desc = Some(field.into());
        self
    }

    /// Caps the result size.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips leading results.
    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Projects onto the given fields.
    #[must_use]
    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.field = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Groups counts by the given fields.
    #[must_use]
    pub fn group<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.group = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Group fields, if grouping was requested with at least one field.
    #[must_use]
    pub fn group_fields(&self) -> Option<&[String]> {
        self.group.as_deref().filter(|g| !g.is_empty())
    }
}

/// One row of a grouped count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedCount {
    /// Values of the group fields.
    #[serde(flatten)]
    pub fields: Record,
    /// Records in the group.
    pub count: u64,
}

/// Result of `count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CountResult {
    /// Scalar total.
    Total(u64),
    /// One entry per distinct combination of group values.
    Grouped(Vec<GroupedCount>),
}

impl CountResult {
    /// The total number of records counted.
    #[must_use]
    pub fn total(&self) -> u64 {
        match self {
            Self::Total(n) => *n,
            Self::Grouped(groups) => groups.iter().map(|g| g.count).sum(),
        }
    }
}

/// Function computing the changes for one matched record.
pub type UpdateFn = dyn Fn(&Record) -> Record + Send + Sync;

/// Payload of `update`.
#[derive(Clone)]
pub enum UpdateData {
    /// Static field map applied to every matched record.
    Fields(Record),
    /// Evaluated once per matched record against its current state.
    Computed(Arc<UpdateFn>),
}

impl UpdateData {
    /// Builds a computed update.
    pub fn computed(f: impl Fn(&Record) -> Record + Send + Sync + 'static) -> Self {
        Self::Computed(Arc::new(f))
    }

    /// Changes to write for `current`. The identifier is never part of them.
    #[must_use]
    pub fn resolve(&self, current: &Record) -> Record {
        let mut changes = match self {
            Self::Fields(fields) => fields.clone(),
            Self::Computed(f) => f(current),
        };
        changes.remove(OBJECT_ID);
        changes
    }

    /// `current` with the resolved changes applied.
    #[must_use]
    pub fn apply(&self, current: &Record) -> Record {
        let mut updated = current.clone();
        updated.merge(self.resolve(current));
        updated
    }
}

impl From<Record> for UpdateData {
    fn from(fields: Record) -> Self {
        Self::Fields(fields)
    }
}

impl fmt::Debug for UpdateData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            Self::Computed(_) => f.write_str("Computed(<fn>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;

    #[test]
    fn test_update_data_strips_object_id() {
        let data = UpdateData::from(Record::new().with(OBJECT_ID, "x").with("nick", "bob"));
        let current = Record::new().with(OBJECT_ID, "1").with("nick", "alice");
        let changes = data.resolve(&current);
        assert!(!changes.contains_key(OBJECT_ID));

        let updated = data.apply(&current);
        assert_eq!(updated.object_id(), Some("1"));
        assert_eq!(updated.get("nick"), Some(&Value::from("bob")));
    }

    #[test]
    fn test_computed_update_sees_current_record() {
        let data = UpdateData::computed(|r| {
            let next = r.get("count").and_then(Value::as_i64).unwrap_or(0) + 1;
            Record::new().with("count", next)
        });
        let updated = data.apply(&Record::new().with("count", 3_i64));
        assert_eq!(updated.get("count"), Some(&Value::Int(4)));
        assert_eq!(format!("{data:?}"), "Computed(<fn>)");
    }

    #[test]
    fn test_count_result_wire_shape() {
        let grouped = CountResult::Grouped(vec![GroupedCount {
            fields: Record::new().with("a", 1_i64),
            count: 2,
        }]);
        assert_eq!(
            serde_json::to_value(&grouped).unwrap(),
            serde_json::json!([{"a": 1, "count": 2}])
        );
        assert_eq!(grouped.total(), 2);
        assert_eq!(
            serde_json::to_value(CountResult::Total(5)).unwrap(),
            serde_json::json!(5)
        );
    }

    #[test]
    fn test_empty_group_is_no_group() {
        let options = QueryOptions::new().group(Vec::<String>::new());
        assert!(options.group_fields().is_none());
    }
}
