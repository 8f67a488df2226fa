//! In-memory filter evaluation for the CSV backend.
//!
//! Mirrors the SQL semantics: null never equals, orders or matches a
//! pattern; `NOT IN` and `!=` keep rows whose field is null.

use crate::models::{Condition, Filter, Logic, Value};
use crate::models::Record;

fn condition_matches(field: &str, value: &Value, condition: &Condition) -> bool {
    match condition {
        Condition::Eq(expected) => value.loosely_equals(expected),
        Condition::IsNull => value.is_null(),
        Condition::In(values) => values.iter().any(|v| value.loosely_equals(v)),
        Condition::NotIn(values) => !values.iter().any(|v| value.loosely_equals(v)),
        Condition::Like(pattern) => match value {
            Value::Null => false,
            Value::String(s) => pattern.matches(s),
            other => pattern.matches(&other.to_csv_cell()),
        },
        Condition::Ne(expected) if expected.is_null() => !value.is_null(),
        Condition::Ne(expected) => !value.loosely_equals(expected),
        Condition::Gt(bound) => value.compare(bound) == Some(std::cmp::Ordering::Greater),
        Condition::Unsupported { operator } => {
            tracing::debug!(field, operator = %operator, "Skipping unsupported filter operator");
            true
        },
    }
}

/// Whether `record` satisfies `filter`.
#[must_use]
pub fn matches(filter: &Filter, record: &Record) -> bool {
    let (logic, branches) = filter.branches();
    let mut results = branches.iter().map(|branch| {
        branch
            .iter()
            .all(|(field, cond)| condition_matches(field, record.get_or_null(field), cond))
    });
    match logic {
        Logic::And => results.all(|hit| hit),
        Logic::Or => results.any(|hit| hit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment() -> Record {
        Record::new()
            .with("objectId", "abc")
            .with("nick", "Alice")
            .with("like", 3_i64)
            .with("status", "approved")
    }

    #[test]
    fn test_null_semantics() {
        let record = comment();
        assert!(matches(&Filter::new().is_null("pid"), &record));
        assert!(matches(&Filter::new().not_in("pid", [1_i64]), &record));
        assert!(matches(&Filter::new().ne("pid", 1_i64), &record));
        assert!(!matches(&Filter::new().gt("pid", 0_i64), &record));
        assert!(!matches(&Filter::new().like("pid", "%"), &record));
    }

    #[test]
    fn test_loose_numeric_equality_and_ordering() {
        let record = comment();
        assert!(matches(&Filter::new().eq("like", "3"), &record));
        assert!(matches(&Filter::new().gt("like", 2_i64), &record));
        assert!(!matches(&Filter::new().gt("like", 3_i64), &record));
    }

    #[test]
    fn test_or_branches() {
        let record = comment();
        let filter = Filter::new().complex(
            Logic::Or,
            Filter::new().eq("status", "spam").eq("nick", "Alice"),
        );
        assert!(matches(&filter, &record));

        let filter = Filter::new().complex(
            Logic::And,
            Filter::new().eq("status", "spam").eq("nick", "Alice"),
        );
        assert!(!matches(&filter, &record));
    }
}
