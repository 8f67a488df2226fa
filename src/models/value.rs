//! Scalar field values.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Timestamp layout used by relational `DATETIME`/`TIMESTAMP` columns.
pub const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single scalar field value.
///
/// Records are flat: every field holds one of these. Dates are kept as a
/// distinct variant so each backend can store them natively (BSON date,
/// SQL `TIMESTAMP`, ISO-8601 CSV cell).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent / SQL `NULL`.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 text.
    String(String),
    /// UTC timestamp.
    Date(DateTime<Utc>),
}

impl Value {
    /// Returns true for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the string payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an integer, accepting integral floats and numeric text.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the value as a float, accepting integers and numeric text.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the value as a timestamp, parsing RFC 3339 or SQL layouts from text.
    #[must_use]
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            Self::String(s) => parse_datetime(s),
            _ => None,
        }
    }

    /// Converts a JSON value into a field value.
    ///
    /// Nested arrays and objects are kept as their JSON text.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::String(s.clone()),
            other => Self::String(other.to_string()),
        }
    }

    /// Converts the value to JSON. Dates become RFC 3339 strings.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Date(d) => serde_json::Value::String(format_datetime(d)),
        }
    }

    /// Renders the value as a CSV cell.
    #[must_use]
    pub fn to_csv_cell(&self) -> String {
        match self {
            Self::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Equality with numeric, boolean and date coercion across variants.
    ///
    /// `Int(3)` equals `Float(3.0)` and `String("3")`; a date equals its
    /// RFC 3339 text. Null only equals null.
    #[must_use]
    pub fn loosely_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Bool(b), Self::String(s)) | (Self::String(s), Self::Bool(b)) => {
                s == if *b { "true" } else { "false" }
            },
            (Self::Date(_), _) | (_, Self::Date(_)) => {
                matches!((self.as_datetime(), other.as_datetime()), (Some(a), Some(b)) if a == b)
            },
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                _ => false,
            },
        }
    }

    /// Orders two values when they are comparable.
    ///
    /// Numbers compare numerically, dates chronologically, text
    /// lexicographically. Null is never comparable.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Date(_), _) | (_, Self::Date(_)) => {
                Some(self.as_datetime()?.cmp(&other.as_datetime()?))
            },
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }
}

/// Parses RFC 3339 or `YYYY-MM-DD HH:MM:SS` (taken as UTC).
#[must_use]
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, SQL_DATETIME_FORMAT)
                .ok()
                .map(|n| n.and_utc())
        })
}

/// Formats a timestamp as RFC 3339 with millisecond precision and a `Z` suffix.
#[must_use]
pub fn format_datetime(d: &DateTime<Utc>) -> String {
    d.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Date(d) => write!(f, "{}", format_datetime(d)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::Date(d) => serializer.serialize_str(&format_datetime(d)),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_json(&json))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_csv_cell_rendering() {
        assert_eq!(Value::Null.to_csv_cell(), "");
        assert_eq!(Value::from("1.50").to_csv_cell(), "1.50");
        let date = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(Value::Date(date).to_csv_cell(), "2023-06-01T12:00:00.000Z");
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Int(3).loosely_equals(&Value::Float(3.0)));
        assert!(Value::Int(3).loosely_equals(&Value::from("3")));
        assert!(Value::Bool(true).loosely_equals(&Value::from("true")));
        assert!(Value::Null.loosely_equals(&Value::Null));
        assert!(!Value::Null.loosely_equals(&Value::from("")));
        assert!(!Value::from("a").loosely_equals(&Value::from("b")));

        let date = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        assert!(Value::Date(date).loosely_equals(&Value::from("2023-06-01T12:00:00Z")));
    }

    #[test]
    fn test_compare() {
        assert_eq!(Value::Int(2).compare(&Value::Int(10)), Some(Ordering::Less));
        assert_eq!(
            Value::Float(2.5).compare(&Value::Int(2)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::from("b").compare(&Value::from("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);

        let early = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            Value::Date(early).compare(&Value::from("2021-01-01 00:00:00")),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"a": 1, "b": 1.5, "c": "x", "d": null, "e": [1]});
        let map = json.as_object().unwrap();
        assert_eq!(Value::from_json(&map["a"]), Value::Int(1));
        assert_eq!(Value::from_json(&map["b"]), Value::Float(1.5));
        assert_eq!(Value::from_json(&map["c"]), Value::from("x"));
        assert_eq!(Value::from_json(&map["d"]), Value::Null);
        assert_eq!(Value::from_json(&map["e"]), Value::from("[1]"));

        let date = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(
            serde_json::to_string(&Value::Date(date)).unwrap(),
            "\"2023-06-01T12:00:00.000Z\""
        );
    }

    #[test]
    fn test_parse_datetime_accepts_sql_layout() {
        let parsed = parse_datetime("2024-03-04 05:06:07").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap());
        assert!(parse_datetime("yesterday").is_none());
    }
}
