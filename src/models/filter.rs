//! Declarative filter DSL shared by every backend.
//!
//! A filter maps field names to conditions. All conditions are ANDed. An
//! optional complex part holds extra per-field branches: the ordinary
//! conditions are ANDed into every branch and the branches are combined
//! with the complex part's [`Logic`].
//!
//! # Wire form
//!
//! ```json
//! {
//!   "url": "/posts/hello",
//!   "status": ["NOT IN", ["spam", "waiting"]],
//!   "_complex": { "_logic": "or", "pid": null, "rid": ["IN", [1, 2]] }
//! }
//! ```
//!
//! A literal is an equality, `null` is an explicit IS NULL match, and a
//! two-element array `[operator, operand]` selects one of `IN`, `NOT IN`,
//! `LIKE`, `!=` or `>` (matched case-insensitively).

use super::{OBJECT_ID, Value, value::parse_datetime};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved key holding the complex part of a filter.
pub const COMPLEX_KEY: &str = "_complex";

/// Reserved key inside the complex part selecting how branches combine.
pub const LOGIC_KEY: &str = "_logic";

/// How complex branches are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    /// Every branch must match.
    #[default]
    And,
    /// At least one branch must match.
    Or,
}

impl Logic {
    /// Parses `and` / `or`, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for any other word.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "and" => Ok(Self::And),
            "or" => Ok(Self::Or),
            other => Err(Error::InvalidInput(format!("unknown _logic '{other}'"))),
        }
    }
}

/// A `LIKE` operand split into its wildcard shape.
///
/// `%` is only meaningful at the start and/or end of the operand; anything
/// in between matches literally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "shape", content = "text", rename_all = "lowercase")]
pub enum LikePattern {
    /// `%text%`
    Contains(String),
    /// `text%`
    Prefix(String),
    /// `%text`
    Suffix(String),
    /// `text`, no wildcard.
    Exact(String),
}

impl LikePattern {
    /// Splits a `LIKE` operand.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        if pattern == "%" {
            return Self::Contains(String::new());
        }
        let leading = pattern.starts_with('%');
        let trailing = pattern.ends_with('%');
        match (leading, trailing) {
            (true, true) => Self::Contains(pattern[1..pattern.len() - 1].to_string()),
            (true, false) => Self::Suffix(pattern[1..].to_string()),
            (false, true) => Self::Prefix(pattern[..pattern.len() - 1].to_string()),
            (false, false) => Self::Exact(pattern.to_string()),
        }
    }

    /// The literal text, without wildcards.
    #[must_use]
    pub fn needle(&self) -> &str {
        match self {
            Self::Contains(s) | Self::Prefix(s) | Self::Suffix(s) | Self::Exact(s) => s,
        }
    }

    /// Case-sensitive match against a string.
    #[must_use]
    pub fn matches(&self, haystack: &str) -> bool {
        match self {
            Self::Contains(s) => haystack.contains(s.as_str()),
            Self::Prefix(s) => haystack.starts_with(s.as_str()),
            Self::Suffix(s) => haystack.ends_with(s.as_str()),
            Self::Exact(s) => haystack == s,
        }
    }

    /// Renders a SQL `LIKE` operand, escaping `%`, `_` and `escape` itself.
    #[must_use]
    pub fn to_sql(&self, escape: char) -> String {
        let mut escaped = String::with_capacity(self.needle().len() + 2);
        for c in self.needle().chars() {
            if c == escape || c == '%' || c == '_' {
                escaped.push(escape);
            }
            escaped.push(c);
        }
        match self {
            Self::Contains(_) => format!("%{escaped}%"),
            Self::Prefix(_) => format!("{escaped}%"),
            Self::Suffix(_) => format!("%{escaped}"),
            Self::Exact(_) => escaped,
        }
    }

    /// Renders an anchored regular expression with the text escaped.
    #[must_use]
    pub fn to_regex(&self) -> String {
        let escaped = regex::escape(self.needle());
        match self {
            Self::Contains(_) => escaped,
            Self::Prefix(_) => format!("^{escaped}"),
            Self::Suffix(_) => format!("{escaped}$"),
            Self::Exact(_) => format!("^{escaped}$"),
        }
    }
}

/// A single-field condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", content = "operand", rename_all = "snake_case")]
pub enum Condition {
    /// `field == value`
    Eq(Value),
    /// `field IS NULL`
    IsNull,
    /// `field IN (...)`; an empty set matches nothing.
    In(Vec<Value>),
    /// `field NOT IN (...)`; an empty set matches everything.
    NotIn(Vec<Value>),
    /// Wildcard text match.
    Like(LikePattern),
    /// `field != value`
    Ne(Value),
    /// `field > value`
    Gt(Value),
    /// An operator no backend understands; produces no predicate.
    Unsupported {
        /// The operator as written.
        operator: String,
    },
}

impl Condition {
    /// Parses one field's wire form.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::IsNull,
            serde_json::Value::Array(items) => match items.first() {
                Some(serde_json::Value::String(op)) => {
                    Self::from_operator(op, items.get(1).unwrap_or(&serde_json::Value::Null))
                },
                _ => Self::Unsupported {
                    operator: json.to_string(),
                },
            },
            serde_json::Value::Object(_) => Self::Unsupported {
                operator: "object".to_string(),
            },
            scalar => Self::Eq(Value::from_json(scalar)),
        }
    }

    fn from_operator(operator: &str, operand: &serde_json::Value) -> Self {
        let list = || match operand {
            serde_json::Value::Array(items) => items.iter().map(Value::from_json).collect(),
            serde_json::Value::Null => Vec::new(),
            scalar => vec![Value::from_json(scalar)],
        };
        match operator.trim().to_uppercase().as_str() {
            "IN" => Self::In(list()),
            "NOT IN" => Self::NotIn(list()),
            "LIKE" => match operand.as_str() {
                Some(pattern) => Self::Like(LikePattern::parse(pattern)),
                None => Self::Unsupported {
                    operator: operator.to_string(),
                },
            },
            "!=" => Self::Ne(Value::from_json(operand)),
            ">" => Self::Gt(
                operand
                    .as_str()
                    .and_then(parse_datetime)
                    .map_or_else(|| Value::from_json(operand), Value::Date),
            ),
            _ => Self::Unsupported {
                operator: operator.to_string(),
            },
        }
    }
}

/// The `_complex` part of a filter.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Complex {
    /// How branches combine.
    pub logic: Logic,
    /// One branch per entry.
    pub conditions: BTreeMap<String, Condition>,
}

/// A uniform record filter.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Filter {
    conditions: BTreeMap<String, Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    complex: Option<Complex>,
}

/// A conjunction of field conditions.
pub type Branch<'a> = Vec<(&'a str, &'a Condition)>;

impl Filter {
    /// An empty filter matching every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches a single record by identifier.
    #[must_use]
    pub fn by_id(object_id: impl Into<String>) -> Self {
        Self::new().eq(OBJECT_ID, object_id.into())
    }

    /// Adds an arbitrary condition.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.conditions.insert(field.into(), condition);
        self
    }

    /// `field == value`
    #[must_use]
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Eq(value.into()))
    }

    /// `field IS NULL`
    #[must_use]
    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.with(field, Condition::IsNull)
    }

    /// `field IN (values)`
    #[must_use]
    pub fn is_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.with(
            field,
            Condition::In(values.into_iter().map(Into::into).collect()),
        )
    }

    /// `field NOT IN (values)`
    #[must_use]
    pub fn not_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.with(
            field,
            Condition::NotIn(values.into_iter().map(Into::into).collect()),
        )
    }

    /// `field LIKE pattern`
    #[must_use]
    pub fn like(self, field: impl Into<String>, pattern: &str) -> Self {
        self.with(field, Condition::Like(LikePattern::parse(pattern)))
    }

    /// `field != value`
    #[must_use]
    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Ne(value.into()))
    }

    /// `field > value`
    #[must_use]
    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Gt(value.into()))
    }

    /// Sets the complex part: one branch per entry of `branches`.
    #[must_use]
    pub fn complex(mut self, logic: Logic, branches: Self) -> Self {
        self.complex = Some(Complex {
            logic,
            conditions: branches.conditions,
        });
        self
    }

    /// Ordinary (always ANDed) conditions.
    #[must_use]
    pub const fn conditions(&self) -> &BTreeMap<String, Condition> {
        &self.conditions
    }

    /// The complex part, if any.
    #[must_use]
    pub const fn complex_part(&self) -> Option<&Complex> {
        self.complex.as_ref()
    }

    /// Returns true if the filter matches everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.branches().1.iter().all(Vec::is_empty)
    }

    /// Expands the filter into branches and the logic combining them.
    ///
    /// Without a complex part there is exactly one branch (the ordinary
    /// conditions, combined with `And`). An empty complex part is treated
    /// as absent.
    #[must_use]
    pub fn branches(&self) -> (Logic, Vec<Branch<'_>>) {
        let base: Branch<'_> = self
            .conditions
            .iter()
            .map(|(k, c)| (k.as_str(), c))
            .collect();
        match &self.complex {
            Some(complex) if !complex.conditions.is_empty() => {
                let branches = complex
                    .conditions
                    .iter()
                    .map(|(k, c)| {
                        let mut branch = base.clone();
                        branch.push((k.as_str(), c));
                        branch
                    })
                    .collect();
                (complex.logic, branches)
            },
            _ => (Logic::And, vec![base]),
        }
    }

    /// Parses the JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the filter or its `_complex` part
    /// is not an object, or `_logic` is neither `and` nor `or`.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        if json.is_null() {
            return Ok(Self::new());
        }
        let object = json
            .as_object()
            .ok_or_else(|| Error::InvalidInput(format!("filter must be an object, got {json}")))?;

        let mut filter = Self::new();
        for (field, value) in object {
            if field == COMPLEX_KEY {
                filter.complex = Some(parse_complex(value)?);
            } else {
                filter
                    .conditions
                    .insert(field.clone(), Condition::from_json(value));
            }
        }
        Ok(filter)
    }

    /// Parses the JSON wire form from text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the text is not valid JSON or not a filter.
    pub fn parse(text: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Error::InvalidInput(format!("invalid filter JSON: {e}")))?;
        Self::from_json(&json)
    }
}

fn parse_complex(json: &serde_json::Value) -> Result<Complex> {
    let object = json
        .as_object()
        .ok_or_else(|| Error::InvalidInput(format!("{COMPLEX_KEY} must be an object")))?;
    let mut complex = Complex::default();
    for (field, value) in object {
        if field == LOGIC_KEY {
            let logic = value
                .as_str()
                .ok_or_else(|| Error::InvalidInput(format!("{LOGIC_KEY} must be a string")))?;
            complex.logic = Logic::parse(logic)?;
        } else {
            complex
                .conditions
                .insert(field.clone(), Condition::from_json(value));
        }
    }
    Ok(complex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_wire_form() {
        let filter = Filter::from_json(&json!({
            "url": "/posts/hello",
            "status": ["not in", ["spam"]],
            "nick": ["LIKE", "%bob%"],
            "pid": null,
            "like": ["!=", 0],
            "_complex": {"_logic": "OR", "rid": ["IN", [1, 2]], "mail": "a@b.c"}
        }))
        .unwrap();

        let conditions = filter.conditions();
        assert_eq!(conditions["url"], Condition::Eq(Value::from("/posts/hello")));
        assert_eq!(
            conditions["status"],
            Condition::NotIn(vec![Value::from("spam")])
        );
        assert_eq!(
            conditions["nick"],
            Condition::Like(LikePattern::Contains("bob".to_string()))
        );
        assert_eq!(conditions["pid"], Condition::IsNull);
        assert_eq!(conditions["like"], Condition::Ne(Value::Int(0)));

        let complex = filter.complex_part().unwrap();
        assert_eq!(complex.logic, Logic::Or);
        assert_eq!(complex.conditions.len(), 2);
    }

    #[test]
    fn test_unknown_operator_is_kept_as_unsupported() {
        let filter = Filter::from_json(&json!({"a": ["BETWEEN", [1, 2]], "b": [1, 2]})).unwrap();
        assert!(matches!(
            filter.conditions()["a"],
            Condition::Unsupported { ref operator } if operator == "BETWEEN"
        ));
        assert!(matches!(
            filter.conditions()["b"],
            Condition::Unsupported { .. }
        ));
    }

    #[test]
    fn test_greater_than_parses_dates() {
        let filter = Filter::from_json(&json!({"insertedAt": [">", "2024-01-01T00:00:00Z"]}))
            .unwrap();
        assert!(matches!(
            filter.conditions()["insertedAt"],
            Condition::Gt(Value::Date(_))
        ));
    }

    #[test]
    fn test_logic_defaults_to_and_and_rejects_garbage() {
        let filter = Filter::from_json(&json!({"_complex": {"a": 1, "b": 2}})).unwrap();
        assert_eq!(filter.complex_part().unwrap().logic, Logic::And);

        assert!(Filter::from_json(&json!({"_complex": {"_logic": "xor"}})).is_err());
        assert!(Filter::from_json(&json!([1])).is_err());
        assert!(Filter::parse("{not json").is_err());
    }

    #[test]
    fn test_branches_and_base_into_each_entry() {
        let filter = Filter::new().eq("url", "/a").complex(
            Logic::Or,
            Filter::new().is_null("pid").is_in("rid", [1_i64, 2]),
        );
        let (logic, branches) = filter.branches();
        assert_eq!(logic, Logic::Or);
        assert_eq!(branches.len(), 2);
        for branch in &branches {
            assert_eq!(branch.len(), 2);
            assert_eq!(branch[0].0, "url");
        }

        let single = Filter::new().eq("a", 1_i64);
        let (logic, branches) = single.branches();
        assert_eq!(logic, Logic::And);
        assert_eq!(branches.len(), 1);
    }

    #[test]
    fn test_like_shapes() {
        assert_eq!(LikePattern::parse("%a%"), LikePattern::Contains("a".into()));
        assert_eq!(LikePattern::parse("a%"), LikePattern::Prefix("a".into()));
        assert_eq!(LikePattern::parse("%a"), LikePattern::Suffix("a".into()));
        assert_eq!(LikePattern::parse("a"), LikePattern::Exact("a".into()));
        assert_eq!(LikePattern::parse("%"), LikePattern::Contains(String::new()));

        let pattern = LikePattern::parse("%50%_off%");
        assert!(pattern.matches("get 50%_off now"));
        assert!(!pattern.matches("get 50 off now"));
        assert_eq!(pattern.to_sql('!'), "%50!%!_off%");
        assert_eq!(LikePattern::parse("a.b%").to_regex(), "^a\\.b");
    }

    #[test]
    fn test_cache_key_serialization_is_stable() {
        let a = Filter::new().eq("b", 1_i64).eq("a", 2_i64);
        let b = Filter::new().eq("a", 2_i64).eq("b", 1_i64);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
