//! Row filters applied uniformly to remote queries and local fallbacks.
//!
//! A filter is a conjunction of per-field conditions. The remote client
//! translates it into query parameters; the engine evaluates the same
//! filter against local records when a read falls back to the store, so
//! callers see the same subset on both paths.

use std::cmp::Ordering;

use serde_json::Value;

use crate::record::Record;

/// A single per-field condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals value
    Eq { field: String, value: Value },
    /// Field is greater than or equal to value
    Gte { field: String, value: Value },
    /// Field is less than or equal to value
    Lte { field: String, value: Value },
}

impl Condition {
    /// The field this condition constrains.
    pub fn field(&self) -> &str {
        match self {
            Self::Eq { field, .. } | Self::Gte { field, .. } | Self::Lte { field, .. } => field,
        }
    }
}

/// Conjunction of conditions over one table's rows.
///
/// Date ranges are expressed as `gte`/`lte` over ISO-8601 strings, which
/// order correctly under lexicographic comparison.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// Create an empty filter (matches every record).
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Require `field >= value`.
    #[must_use]
    pub fn gte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Gte {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Require `field <= value`.
    #[must_use]
    pub fn lte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Lte {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Evaluate the filter against a record.
    ///
    /// A condition on a field the record does not carry never matches,
    /// as does a comparison between incompatible value types.
    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|condition| {
            let Some(actual) = field_value(record, condition.field()) else {
                return false;
            };
            match condition {
                Condition::Eq { value, .. } => actual == *value,
                Condition::Gte { value, .. } => {
                    matches!(compare(&actual, value), Some(Ordering::Greater | Ordering::Equal))
                }
                Condition::Lte { value, .. } => {
                    matches!(compare(&actual, value), Some(Ordering::Less | Ordering::Equal))
                }
            }
        })
    }
}

/// Look up a field on a record, covering sync metadata as well as the
/// soft-typed payload.
fn field_value(record: &Record, field: &str) -> Option<Value> {
    match field {
        "id" => Some(Value::String(record.id.clone())),
        "user_id" => Some(Value::String(record.user_id.clone())),
        "synced" => Some(Value::Bool(record.synced)),
        _ => record.fields.get(field).cloned(),
    }
}

/// Order two JSON values of the same scalar type. Mixed or non-scalar
/// types do not compare.
fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().partial_cmp(&b.as_f64()),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn record(pairs: &[(&str, Value)]) -> Record {
        let fields: Map<String, Value> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        Record::new("r1", "u1", fields)
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::new().matches(&record(&[])));
    }

    #[test]
    fn eq_matches_payload_field() {
        let rec = record(&[("category", json!("groceries"))]);
        assert!(Filter::new().eq("category", "groceries").matches(&rec));
        assert!(!Filter::new().eq("category", "rent").matches(&rec));
    }

    #[test]
    fn eq_matches_metadata_fields() {
        let rec = record(&[]);
        assert!(Filter::new().eq("user_id", "u1").matches(&rec));
        assert!(Filter::new().eq("synced", false).matches(&rec));
    }

    #[test]
    fn date_range_over_iso_strings() {
        let rec = record(&[("logged_at", json!("2026-08-07T09:00:00Z"))]);
        let today = Filter::new()
            .gte("logged_at", "2026-08-07T00:00:00Z")
            .lte("logged_at", "2026-08-07T23:59:59Z");
        assert!(today.matches(&rec));

        let yesterday = Filter::new()
            .gte("logged_at", "2026-08-06T00:00:00Z")
            .lte("logged_at", "2026-08-06T23:59:59Z");
        assert!(!yesterday.matches(&rec));
    }

    #[test]
    fn numeric_bounds() {
        let rec = record(&[("amount", json!(40))]);
        assert!(Filter::new().gte("amount", 40).matches(&rec));
        assert!(!Filter::new().lte("amount", 39.5).matches(&rec));
    }

    #[test]
    fn missing_field_never_matches() {
        let rec = record(&[]);
        assert!(!Filter::new().eq("missing", "x").matches(&rec));
        assert!(!Filter::new().gte("missing", 1).matches(&rec));
    }

    #[test]
    fn mixed_types_do_not_compare() {
        let rec = record(&[("amount", json!("12"))]);
        assert!(!Filter::new().gte("amount", 10).matches(&rec));
    }

    #[test]
    fn conjunction_requires_all_conditions() {
        let rec = record(&[("kind", json!("habit")), ("streak", json!(5))]);
        assert!(Filter::new().eq("kind", "habit").gte("streak", 3).matches(&rec));
        assert!(!Filter::new().eq("kind", "habit").gte("streak", 6).matches(&rec));
    }
}
