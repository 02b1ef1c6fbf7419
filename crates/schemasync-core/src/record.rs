//! Row values
//!
//! A [`Record`] is one source row scoped to the fields of the current sync
//! plan. Values are kept loosely typed: the engine copies best-effort and
//! lets the target's constraint layer reject what it cannot store.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single column value read from a source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// SQL NULL (or a cleared reference).
    Null,
    /// Character data.
    Text(String),
    /// Integer data (any width widens to 64 bits).
    Integer(i64),
    /// Floating-point data.
    Float(f64),
    /// Exact numeric data (money amounts, quantities).
    Decimal(Decimal),
    /// Boolean data.
    Boolean(bool),
    /// Date without time of day.
    Date(NaiveDate),
    /// Timestamp without time zone, as ERP recency columns are stored.
    Timestamp(NaiveDateTime),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl FieldValue {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Get as a string slice if this is character data.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get as an integer if this is integer data.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as a boolean if this is boolean data.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as a timestamp if this is timestamp data.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Canonical key form used when the value plays the role of a row
    /// identity or a reference to one. Only types that can identify a row
    /// have a key form.
    pub fn as_key(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Integer(i) => Some(i.to_string()),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Null => write!(f, "NULL"),
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Decimal(d) => write!(f, "{d}"),
            FieldValue::Boolean(b) => write!(f, "{b}"),
            FieldValue::Date(d) => write!(f, "{d}"),
            FieldValue::Timestamp(t) => write!(f, "{t}"),
            FieldValue::Binary(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<i32> for FieldValue {
    fn from(i: i32) -> Self {
        FieldValue::Integer(i64::from(i))
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl From<Decimal> for FieldValue {
    fn from(d: Decimal) -> Self {
        FieldValue::Decimal(d)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(d: NaiveDate) -> Self {
        FieldValue::Date(d)
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(t: NaiveDateTime) -> Self {
        FieldValue::Timestamp(t)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(bytes: Vec<u8>) -> Self {
        FieldValue::Binary(bytes)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// One source row, scoped to the fields of the current sync plan.
///
/// Backed by an ordered map so that iteration (and therefore every statement
/// generated from a record) is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    #[serde(flatten)]
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Create a new empty record.
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Set a field value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Set a field using builder pattern.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Get a field value. `None` means the field is missing entirely
    /// (it failed to decode), which is distinct from an explicit NULL.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Check if a field is present (possibly null).
    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Check if a field is missing or null.
    pub fn is_unset(&self, name: &str) -> bool {
        self.fields.get(name).is_none_or(FieldValue::is_null)
    }

    /// Remove a field.
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// Get the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the record is empty.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over all fields in column-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Iterate over fields that carry an actual value (present, not null).
    pub fn non_null_fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter().filter(|(_, v)| !v.is_null())
    }
}

impl FromIterator<(String, FieldValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_basic() {
        let record = Record::new()
            .with("id", 7i64)
            .with("name", "Acme")
            .with("active", true);

        assert_eq!(record.get("id").and_then(FieldValue::as_integer), Some(7));
        assert_eq!(record.get("name").and_then(FieldValue::as_text), Some("Acme"));
        assert_eq!(
            record.get("active").and_then(FieldValue::as_boolean),
            Some(true)
        );
        assert!(!record.has("phone"));
        assert_eq!(record.len(), 3);
    }

    #[test]
    fn test_missing_is_distinct_from_null() {
        let mut record = Record::new().with("name", "Acme");
        record.set("street", FieldValue::Null);

        assert!(record.has("street"));
        assert!(record.is_unset("street"));
        assert!(record.is_unset("phone"));
        assert!(!record.is_unset("name"));
    }

    #[test]
    fn test_non_null_fields_skips_nulls() {
        let mut record = Record::new().with("id", 9i64).with("name", "Acme");
        record.set("currency_id", FieldValue::Null);

        let names: Vec<&str> = record.non_null_fields().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);
    }

    #[test]
    fn test_iteration_is_sorted() {
        let record = Record::new()
            .with("zip", "69001")
            .with("city", "Lyon")
            .with("name", "Acme");

        let names: Vec<&str> = record.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["city", "name", "zip"]);
    }

    #[test]
    fn test_key_form() {
        assert_eq!(FieldValue::from(42i64).as_key(), Some("42".to_string()));
        assert_eq!(
            FieldValue::from("FR-01").as_key(),
            Some("FR-01".to_string())
        );
        assert_eq!(FieldValue::Null.as_key(), None);
        assert_eq!(FieldValue::from(1.5f64).as_key(), None);
    }

    #[test]
    fn test_from_option() {
        assert_eq!(FieldValue::from(Some(3i64)), FieldValue::Integer(3));
        assert_eq!(FieldValue::from(Option::<i64>::None), FieldValue::Null);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let record = Record::new().with("id", 7i64).with("name", "Acme");

        let json = serde_json::to_string(&record).unwrap();
        let parsed: Record = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.get("name").and_then(FieldValue::as_text), Some("Acme"));
    }
}
