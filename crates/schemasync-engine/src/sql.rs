//! SQL building blocks
//!
//! Identifier quoting, typed parameter binding, and best-effort row
//! decoding shared by the introspector, validator, and executor. Identifier
//! arguments must only ever come from introspected schema metadata or
//! validated configuration, never from free-form input.

use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};

use schemasync_core::record::{FieldValue, Record};

/// Quote an SQL identifier, doubling any embedded quote characters.
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Bind a field value as a typed positional parameter.
pub fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &FieldValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        FieldValue::Null => query.bind(Option::<String>::None),
        FieldValue::Text(s) => query.bind(s.clone()),
        FieldValue::Integer(i) => query.bind(*i),
        FieldValue::Float(f) => query.bind(*f),
        FieldValue::Decimal(d) => query.bind(*d),
        FieldValue::Boolean(b) => query.bind(*b),
        FieldValue::Date(d) => query.bind(*d),
        FieldValue::Timestamp(t) => query.bind(*t),
        FieldValue::Binary(b) => query.bind(b.clone()),
    }
}

/// Decode one column from a row, trying the supported value types in turn.
///
/// A column whose type matches none of them yields `None` (the field goes
/// missing from the record rather than failing the row; the destination
/// constraint layer is the arbiter of what can be stored anyway).
pub fn decode_field(row: &PgRow, column: &str) -> Option<FieldValue> {
    if let Ok(v) = row.try_get::<Option<String>, _>(column) {
        return Some(FieldValue::from(v));
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(column) {
        return Some(FieldValue::from(v));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(column) {
        return Some(FieldValue::from(v));
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(column) {
        return Some(v.map_or(FieldValue::Null, |i| FieldValue::Integer(i64::from(i))));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(column) {
        return Some(FieldValue::from(v));
    }
    if let Ok(v) = row.try_get::<Option<Decimal>, _>(column) {
        return Some(v.map_or(FieldValue::Null, FieldValue::Decimal));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(column) {
        return Some(FieldValue::from(v));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(column) {
        return Some(FieldValue::from(v));
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(column) {
        return Some(v.map_or(FieldValue::Null, |t| FieldValue::Timestamp(t.naive_utc())));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(column) {
        return Some(v.map_or(FieldValue::Null, FieldValue::Date));
    }
    if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(column) {
        return Some(v.map_or(FieldValue::Null, |u| FieldValue::Text(u.to_string())));
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(column) {
        return Some(FieldValue::from(v));
    }
    None
}

/// Decode the named columns of a row into a [`Record`].
pub fn record_from_row(row: &PgRow, columns: &[String]) -> Record {
    columns
        .iter()
        .filter_map(|column| decode_field(row, column).map(|value| (column.clone(), value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier_plain() {
        assert_eq!(quote_identifier("res_partner"), "\"res_partner\"");
        assert_eq!(quote_identifier("write_date"), "\"write_date\"");
    }

    #[test]
    fn test_quote_identifier_doubles_quotes() {
        assert_eq!(
            quote_identifier("name\"; DROP TABLE res_partner; --"),
            "\"name\"\"; DROP TABLE res_partner; --\""
        );
    }
}
