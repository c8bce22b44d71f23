//! Row decoding into JSON maps.
//!
//! Column types are first classified into a `TypeCategory`, then decoded by a
//! single generic routine shared by all three backends. Backend quirks (native
//! JSON in PostgreSQL/MySQL) are handled in the per-row impls.

use crate::models::{DatabaseType, Row as JsonRow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Json,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // SQLite's NUMERIC affinity stores floats
    if db == DatabaseType::SQLite && (lower == "numeric" || lower == "real") {
        return TypeCategory::Float;
    }
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    TypeCategory::Text
}

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> JsonRow;
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> JsonRow {
        columns_to_json(self, DatabaseType::MySQL, |row, idx| {
            row.try_get::<Option<JsonValue>, _>(idx).ok().flatten()
        })
    }
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> JsonRow {
        columns_to_json(self, DatabaseType::PostgreSQL, |row, idx| {
            row.try_get::<Option<JsonValue>, _>(idx).ok().flatten()
        })
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> JsonRow {
        // SQLite stores JSON as TEXT
        columns_to_json(self, DatabaseType::SQLite, |row, idx| {
            row.try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .and_then(|s| serde_json::from_str(&s).ok())
        })
    }
}

fn columns_to_json<R, J>(row: &R, db: DatabaseType, decode_json: J) -> JsonRow
where
    R: Row,
    usize: ColumnIndex<R>,
    J: Fn(&R, usize) -> Option<JsonValue>,
    for<'r> Option<i64>: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Option<i32>: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Option<i16>: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Option<f64>: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Option<f32>: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Option<bool>: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Option<String>: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Option<Vec<u8>>: Decode<'r, R::Database> + Type<R::Database>,
{
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let value = match categorize_type(col.type_info().name(), db) {
                TypeCategory::Integer => decode_integer(row, idx),
                TypeCategory::Float => decode_float(row, idx),
                TypeCategory::Boolean => row
                    .try_get::<Option<bool>, _>(idx)
                    .ok()
                    .flatten()
                    .map(JsonValue::Bool)
                    .unwrap_or(JsonValue::Null),
                TypeCategory::Binary => row
                    .try_get::<Option<Vec<u8>>, _>(idx)
                    .ok()
                    .flatten()
                    .map(|v| JsonValue::String(STANDARD.encode(v)))
                    .unwrap_or(JsonValue::Null),
                TypeCategory::Json => decode_json(row, idx).unwrap_or(JsonValue::Null),
                TypeCategory::Text => row
                    .try_get::<Option<String>, _>(idx)
                    .ok()
                    .flatten()
                    .map(JsonValue::String)
                    .unwrap_or(JsonValue::Null),
            };
            (col.name().to_string(), value)
        })
        .collect()
}

fn decode_integer<R>(row: &R, idx: usize) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> Option<i64>: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Option<i32>: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Option<i16>: Decode<'r, R::Database> + Type<R::Database>,
{
    // PostgreSQL is strict about width, so try each in turn
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(JsonValue::from).unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(JsonValue::from).unwrap_or(JsonValue::Null);
    }
    row.try_get::<Option<i16>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::from)
        .unwrap_or(JsonValue::Null)
}

fn decode_float<R>(row: &R, idx: usize) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> Option<f64>: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Option<f32>: Decode<'r, R::Database> + Type<R::Database>,
{
    let value = match row.try_get::<Option<f64>, _>(idx) {
        Ok(v) => v,
        Err(_) => row
            .try_get::<Option<f32>, _>(idx)
            .ok()
            .flatten()
            .map(f64::from),
    };
    match value {
        Some(v) => serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string())),
        None => JsonValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INTEGER", DatabaseType::SQLite),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("int4", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGSERIAL", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_float() {
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::SQLite),
            TypeCategory::Float
        );
        assert_eq!(
            categorize_type("double precision", DatabaseType::PostgreSQL),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_other() {
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("BLOB", DatabaseType::SQLite),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("BOOLEAN", DatabaseType::MySQL),
            TypeCategory::Boolean
        );
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
    }
}
