//! PostgreSQL row to JSON object conversion
//!
//! Each column is decoded according to its declared PostgreSQL type and
//! turned into the closest JSON value. NULL becomes `Value::Null` for every
//! supported type.

use crate::error::DatabaseError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgRow, Postgres};
use sqlx::{Column, Decode, Row, Type, TypeInfo};
use uuid::Uuid;

/// Decode one nullable column, naming the column and target type on failure
fn decode<'r, T>(
    row: &'r PgRow,
    ordinal: usize,
    column_name: &str,
    target: &str,
) -> Result<Option<T>, DatabaseError>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get::<Option<T>, _>(ordinal).map_err(|e| {
        DatabaseError::QueryError(format!(
            "Failed to extract column '{}' as {}: {}",
            column_name, target, e
        ))
    })
}

/// JSON value for a NUMERIC: an integer or float when it survives the trip, otherwise its text
pub(crate) fn decimal_to_json(value: Decimal) -> Value {
    if value.fract().is_zero() {
        if let Some(int) = value.to_i64() {
            return Value::Number(Number::from(int));
        }
    }
    // f64 Display is the shortest text that round-trips, so compare on that
    let exact_float = value.to_f64().filter(|f| {
        f.is_finite()
            && Decimal::from_str_exact(&f.to_string())
                .is_ok_and(|d| d.normalize() == value.normalize())
    });
    match exact_float.and_then(Number::from_f64) {
        Some(number) => Value::Number(number),
        None => Value::String(value.normalize().to_string()),
    }
}

fn float_to_json(value: f64) -> Value {
    // NaN and infinities have no JSON number form
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(value.to_string()))
}

fn array_to_json<T>(items: Vec<T>, to_value: impl Fn(T) -> Value) -> Value {
    Value::Array(items.into_iter().map(to_value).collect())
}

/// Convert a single column of `row` into a JSON value
fn column_to_json(row: &PgRow, ordinal: usize, name: &str, type_name: &str) -> Result<Value, DatabaseError> {
    let value = match type_name {
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "UNKNOWN" => {
            decode::<String>(row, ordinal, name, "TEXT")?.map(Value::String)
        }
        "INT2" => decode::<i16>(row, ordinal, name, "INT2")?.map(Value::from),
        "INT4" => decode::<i32>(row, ordinal, name, "INT4")?.map(Value::from),
        "INT8" => decode::<i64>(row, ordinal, name, "INT8")?.map(Value::from),
        "FLOAT4" => decode::<f32>(row, ordinal, name, "FLOAT4")?.map(|v| float_to_json(f64::from(v))),
        "FLOAT8" => decode::<f64>(row, ordinal, name, "FLOAT8")?.map(float_to_json),
        "NUMERIC" => decode::<Decimal>(row, ordinal, name, "NUMERIC")?.map(decimal_to_json),
        "BOOL" => decode::<bool>(row, ordinal, name, "BOOL")?.map(Value::Bool),
        "UUID" => decode::<Uuid>(row, ordinal, name, "UUID")?.map(|v| Value::String(v.to_string())),
        "TIMESTAMPTZ" => decode::<DateTime<Utc>>(row, ordinal, name, "TIMESTAMPTZ")?
            .map(|v| Value::String(v.to_rfc3339())),
        "TIMESTAMP" => decode::<NaiveDateTime>(row, ordinal, name, "TIMESTAMP")?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "DATE" => decode::<NaiveDate>(row, ordinal, name, "DATE")?.map(|v| Value::String(v.to_string())),
        "TIME" => decode::<NaiveTime>(row, ordinal, name, "TIME")?.map(|v| Value::String(v.to_string())),
        "JSON" | "JSONB" => decode::<Value>(row, ordinal, name, "JSON")?,
        "BYTEA" => decode::<Vec<u8>>(row, ordinal, name, "BYTEA")?
            .map(|bytes| Value::String(BASE64.encode(bytes))),
        "TEXT[]" | "VARCHAR[]" | "NAME[]" => decode::<Vec<String>>(row, ordinal, name, "TEXT[]")?
            .map(|items| array_to_json(items, Value::String)),
        "INT4[]" => decode::<Vec<i32>>(row, ordinal, name, "INT4[]")?
            .map(|items| array_to_json(items, Value::from)),
        "INT8[]" => decode::<Vec<i64>>(row, ordinal, name, "INT8[]")?
            .map(|items| array_to_json(items, Value::from)),
        "UUID[]" => decode::<Vec<Uuid>>(row, ordinal, name, "UUID[]")?
            .map(|items| array_to_json(items, |v| Value::String(v.to_string()))),
        other => {
            return Err(DatabaseError::QueryError(format!(
                "Unsupported column type '{}' for column '{}'. \
                 Supported types: text, integers, floats, numeric, boolean, uuid, \
                 date/time, json/jsonb, bytea, text/integer/uuid arrays. \
                 Consider casting in SQL: CAST({} AS TEXT)",
                other, name, name
            )));
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Convert a result row into a JSON object keyed by column name
///
/// Later columns win when a query projects the same name twice.
pub fn row_to_json(row: &PgRow) -> Result<Map<String, Value>, DatabaseError> {
    let mut object = Map::with_capacity(row.columns().len());
    for column in row.columns() {
        let value = column_to_json(row, column.ordinal(), column.name(), column.type_info().name())?;
        object.insert(column.name().to_string(), value);
    }
    Ok(object)
}
