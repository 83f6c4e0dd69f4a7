//! Conversion between recordsql values and PostgreSQL arguments and rows.

use recordsql::{StorageError, Value, VecRows};
use sqlx::encode::{Encode, IsNull};
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgRow, PgTypeInfo};
use sqlx::{Arguments, Column, Postgres, Row, Type, TypeInfo};

/// OID of PostgreSQL's `unknown` pseudo-type.
const UNKNOWN_OID: Oid = Oid(705);

/// A NULL parameter whose type the server infers from the target column.
///
/// `Value::Null` carries no column type, and a NULL declared as TEXT is not
/// accepted by bigint or timestamptz columns.
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(UNKNOWN_OID)
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

fn storage_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::StorageError(e.to_string())
}

/// Bind positional parameters in order.
pub fn bind_params(params: &[Value]) -> Result<PgArguments, StorageError> {
    let mut args = PgArguments::default();
    for value in params {
        bind_value(&mut args, value)?;
    }
    Ok(args)
}

/// Bind a Value to PgArguments.
pub fn bind_value(args: &mut PgArguments, value: &Value) -> Result<(), StorageError> {
    match value {
        Value::Null => args.add(UntypedNull),
        Value::Bool(b) => args.add(*b),
        Value::Int(n) => args.add(*n),
        Value::UInt(n) => {
            // PostgreSQL doesn't have unsigned, use i64
            let n = i64::try_from(*n)
                .map_err(|_| StorageError::StorageError(format!("{} does not fit in BIGINT", n)))?;
            args.add(n)
        }
        Value::Float(n) => args.add(*n),
        Value::String(s) => args.add(s.as_str()),
        Value::Bytes(b) => args.add(b.as_slice()),
        Value::Json(v) => args.add(v.clone()),
        Value::Datetime(dt) => args.add(*dt),
    }
    .map_err(storage_error)
}

/// Extract the column at `idx` from a row as a Value.
pub fn extract_column_value(row: &PgRow, idx: usize) -> Result<Value, StorageError> {
    let col = &row.columns()[idx];
    let type_name = col.type_info().name();

    // Handle based on PostgreSQL type
    let value = match type_name {
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)
            .map_err(storage_error)?
            .map(Value::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)
            .map_err(storage_error)?
            .map(|n| Value::Int(n.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .map_err(storage_error)?
            .map(|n| Value::Int(n.into())),
        "INT8" => row
            .try_get::<Option<i64>, _>(idx)
            .map_err(storage_error)?
            .map(Value::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .map_err(storage_error)?
            .map(|n| Value::Float(n.into())),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(idx)
            .map_err(storage_error)?
            .map(Value::Float),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .map_err(storage_error)?
            .map(Value::Datetime),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map_err(storage_error)?
            .map(|dt| Value::Datetime(dt.and_utc())),
        "JSONB" | "JSON" => row
            .try_get::<Option<serde_json::Value>, _>(idx)
            .map_err(storage_error)?
            .map(Value::Json),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .map_err(storage_error)?
            .map(Value::Bytes),
        // Default: treat as string (VARCHAR, TEXT, CHAR, etc.)
        _ => row
            .try_get::<Option<String>, _>(idx)
            .map_err(storage_error)?
            .map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}

/// Materialize fetched rows as an in-memory cursor.
///
/// `columns` is only consulted when there are no rows to read names from.
pub fn rows_to_cursor(rows: &[PgRow], columns: Vec<String>) -> Result<VecRows, StorageError> {
    let columns = match rows.first() {
        Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
        None => columns,
    };
    let values = rows
        .iter()
        .map(|row| {
            (0..row.columns().len())
                .map(|idx| extract_column_value(row, idx))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(VecRows::new(columns, values))
}
