//! Dynamic values exchanged with database adapters.
//!
//! Record fields are converted to [`Value`] when building statements and
//! converted back when scanning rows. The conversions live in [`ToValue`] and
//! [`FromValue`], implemented here for the common Rust types.

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::ValueError;

/// A value that can be bound to a query parameter or read from a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Datetime(DateTime<Utc>),
}

impl Value {
    /// Short type name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
            Value::Datetime(_) => "datetime",
        }
    }

    /// Whether this is the zero value of its type.
    ///
    /// Identifier columns holding a zero value are left out of inserts so the
    /// database can generate them, and are rejected by updates. Timestamps
    /// have no unset value; the epoch is a real instant.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !*b,
            Value::Int(n) => *n == 0,
            Value::UInt(n) => *n == 0,
            Value::Float(n) => *n == 0.0,
            Value::String(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Json(v) => v.is_null(),
            Value::Datetime(_) => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

fn mismatch(expected: &'static str, found: &Value) -> ValueError {
    ValueError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

/// Conversion of a record field into a [`Value`].
///
/// Fails only when the field cannot be represented, such as a JSON document
/// whose `Serialize` impl rejects it.
pub trait ToValue {
    fn to_value(&self) -> Result<Value, ValueError>;
}

/// Conversion of a [`Value`] read from a row into a record field.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, ValueError>;
}

impl ToValue for Value {
    fn to_value(&self) -> Result<Value, ValueError> {
        Ok(self.clone())
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        Ok(value)
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Result<Value, ValueError> {
        Ok(Value::Bool(*self))
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(b) => Ok(b),
            // sqlite and mysql report booleans as integers
            Value::Int(n) => Ok(n != 0),
            Value::UInt(n) => Ok(n != 0),
            Value::Null => Err(ValueError::UnexpectedNull("bool")),
            other => Err(mismatch("bool", &other)),
        }
    }
}

macro_rules! signed_value {
    ($($ty:ty),*) => {$(
        impl ToValue for $ty {
            fn to_value(&self) -> Result<Value, ValueError> {
                Ok(Value::Int(i64::from(*self)))
            }
        }

        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self, ValueError> {
                match value {
                    Value::Int(n) => <$ty>::try_from(n)
                        .map_err(|_| ValueError::OutOfRange(stringify!($ty))),
                    Value::UInt(n) => <$ty>::try_from(n)
                        .map_err(|_| ValueError::OutOfRange(stringify!($ty))),
                    Value::Null => Err(ValueError::UnexpectedNull(stringify!($ty))),
                    other => Err(mismatch(stringify!($ty), &other)),
                }
            }
        }
    )*};
}

macro_rules! unsigned_value {
    ($($ty:ty),*) => {$(
        impl ToValue for $ty {
            fn to_value(&self) -> Result<Value, ValueError> {
                Ok(Value::UInt(u64::from(*self)))
            }
        }

        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self, ValueError> {
                match value {
                    Value::Int(n) => <$ty>::try_from(n)
                        .map_err(|_| ValueError::OutOfRange(stringify!($ty))),
                    Value::UInt(n) => <$ty>::try_from(n)
                        .map_err(|_| ValueError::OutOfRange(stringify!($ty))),
                    Value::Null => Err(ValueError::UnexpectedNull(stringify!($ty))),
                    other => Err(mismatch(stringify!($ty), &other)),
                }
            }
        }
    )*};
}

signed_value!(i8, i16, i32, i64);
unsigned_value!(u8, u16, u32, u64);

impl ToValue for f64 {
    fn to_value(&self) -> Result<Value, ValueError> {
        Ok(Value::Float(*self))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Float(n) => Ok(n),
            Value::Int(n) => Ok(n as f64),
            Value::UInt(n) => Ok(n as f64),
            Value::Null => Err(ValueError::UnexpectedNull("f64")),
            other => Err(mismatch("f64", &other)),
        }
    }
}

impl ToValue for f32 {
    fn to_value(&self) -> Result<Value, ValueError> {
        Ok(Value::Float(f64::from(*self)))
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        f64::from_value(value).map(|n| n as f32)
    }
}

impl ToValue for String {
    fn to_value(&self) -> Result<Value, ValueError> {
        Ok(Value::String(self.clone()))
    }
}

impl ToValue for &str {
    fn to_value(&self) -> Result<Value, ValueError> {
        Ok(Value::String((*self).to_string()))
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::String(s) => Ok(s),
            Value::Bytes(b) => String::from_utf8(b).map_err(|_| ValueError::TypeMismatch {
                expected: "utf-8 string",
                found: "bytes",
            }),
            Value::Null => Err(ValueError::UnexpectedNull("String")),
            other => Err(mismatch("String", &other)),
        }
    }
}

impl ToValue for Vec<u8> {
    fn to_value(&self) -> Result<Value, ValueError> {
        Ok(Value::Bytes(self.clone()))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bytes(b) => Ok(b),
            Value::String(s) => Ok(s.into_bytes()),
            Value::Null => Err(ValueError::UnexpectedNull("Vec<u8>")),
            other => Err(mismatch("Vec<u8>", &other)),
        }
    }
}

impl ToValue for DateTime<Utc> {
    fn to_value(&self) -> Result<Value, ValueError> {
        Ok(Value::Datetime(*self))
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Datetime(dt) => Ok(dt),
            // sqlite stores timestamps as RFC 3339 text
            Value::String(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| ValueError::TypeMismatch {
                    expected: "RFC 3339 datetime",
                    found: "string",
                }),
            Value::Null => Err(ValueError::UnexpectedNull("DateTime<Utc>")),
            other => Err(mismatch("datetime", &other)),
        }
    }
}

impl ToValue for serde_json::Value {
    fn to_value(&self) -> Result<Value, ValueError> {
        Ok(Value::Json(self.clone()))
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Json(v) => Ok(v),
            Value::String(s) => {
                serde_json::from_str(&s).map_err(|e| ValueError::Json(e.to_string()))
            }
            Value::Bytes(b) => {
                serde_json::from_slice(&b).map_err(|e| ValueError::Json(e.to_string()))
            }
            Value::Null => Ok(serde_json::Value::Null),
            other => Err(mismatch("json", &other)),
        }
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Result<Value, ValueError> {
        match self {
            Some(v) => v.to_value(),
            None => Ok(Value::Null),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// A field stored as a JSON document.
///
/// Pairs with the `json` modifier, which encodes the document to text on the
/// way in and parses text or bytes on the way out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Serialize> ToValue for Json<T> {
    fn to_value(&self) -> Result<Value, ValueError> {
        serde_json::to_value(&self.0)
            .map(Value::Json)
            .map_err(|e| ValueError::Json(e.to_string()))
    }
}

impl<T: DeserializeOwned> FromValue for Json<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        let json = serde_json::Value::from_value(value)?;
        serde_json::from_value(json)
            .map(Json)
            .map_err(|e| ValueError::Json(e.to_string()))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::Datetime(dt)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}
