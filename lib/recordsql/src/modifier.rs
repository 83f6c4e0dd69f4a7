//! Per-attribute codecs selected by name from a field's column tag.
//!
//! A tag like `#[column("address,json")]` binds the `address` column through
//! the `json` modifier. Modifiers live in a [`ModifierRegistry`] handed to the
//! catalog through [`Config`](crate::Config).

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::{Dialect, StorageError, Value, ValueError};

/// The statement a modifier hook runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Insert,
    Update,
    Query,
}

/// Context passed to modifier hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    pub dialect: Dialect,
    pub method: Method,
}

type HookFn = dyn Fn(&OpInfo, Value) -> Result<Value, ValueError> + Send + Sync;

/// Encode/decode hooks plus skip flags for one attribute.
#[derive(Clone, Default)]
pub struct Modifier {
    pub skip_inserts: bool,
    pub skip_updates: bool,
    encode: Option<Arc<HookFn>>,
    decode: Option<Arc<HookFn>>,
}

impl Modifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave the attribute out of INSERT statements.
    pub fn skip_inserts(mut self) -> Self {
        self.skip_inserts = true;
        self
    }

    /// Leave the attribute out of UPDATE statements.
    pub fn skip_updates(mut self) -> Self {
        self.skip_updates = true;
        self
    }

    /// Hook run on the attribute value before it is bound as a parameter.
    pub fn with_encode<F>(mut self, encode: F) -> Self
    where
        F: Fn(&OpInfo, Value) -> Result<Value, ValueError> + Send + Sync + 'static,
    {
        self.encode = Some(Arc::new(encode));
        self
    }

    /// Hook run on the raw column value before it is stored in the attribute.
    pub fn with_decode<F>(mut self, decode: F) -> Self
    where
        F: Fn(&OpInfo, Value) -> Result<Value, ValueError> + Send + Sync + 'static,
    {
        self.decode = Some(Arc::new(decode));
        self
    }

    pub fn has_encode(&self) -> bool {
        self.encode.is_some()
    }

    pub fn has_decode(&self) -> bool {
        self.decode.is_some()
    }

    pub fn encode(&self, op: &OpInfo, value: Value) -> Result<Value, ValueError> {
        match &self.encode {
            Some(encode) => encode(op, value),
            None => Ok(value),
        }
    }

    pub fn decode(&self, op: &OpInfo, value: Value) -> Result<Value, ValueError> {
        match &self.decode {
            Some(decode) => decode(op, value),
            None => Ok(value),
        }
    }
}

impl fmt::Debug for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Modifier")
            .field("skip_inserts", &self.skip_inserts)
            .field("skip_updates", &self.skip_updates)
            .field("encode", &self.encode.is_some())
            .field("decode", &self.decode.is_some())
            .finish()
    }
}

/// Name → modifier lookup shared by every catalog built from one config.
///
/// Registration is expected at startup; registering a name twice fails
/// instead of replacing the first modifier.
#[derive(Debug, Default)]
pub struct ModifierRegistry {
    modifiers: DashMap<String, Arc<Modifier>>,
}

impl ModifierRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the builtin modifiers:
    ///
    /// - `json`: stores the attribute as a JSON document
    /// - `skip_inserts` / `skip_updates`: omit the attribute from those statements
    /// - `time_now_utc`: binds the current UTC time on every write
    /// - `time_now_utc/skip_updates`: binds the current time on insert only
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let builtins = [
            ("json", json_modifier()),
            ("skip_inserts", Modifier::new().skip_inserts()),
            ("skip_updates", Modifier::new().skip_updates()),
            ("time_now_utc", time_now_modifier()),
            ("time_now_utc/skip_updates", time_now_modifier().skip_updates()),
        ];
        for (name, modifier) in builtins {
            registry
                .modifiers
                .insert(name.to_string(), Arc::new(modifier));
        }
        registry
    }

    /// Register a modifier under `name`.
    pub fn register(&self, name: impl Into<String>, modifier: Modifier) -> Result<(), StorageError> {
        match self.modifiers.entry(name.into()) {
            Entry::Occupied(entry) => Err(StorageError::DuplicateModifier(entry.key().clone())),
            Entry::Vacant(entry) => {
                tracing::debug!(modifier = entry.key().as_str(), "registered modifier");
                entry.insert(Arc::new(modifier));
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Modifier>> {
        self.modifiers.get(name).map(|m| Arc::clone(m.value()))
    }
}

fn json_modifier() -> Modifier {
    Modifier::new()
        .with_encode(|op, value| {
            let json = match value {
                Value::Null => return Ok(Value::Null),
                other => to_json(other),
            };
            match op.dialect {
                // jsonb binds natively
                Dialect::Postgres => Ok(Value::Json(json)),
                _ => Ok(Value::String(json.to_string())),
            }
        })
        .with_decode(|_, value| match value {
            Value::Null => Ok(Value::Null),
            Value::Json(v) => Ok(Value::Json(v)),
            Value::String(s) => serde_json::from_str(&s)
                .map(Value::Json)
                .map_err(|e| ValueError::Json(e.to_string())),
            Value::Bytes(b) => serde_json::from_slice(&b)
                .map(Value::Json)
                .map_err(|e| ValueError::Json(e.to_string())),
            other => Ok(Value::Json(to_json(other))),
        })
}

fn time_now_modifier() -> Modifier {
    Modifier::new().with_encode(|_, _| Ok(Value::Datetime(datetime_micros())))
}

fn to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => b.into(),
        Value::Int(n) => n.into(),
        Value::UInt(n) => n.into(),
        Value::Float(n) => n.into(),
        Value::String(s) => s.into(),
        Value::Bytes(b) => b.into(),
        Value::Json(v) => v,
        Value::Datetime(dt) => dt
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
            .into(),
    }
}

/// Current time truncated to microsecond precision (6 decimal places).
fn datetime_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PG_INSERT: OpInfo = OpInfo {
        dialect: Dialect::Postgres,
        method: Method::Insert,
    };

    const SQLITE_INSERT: OpInfo = OpInfo {
        dialect: Dialect::Sqlite,
        method: Method::Insert,
    };

    #[test]
    fn duplicate_registration_fails() {
        let registry = ModifierRegistry::new();
        registry.register("upper", Modifier::new()).unwrap();
        let err = registry.register("upper", Modifier::new()).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateModifier(name) if name == "upper"));
    }

    #[test]
    fn builtins_cannot_be_replaced() {
        let registry = ModifierRegistry::with_builtins();
        assert!(registry.register("json", Modifier::new()).is_err());
        assert!(registry.get("time_now_utc/skip_updates").unwrap().skip_updates);
        assert!(registry.get("skip_inserts").unwrap().skip_inserts);
    }

    #[test]
    fn json_encodes_per_dialect() {
        let json = json_modifier();
        let value = Value::Json(serde_json::json!({"a": 1}));
        assert_eq!(json.encode(&PG_INSERT, value.clone()).unwrap(), value);
        assert_eq!(
            json.encode(&SQLITE_INSERT, value).unwrap(),
            Value::String(r#"{"a":1}"#.to_string())
        );
    }

    #[test]
    fn json_decodes_text() {
        let json = json_modifier();
        let decoded = json
            .decode(&SQLITE_INSERT, Value::String("[1,2]".into()))
            .unwrap();
        assert_eq!(decoded, Value::Json(serde_json::json!([1, 2])));
        assert!(json.decode(&SQLITE_INSERT, Value::String("{".into())).is_err());
    }

    #[test]
    fn time_now_ignores_input() {
        let modifier = time_now_modifier();
        let encoded = modifier.encode(&PG_INSERT, Value::Null).unwrap();
        assert!(matches!(encoded, Value::Datetime(_)));
    }
}
