use std::collections::{BTreeMap, HashMap};

use crate::{Dialect, InsertMethod, Value};

/// A target table and its identifier columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub id_columns: Vec<String>,
}

impl Table {
    /// A table identified by a single `id` column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_columns: vec!["id".to_string()],
        }
    }

    /// Replace the identifier columns (composite keys list several).
    pub fn with_id_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_id(&self, column: &str) -> bool {
        self.id_columns.iter().any(|c| c == column)
    }

    pub fn insert_method(&self, dialect: Dialect) -> InsertMethod {
        dialect.insert_method(self.id_columns.len())
    }
}

/// Identifier of the row to delete.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    /// Value of the only identifier column.
    Single(Value),
    /// Value of every identifier column, by column name.
    Columns(BTreeMap<String, Value>),
}

macro_rules! single_key {
    ($($ty:ty),*) => {$(
        impl From<$ty> for Key {
            fn from(value: $ty) -> Self {
                Key::Single(value.into())
            }
        }
    )*};
}

single_key!(i32, i64, u64, &str, String);

impl From<Value> for Key {
    fn from(value: Value) -> Self {
        Key::Single(value)
    }
}

impl From<BTreeMap<String, Value>> for Key {
    fn from(columns: BTreeMap<String, Value>) -> Self {
        Key::Columns(columns)
    }
}

impl From<HashMap<String, Value>> for Key {
    fn from(columns: HashMap<String, Value>) -> Self {
        Key::Columns(columns.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Key {
    fn from(columns: [(K, V); N]) -> Self {
        Key::Columns(
            columns
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
