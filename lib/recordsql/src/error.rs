use thiserror::Error;

/// Failure converting between a [`Value`](crate::Value) and a Rust field.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("value out of range for {0}")]
    OutOfRange(&'static str),

    #[error("unexpected NULL for non-optional {0}")]
    UnexpectedNull(&'static str),

    #[error("no mapped field at position {0}")]
    UnknownPosition(usize),

    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("modifier {name} failed: {message}")]
    Modifier { name: String, message: String },
}

/// A column that could not be decoded into its destination field.
///
/// `column` is the zero-based index in the row; `record` and `field` are
/// filled in by the scanner once it knows which attribute the column was
/// bound to.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("error scanning column {column}{}: {source}", describe_target(.record, .field))]
pub struct ScanError {
    pub column: usize,
    pub record: Option<String>,
    pub field: Option<String>,
    #[source]
    pub source: ValueError,
}

impl ScanError {
    pub fn new(column: usize, source: ValueError) -> Self {
        Self {
            column,
            record: None,
            field: None,
            source,
        }
    }

    pub(crate) fn with_target(mut self, record: &str, field: &str) -> Self {
        self.record = Some(record.to_string());
        self.field = Some(field.to_string());
        self
    }
}

fn describe_target(record: &Option<String>, field: &Option<String>) -> String {
    match (record, field) {
        (Some(r), Some(f)) => format!(" into {}.{}", r, f),
        (None, Some(f)) => format!(" into {}", f),
        _ => String::new(),
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("record not found")]
    NotFound,

    #[error("nothing to update: no attributes left to set")]
    NoValuesToUpdate,

    #[error("chunk iteration aborted")]
    AbortIteration,

    #[error("unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error("modifier {0} is already registered")]
    DuplicateModifier(String),

    #[error("{record}.{field}: unknown modifier {modifier}")]
    UnknownModifier {
        record: String,
        field: String,
        modifier: String,
    },

    #[error("invalid record {record}: {reason}")]
    InvalidRecord { record: String, reason: String },

    #[error("invalid table {table}: {reason}")]
    InvalidTable { table: String, reason: String },

    #[error("missing or invalid id: column {0} must be set to a non-zero value")]
    MissingId(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("{operation} failed for query `{query}`: {source}")]
    Query {
        operation: &'static str,
        query: String,
        #[source]
        source: Box<StorageError>,
    },

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("the database adapter does not support transactions")]
    TransactionsUnsupported,

    #[error("rollback failed ({rollback}) after error: {source}")]
    Rollback {
        #[source]
        source: Box<StorageError>,
        rollback: Box<StorageError>,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl StorageError {
    /// Attach the failing operation and statement to an adapter error.
    pub(crate) fn in_query(self, operation: &'static str, query: &str) -> Self {
        match self {
            // Sentinels and already-wrapped errors keep their identity.
            StorageError::NotFound
            | StorageError::NoValuesToUpdate
            | StorageError::AbortIteration
            | StorageError::Query { .. } => self,
            other => StorageError::Query {
                operation,
                query: query.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn invalid_record(record: &str, reason: impl Into<String>) -> Self {
        StorageError::InvalidRecord {
            record: record.to_string(),
            reason: reason.into(),
        }
    }

    /// Unwrap `Query` context, returning the innermost error.
    pub fn root(&self) -> &StorageError {
        match self {
            StorageError::Query { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), StorageError::NotFound)
    }
}
