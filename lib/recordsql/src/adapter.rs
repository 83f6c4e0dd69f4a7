//! Database adapter traits.
//!
//! The core never talks to a database directly. Backends implement
//! [`DbAdapter`] (and optionally [`Transaction`]) over their own driver.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::{StorageError, Value};

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Driver-reported id of the last inserted row, where the backend has one.
    pub last_insert_id: Option<i64>,
}

/// A cursor over the rows of a query.
///
/// Each row holds one [`Value`] per entry of [`Rows::columns`].
#[async_trait]
pub trait Rows: Send {
    /// Column names of the result set.
    fn columns(&self) -> Result<Vec<String>, StorageError>;

    /// Advance to the next row. `Ok(None)` once the cursor is exhausted.
    async fn next(&mut self) -> Result<Option<Vec<Value>>, StorageError>;

    /// Release the cursor.
    async fn close(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Trait for executing statements against a database backend.
#[async_trait]
pub trait DbAdapter: Send + Sync {
    /// Execute a statement and report the rows it affected.
    async fn exec(&self, query: &str, params: &[Value]) -> Result<ExecResult, StorageError>;

    /// Run a query and return a cursor over its rows.
    async fn query(&self, query: &str, params: &[Value]) -> Result<Box<dyn Rows>, StorageError>;

    /// Begin a transaction.
    ///
    /// Adapters without transaction support keep the default, which fails.
    async fn begin(&self) -> Result<Box<dyn Transaction>, StorageError> {
        Err(StorageError::TransactionsUnsupported)
    }

    /// Whether this adapter already is a transaction.
    fn is_transaction(&self) -> bool {
        false
    }
}

/// Trait for executing statements within a transaction.
#[async_trait]
pub trait Transaction: DbAdapter {
    /// Commit the transaction.
    async fn commit(&self) -> Result<(), StorageError>;

    /// Rollback the transaction.
    async fn rollback(&self) -> Result<(), StorageError>;

    /// This transaction as a plain adapter.
    fn as_adapter(&self) -> &dyn DbAdapter;
}

/// An in-memory cursor.
///
/// Backends that materialize their results can hand this back from
/// [`DbAdapter::query`].
#[derive(Debug, Clone, Default)]
pub struct VecRows {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
}

impl VecRows {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }
}

#[async_trait]
impl Rows for VecRows {
    fn columns(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.columns.clone())
    }

    async fn next(&mut self) -> Result<Option<Vec<Value>>, StorageError> {
        Ok(self.rows.pop_front())
    }
}
