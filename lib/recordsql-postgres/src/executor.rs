//! PostgreSQL implementation of DbAdapter.

const DEFAULT_MAX_CONNECTIONS: u32 = 16;

use std::ops::Deref;

use async_trait::async_trait;
use recordsql::{DbAdapter, ExecResult, Rows, StorageError, Transaction, Value};
use sqlx::postgres::{PgPoolOptions, PgStatement};
use sqlx::{Column, Executor, Postgres, Statement};
use tokio::sync::Mutex;

use crate::bind::{bind_params, rows_to_cursor};

/// Connection configuration for the PostgreSQL adapter.
///
/// This enum is extensible for future authentication methods.
#[derive(Debug, Clone)]
pub enum ConnectionConfig {
    /// Connect using a database URL string.
    Url(String),
}

impl From<&str> for ConnectionConfig {
    fn from(url: &str) -> Self {
        ConnectionConfig::Url(url.to_string())
    }
}

impl From<String> for ConnectionConfig {
    fn from(url: String) -> Self {
        ConnectionConfig::Url(url)
    }
}

impl From<&String> for ConnectionConfig {
    fn from(url: &String) -> Self {
        ConnectionConfig::Url(url.clone())
    }
}

fn storage_error(e: sqlx::Error) -> StorageError {
    StorageError::StorageError(e.to_string())
}

/// Wrapper around sqlx::PgPool that implements DbAdapter.
#[derive(Clone, Debug)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    /// Create a new PgPool from an sqlx PgPool.
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self(pool)
    }

    /// Connect to a PostgreSQL database.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        Self::connect_with(url, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Connect with an explicit pool size.
    pub async fn connect_with(
        config: impl Into<ConnectionConfig>,
        max_connections: u32,
    ) -> Result<Self, StorageError> {
        let ConnectionConfig::Url(url) = config.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await
            .map_err(storage_error)?;
        tracing::debug!(max_connections, "connected to postgres");
        Ok(Self(pool))
    }

    /// Get the inner sqlx::PgPool.
    pub fn inner(&self) -> &sqlx::PgPool {
        &self.0
    }
}

impl Deref for PgPool {
    type Target = sqlx::PgPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Column names of a prepared statement, for result sets without rows.
fn column_names(statement: &PgStatement<'_>) -> Vec<String> {
    statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect()
}

#[async_trait]
impl DbAdapter for PgPool {
    async fn exec(&self, query: &str, params: &[Value]) -> Result<ExecResult, StorageError> {
        let args = bind_params(params)?;
        let result = sqlx::query_with(query, args)
            .execute(&self.0)
            .await
            .map_err(storage_error)?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }

    async fn query(&self, query: &str, params: &[Value]) -> Result<Box<dyn Rows>, StorageError> {
        let args = bind_params(params)?;
        let rows = sqlx::query_with(query, args)
            .fetch_all(&self.0)
            .await
            .map_err(storage_error)?;
        let columns = if rows.is_empty() {
            let statement = (&self.0).prepare(query).await.map_err(storage_error)?;
            column_names(&statement)
        } else {
            Vec::new()
        };
        Ok(Box::new(rows_to_cursor(&rows, columns)?))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StorageError> {
        let tx = self.0.begin().await.map_err(storage_error)?;
        Ok(Box::new(PgTransaction {
            tx: Mutex::new(Some(tx)),
        }))
    }
}

/// PostgreSQL transaction wrapper implementing Transaction.
///
/// Statements are serialized on the underlying connection. Once committed
/// or rolled back every further call fails.
pub struct PgTransaction {
    tx: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
}

fn finished() -> StorageError {
    StorageError::StorageError("transaction already finished".to_string())
}

#[async_trait]
impl DbAdapter for PgTransaction {
    async fn exec(&self, query: &str, params: &[Value]) -> Result<ExecResult, StorageError> {
        let args = bind_params(params)?;
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        let result = sqlx::query_with(query, args)
            .execute(&mut **tx)
            .await
            .map_err(storage_error)?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }

    async fn query(&self, query: &str, params: &[Value]) -> Result<Box<dyn Rows>, StorageError> {
        let args = bind_params(params)?;
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        let rows = sqlx::query_with(query, args)
            .fetch_all(&mut **tx)
            .await
            .map_err(storage_error)?;
        let columns = if rows.is_empty() {
            let statement = (&mut **tx).prepare(query).await.map_err(storage_error)?;
            column_names(&statement)
        } else {
            Vec::new()
        };
        Ok(Box::new(rows_to_cursor(&rows, columns)?))
    }

    fn is_transaction(&self) -> bool {
        true
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(&self) -> Result<(), StorageError> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        tx.commit().await.map_err(storage_error)
    }

    async fn rollback(&self) -> Result<(), StorageError> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        tx.rollback().await.map_err(storage_error)
    }

    fn as_adapter(&self) -> &dyn DbAdapter {
        self
    }
}
