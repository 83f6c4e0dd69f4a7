//! The `Db` façade: typed records in, SQL out.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;

use futures::FutureExt;

use crate::builder::{self, Statement};
use crate::chunk::{self, ChunkParser};
use crate::{
    Catalog, DbAdapter, Dialect, ExecResult, InsertMethod, Key, ModifierRegistry, Record,
    RecordMetadata, RowBinder, Rows, StorageError, Table, Transaction, Value,
};

/// Configuration for a [`Db`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Modifiers available to `#[column("name,modifier")]` tags.
    pub registry: Arc<ModifierRegistry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: Arc::new(ModifierRegistry::with_builtins()),
        }
    }
}

#[derive(Clone)]
enum Conn {
    Adapter(Arc<dyn DbAdapter>),
    Tx(Arc<dyn Transaction>),
}

impl Conn {
    fn adapter(&self) -> &dyn DbAdapter {
        match self {
            Conn::Adapter(adapter) => adapter.as_ref(),
            Conn::Tx(tx) => tx.as_adapter(),
        }
    }
}

/// Typed access to a database through a [`DbAdapter`].
///
/// Cloning is cheap; clones share the metadata catalog and the adapter.
#[derive(Clone)]
pub struct Db {
    dialect: Dialect,
    catalog: Arc<Catalog>,
    conn: Conn,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("dialect", &self.dialect)
            .field("is_transaction", &self.is_transaction())
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Create a `Db` for the named driver.
    ///
    /// `driver` is one of `postgres`, `sqlite`, `mysql` or `sqlserver`.
    pub fn new(
        driver: &str,
        adapter: impl DbAdapter + 'static,
        config: Config,
    ) -> Result<Self, StorageError> {
        Self::with_adapter(driver, Arc::new(adapter), config)
    }

    /// Create a `Db` over an adapter that is already shared.
    pub fn with_adapter(
        driver: &str,
        adapter: Arc<dyn DbAdapter>,
        config: Config,
    ) -> Result<Self, StorageError> {
        let dialect = Dialect::from_driver(driver)?;
        Ok(Self {
            dialect,
            catalog: Arc::new(Catalog::new(config.registry)),
            conn: Conn::Adapter(adapter),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Whether statements run inside a transaction.
    pub fn is_transaction(&self) -> bool {
        self.conn.adapter().is_transaction()
    }

    /// Insert one record, writing a generated identifier back into it.
    pub async fn insert<T: Record>(&self, table: &Table, record: &mut T) -> Result<(), StorageError> {
        self.insert_many(table, std::slice::from_mut(record)).await
    }

    /// Insert several records with a single statement.
    ///
    /// Where the dialect returns generated identifiers (`RETURNING`,
    /// `OUTPUT`) they are written back into each record in order. With
    /// last-insert-id retrieval only a single inserted record gets its id.
    pub async fn insert_many<T: Record>(
        &self,
        table: &Table,
        records: &mut [T],
    ) -> Result<(), StorageError> {
        let meta = self.catalog.metadata::<T>()?;
        let stmt = builder::build_insert(self.dialect, table, &meta, records)?;

        match stmt.method {
            InsertMethod::Returning | InsertMethod::Output => {
                let mut rows = self.open("insert", &stmt.sql, &stmt.params).await?;
                let result = self.write_back(rows.as_mut(), &meta, records).await;
                let closed = rows.close().await;
                result
                    .and(closed)
                    .map_err(|e| e.in_query("insert", &stmt.sql))
            }
            InsertMethod::LastInsertId => {
                let result = self.run("insert", &stmt.sql, &stmt.params).await?;
                if let ([record], Some(id), [position]) =
                    (&mut *records, result.last_insert_id, stmt.id_positions.as_slice())
                {
                    if record.field_value(*position)?.is_zero() {
                        record.set_field(*position, Value::Int(id))?;
                    }
                }
                Ok(())
            }
            InsertMethod::NoRetrieval => {
                self.run("insert", &stmt.sql, &stmt.params).await?;
                Ok(())
            }
        }
    }

    async fn write_back<T: Record>(
        &self,
        rows: &mut dyn Rows,
        meta: &Arc<RecordMetadata>,
        records: &mut [T],
    ) -> Result<(), StorageError> {
        let binder = RowBinder::new(Arc::clone(meta), &rows.columns()?, self.dialect)?;
        for record in records.iter_mut() {
            match rows.next().await? {
                Some(row) => binder.scan(row, record)?,
                None => break,
            }
        }
        Ok(())
    }

    /// Update the non-identifier attributes of `record` that are set.
    ///
    /// Fails with [`StorageError::NotFound`] when no row matches the
    /// record's identifiers.
    pub async fn patch<T: Record>(&self, table: &Table, record: &T) -> Result<(), StorageError> {
        let meta = self.catalog.metadata::<T>()?;
        let stmt = builder::build_update(self.dialect, table, &meta, record)?;
        self.run_expecting_rows("patch", stmt).await
    }

    /// Update columns from a map holding every identifier column.
    pub async fn patch_map(
        &self,
        table: &Table,
        columns: &BTreeMap<String, Value>,
    ) -> Result<(), StorageError> {
        let stmt = builder::build_update_map(self.dialect, table, columns)?;
        self.run_expecting_rows("patch", stmt).await
    }

    /// Delete the row identified by `key`.
    pub async fn delete(&self, table: &Table, key: impl Into<Key>) -> Result<(), StorageError> {
        let stmt = builder::build_delete(self.dialect, table, &key.into())?;
        self.run_expecting_rows("delete", stmt).await
    }

    /// Delete the row identified by `record`'s identifier attributes.
    pub async fn delete_record<T: Record>(
        &self,
        table: &Table,
        record: &T,
    ) -> Result<(), StorageError> {
        let meta = self.catalog.metadata::<T>()?;
        let key = builder::record_key(table, &meta, record)?;
        self.delete(table, key).await
    }

    /// Run a query and decode every row into `T`.
    ///
    /// A query starting with `FROM` gets its column list from `T`.
    pub async fn query<T: Record>(
        &self,
        query: &str,
        params: &[Value],
    ) -> Result<Vec<T>, StorageError> {
        let (sql, mut rows, binder) = self.prepare::<T>(query, params).await?;
        let mut records = Vec::new();
        let result = async {
            while let Some(row) = rows.next().await? {
                let mut record = T::default();
                binder.scan(row, &mut record)?;
                records.push(record);
            }
            Ok::<(), StorageError>(())
        }
        .await;
        let closed = rows.close().await;
        result
            .and(closed)
            .map_err(|e| e.in_query("query", &sql))?;
        Ok(records)
    }

    /// Run a query and decode its first row.
    ///
    /// Fails with [`StorageError::NotFound`] when there are no rows.
    pub async fn query_one<T: Record>(
        &self,
        query: &str,
        params: &[Value],
    ) -> Result<T, StorageError> {
        let (sql, mut rows, binder) = self.prepare::<T>(query, params).await?;
        let result = async {
            let row = rows.next().await?.ok_or(StorageError::NotFound)?;
            let mut record = T::default();
            binder.scan(row, &mut record)?;
            Ok::<T, StorageError>(record)
        }
        .await;
        let closed = rows.close().await;
        let record = result.map_err(|e| e.in_query("query", &sql))?;
        closed.map_err(|e| e.in_query("query", &sql))?;
        Ok(record)
    }

    /// Stream query results through `parser.for_each_chunk` in batches.
    pub async fn query_chunks<T, F>(&self, parser: ChunkParser<'_, F>) -> Result<(), StorageError>
    where
        T: Record,
        F: AsyncFnMut(&[T]) -> Result<(), StorageError>,
    {
        if parser.chunk_size == 0 {
            return Err(StorageError::InvalidQuery(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        let (sql, rows, binder) = self.prepare::<T>(parser.query, &parser.params).await?;
        chunk::deliver(rows, binder, parser.chunk_size, parser.for_each_chunk)
            .await
            .map_err(|e| e.in_query("query", &sql))
    }

    /// Execute a raw statement.
    pub async fn exec(&self, query: &str, params: &[Value]) -> Result<ExecResult, StorageError> {
        self.run("exec", query, params).await
    }

    /// Run `f` inside a transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back when it
    /// returns `Err` or panics; a panic is resumed after the rollback. When
    /// this `Db` is already bound to a transaction `f` runs in it directly.
    pub async fn transaction<R, F>(&self, f: F) -> Result<R, StorageError>
    where
        F: AsyncFnOnce(&Db) -> Result<R, StorageError>,
    {
        if self.is_transaction() {
            return f(self).await;
        }

        let tx: Arc<dyn Transaction> = Arc::from(self.conn.adapter().begin().await?);
        tracing::debug!(dialect = %self.dialect, "transaction started");
        let scoped = Db {
            dialect: self.dialect,
            catalog: Arc::clone(&self.catalog),
            conn: Conn::Tx(Arc::clone(&tx)),
        };

        match AssertUnwindSafe(f(&scoped)).catch_unwind().await {
            Ok(Ok(value)) => {
                tx.commit().await?;
                tracing::debug!("transaction committed");
                Ok(value)
            }
            Ok(Err(err)) => match tx.rollback().await {
                Ok(()) => {
                    tracing::debug!(error = %err, "transaction rolled back");
                    Err(err)
                }
                Err(rollback) => {
                    tracing::warn!(error = %err, rollback = %rollback, "rollback failed");
                    Err(StorageError::Rollback {
                        source: Box::new(err),
                        rollback: Box::new(rollback),
                    })
                }
            },
            Err(payload) => match tx.rollback().await {
                Ok(()) => {
                    tracing::debug!("transaction rolled back after panic");
                    resume_unwind(payload)
                }
                Err(rollback) => {
                    tracing::warn!(rollback = %rollback, "rollback failed after panic");
                    resume_unwind(Box::new(format!(
                        "{} (rollback failed: {})",
                        panic_message(payload.as_ref()),
                        rollback
                    )))
                }
            },
        }
    }

    async fn prepare<T: Record>(
        &self,
        query: &str,
        params: &[Value],
    ) -> Result<(String, Box<dyn Rows>, RowBinder), StorageError> {
        let meta = self.catalog.metadata::<T>()?;
        let sql = builder::build_select::<T>(&self.catalog, self.dialect, query)?;
        let mut rows = self.open("query", &sql, params).await?;
        let binder = match rows.columns() {
            Ok(columns) => RowBinder::new(meta, &columns, self.dialect),
            Err(e) => Err(e),
        };
        match binder {
            Ok(binder) => Ok((sql, rows, binder)),
            Err(e) => {
                // The cursor is abandoned; a close failure would hide the binding error.
                let _ = rows.close().await;
                Err(e.in_query("query", &sql))
            }
        }
    }

    async fn open(
        &self,
        operation: &'static str,
        sql: &str,
        params: &[Value],
    ) -> Result<Box<dyn Rows>, StorageError> {
        tracing::debug!(operation, sql, params = params.len(), "running query");
        self.conn
            .adapter()
            .query(sql, params)
            .await
            .map_err(|e| e.in_query(operation, sql))
    }

    async fn run(
        &self,
        operation: &'static str,
        sql: &str,
        params: &[Value],
    ) -> Result<ExecResult, StorageError> {
        tracing::debug!(operation, sql, params = params.len(), "executing statement");
        self.conn
            .adapter()
            .exec(sql, params)
            .await
            .map_err(|e| e.in_query(operation, sql))
    }

    async fn run_expecting_rows(
        &self,
        operation: &'static str,
        stmt: Statement,
    ) -> Result<(), StorageError> {
        let result = self.run(operation, &stmt.sql, &stmt.params).await?;
        if result.rows_affected == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "panic"
    }
}
