//! PostgreSQL adapter for recordsql.
//!
//! Implements [`DbAdapter`] over an sqlx connection pool. Parameters are bound
//! from recordsql [`Value`]s and result rows are converted back by column type.
//!
//! # Usage
//!
//! ```text
//! use recordsql::{Config, Db};
//! use recordsql_postgres::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/app").await?;
//! let db = Db::new("postgres", pool, Config::default())?;
//! ```
//!
//! Result sets are materialized before they are handed to the scanner, so
//! chunked iteration bounds the size of each batch but not the memory held
//! for the whole result.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod bind;
mod executor;

pub use bind::{bind_params, bind_value, extract_column_value, rows_to_cursor};
pub use executor::{ConnectionConfig, PgPool, PgTransaction};

// Re-export core types for convenience
pub use recordsql::{DbAdapter, StorageError, Transaction, Value};
