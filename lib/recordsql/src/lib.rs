//! recordsql - Typed record mapping and dialect-aware SQL generation.
//!
//! Calling code works with plain structs instead of hand-written SQL strings.
//! A struct deriving [`Record`] is introspected once; its metadata drives the
//! INSERT, UPDATE, DELETE and SELECT statements [`Db`] generates and the
//! scanning of result rows back into records.
//!
//! # Core Concepts
//!
//! - **Record**: a struct whose fields are tagged with `#[column("name")]`,
//!   optionally naming a modifier: `#[column("address,json")]`.
//! - **Nested record**: a struct of `#[table("name")]` sub-records, used as the
//!   destination of a JOIN.
//! - **Modifier**: encode/decode hooks plus skip flags, looked up by name in a
//!   [`ModifierRegistry`].
//! - **Dialect**: escaping, placeholders and identifier retrieval for
//!   postgres, sqlite, mysql and sqlserver.
//! - **Adapter**: the [`DbAdapter`] a backend implements to run statements.
//!
//! # Usage
//!
//! ```text
//! use recordsql::{Config, Db, Record, Table};
//!
//! #[derive(Record, Default)]
//! pub struct User {
//!     #[column("id")]
//!     pub id: i64,
//!     #[column("name")]
//!     pub name: String,
//! }
//!
//! let db = Db::new("postgres", adapter, Config::default())?;
//! let users = Table::new("users");
//!
//! let mut user = User { id: 0, name: "ana".into() };
//! db.insert(&users, &mut user).await?;     // user.id is now set
//!
//! let found: User = db.query_one("FROM users WHERE id = $1", &[user.id.into()]).await?;
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result, clippy::panic)
)]

// Lets the derive's `::recordsql::` paths resolve inside this crate's tests.
extern crate self as recordsql;

mod adapter;
pub mod builder;
mod chunk;
mod db;
mod dialect;
mod error;
mod metadata;
mod modifier;
mod record;
mod scanner;
mod table;
mod value;

pub use adapter::{DbAdapter, ExecResult, Rows, Transaction, VecRows};
pub use builder::{InsertStatement, Statement};
pub use chunk::ChunkParser;
pub use db::{Config, Db};
pub use dialect::{Dialect, InsertMethod};
pub use error::{ScanError, StorageError, ValueError};
pub use metadata::{Catalog, FieldMetadata, RecordMetadata};
pub use modifier::{Method, Modifier, ModifierRegistry, OpInfo};
pub use record::{FieldKind, FieldShape, Fields, Record, RecordShape};
pub use scanner::RowBinder;
pub use table::{Key, Table};
pub use value::{FromValue, Json, ToValue, Value};

// Re-export derive macro
pub use recordsql_derive::Record;

// Re-export async_trait so adapters can implement the traits without a direct dependency
pub use async_trait::async_trait;
