//! Record traits for typed row mapping.
//!
//! Types implementing [`Record`] can be inserted, patched, deleted and
//! scanned by [`Db`](crate::Db). Add `#[derive(Record)]` to a struct with
//! named fields to generate the implementation.

use std::any::TypeId;

use crate::{Value, ValueError};

/// Trait for types that map to a table row.
///
/// The derive produces a [`RecordShape`] describing the tagged fields and
/// positional accessors over them. Positions count mapped fields only, in
/// declaration order.
///
/// # Example
///
/// ```text
/// #[derive(Record, Default)]
/// pub struct User {
///     #[column("id")]
///     pub id: i64,
///     #[column("name")]
///     pub name: String,
///     #[column("address,json")]
///     pub address: Json<Address>,
///     // untagged fields are not mapped
///     pub cached: Option<String>,
/// }
/// ```
///
/// # Nested records
///
/// A struct whose fields carry `#[table("...")]` instead of `#[column]` is a
/// nested record. Each field is itself a `Record`; nested records can only be
/// used as query destinations and bind a JOIN result positionally.
///
/// ```text
/// #[derive(Record, Default)]
/// pub struct PostWithAuthor {
///     #[table("users")]
///     pub author: User,
///     #[table("posts")]
///     pub post: Post,
/// }
/// ```
pub trait Record: Fields + Default + Send + Sync + 'static {
    /// Describe the mapped fields of this type.
    fn shape() -> RecordShape;
}

/// Positional access to the mapped fields of a record.
///
/// Object safe, so the scanner can descend into nested records without
/// knowing their concrete types.
pub trait Fields {
    /// Read the field at `position` as a [`Value`].
    fn field_value(&self, position: usize) -> Result<Value, ValueError>;

    /// Overwrite the field at `position` from a [`Value`].
    fn set_field(&mut self, position: usize, value: Value) -> Result<(), ValueError>;

    /// Borrow the nested record at `position`, if that field is one.
    fn nested_mut(&mut self, _position: usize) -> Option<&mut dyn Fields> {
        None
    }
}

/// Static description of a record type, produced by the derive.
#[derive(Debug, Clone)]
pub struct RecordShape {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub fields: Vec<FieldShape>,
}

/// A single tagged field.
#[derive(Debug, Clone)]
pub struct FieldShape {
    /// Rust field name.
    pub field: &'static str,
    /// Raw tag: `name[,modifier]` for columns, the table name for nested
    /// records.
    pub tag: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Column,
    Nested(fn() -> RecordShape),
}

impl FieldShape {
    pub fn column(field: &'static str, tag: &'static str) -> Self {
        Self {
            field,
            tag,
            kind: FieldKind::Column,
        }
    }

    pub fn nested(field: &'static str, table: &'static str, shape: fn() -> RecordShape) -> Self {
        Self {
            field,
            tag: table,
            kind: FieldKind::Nested(shape),
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.kind, FieldKind::Nested(_))
    }
}
