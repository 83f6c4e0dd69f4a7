//! Binding result rows to record fields.

use std::sync::Arc;

use crate::{
    Dialect, FieldMetadata, Fields, Method, OpInfo, RecordMetadata, ScanError, StorageError, Value,
    ValueError,
};

#[derive(Debug, Clone, Copy)]
enum Binding {
    /// Column with no matching attribute; its value is discarded.
    Skip,
    Field(usize),
    Nested { outer: usize, inner: usize },
}

/// Column-to-field bindings for one result set.
///
/// Built once from the column list, then applied to every row.
#[derive(Debug)]
pub struct RowBinder {
    meta: Arc<RecordMetadata>,
    bindings: Vec<Binding>,
    op: OpInfo,
}

impl RowBinder {
    /// Bind `columns` to the attributes described by `meta`.
    ///
    /// Flat records bind by name (exact, then case-insensitive) and ignore
    /// unknown columns. Nested records bind by position over their
    /// sub-records' attributes in declaration order.
    pub fn new(
        meta: Arc<RecordMetadata>,
        columns: &[String],
        dialect: Dialect,
    ) -> Result<Self, StorageError> {
        let bindings = if meta.is_nested {
            let flattened: Vec<Binding> = meta
                .fields()
                .iter()
                .flat_map(|outer| {
                    let count = outer.nested.as_ref().map_or(0, |n| n.fields().len());
                    (0..count).map(move |inner| Binding::Nested {
                        outer: outer.position,
                        inner,
                    })
                })
                .collect();
            if flattened.len() != columns.len() {
                return Err(StorageError::InvalidQuery(format!(
                    "nested record {} expects {} columns, the query returned {}",
                    meta.type_name,
                    flattened.len(),
                    columns.len()
                )));
            }
            flattened
        } else {
            columns
                .iter()
                .map(|column| match meta.by_name(column) {
                    Some(field) => Binding::Field(field.position),
                    None => Binding::Skip,
                })
                .collect()
        };

        Ok(Self {
            meta,
            bindings,
            op: OpInfo {
                dialect,
                method: Method::Query,
            },
        })
    }

    /// Decode `row` into `dest`.
    pub fn scan<T: Fields + ?Sized>(
        &self,
        row: Vec<Value>,
        dest: &mut T,
    ) -> Result<(), StorageError> {
        if row.len() != self.bindings.len() {
            return Err(StorageError::InvalidQuery(format!(
                "row has {} values for {} columns",
                row.len(),
                self.bindings.len()
            )));
        }

        for (column, (binding, value)) in self.bindings.iter().zip(row).enumerate() {
            match *binding {
                Binding::Skip => {}
                Binding::Field(position) => {
                    let field = &self.meta.fields()[position];
                    self.bind(dest, field, self.meta.type_name, column, value)?;
                }
                Binding::Nested { outer, inner } => {
                    let outer_field = &self.meta.fields()[outer];
                    let Some(sub_meta) = &outer_field.nested else {
                        continue;
                    };
                    let field = &sub_meta.fields()[inner];
                    let sub = dest.nested_mut(outer).ok_or_else(|| {
                        ScanError::new(column, ValueError::UnknownPosition(outer))
                            .with_target(self.meta.type_name, outer_field.field)
                    })?;
                    self.bind(sub, field, sub_meta.type_name, column, value)?;
                }
            }
        }
        Ok(())
    }

    fn bind<T: Fields + ?Sized>(
        &self,
        dest: &mut T,
        field: &FieldMetadata,
        record: &str,
        column: usize,
        value: Value,
    ) -> Result<(), ScanError> {
        let decoded = match &field.modifier {
            Some(modifier) if modifier.has_decode() => modifier.decode(&self.op, value),
            _ => Ok(value),
        };
        decoded
            .and_then(|value| dest.set_field(field.position, value))
            .map_err(|e| ScanError::new(column, e).with_target(record, field.field))
    }
}
