//! Cached per-type record metadata.
//!
//! The catalog turns the [`RecordShape`] produced by `#[derive(Record)]` into
//! a [`RecordMetadata`] once per type: tags are parsed, modifiers resolved
//! against the registry and name indexes built. Entries are immutable after
//! insertion, so readers only ever clone an `Arc`.

use std::any::TypeId;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use dashmap::DashMap;

use crate::{Dialect, FieldKind, Modifier, ModifierRegistry, Record, RecordShape, StorageError};

/// Metadata for one mapped field.
#[derive(Debug, Clone)]
pub struct FieldMetadata {
    /// Position among the mapped fields, in declaration order.
    pub position: usize,
    /// Rust field name.
    pub field: &'static str,
    /// Column name, or table name for a nested record.
    pub column: String,
    pub modifier_name: Option<String>,
    pub modifier: Option<Arc<Modifier>>,
    /// Metadata of the sub-record when this field is a nested record.
    pub nested: Option<Arc<RecordMetadata>>,
}

impl FieldMetadata {
    pub fn skip_inserts(&self) -> bool {
        self.modifier.as_ref().is_some_and(|m| m.skip_inserts)
    }

    pub fn skip_updates(&self) -> bool {
        self.modifier.as_ref().is_some_and(|m| m.skip_updates)
    }
}

/// Immutable description of a record type.
#[derive(Debug)]
pub struct RecordMetadata {
    pub type_name: &'static str,
    /// Whether the type is composed of nested records rather than columns.
    pub is_nested: bool,
    fields: Vec<FieldMetadata>,
    by_name: HashMap<String, usize>,
    by_lower_name: HashMap<String, usize>,
}

impl RecordMetadata {
    pub fn fields(&self) -> &[FieldMetadata] {
        &self.fields
    }

    pub fn field(&self, position: usize) -> Option<&FieldMetadata> {
        self.fields.get(position)
    }

    /// Look a column up by name, falling back to a case-insensitive match.
    pub fn by_name(&self, name: &str) -> Option<&FieldMetadata> {
        self.by_name
            .get(name)
            .or_else(|| self.by_lower_name.get(&name.to_lowercase()))
            .and_then(|&pos| self.fields.get(pos))
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.column.as_str())
    }
}

/// Type-indexed cache of [`RecordMetadata`].
#[derive(Debug)]
pub struct Catalog {
    registry: Arc<ModifierRegistry>,
    records: DashMap<TypeId, Arc<RecordMetadata>>,
    select_prefixes: DashMap<(Dialect, TypeId), Arc<str>>,
}

impl Catalog {
    pub fn new(registry: Arc<ModifierRegistry>) -> Self {
        Self {
            registry,
            records: DashMap::new(),
            select_prefixes: DashMap::new(),
        }
    }

    /// Metadata for `T`, built on first use.
    ///
    /// Two threads missing the cache at the same time both build the entry;
    /// the later insert wins and both results are equivalent.
    pub fn metadata<T: Record>(&self) -> Result<Arc<RecordMetadata>, StorageError> {
        if let Some(meta) = self.cached(TypeId::of::<T>()) {
            return Ok(meta);
        }
        self.load(T::shape())
    }

    /// The `SELECT <columns> ` prefix for queries written as `FROM ...`.
    pub fn select_prefix<T: Record>(&self, dialect: Dialect) -> Result<Arc<str>, StorageError> {
        let key = (dialect, TypeId::of::<T>());
        if let Some(prefix) = self.select_prefixes.get(&key) {
            return Ok(Arc::clone(prefix.value()));
        }

        let meta = self.metadata::<T>()?;
        let columns: Vec<String> = if meta.is_nested {
            meta.fields()
                .iter()
                .flat_map(|outer| {
                    let table = dialect.escape(&outer.column);
                    outer
                        .nested
                        .iter()
                        .flat_map(|inner| inner.fields().iter())
                        .map(move |f| format!("{}.{}", table, dialect.escape(&f.column)))
                })
                .collect()
        } else {
            meta.column_names().map(|c| dialect.escape(c)).collect()
        };

        let prefix: Arc<str> = Arc::from(format!("SELECT {} ", columns.join(", ")));
        self.select_prefixes.insert(key, Arc::clone(&prefix));
        Ok(prefix)
    }

    fn cached(&self, type_id: TypeId) -> Option<Arc<RecordMetadata>> {
        self.records.get(&type_id).map(|m| Arc::clone(m.value()))
    }

    fn load(&self, shape: RecordShape) -> Result<Arc<RecordMetadata>, StorageError> {
        if let Some(meta) = self.cached(shape.type_id) {
            return Ok(meta);
        }

        let type_id = shape.type_id;
        let meta = Arc::new(self.build(shape)?);
        tracing::trace!(record = meta.type_name, fields = meta.fields.len(), "cached record metadata");
        self.records.insert(type_id, Arc::clone(&meta));
        Ok(meta)
    }

    fn build(&self, shape: RecordShape) -> Result<RecordMetadata, StorageError> {
        let record = shape.type_name;
        if shape.fields.is_empty() {
            return Err(StorageError::invalid_record(
                record,
                "must contain at least one mapped attribute",
            ));
        }

        let nested_count = shape.fields.iter().filter(|f| f.is_nested()).count();
        if nested_count != 0 && nested_count != shape.fields.len() {
            return Err(StorageError::invalid_record(
                record,
                "cannot mix column-tagged and table-tagged attributes",
            ));
        }
        let is_nested = nested_count != 0;

        let mut fields = Vec::with_capacity(shape.fields.len());
        let mut by_name = HashMap::new();
        let mut by_lower_name = HashMap::new();

        for (position, field) in shape.fields.iter().enumerate() {
            let (column, modifier_name, nested) = match field.kind {
                FieldKind::Column => {
                    let (column, modifier) = parse_tag(record, field.field, field.tag)?;
                    (column, modifier, None)
                }
                FieldKind::Nested(sub_shape) => {
                    let table = field.tag.trim();
                    if table.is_empty() {
                        return Err(StorageError::invalid_record(
                            record,
                            format!("attribute {} has an empty table name", field.field),
                        ));
                    }
                    let sub = self.load(sub_shape())?;
                    if sub.is_nested {
                        return Err(StorageError::invalid_record(
                            record,
                            format!(
                                "attribute {} is a nested record; nesting is one level deep",
                                field.field
                            ),
                        ));
                    }
                    (table.to_string(), None, Some(sub))
                }
            };

            let modifier = match &modifier_name {
                Some(name) => Some(self.registry.get(name).ok_or_else(|| {
                    StorageError::UnknownModifier {
                        record: record.to_string(),
                        field: field.field.to_string(),
                        modifier: name.clone(),
                    }
                })?),
                None => None,
            };

            match by_name.entry(column.clone()) {
                Entry::Occupied(_) => {
                    return Err(StorageError::invalid_record(
                        record,
                        format!("duplicate name {} on attribute {}", column, field.field),
                    ));
                }
                Entry::Vacant(slot) => {
                    slot.insert(position);
                }
            }
            by_lower_name.entry(column.to_lowercase()).or_insert(position);

            fields.push(FieldMetadata {
                position,
                field: field.field,
                column,
                modifier_name,
                modifier,
                nested,
            });
        }

        Ok(RecordMetadata {
            type_name: record,
            is_nested,
            fields,
            by_name,
            by_lower_name,
        })
    }
}

/// Split a `name[,modifier]` column tag.
fn parse_tag(
    record: &str,
    field: &str,
    tag: &str,
) -> Result<(String, Option<String>), StorageError> {
    let mut parts = tag.split(',').map(str::trim);
    let name = parts.next().unwrap_or_default();
    let modifier = parts.next();
    if name.is_empty() || parts.next().is_some() || modifier.is_some_and(str::is_empty) {
        return Err(StorageError::invalid_record(
            record,
            format!("malformed tag {:?} on attribute {}", tag, field),
        ));
    }
    Ok((name.to_string(), modifier.map(str::to_string)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldShape, Fields, Value, ValueError};

    /// Hand-written record so shapes the derive rejects can be exercised.
    #[derive(Default)]
    struct Raw;

    impl Fields for Raw {
        fn field_value(&self, position: usize) -> Result<Value, ValueError> {
            Err(ValueError::UnknownPosition(position))
        }

        fn set_field(&mut self, position: usize, _value: Value) -> Result<(), ValueError> {
            Err(ValueError::UnknownPosition(position))
        }
    }

    fn shape(fields: Vec<FieldShape>) -> RecordShape {
        RecordShape {
            type_id: TypeId::of::<Raw>(),
            type_name: "Raw",
            fields,
        }
    }

    fn catalog() -> Catalog {
        Catalog::new(Arc::new(ModifierRegistry::with_builtins()))
    }

    #[test]
    fn concurrent_first_lookups_agree() {
        #[derive(Default, crate::Record)]
        struct Account {
            #[column("id")]
            id: i64,
            #[column("email")]
            email: String,
        }

        let catalog = catalog();
        let barrier = std::sync::Barrier::new(8);
        let results: Vec<Arc<RecordMetadata>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        catalog.metadata::<Account>().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for meta in &results {
            assert_eq!(meta.column_names().collect::<Vec<_>>(), ["id", "email"]);
        }
        assert_eq!(catalog.records.len(), 1);
        let cached = catalog.metadata::<Account>().unwrap();
        assert_eq!(cached.column_names().collect::<Vec<_>>(), ["id", "email"]);
    }

    #[test]
    fn parses_tags_and_modifiers() {
        let meta = catalog()
            .build(shape(vec![
                FieldShape::column("id", "id"),
                FieldShape::column("address", "address, json"),
            ]))
            .unwrap();
        assert!(!meta.is_nested);
        assert_eq!(meta.column_names().collect::<Vec<_>>(), ["id", "address"]);
        let address = meta.by_name("address").unwrap();
        assert_eq!(address.modifier_name.as_deref(), Some("json"));
        assert!(address.modifier.as_ref().unwrap().has_encode());
    }

    #[test]
    fn name_lookup_falls_back_to_case_insensitive() {
        let meta = catalog()
            .build(shape(vec![FieldShape::column("user_name", "UserName")]))
            .unwrap();
        assert_eq!(meta.by_name("UserName").unwrap().field, "user_name");
        assert_eq!(meta.by_name("username").unwrap().field, "user_name");
        assert!(meta.by_name("other").is_none());
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = catalog()
            .build(shape(vec![
                FieldShape::column("a", "name"),
                FieldShape::column("b", "name"),
            ]))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate name name"));
    }

    #[test]
    fn rejects_unknown_modifier() {
        let err = catalog()
            .build(shape(vec![FieldShape::column("a", "a,nope")]))
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownModifier { modifier, .. } if modifier == "nope"));
    }

    #[test]
    fn rejects_malformed_tags() {
        for tag in ["", ",json", "a,json,extra", "a,"] {
            let err = catalog()
                .build(shape(vec![FieldShape::column("a", tag)]))
                .unwrap_err();
            assert!(err.to_string().contains("malformed tag"), "tag {:?}", tag);
        }
    }

    #[test]
    fn rejects_records_without_mapped_attributes() {
        let err = catalog().build(shape(Vec::new())).unwrap_err();
        assert!(err.to_string().contains("at least one mapped attribute"));
    }

    #[test]
    fn rejects_mixed_shapes() {
        fn inner() -> RecordShape {
            RecordShape {
                type_id: TypeId::of::<u8>(),
                type_name: "Inner",
                fields: vec![FieldShape::column("x", "x")],
            }
        }
        let err = catalog()
            .build(shape(vec![
                FieldShape::column("a", "a"),
                FieldShape::nested("b", "b", inner),
            ]))
            .unwrap_err();
        assert!(err.to_string().contains("cannot mix"));
    }
}
