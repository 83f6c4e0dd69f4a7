//! Statement construction from record metadata.
//!
//! Everything here is pure: given metadata, a dialect and record values the
//! functions return SQL text and the parameters in placeholder order. The
//! [`Db`](crate::Db) runs the statements and interprets their results.

use std::collections::BTreeMap;

use crate::{
    Catalog, Dialect, Fields, InsertMethod, Key, Method, OpInfo, Record, RecordMetadata,
    StorageError, Table, Value,
};

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// An INSERT statement and how to read generated identifiers back.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub sql: String,
    pub params: Vec<Value>,
    pub method: InsertMethod,
    /// Field positions of the table's identifier columns, in table order.
    pub id_positions: Vec<usize>,
}

/// Build an INSERT for one or more records of the same type.
///
/// Identifier columns that are zero in every record are left out so the
/// database generates them. Attributes whose modifier skips inserts are left
/// out too. Parameters are ordered row by row, columns in declaration order.
pub fn build_insert<T: Fields>(
    dialect: Dialect,
    table: &Table,
    meta: &RecordMetadata,
    records: &[T],
) -> Result<InsertStatement, StorageError> {
    ensure_flat(meta, "insert")?;
    let id_positions = id_positions(table, meta)?;
    if records.is_empty() {
        return Err(StorageError::InvalidQuery("no records to insert".to_string()));
    }

    let rows = records
        .iter()
        .map(|record| {
            meta.fields()
                .iter()
                .map(|f| record.field_value(f.position))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut included = Vec::new();
    for field in meta.fields() {
        if field.skip_inserts() {
            continue;
        }
        if table.is_id(&field.column) {
            let zeros = rows.iter().filter(|row| row[field.position].is_zero()).count();
            if zeros == rows.len() {
                continue;
            }
            if zeros != 0 {
                return Err(StorageError::InvalidQuery(format!(
                    "identifier {} must be set on every record or on none",
                    field.column
                )));
            }
        }
        included.push(field);
    }

    let op = OpInfo {
        dialect,
        method: Method::Insert,
    };
    let mut params = Vec::with_capacity(rows.len() * included.len());
    for row in &rows {
        for field in &included {
            let value = row[field.position].clone();
            let value = match &field.modifier {
                Some(modifier) => modifier.encode(&op, value)?,
                None => value,
            };
            params.push(value);
        }
    }

    let method = table.insert_method(dialect);
    let escaped_ids: Vec<String> = table.id_columns.iter().map(|c| dialect.escape(c)).collect();
    let output = match method {
        InsertMethod::Output => format!(
            " OUTPUT {}",
            escaped_ids
                .iter()
                .map(|id| format!("INSERTED.{}", id))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        _ => String::new(),
    };
    let returning = match method {
        InsertMethod::Returning => format!(" RETURNING {}", escaped_ids.join(", ")),
        _ => String::new(),
    };
    let table_name = dialect.escape(&table.name);

    let sql = if included.is_empty() {
        if records.len() > 1 {
            return Err(StorageError::InvalidQuery(
                "cannot insert several records made only of default values".to_string(),
            ));
        }
        let default_values = dialect.default_values().ok_or_else(|| {
            StorageError::InvalidQuery(format!(
                "{} does not support inserting a row of default values",
                dialect
            ))
        })?;
        format!("INSERT INTO {}{} {}{}", table_name, output, default_values, returning)
    } else {
        let columns: Vec<String> = included.iter().map(|f| dialect.escape(&f.column)).collect();
        let groups: Vec<String> = (0..rows.len())
            .map(|row| {
                let placeholders: Vec<String> = (0..included.len())
                    .map(|col| dialect.placeholder(row * included.len() + col))
                    .collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();
        format!(
            "INSERT INTO {} ({}){} VALUES {}{}",
            table_name,
            columns.join(", "),
            output,
            groups.join(", "),
            returning
        )
    };

    Ok(InsertStatement {
        sql,
        params,
        method,
        id_positions,
    })
}

/// Build a patch UPDATE for a single record.
///
/// Identifier columns go to the WHERE clause and must be non-zero. Attributes
/// whose modifier skips updates are left out, as are `NULL` attributes that
/// stay `NULL` after encoding (an unset `Option` means "leave unchanged").
pub fn build_update<T: Fields>(
    dialect: Dialect,
    table: &Table,
    meta: &RecordMetadata,
    record: &T,
) -> Result<Statement, StorageError> {
    ensure_flat(meta, "update")?;
    let id_positions = id_positions(table, meta)?;

    let op = OpInfo {
        dialect,
        method: Method::Update,
    };
    let mut sets = Vec::new();
    for field in meta.fields() {
        if table.is_id(&field.column) || field.skip_updates() {
            continue;
        }
        let raw = record.field_value(field.position)?;
        let unset = raw.is_null();
        let value = match &field.modifier {
            Some(modifier) => modifier.encode(&op, raw)?,
            None => raw,
        };
        // only hooks that fill in a NULL turn an unset attribute into a SET
        if unset && value.is_null() {
            continue;
        }
        sets.push((field.column.clone(), value));
    }

    let wheres = table
        .id_columns
        .iter()
        .zip(&id_positions)
        .map(|(column, &position)| Ok((column.clone(), record.field_value(position)?)))
        .collect::<Result<Vec<_>, StorageError>>()?;

    render_update(dialect, table, sets, wheres)
}

/// Build a patch UPDATE from a column → value map.
///
/// The map must hold every identifier column; all other entries are set,
/// `NULL` included.
pub fn build_update_map(
    dialect: Dialect,
    table: &Table,
    columns: &BTreeMap<String, Value>,
) -> Result<Statement, StorageError> {
    let wheres = table
        .id_columns
        .iter()
        .map(|id| {
            columns
                .get(id)
                .map(|v| (id.clone(), v.clone()))
                .ok_or_else(|| StorageError::MissingId(id.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let sets = columns
        .iter()
        .filter(|(column, _)| !table.is_id(column))
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect();

    render_update(dialect, table, sets, wheres)
}

fn render_update(
    dialect: Dialect,
    table: &Table,
    sets: Vec<(String, Value)>,
    wheres: Vec<(String, Value)>,
) -> Result<Statement, StorageError> {
    if sets.is_empty() {
        return Err(StorageError::NoValuesToUpdate);
    }
    if let Some((column, _)) = wheres.iter().find(|(_, value)| value.is_zero()) {
        return Err(StorageError::MissingId(column.clone()));
    }

    let mut params = Vec::with_capacity(sets.len() + wheres.len());
    let mut assignments = Vec::with_capacity(sets.len());
    for (column, value) in sets {
        assignments.push(format!(
            "{} = {}",
            dialect.escape(&column),
            dialect.placeholder(params.len())
        ));
        params.push(value);
    }

    let conditions = where_clause(dialect, wheres, &mut params);
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        dialect.escape(&table.name),
        assignments.join(", "),
        conditions
    );
    Ok(Statement { sql, params })
}

/// Build a DELETE for the row identified by `key`.
pub fn build_delete(dialect: Dialect, table: &Table, key: &Key) -> Result<Statement, StorageError> {
    let wheres = match key {
        Key::Single(value) => match table.id_columns.as_slice() {
            [id] => vec![(id.clone(), value.clone())],
            ids => {
                return Err(StorageError::InvalidKey(format!(
                    "table {} has {} identifier columns; pass a value for each",
                    table.name,
                    ids.len()
                )));
            }
        },
        Key::Columns(columns) => table
            .id_columns
            .iter()
            .map(|id| {
                columns
                    .get(id)
                    .map(|v| (id.clone(), v.clone()))
                    .ok_or_else(|| StorageError::InvalidKey(format!("missing identifier column {}", id)))
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    let mut params = Vec::with_capacity(wheres.len());
    let conditions = where_clause(dialect, wheres, &mut params);
    let sql = format!("DELETE FROM {} WHERE {}", dialect.escape(&table.name), conditions);
    Ok(Statement { sql, params })
}

/// Identifier values of `record` keyed by column, for deleting by record.
pub fn record_key<T: Fields>(
    table: &Table,
    meta: &RecordMetadata,
    record: &T,
) -> Result<Key, StorageError> {
    ensure_flat(meta, "delete")?;
    let positions = id_positions(table, meta)?;
    let columns = table
        .id_columns
        .iter()
        .zip(positions)
        .map(|(column, position)| Ok((column.clone(), record.field_value(position)?)))
        .collect::<Result<BTreeMap<_, _>, StorageError>>()?;
    Ok(Key::Columns(columns))
}

/// Resolve the query text for destination `T`.
///
/// Queries whose first token is `FROM` get a `SELECT <columns> ` prefix
/// synthesized from `T`'s metadata; anything else is used verbatim. Nested
/// destinations only accept the `FROM` form, since their columns are bound
/// by position.
pub fn build_select<T: Record>(
    catalog: &Catalog,
    dialect: Dialect,
    query: &str,
) -> Result<String, StorageError> {
    let meta = catalog.metadata::<T>()?;
    let first_token = query.split_whitespace().next().unwrap_or_default();
    if first_token.eq_ignore_ascii_case("from") {
        let prefix = catalog.select_prefix::<T>(dialect)?;
        return Ok(format!("{}{}", prefix, query.trim_start()));
    }
    if meta.is_nested {
        return Err(StorageError::InvalidQuery(format!(
            "queries into nested record {} must start with FROM",
            meta.type_name
        )));
    }
    Ok(query.to_string())
}

fn where_clause(dialect: Dialect, wheres: Vec<(String, Value)>, params: &mut Vec<Value>) -> String {
    let mut conditions = Vec::with_capacity(wheres.len());
    for (column, value) in wheres {
        conditions.push(format!(
            "{} = {}",
            dialect.escape(&column),
            dialect.placeholder(params.len())
        ));
        params.push(value);
    }
    conditions.join(" AND ")
}

fn ensure_flat(meta: &RecordMetadata, operation: &str) -> Result<(), StorageError> {
    if meta.is_nested {
        return Err(StorageError::invalid_record(
            meta.type_name,
            format!("nested records can only be queried, not used to {}", operation),
        ));
    }
    Ok(())
}

/// Positions of the table's identifier columns within `meta`.
fn id_positions(table: &Table, meta: &RecordMetadata) -> Result<Vec<usize>, StorageError> {
    if table.id_columns.is_empty() {
        return Err(StorageError::InvalidTable {
            table: table.name.clone(),
            reason: "at least one identifier column is required".to_string(),
        });
    }
    table
        .id_columns
        .iter()
        .map(|id| {
            meta.by_name(id)
                .filter(|f| &f.column == id)
                .map(|f| f.position)
                .ok_or_else(|| StorageError::InvalidTable {
                    table: table.name.clone(),
                    reason: format!("identifier column {} is not mapped by {}", id, meta.type_name),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ModifierRegistry, Record};
    use std::sync::Arc;

    #[derive(Debug, Default, Clone, PartialEq, Record)]
    struct User {
        #[column("id")]
        id: i64,
        #[column("name")]
        name: String,
        #[column("age")]
        age: i64,
    }

    #[derive(Debug, Default, Clone, Record)]
    struct Membership {
        #[column("user_id")]
        user_id: i64,
        #[column("group_id")]
        group_id: i64,
        #[column("role")]
        role: Option<String>,
        #[column("created_at,time_now_utc/skip_updates")]
        created_at: Option<chrono::DateTime<chrono::Utc>>,
        #[column("notes,skip_inserts")]
        notes: Option<String>,
    }

    fn catalog() -> Catalog {
        Catalog::new(Arc::new(ModifierRegistry::with_builtins()))
    }

    fn foo() -> User {
        User {
            id: 0,
            name: "foo".to_string(),
            age: 42,
        }
    }

    fn memberships() -> Table {
        Table::new("memberships").with_id_columns(["user_id", "group_id"])
    }

    #[test]
    fn insert_postgres_returns_id() {
        let meta = catalog().metadata::<User>().unwrap();
        let stmt = build_insert(Dialect::Postgres, &Table::new("t"), &meta, &[foo()]).unwrap();
        assert_eq!(
            stmt.sql,
            r#"INSERT INTO "t" ("name", "age") VALUES ($1, $2) RETURNING "id""#
        );
        assert_eq!(stmt.params, vec![Value::from("foo"), Value::Int(42)]);
        assert_eq!(stmt.method, InsertMethod::Returning);
        assert_eq!(stmt.id_positions, vec![0]);
    }

    #[test]
    fn insert_mysql_uses_last_insert_id() {
        let meta = catalog().metadata::<User>().unwrap();
        let stmt = build_insert(Dialect::Mysql, &Table::new("t"), &meta, &[foo()]).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO `t` (`name`, `age`) VALUES (?, ?)");
        assert_eq!(stmt.params, vec![Value::from("foo"), Value::Int(42)]);
        assert_eq!(stmt.method, InsertMethod::LastInsertId);
    }

    #[test]
    fn insert_sqlserver_places_output_before_values() {
        let meta = catalog().metadata::<User>().unwrap();
        let stmt = build_insert(Dialect::SqlServer, &Table::new("t"), &meta, &[foo()]).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO [t] ([name], [age]) OUTPUT INSERTED.[id] VALUES (@p1, @p2)"
        );
    }

    #[test]
    fn insert_keeps_explicit_ids() {
        let meta = catalog().metadata::<User>().unwrap();
        let user = User { id: 7, ..foo() };
        let stmt = build_insert(Dialect::Sqlite, &Table::new("t"), &meta, &[user]).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO `t` (`id`, `name`, `age`) VALUES (?, ?, ?)");
        assert_eq!(stmt.params[0], Value::Int(7));
    }

    #[test]
    fn batch_insert_is_row_major() {
        let meta = catalog().metadata::<User>().unwrap();
        let users: Vec<User> = (0..3)
            .map(|i| User {
                id: 0,
                name: format!("u{}", i),
                age: i,
            })
            .collect();
        let stmt = build_insert(Dialect::Postgres, &Table::new("users"), &meta, &users).unwrap();
        assert_eq!(
            stmt.sql,
            r#"INSERT INTO "users" ("name", "age") VALUES ($1, $2), ($3, $4), ($5, $6) RETURNING "id""#
        );
        assert_eq!(stmt.params.len(), 3 * 2);
        assert_eq!(
            stmt.params,
            vec![
                Value::from("u0"),
                Value::Int(0),
                Value::from("u1"),
                Value::Int(1),
                Value::from("u2"),
                Value::Int(2),
            ]
        );
    }

    #[test]
    fn batch_insert_rejects_partially_set_ids() {
        let meta = catalog().metadata::<User>().unwrap();
        let users = [foo(), User { id: 3, ..foo() }];
        let err = build_insert(Dialect::Postgres, &Table::new("users"), &meta, &users).unwrap_err();
        assert!(matches!(err, StorageError::InvalidQuery(_)));
    }

    #[test]
    fn insert_applies_modifiers() {
        let meta = catalog().metadata::<Membership>().unwrap();
        let row = Membership {
            user_id: 1,
            group_id: 2,
            notes: Some("ignored".into()),
            ..Default::default()
        };
        let stmt = build_insert(Dialect::Postgres, &memberships(), &meta, &[row]).unwrap();
        assert_eq!(
            stmt.sql,
            r#"INSERT INTO "memberships" ("user_id", "group_id", "role", "created_at") VALUES ($1, $2, $3, $4) RETURNING "user_id", "group_id""#
        );
        assert_eq!(stmt.params[2], Value::Null);
        assert!(matches!(stmt.params[3], Value::Datetime(_)));
    }

    #[test]
    fn insert_default_values() {
        #[derive(Default, Record)]
        struct Counter {
            #[column("id")]
            id: i64,
        }

        let meta = catalog().metadata::<Counter>().unwrap();
        let table = Table::new("counters");
        let stmt = build_insert(Dialect::Postgres, &table, &meta, &[Counter::default()]).unwrap();
        assert_eq!(stmt.sql, r#"INSERT INTO "counters" DEFAULT VALUES RETURNING "id""#);
        assert!(stmt.params.is_empty());

        let stmt = build_insert(Dialect::SqlServer, &table, &meta, &[Counter::default()]).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO [counters] OUTPUT INSERTED.[id] DEFAULT VALUES");

        let err = build_insert(Dialect::Mysql, &table, &meta, &[Counter::default()]).unwrap_err();
        assert!(matches!(err, StorageError::InvalidQuery(_)));
    }

    #[test]
    fn insert_rejects_unmapped_id_column() {
        let meta = catalog().metadata::<User>().unwrap();
        let table = Table::new("t").with_id_columns(["uuid"]);
        let err = build_insert(Dialect::Postgres, &table, &meta, &[foo()]).unwrap_err();
        assert!(matches!(err, StorageError::InvalidTable { .. }));
    }

    #[test]
    fn update_numbers_where_after_set() {
        let meta = catalog().metadata::<User>().unwrap();
        let user = User { id: 5, ..foo() };
        let stmt = build_update(Dialect::Postgres, &Table::new("users"), &meta, &user).unwrap();
        assert_eq!(
            stmt.sql,
            r#"UPDATE "users" SET "name" = $1, "age" = $2 WHERE "id" = $3"#
        );
        assert_eq!(
            stmt.params,
            vec![Value::from("foo"), Value::Int(42), Value::Int(5)]
        );
    }

    #[test]
    fn update_rejects_zero_id() {
        let meta = catalog().metadata::<User>().unwrap();
        let err = build_update(Dialect::Postgres, &Table::new("users"), &meta, &foo()).unwrap_err();
        assert!(matches!(err, StorageError::MissingId(col) if col == "id"));
    }

    #[test]
    fn update_skips_absent_and_skip_update_attributes() {
        let meta = catalog().metadata::<Membership>().unwrap();
        let row = Membership {
            user_id: 1,
            group_id: 2,
            role: Some("admin".into()),
            notes: Some("n".into()),
            ..Default::default()
        };
        let stmt = build_update(Dialect::SqlServer, &memberships(), &meta, &row).unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE [memberships] SET [role] = @p1, [notes] = @p2 WHERE [user_id] = @p3 AND [group_id] = @p4"
        );
    }

    #[test]
    fn update_leaves_unset_json_attributes_alone() {
        #[derive(Debug, Default, Clone, Record)]
        struct Profile {
            #[column("id")]
            id: i64,
            #[column("name")]
            name: Option<String>,
            #[column("prefs,json")]
            prefs: Option<crate::Json<Vec<u32>>>,
        }

        let meta = catalog().metadata::<Profile>().unwrap();
        let profiles = Table::new("profiles");
        let row = Profile {
            id: 1,
            name: Some("x".into()),
            prefs: None,
        };
        let stmt = build_update(Dialect::Postgres, &profiles, &meta, &row).unwrap();
        assert_eq!(stmt.sql, r#"UPDATE "profiles" SET "name" = $1 WHERE "id" = $2"#);
        assert_eq!(stmt.params, vec![Value::from("x"), Value::Int(1)]);

        let row = Profile {
            id: 1,
            name: None,
            prefs: Some(crate::Json(vec![1, 2])),
        };
        let stmt = build_update(Dialect::Sqlite, &profiles, &meta, &row).unwrap();
        assert_eq!(stmt.sql, "UPDATE `profiles` SET `prefs` = ? WHERE `id` = ?");
        assert_eq!(stmt.params, vec![Value::from("[1,2]"), Value::Int(1)]);
    }

    #[test]
    fn update_with_nothing_to_set() {
        let meta = catalog().metadata::<Membership>().unwrap();
        let row = Membership {
            user_id: 1,
            group_id: 2,
            ..Default::default()
        };
        let err = build_update(Dialect::Postgres, &memberships(), &meta, &row).unwrap_err();
        assert!(matches!(err, StorageError::NoValuesToUpdate));
    }

    #[test]
    fn update_from_map() {
        let mut columns = BTreeMap::new();
        columns.insert("id".to_string(), Value::Int(9));
        columns.insert("name".to_string(), Value::Null);
        let stmt = build_update_map(Dialect::Mysql, &Table::new("users"), &columns).unwrap();
        assert_eq!(stmt.sql, "UPDATE `users` SET `name` = ? WHERE `id` = ?");
        assert_eq!(stmt.params, vec![Value::Null, Value::Int(9)]);

        columns.remove("id");
        let err = build_update_map(Dialect::Mysql, &Table::new("users"), &columns).unwrap_err();
        assert!(matches!(err, StorageError::MissingId(_)));
    }

    #[test]
    fn delete_single_and_composite() {
        let stmt = build_delete(Dialect::Postgres, &Table::new("users"), &Key::from(3)).unwrap();
        assert_eq!(stmt.sql, r#"DELETE FROM "users" WHERE "id" = $1"#);
        assert_eq!(stmt.params, vec![Value::Int(3)]);

        let key = Key::from([("group_id", 2), ("user_id", 1)]);
        let stmt = build_delete(Dialect::Postgres, &memberships(), &key).unwrap();
        assert_eq!(
            stmt.sql,
            r#"DELETE FROM "memberships" WHERE "user_id" = $1 AND "group_id" = $2"#
        );
        assert_eq!(stmt.params, vec![Value::Int(1), Value::Int(2)]);

        let err = build_delete(Dialect::Postgres, &memberships(), &Key::from(1)).unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));

        let partial = Key::from([("user_id", 1)]);
        assert!(build_delete(Dialect::Postgres, &memberships(), &partial).is_err());
    }

    #[test]
    fn select_prefix_for_from_queries() {
        let catalog = catalog();
        let sql = build_select::<User>(&catalog, Dialect::Postgres, "FROM users WHERE age > $1")
            .unwrap();
        assert_eq!(
            sql,
            r#"SELECT "id", "name", "age" FROM users WHERE age > $1"#
        );

        let sql = build_select::<User>(&catalog, Dialect::Mysql, "  from users").unwrap();
        assert_eq!(sql, "SELECT `id`, `name`, `age` from users");

        let verbatim = "SELECT name FROM users";
        assert_eq!(
            build_select::<User>(&catalog, Dialect::Postgres, verbatim).unwrap(),
            verbatim
        );
    }
}
