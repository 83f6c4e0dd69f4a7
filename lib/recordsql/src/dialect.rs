//! Per-backend SQL syntax.

use std::fmt;

use crate::StorageError;

/// How generated identifiers are read back after an INSERT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMethod {
    /// `INSERT ... RETURNING <ids>`
    Returning,
    /// `INSERT ... OUTPUT INSERTED.<ids> VALUES ...`
    Output,
    /// Driver-reported last insert id.
    LastInsertId,
    /// Identifiers are not written back.
    NoRetrieval,
}

/// A supported SQL backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    Sqlite,
    Mysql,
    SqlServer,
}

impl Dialect {
    /// Resolve a driver name.
    pub fn from_driver(driver: &str) -> Result<Self, StorageError> {
        match driver {
            "postgres" => Ok(Dialect::Postgres),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "mysql" => Ok(Dialect::Mysql),
            "sqlserver" => Ok(Dialect::SqlServer),
            other => Err(StorageError::UnsupportedDriver(other.to_string())),
        }
    }

    pub fn driver_name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
            Dialect::Mysql => "mysql",
            Dialect::SqlServer => "sqlserver",
        }
    }

    /// Quote an identifier.
    pub fn escape(&self, ident: &str) -> String {
        match self {
            Dialect::Postgres => format!("\"{}\"", ident),
            Dialect::SqlServer => format!("[{}]", ident),
            Dialect::Sqlite | Dialect::Mysql => format!("`{}`", ident),
        }
    }

    /// Placeholder for the parameter at zero-based `idx`.
    pub fn placeholder(&self, idx: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", idx + 1),
            Dialect::SqlServer => format!("@p{}", idx + 1),
            Dialect::Sqlite | Dialect::Mysql => "?".to_string(),
        }
    }

    /// Identifier retrieval strategy for a table with `id_count` id columns.
    pub fn insert_method(&self, id_count: usize) -> InsertMethod {
        match self {
            Dialect::Postgres => InsertMethod::Returning,
            Dialect::SqlServer => InsertMethod::Output,
            Dialect::Sqlite | Dialect::Mysql if id_count == 1 => InsertMethod::LastInsertId,
            Dialect::Sqlite | Dialect::Mysql => InsertMethod::NoRetrieval,
        }
    }

    /// Clause inserting a row made only of column defaults, if supported.
    pub fn default_values(&self) -> Option<&'static str> {
        match self {
            Dialect::Postgres | Dialect::Sqlite | Dialect::SqlServer => Some("DEFAULT VALUES"),
            Dialect::Mysql => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.driver_name())
    }
}
