//! Scripted in-memory adapter shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use recordsql::{
    Config, Db, DbAdapter, ExecResult, Record, Rows, StorageError, Transaction, Value, VecRows,
    async_trait,
};

/// A statement the adapter received.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub params: Vec<Value>,
    pub in_transaction: bool,
}

enum Scripted {
    Exec(ExecResult),
    Rows(VecRows),
    Error(String),
}

#[derive(Default)]
struct State {
    executed: Vec<Executed>,
    script: VecDeque<Scripted>,
    events: Vec<&'static str>,
    fail_rollback: bool,
}

/// Replays scripted results in order and records every statement.
///
/// Unscripted `exec` calls affect one row; unscripted queries return no rows.
#[derive(Clone, Default)]
pub struct MockAdapter {
    state: Arc<Mutex<State>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_exec(&self, rows_affected: u64, last_insert_id: Option<i64>) -> &Self {
        self.state
            .lock()
            .unwrap()
            .script
            .push_back(Scripted::Exec(ExecResult {
                rows_affected,
                last_insert_id,
            }));
        self
    }

    pub fn push_rows(&self, columns: &[&str], rows: Vec<Vec<Value>>) -> &Self {
        let columns = columns.iter().map(|c| c.to_string()).collect();
        self.state
            .lock()
            .unwrap()
            .script
            .push_back(Scripted::Rows(VecRows::new(columns, rows)));
        self
    }

    pub fn push_error(&self, message: &str) -> &Self {
        self.state
            .lock()
            .unwrap()
            .script
            .push_back(Scripted::Error(message.to_string()));
        self
    }

    pub fn fail_rollback(&self) {
        self.state.lock().unwrap().fail_rollback = true;
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn last(&self) -> Executed {
        self.executed().pop().unwrap()
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn db(&self, driver: &str) -> Db {
        Db::new(driver, self.clone(), Config::default()).unwrap()
    }

    fn record(&self, sql: &str, params: &[Value], in_transaction: bool) -> Option<Scripted> {
        let mut state = self.state.lock().unwrap();
        state.executed.push(Executed {
            sql: sql.to_string(),
            params: params.to_vec(),
            in_transaction,
        });
        state.script.pop_front()
    }

    fn exec_in(&self, sql: &str, params: &[Value], tx: bool) -> Result<ExecResult, StorageError> {
        match self.record(sql, params, tx) {
            Some(Scripted::Exec(result)) => Ok(result),
            Some(Scripted::Error(message)) => Err(StorageError::StorageError(message)),
            Some(Scripted::Rows(_)) | None => Ok(ExecResult {
                rows_affected: 1,
                last_insert_id: None,
            }),
        }
    }

    fn query_in(&self, sql: &str, params: &[Value], tx: bool) -> Result<Box<dyn Rows>, StorageError> {
        match self.record(sql, params, tx) {
            Some(Scripted::Rows(rows)) => Ok(Box::new(rows)),
            Some(Scripted::Error(message)) => Err(StorageError::StorageError(message)),
            Some(Scripted::Exec(_)) | None => Ok(Box::new(VecRows::default())),
        }
    }
}

#[async_trait]
impl DbAdapter for MockAdapter {
    async fn exec(&self, query: &str, params: &[Value]) -> Result<ExecResult, StorageError> {
        self.exec_in(query, params, false)
    }

    async fn query(&self, query: &str, params: &[Value]) -> Result<Box<dyn Rows>, StorageError> {
        self.query_in(query, params, false)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StorageError> {
        self.state.lock().unwrap().events.push("begin");
        Ok(Box::new(MockTransaction {
            adapter: self.clone(),
        }))
    }
}

pub struct MockTransaction {
    adapter: MockAdapter,
}

#[async_trait]
impl DbAdapter for MockTransaction {
    async fn exec(&self, query: &str, params: &[Value]) -> Result<ExecResult, StorageError> {
        self.adapter.exec_in(query, params, true)
    }

    async fn query(&self, query: &str, params: &[Value]) -> Result<Box<dyn Rows>, StorageError> {
        self.adapter.query_in(query, params, true)
    }

    fn is_transaction(&self) -> bool {
        true
    }
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn commit(&self) -> Result<(), StorageError> {
        self.adapter.state.lock().unwrap().events.push("commit");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StorageError> {
        let mut state = self.adapter.state.lock().unwrap();
        state.events.push("rollback");
        if state.fail_rollback {
            return Err(StorageError::StorageError("connection lost".to_string()));
        }
        Ok(())
    }

    fn as_adapter(&self) -> &dyn DbAdapter {
        self
    }
}

/// An adapter without transaction support.
pub struct PlainAdapter;

#[async_trait]
impl DbAdapter for PlainAdapter {
    async fn exec(&self, _query: &str, _params: &[Value]) -> Result<ExecResult, StorageError> {
        Ok(ExecResult::default())
    }

    async fn query(&self, _query: &str, _params: &[Value]) -> Result<Box<dyn Rows>, StorageError> {
        Ok(Box::new(VecRows::default()))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Record)]
pub struct User {
    #[column("id")]
    pub id: i64,
    #[column("name")]
    pub name: String,
    #[column("age")]
    pub age: i32,
}

impl User {
    pub fn new(name: &str, age: i32) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            age,
        }
    }
}

pub fn user_row(id: i64, name: &str, age: i32) -> Vec<Value> {
    vec![Value::Int(id), Value::from(name), Value::Int(age.into())]
}
