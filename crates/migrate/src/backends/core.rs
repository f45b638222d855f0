//! Core Database Backend Traits
//!
//! The migration components never own a client. They are handed a
//! `DatabaseConnection` by the caller and run every statement through it, so
//! one session carries the advisory lock, the ledger queries and the migration
//! SQL for the whole run.

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::{MigrateError, MigrateResult};

/// Statement execution shared by connections and transactions
#[async_trait]
pub trait DatabaseExecutor: Send {
    /// Execute a parameterised statement and return affected rows count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64>;

    /// Execute raw SQL text, possibly holding several statements, without
    /// preparing it
    async fn execute_raw(&mut self, sql: &str) -> MigrateResult<()>;

    /// Execute a query and return the result rows
    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query and return the first result row
    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Option<Box<dyn DatabaseRow>>>;

    /// Execute a query that must return a row
    async fn fetch_one(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Box<dyn DatabaseRow>> {
        self.fetch_optional(sql, params)
            .await?
            .ok_or_else(|| MigrateError::database(format!("Query returned no rows: {}", sql)))
    }
}

/// A single database session
#[async_trait]
pub trait DatabaseConnection: DatabaseExecutor {
    /// Begin a transaction borrowing this connection until it is finished
    async fn begin_transaction<'a>(&'a mut self) -> MigrateResult<Box<dyn DatabaseTransaction + 'a>>;

    /// Close the session, releasing any session-level locks still held
    async fn close(self: Box<Self>) -> MigrateResult<()>;
}

/// An open transaction
#[async_trait]
pub trait DatabaseTransaction: DatabaseExecutor {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrateResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> MigrateResult<()>;
}

/// A result row
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by name
    fn get_by_name(&self, name: &str) -> MigrateResult<DatabaseValue>;
}

/// Database value enumeration for parameter binding and row access
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int64(i64),
    String(String),
    Timestamp(NaiveDateTime),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    pub fn as_i64(&self) -> MigrateResult<i64> {
        match self {
            DatabaseValue::Int64(value) => Ok(*value),
            other => Err(unexpected("integer", other)),
        }
    }

    pub fn as_bool(&self) -> MigrateResult<bool> {
        match self {
            DatabaseValue::Bool(value) => Ok(*value),
            other => Err(unexpected("boolean", other)),
        }
    }

    pub fn into_string(self) -> MigrateResult<String> {
        match self {
            DatabaseValue::String(value) => Ok(value),
            other => Err(unexpected("string", &other)),
        }
    }

    pub fn as_timestamp(&self) -> MigrateResult<Option<NaiveDateTime>> {
        match self {
            DatabaseValue::Timestamp(value) => Ok(Some(*value)),
            DatabaseValue::Null => Ok(None),
            other => Err(unexpected("timestamp", other)),
        }
    }
}

fn unexpected(expected: &str, found: &DatabaseValue) -> MigrateError {
    MigrateError::database(format!("Expected {} column value, found {:?}", expected, found))
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}
